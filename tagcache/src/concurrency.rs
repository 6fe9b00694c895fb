//! Single-flight coordination of cache population.
//!
//! For every fingerprint at most one request runs the handler. Concurrent
//! requests for the same fingerprint wait until the primary finishes, then
//! look the cache up again.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;
use tracing::trace;

type Flights = DashMap<String, (u64, watch::Receiver<()>)>;

/// Keyed registry of in-flight populations.
#[derive(Debug, Default, Clone)]
pub struct SingleFlight {
    flights: Arc<Flights>,
    generation: Arc<AtomicU64>,
}

/// Outcome of [`SingleFlight::acquire`].
#[derive(Debug)]
pub enum Flight {
    /// The caller populates the fingerprint; other callers wait on it.
    Primary(FlightGuard),
    /// Another caller is populating the fingerprint.
    Wait(Waiter),
}

impl SingleFlight {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins the flight for `key`, becoming its primary if none is running.
    pub fn acquire(&self, key: &str) -> Flight {
        match self.flights.entry(key.to_owned()) {
            Entry::Occupied(entry) => Flight::Wait(Waiter {
                done: entry.get().1.clone(),
            }),
            Entry::Vacant(entry) => {
                let id = self.generation.fetch_add(1, Ordering::Relaxed);
                let (sender, receiver) = watch::channel(());
                entry.insert((id, receiver));
                trace!(key = %key, "single-flight primary");
                Flight::Primary(FlightGuard {
                    flights: Arc::clone(&self.flights),
                    key: key.to_owned(),
                    id,
                    _done: sender,
                })
            }
        }
    }

    /// Number of fingerprints currently being populated.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }
}

/// Held by the primary for the duration of a population.
///
/// Dropping it, on success, error or panic alike, releases the waiters.
#[derive(Debug)]
pub struct FlightGuard {
    flights: Arc<Flights>,
    key: String,
    id: u64,
    // Dropped after the map entry is gone, which closes the channel.
    _done: watch::Sender<()>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.flights.remove_if(&self.key, |_, (id, _)| *id == self.id);
    }
}

/// Handle of a caller waiting for another caller's population.
#[derive(Debug)]
pub struct Waiter {
    done: watch::Receiver<()>,
}

impl Waiter {
    /// Resolves once the primary released its guard.
    pub async fn wait(mut self) {
        // The primary never sends: `changed` returns once the sender is gone.
        while self.done.changed().await.is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn second_caller_waits_for_primary() {
        let flights = SingleFlight::new();
        let Flight::Primary(guard) = flights.acquire("k") else {
            panic!("first caller must be primary");
        };
        let Flight::Wait(waiter) = flights.acquire("k") else {
            panic!("second caller must wait");
        };
        assert_eq!(flights.in_flight(), 1);

        let waiting = tokio::spawn(waiter.wait());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiting.is_finished());

        drop(guard);
        waiting.await.unwrap();
        assert_eq!(flights.in_flight(), 0);
        assert!(matches!(flights.acquire("k"), Flight::Primary(_)));
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let flights = SingleFlight::new();
        let _a = flights.acquire("a");
        assert!(matches!(flights.acquire("b"), Flight::Primary(_)));
    }

    #[tokio::test]
    async fn panicking_primary_releases_waiters() {
        let flights = SingleFlight::new();
        let Flight::Primary(guard) = flights.acquire("k") else {
            panic!("first caller must be primary");
        };
        let Flight::Wait(waiter) = flights.acquire("k") else {
            panic!("second caller must wait");
        };
        let primary = tokio::spawn(async move {
            let _guard = guard;
            panic!("handler blew up");
        });
        assert!(primary.await.is_err());
        waiter.wait().await;
        assert_eq!(flights.in_flight(), 0);
    }
}
