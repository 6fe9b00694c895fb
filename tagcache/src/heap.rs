//! Indexed expiration heap.
//!
//! A binary min-heap of tracked entries ordered by expiration, then by
//! insertion order. Every record gets a [`HeapHandle`] that stays valid across
//! reorderings, so a record can be removed in `O(log n)` without searching.

use serde::{Deserialize, Serialize};

/// Stable reference to a record inside an [`ExpirationHeap`].
///
/// A handle is invalidated when its record leaves the heap and may later be
/// reused for another record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeapHandle(u32);

impl HeapHandle {
    fn slot(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
struct HeapRecord {
    key: String,
    expires_at: u64,
    bytes: usize,
    seq: u64,
    handle: HeapHandle,
}

impl HeapRecord {
    fn precedes(&self, other: &HeapRecord) -> bool {
        (self.expires_at, self.seq) < (other.expires_at, other.seq)
    }
}

/// Min-heap of `(key, expiry, bytes)` with lookup by handle.
#[derive(Debug, Default)]
pub struct ExpirationHeap {
    records: Vec<HeapRecord>,
    // handle -> current position in `records`
    positions: Vec<Option<usize>>,
    free: Vec<HeapHandle>,
    next_seq: u64,
}

impl ExpirationHeap {
    /// Creates an empty heap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` when nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Expiration of the earliest-expiring record.
    pub fn peek_expiry(&self) -> Option<u64> {
        self.records.first().map(|record| record.expires_at)
    }

    /// Inserts a record and returns its handle.
    pub fn put(&mut self, key: impl Into<String>, expires_at: u64, bytes: usize) -> HeapHandle {
        let handle = match self.free.pop() {
            Some(handle) => handle,
            None => {
                let handle = HeapHandle(self.positions.len() as u32);
                self.positions.push(None);
                handle
            }
        };
        let seq = self.next_seq;
        self.next_seq += 1;

        let index = self.records.len();
        self.records.push(HeapRecord {
            key: key.into(),
            expires_at,
            bytes,
            seq,
            handle,
        });
        self.positions[handle.slot()] = Some(index);
        self.sift_up(index);
        handle
    }

    /// Removes the record behind `handle`, returning its key and size.
    ///
    /// Returns `None` for a handle that no longer tracks anything.
    pub fn remove(&mut self, handle: HeapHandle) -> Option<(String, usize)> {
        let index = (*self.positions.get(handle.slot())?)?;
        Some(self.remove_at(index))
    }

    /// Removes the earliest-expiring record.
    pub fn remove_first(&mut self) -> Option<(String, usize)> {
        if self.records.is_empty() {
            None
        } else {
            Some(self.remove_at(0))
        }
    }

    fn remove_at(&mut self, index: usize) -> (String, usize) {
        let record = self.records.swap_remove(index);
        self.positions[record.handle.slot()] = None;
        self.free.push(record.handle);
        if index < self.records.len() {
            self.positions[self.records[index].handle.slot()] = Some(index);
            self.sift_down(index);
            self.sift_up(index);
        }
        (record.key, record.bytes)
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.records.swap(a, b);
        self.positions[self.records[a].handle.slot()] = Some(a);
        self.positions[self.records[b].handle.slot()] = Some(b);
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if !self.records[index].precedes(&self.records[parent]) {
                break;
            }
            self.swap(index, parent);
            index = parent;
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.records.len();
        loop {
            let left = 2 * index + 1;
            let right = left + 1;
            let mut smallest = index;
            if left < len && self.records[left].precedes(&self.records[smallest]) {
                smallest = left;
            }
            if right < len && self.records[right].precedes(&self.records[smallest]) {
                smallest = right;
            }
            if smallest == index {
                break;
            }
            self.swap(index, smallest);
            index = smallest;
        }
    }
}
