#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use tagcache::{BoxError, DeleteStatus, MemoryStorage, Storage, StorageError, StorageResult};

#[derive(Debug, thiserror::Error)]
#[error("injected storage failure")]
pub struct Injected;

/// Storage double wrapping [`MemoryStorage`] with switchable failures.
#[derive(Clone, Default)]
pub struct FlakyStorage {
    inner: MemoryStorage,
    pub fail_get: Arc<AtomicBool>,
    pub fail_set: Arc<AtomicBool>,
    pub fail_delete: Arc<AtomicBool>,
    /// Keys whose reads fail regardless of `fail_get`.
    pub broken_keys: Arc<Mutex<Vec<String>>>,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn break_key(&self, key: &str) {
        self.broken_keys.lock().unwrap().push(key.to_owned());
    }

    pub fn repair_keys(&self) {
        self.broken_keys.lock().unwrap().clear();
    }

    pub fn memory(&self) -> &MemoryStorage {
        &self.inner
    }

    fn check(flag: &AtomicBool) -> StorageResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(StorageError::connection(Injected))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>> {
        Self::check(&self.fail_get)?;
        if self.broken_keys.lock().unwrap().iter().any(|k| k == key) {
            return Err(StorageError::connection(Injected));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StorageResult<()> {
        Self::check(&self.fail_set)?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> StorageResult<DeleteStatus> {
        Self::check(&self.fail_delete)?;
        self.inner.delete(key).await
    }

    async fn reset(&self) -> StorageResult<()> {
        self.inner.reset().await
    }

    async fn close(&self) -> StorageResult<()> {
        self.inner.close().await
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

pub fn get(uri: &str) -> Request<()> {
    Request::get(uri).body(()).unwrap()
}

pub fn body(text: &'static str) -> Result<Response<Bytes>, BoxError> {
    Ok(Response::new(Bytes::from_static(text.as_bytes())))
}

/// Handler counting its invocations.
pub fn counting(
    calls: &Arc<AtomicUsize>,
    text: &'static str,
) -> impl FnOnce(Request<()>) -> std::future::Ready<Result<Response<Bytes>, BoxError>> + Send + 'static
{
    let calls = Arc::clone(calls);
    move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        std::future::ready(body(text))
    }
}
