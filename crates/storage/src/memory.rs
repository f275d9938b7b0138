//! In-memory backend
//!
//! Serves as the `dummy` backend and as the test double for the orchestrator:
//! it records every write and can be told to fail on chosen paths.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use assetsync_core::config::Settings;
use async_trait::async_trait;

use crate::{CachePolicy, RemoteObject, Storage, StorageError};

const BACKEND: &str = "dummy";

/// In-memory object store
#[derive(Debug)]
pub struct MemoryStorage {
    base_url: String,
    policy: CachePolicy,
    objects: Mutex<BTreeMap<String, RemoteObject>>,
    fail_paths: Mutex<BTreeSet<String>>,
    fail_open: bool,
    fail_close: bool,
    write_delay: Option<Duration>,
    is_open: AtomicBool,
    opens: AtomicUsize,
    closes: AtomicUsize,
    writes: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new("dummy://media")
    }
}

impl MemoryStorage {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            policy: CachePolicy::default(),
            objects: Mutex::new(BTreeMap::new()),
            fail_paths: Mutex::new(BTreeSet::new()),
            fail_open: false,
            fail_close: false,
            write_delay: None,
            is_open: AtomicBool::new(false),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.dummy.base_url.clone()).with_cache_policy(CachePolicy::from_settings(settings))
    }

    #[must_use]
    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Make `open` fail
    #[must_use]
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Make `close` fail
    #[must_use]
    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// Hold every write for `delay`, so concurrent uploads overlap
    #[must_use]
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Make writes (and checksum lookups) for `remote_path` fail
    pub fn fail_on(&self, remote_path: impl Into<String>) {
        lock(&self.fail_paths).insert(remote_path.into());
    }

    /// Stop failing on `remote_path`
    pub fn recover(&self, remote_path: &str) {
        lock(&self.fail_paths).remove(remote_path);
    }

    /// Stored object at `remote_path`
    #[must_use]
    pub fn get(&self, remote_path: &str) -> Option<RemoteObject> {
        lock(&self.objects).get(remote_path).cloned()
    }

    /// All stored paths, sorted
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        lock(&self.objects).keys().cloned().collect()
    }

    /// Total number of writes, companions included
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Highest number of writes observed in progress at once
    #[must_use]
    pub fn max_concurrent_writes(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Forget everything that was written
    pub fn clear(&self) {
        lock(&self.objects).clear();
        self.writes.store(0, Ordering::SeqCst);
    }

    fn check(&self, remote_path: &str) -> Result<(), StorageError> {
        if !self.is_open.load(Ordering::SeqCst) {
            return Err(StorageError::NotOpen);
        }
        if lock(&self.fail_paths).contains(remote_path) {
            return Err(StorageError::request(BACKEND, format!("injected failure for {remote_path}")));
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[async_trait]
impl Storage for MemoryStorage {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn open(&self) -> Result<(), StorageError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err(StorageError::request(BACKEND, "injected open failure"));
        }
        self.is_open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.is_open.store(false, Ordering::SeqCst);
        if self.fail_close {
            return Err(StorageError::request(BACKEND, "injected close failure"));
        }
        Ok(())
    }

    fn remote_base_url(&self, _secure: bool) -> Result<String, StorageError> {
        Ok(self.base_url.trim_end_matches('/').to_string())
    }

    async fn stored_checksum(&self, remote_path: &str) -> Result<Option<String>, StorageError> {
        self.check(remote_path)?;
        Ok(lock(&self.objects)
            .get(remote_path)
            .map(|object| object.source_checksum.to_base64()))
    }

    async fn write(&self, object: RemoteObject) -> Result<(), StorageError> {
        self.check(&object.path)?;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.writes.fetch_add(1, Ordering::SeqCst);
        lock(&self.objects).insert(object.path.clone(), object);
        Ok(())
    }

    fn cache_policy(&self) -> CachePolicy {
        self.policy
    }
}
