use crate::error::StoreError;
use crate::reading::{Reading, StoredReading};
use crate::store::{ReadingStore, StoreConnector};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How long a timed-out memory operation stalls before reporting `Timeout`.
pub const STALL: Duration = Duration::from_millis(5);

pub fn stored(
    equipment_id: &str,
    temperature: f64,
    vibration: f64,
    throughput: i32,
    recorded_at: DateTime<Utc>,
) -> StoredReading {
    StoredReading {
        equipment_id: equipment_id.to_string(),
        temperature: Some(temperature),
        vibration: Some(vibration),
        throughput: Some(throughput),
        recorded_at,
    }
}

#[derive(Default)]
struct MemoryInner {
    rows: Mutex<Vec<StoredReading>>,
    failing_inserts: Mutex<HashSet<usize>>,
    stalled_inserts: Mutex<HashSet<usize>>,
    fail_queries: AtomicBool,
    stall_queries: AtomicBool,
    insert_attempts: AtomicUsize,
    query_calls: AtomicUsize,
    closes: AtomicUsize,
}

/// Shared in-memory store. Clones are handles onto the same rows and counters.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, row: StoredReading) {
        self.inner.rows.lock().unwrap().push(row);
    }

    /// Zero-based insert attempt numbers that should fail.
    pub fn fail_inserts(&self, attempts: impl IntoIterator<Item = usize>) {
        self.inner.failing_inserts.lock().unwrap().extend(attempts);
    }

    /// Zero-based insert attempt numbers that stall and then time out.
    pub fn stall_inserts(&self, attempts: impl IntoIterator<Item = usize>) {
        self.inner.stalled_inserts.lock().unwrap().extend(attempts);
    }

    pub fn set_fail_queries(&self, fail: bool) {
        self.inner.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub fn set_stall_queries(&self, stall: bool) {
        self.inner.stall_queries.store(stall, Ordering::SeqCst);
    }

    pub fn rows(&self) -> Vec<StoredReading> {
        self.inner.rows.lock().unwrap().clone()
    }

    pub fn insert_attempts(&self) -> usize {
        self.inner.insert_attempts.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.inner.query_calls.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }
}

impl ReadingStore for MemoryStore {
    async fn insert(&self, reading: &Reading) -> Result<(), StoreError> {
        let attempt = self.inner.insert_attempts.fetch_add(1, Ordering::SeqCst);
        if self.inner.failing_inserts.lock().unwrap().contains(&attempt) {
            return Err(StoreError::operation("insert", "simulated failure"));
        }
        let stalled = self.inner.stalled_inserts.lock().unwrap().contains(&attempt);
        if stalled {
            tokio::time::sleep(STALL).await;
            return Err(StoreError::Timeout {
                operation: "insert",
                after: STALL,
            });
        }
        self.push(StoredReading::from(reading.clone()));
        Ok(())
    }

    async fn query_latest(&self, limit: usize) -> Result<Vec<StoredReading>, StoreError> {
        self.inner.query_calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_queries.load(Ordering::SeqCst) {
            return Err(StoreError::operation("query_latest", "simulated failure"));
        }
        if self.inner.stall_queries.load(Ordering::SeqCst) {
            tokio::time::sleep(STALL).await;
            return Err(StoreError::Timeout {
                operation: "query_latest",
                after: STALL,
            });
        }
        let mut rows: Vec<StoredReading> = self.rows().into_iter().rev().collect();
        rows.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn close(self) {
        self.inner.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MemoryConnector {
    store: MemoryStore,
    refuse: bool,
}

impl MemoryConnector {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            refuse: false,
        }
    }

    pub fn refusing() -> Self {
        Self {
            store: MemoryStore::new(),
            refuse: true,
        }
    }
}

impl StoreConnector for MemoryConnector {
    type Store = MemoryStore;

    async fn connect(&self) -> Result<MemoryStore, StoreError> {
        if self.refuse {
            return Err(StoreError::connection("connection refused"));
        }
        Ok(self.store.clone())
    }
}

/// Polls `condition` until it holds, panicking after two seconds.
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
