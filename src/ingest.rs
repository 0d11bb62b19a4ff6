//! Write-path actor: generate one reading per tick and append it to the store.

use crate::error::StoreError;
use crate::generator::ReadingGenerator;
use crate::reading::{KnownEquipment, Reading};
use crate::store::{ReadingStore, StoreConnector};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Stopping,
    Failed,
    Stopped,
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug)]
pub struct IngestStats {
    pub attempts: AtomicU64,
    pub inserted: AtomicU64,
    pub failed: AtomicU64,
    pub rejected: AtomicU64,
    pub last_insert_unix_ms: AtomicU64,
    pub last_error: Mutex<Option<String>>,
}

impl IngestStats {
    pub fn new() -> Self {
        Self {
            attempts: AtomicU64::new(0),
            inserted: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            last_insert_unix_ms: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn record_error(&self, err: impl Into<String>) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = Some(err.into());
        }
    }

    pub fn clear_error(&self) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = None;
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|guard| guard.clone())
    }
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}

pub struct IngestionLoop<C> {
    connector: C,
    generator: ReadingGenerator,
    known: KnownEquipment,
    interval: Duration,
    rng: StdRng,
    clock: Arc<dyn Clock>,
    last_stamp: Option<DateTime<Utc>>,
    stats: Arc<IngestStats>,
    state: watch::Sender<LoopState>,
}

impl<C> IngestionLoop<C>
where
    C: StoreConnector,
{
    /// Accepts the generator's own equipment set; narrow it with [`Self::with_known_equipment`].
    pub fn new(connector: C, generator: ReadingGenerator, interval: Duration) -> Self {
        let known = generator.equipment().clone();
        let (state, _) = watch::channel(LoopState::Idle);
        Self {
            connector,
            generator,
            known,
            interval,
            rng: StdRng::from_entropy(),
            clock: Arc::new(SystemClock),
            last_stamp: None,
            stats: Arc::new(IngestStats::new()),
            state,
        }
    }

    pub fn with_known_equipment(mut self, known: KnownEquipment) -> Self {
        self.known = known;
        self
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        self.stats.clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    /// Runs until `cancel` fires. Only a failure to open the store session is
    /// returned; insert failures are logged and the next tick goes ahead.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), StoreError> {
        let store = match self.connector.connect().await {
            Ok(store) => store,
            Err(err) => {
                tracing::error!(error=%err, "ingest loop could not open a store session");
                self.set_state(LoopState::Failed);
                self.set_state(LoopState::Stopped);
                return Err(err);
            }
        };
        self.set_state(LoopState::Running);
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            equipment = ?self.known.ids(),
            "ingest loop running"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let recorded_at = self.next_stamp();
            let reading = self.generator.generate(&mut self.rng, recorded_at);
            self.tick(&store, reading).await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        self.set_state(LoopState::Stopping);
        store.close().await;
        self.set_state(LoopState::Stopped);
        tracing::info!(
            attempts = self.stats.attempts.load(Ordering::Relaxed),
            inserted = self.stats.inserted.load(Ordering::Relaxed),
            failed = self.stats.failed.load(Ordering::Relaxed),
            rejected = self.stats.rejected.load(Ordering::Relaxed),
            "ingest loop stopped"
        );
        Ok(())
    }

    async fn tick(&self, store: &C::Store, reading: Reading) {
        if !self.known.contains(&reading.equipment_id) {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(equipment = %reading.equipment_id, "rejected reading for unknown equipment");
            return;
        }

        self.stats.attempts.fetch_add(1, Ordering::Relaxed);
        match store.insert(&reading).await {
            Ok(()) => {
                self.stats.inserted.fetch_add(1, Ordering::Relaxed);
                let now = Utc::now().timestamp_millis().max(0) as u64;
                self.stats.last_insert_unix_ms.store(now, Ordering::Relaxed);
                self.stats.clear_error();
                tracing::info!(
                    equipment = %reading.equipment_id,
                    temperature = reading.temperature,
                    vibration = reading.vibration,
                    throughput = reading.throughput,
                    recorded_at = %reading.recorded_at,
                    "inserted reading"
                );
            }
            Err(err) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                self.stats.record_error(err.to_string());
                tracing::warn!(
                    error = %err,
                    equipment = %reading.equipment_id,
                    "insert failed; sample dropped"
                );
            }
        }
    }

    // Never behind the previous stamp, even if the wall clock steps back.
    fn next_stamp(&mut self) -> DateTime<Utc> {
        let now = self.clock.now();
        let stamp = match self.last_stamp {
            Some(prev) if prev > now => prev,
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }

    fn set_state(&self, state: LoopState) {
        self.state.send_replace(state);
        tracing::debug!(?state, "ingest loop state");
    }
}
