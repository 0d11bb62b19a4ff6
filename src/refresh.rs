//! Read-path actor: periodically refreshes the aggregate view and hands it to a sink.

use crate::aggregate::{AlertThresholds, Aggregator, RefreshOutcome, Snapshot};
use crate::error::StoreError;
use crate::store::StoreConnector;
use serde::Serialize;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// What the presentation layer is given each cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RefreshView {
    NoData,
    Unavailable { reason: String },
    Snapshot(Snapshot),
}

impl From<Result<RefreshOutcome, StoreError>> for RefreshView {
    fn from(result: Result<RefreshOutcome, StoreError>) -> Self {
        match result {
            Ok(RefreshOutcome::Empty) => RefreshView::NoData,
            Ok(RefreshOutcome::Snapshot(snapshot)) => RefreshView::Snapshot(snapshot),
            Err(err) => RefreshView::Unavailable {
                reason: err.to_string(),
            },
        }
    }
}

pub trait SnapshotSink: Send {
    fn render(&mut self, view: &RefreshView);
}

#[derive(Debug, Clone)]
pub struct RefreshSettings {
    pub interval: Duration,
    pub window_size: usize,
    pub thresholds: AlertThresholds,
}

pub struct RefreshScheduler<C> {
    connector: C,
    settings: RefreshSettings,
}

impl<C: StoreConnector> RefreshScheduler<C> {
    pub fn new(connector: C, settings: RefreshSettings) -> Self {
        Self {
            connector,
            settings,
        }
    }

    /// Opens a session, then refreshes on every tick until cancelled. Only the
    /// session failure is returned; per-cycle query errors become `Unavailable`.
    pub async fn run<K: SnapshotSink>(
        self,
        mut sink: K,
        cancel: CancellationToken,
    ) -> Result<(), StoreError> {
        let store = self.connector.connect().await.map_err(|err| {
            tracing::error!(error=%err, "refresh scheduler could not open a store session");
            err
        })?;
        let aggregator = Aggregator::new(store, self.settings.thresholds);

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(
            interval_ms = self.settings.interval.as_millis() as u64,
            window_size = self.settings.window_size,
            "refresh scheduler running"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let result = aggregator.refresh(self.settings.window_size).await;
                    if let Err(err) = &result {
                        tracing::warn!(error=%err, "refresh failed; showing unavailable state");
                    }
                    sink.render(&RefreshView::from(result));
                }
            }
        }

        aggregator.close().await;
        tracing::info!("refresh scheduler stopped");
        Ok(())
    }

    /// A single refresh cycle on a fresh session.
    pub async fn refresh_once(&self) -> Result<RefreshView, StoreError> {
        let store = self.connector.connect().await?;
        let aggregator = Aggregator::new(store, self.settings.thresholds);
        let result = aggregator.refresh(self.settings.window_size).await;
        aggregator.close().await;
        Ok(RefreshView::from(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{stored, wait_for, MemoryConnector, MemoryStore};
    use chrono::Utc;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingSink {
        views: Arc<Mutex<Vec<RefreshView>>>,
    }

    impl RecordingSink {
        fn len(&self) -> usize {
            self.views.lock().unwrap().len()
        }

        fn views(&self) -> Vec<RefreshView> {
            self.views.lock().unwrap().clone()
        }
    }

    impl SnapshotSink for RecordingSink {
        fn render(&mut self, view: &RefreshView) {
            self.views.lock().unwrap().push(view.clone());
        }
    }

    fn settings() -> RefreshSettings {
        RefreshSettings {
            interval: Duration::from_millis(5),
            window_size: 50,
            thresholds: AlertThresholds::default(),
        }
    }

    #[tokio::test]
    async fn empty_store_renders_no_data() {
        let store = MemoryStore::new();
        let sink = RecordingSink::default();
        let cancel = CancellationToken::new();
        let scheduler = RefreshScheduler::new(MemoryConnector::new(store.clone()), settings());
        let handle = tokio::spawn(scheduler.run(sink.clone(), cancel.clone()));

        wait_for(|| sink.len() >= 2).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert!(sink.views().iter().all(|view| *view == RefreshView::NoData));
        assert_eq!(store.closes(), 1);
    }

    #[tokio::test]
    async fn query_failures_render_unavailable_and_keep_ticking() {
        let store = MemoryStore::new();
        store.set_fail_queries(true);
        let sink = RecordingSink::default();
        let cancel = CancellationToken::new();
        let scheduler = RefreshScheduler::new(MemoryConnector::new(store.clone()), settings());
        let handle = tokio::spawn(scheduler.run(sink.clone(), cancel.clone()));

        wait_for(|| sink.len() >= 2).await;
        store.set_fail_queries(false);
        store.push(stored("EQ-001", 101.0, 1.0, 150, Utc::now()));
        wait_for(|| {
            sink.views()
                .iter()
                .any(|view| matches!(view, RefreshView::Snapshot(_)))
        })
        .await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let views = sink.views();
        assert!(matches!(views[0], RefreshView::Unavailable { .. }));
        let RefreshView::Snapshot(snapshot) = views.last().unwrap() else {
            panic!("expected a snapshot last");
        };
        assert_eq!(snapshot.summary.temperature_alerts, 1);
    }

    #[tokio::test]
    async fn timed_out_query_renders_unavailable_then_recovers() {
        let store = MemoryStore::new();
        store.set_stall_queries(true);
        store.push(stored("EQ-003", 80.0, 1.0, 150, Utc::now()));
        let sink = RecordingSink::default();
        let cancel = CancellationToken::new();
        let scheduler = RefreshScheduler::new(MemoryConnector::new(store.clone()), settings());
        let handle = tokio::spawn(scheduler.run(sink.clone(), cancel.clone()));

        wait_for(|| sink.len() >= 1).await;
        store.set_stall_queries(false);
        wait_for(|| {
            sink.views()
                .iter()
                .any(|view| matches!(view, RefreshView::Snapshot(_)))
        })
        .await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let views = sink.views();
        let RefreshView::Unavailable { reason } = &views[0] else {
            panic!("expected unavailable first, got {:?}", views[0]);
        };
        assert!(reason.contains("timed out"), "{reason}");
        assert_eq!(store.closes(), 1);
    }

    #[tokio::test]
    async fn refused_session_is_fatal_to_the_scheduler_only() {
        let sink = RecordingSink::default();
        let scheduler = RefreshScheduler::new(MemoryConnector::refusing(), settings());
        let err = scheduler
            .run(sink.clone(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(sink.len(), 0);
    }

    #[tokio::test]
    async fn refresh_once_closes_its_session() {
        let store = MemoryStore::new();
        store.push(stored("EQ-002", 90.0, 2.1, 50, Utc::now()));
        let scheduler = RefreshScheduler::new(MemoryConnector::new(store.clone()), settings());
        let view = scheduler.refresh_once().await.unwrap();
        let RefreshView::Snapshot(snapshot) = view else {
            panic!("expected a snapshot");
        };
        assert_eq!(snapshot.summary.vibration_alerts, 1);
        assert_eq!(snapshot.summary.throughput_alerts, 1);
        assert_eq!(store.closes(), 1);
    }

    #[test]
    fn unavailable_view_serializes_with_reason() {
        let view = RefreshView::from(Err(StoreError::operation("query_latest", "timeout")));
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["state"], "unavailable");
        assert_eq!(json["reason"], "store query_latest failed: timeout");
    }
}
