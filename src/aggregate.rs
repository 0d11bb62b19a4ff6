//! Threshold classification and window statistics for the read path.
//!
//! Everything here is recomputed from scratch on each refresh; nothing carries
//! over between cycles.

use crate::error::StoreError;
use crate::reading::StoredReading;
use crate::store::ReadingStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    /// Alert when temperature is strictly above this.
    pub temperature_critical: f64,
    /// Alert when vibration is strictly above this.
    pub vibration_critical: f64,
    /// Alert when throughput is strictly below this.
    pub throughput_minimum: i32,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            temperature_critical: 100.0,
            vibration_critical: 2.0,
            throughput_minimum: 100,
        }
    }
}

/// Highlight kinds, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Overheating,
    HighVibration,
    LowThroughput,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::Overheating => "overheating",
            AlertKind::HighVibration => "high_vibration",
            AlertKind::LowThroughput => "low_throughput",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AlertClassification {
    pub temperature_alert: bool,
    pub vibration_alert: bool,
    pub throughput_alert: bool,
}

impl AlertClassification {
    /// Missing or non-finite values never alert.
    pub fn classify(reading: &StoredReading, thresholds: &AlertThresholds) -> Self {
        Self {
            temperature_alert: reading
                .temperature
                .is_some_and(|value| value.is_finite() && value > thresholds.temperature_critical),
            vibration_alert: reading
                .vibration
                .is_some_and(|value| value.is_finite() && value > thresholds.vibration_critical),
            throughput_alert: reading
                .throughput
                .is_some_and(|value| value < thresholds.throughput_minimum),
        }
    }

    pub fn alert_count(&self) -> usize {
        [self.temperature_alert, self.vibration_alert, self.throughput_alert]
            .iter()
            .filter(|flag| **flag)
            .count()
    }

    pub fn is_alerting(&self) -> bool {
        self.alert_count() > 0
    }

    /// The single highlight for a row: overheating wins, then vibration, then throughput.
    pub fn primary_alert(&self) -> Option<AlertKind> {
        if self.temperature_alert {
            Some(AlertKind::Overheating)
        } else if self.vibration_alert {
            Some(AlertKind::HighVibration)
        } else if self.throughput_alert {
            Some(AlertKind::LowThroughput)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedReading {
    #[serde(flatten)]
    pub reading: StoredReading,
    pub alerts: AlertClassification,
}

/// Means are `None` when no row in the window has a usable value for that field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryStats {
    pub rows: usize,
    pub mean_temperature: Option<f64>,
    pub mean_vibration: Option<f64>,
    pub mean_throughput: Option<f64>,
    pub temperature_alerts: usize,
    pub vibration_alerts: usize,
    pub throughput_alerts: usize,
}

impl SummaryStats {
    pub fn from_rows(rows: &[ClassifiedReading]) -> Self {
        Self {
            rows: rows.len(),
            mean_temperature: mean(rows.iter().filter_map(|row| row.reading.temperature)),
            mean_vibration: mean(rows.iter().filter_map(|row| row.reading.vibration)),
            mean_throughput: mean(
                rows.iter()
                    .filter_map(|row| row.reading.throughput.map(f64::from)),
            ),
            temperature_alerts: rows.iter().filter(|row| row.alerts.temperature_alert).count(),
            vibration_alerts: rows.iter().filter(|row| row.alerts.vibration_alert).count(),
            throughput_alerts: rows.iter().filter(|row| row.alerts.throughput_alert).count(),
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .filter(|value| value.is_finite())
        .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub recorded_at: DateTime<Utc>,
    pub temperature: Option<f64>,
    pub vibration: Option<f64>,
    pub throughput: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub summary: SummaryStats,
    /// Store order: newest first.
    pub rows: Vec<ClassifiedReading>,
}

impl Snapshot {
    pub fn from_rows(rows: Vec<StoredReading>, thresholds: &AlertThresholds) -> Self {
        let rows: Vec<ClassifiedReading> = rows
            .into_iter()
            .map(|reading| {
                let alerts = AlertClassification::classify(&reading, thresholds);
                ClassifiedReading { reading, alerts }
            })
            .collect();
        Self {
            summary: SummaryStats::from_rows(&rows),
            rows,
        }
    }

    /// Alerting rows, most alerts first, then by severity, then newest first.
    pub fn ranked_alerts(&self) -> Vec<&ClassifiedReading> {
        let mut alerting: Vec<&ClassifiedReading> =
            self.rows.iter().filter(|row| row.alerts.is_alerting()).collect();
        alerting.sort_by(|a, b| {
            b.alerts
                .alert_count()
                .cmp(&a.alerts.alert_count())
                .then_with(|| a.alerts.primary_alert().cmp(&b.alerts.primary_alert()))
                .then_with(|| b.reading.recorded_at.cmp(&a.reading.recorded_at))
        });
        alerting
    }

    /// Oldest first, for charting.
    pub fn trend(&self) -> Vec<TrendPoint> {
        let mut points: Vec<TrendPoint> = self
            .rows
            .iter()
            .rev()
            .map(|row| TrendPoint {
                recorded_at: row.reading.recorded_at,
                temperature: row.reading.temperature,
                vibration: row.reading.vibration,
                throughput: row.reading.throughput,
            })
            .collect();
        points.sort_by_key(|point| point.recorded_at);
        points
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RefreshOutcome {
    /// The store has no rows yet.
    Empty,
    Snapshot(Snapshot),
}

impl RefreshOutcome {
    pub fn from_rows(rows: Vec<StoredReading>, thresholds: &AlertThresholds) -> Self {
        if rows.is_empty() {
            RefreshOutcome::Empty
        } else {
            RefreshOutcome::Snapshot(Snapshot::from_rows(rows, thresholds))
        }
    }
}

/// Read-path actor state: its own store session plus the thresholds it classifies against.
pub struct Aggregator<S> {
    store: S,
    thresholds: AlertThresholds,
}

impl<S: ReadingStore> Aggregator<S> {
    pub fn new(store: S, thresholds: AlertThresholds) -> Self {
        Self { store, thresholds }
    }

    pub fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    /// One query, no retry. A failed query is this cycle's problem only.
    pub async fn refresh(&self, window_size: usize) -> Result<RefreshOutcome, StoreError> {
        let rows = self.store.query_latest(window_size).await?;
        tracing::debug!(rows = rows.len(), window_size, "refreshed reading window");
        Ok(RefreshOutcome::from_rows(rows, &self.thresholds))
    }

    pub async fn close(self) {
        self.store.close().await;
    }
}
