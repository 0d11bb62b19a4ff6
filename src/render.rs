use crate::aggregate::AlertKind;
use crate::refresh::{RefreshView, SnapshotSink};
use std::io::Write;

const MAX_LOGGED_ALERTS: usize = 5;

/// Renders each view as structured log lines.
#[derive(Debug, Default)]
pub struct LogSink;

impl SnapshotSink for LogSink {
    fn render(&mut self, view: &RefreshView) {
        match view {
            RefreshView::NoData => {
                tracing::warn!("no data available yet; start the ingest loop to generate readings");
            }
            RefreshView::Unavailable { reason } => {
                tracing::warn!(reason = %reason, "failed to fetch data from the store");
            }
            RefreshView::Snapshot(snapshot) => {
                let summary = &snapshot.summary;
                tracing::info!(
                    rows = summary.rows,
                    mean_temperature = ?summary.mean_temperature,
                    mean_vibration = ?summary.mean_vibration,
                    mean_throughput = ?summary.mean_throughput,
                    overheating = summary.temperature_alerts,
                    high_vibration = summary.vibration_alerts,
                    low_throughput = summary.throughput_alerts,
                    "equipment summary"
                );
                for row in snapshot.ranked_alerts().into_iter().take(MAX_LOGGED_ALERTS) {
                    tracing::warn!(
                        equipment = %row.reading.equipment_id,
                        alert = row.alerts.primary_alert().map_or("none", AlertKind::as_str),
                        alerts = row.alerts.alert_count(),
                        temperature = ?row.reading.temperature,
                        vibration = ?row.reading.vibration,
                        throughput = ?row.reading.throughput,
                        recorded_at = %row.reading.recorded_at,
                        "critical reading"
                    );
                }
            }
        }
    }
}

/// Writes one JSON document per view.
pub struct JsonLinesSink<W> {
    out: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> SnapshotSink for JsonLinesSink<W> {
    fn render(&mut self, view: &RefreshView) {
        let written = serde_json::to_writer(&mut self.out, view)
            .map_err(std::io::Error::from)
            .and_then(|_| self.out.write_all(b"\n"))
            .and_then(|_| self.out.flush());
        if let Err(err) = written {
            tracing::warn!(error=%err, "failed to write refresh view");
        }
    }
}
