use chrono::{DateTime, Utc};
use serde::Serialize;

pub const DEFAULT_EQUIPMENT_IDS: [&str; 3] = ["EQ-001", "EQ-002", "EQ-003"];

/// One sensor sample as produced by the generator and written by the ingest loop.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub equipment_id: String,
    pub temperature: f64,
    pub vibration: f64,
    pub throughput: i32,
    pub recorded_at: DateTime<Utc>,
}

/// A row read back from the store. Metric columns are nullable there, so every
/// value is optional on the read side.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct StoredReading {
    pub equipment_id: String,
    pub temperature: Option<f64>,
    pub vibration: Option<f64>,
    pub throughput: Option<i32>,
    pub recorded_at: DateTime<Utc>,
}

impl From<Reading> for StoredReading {
    fn from(reading: Reading) -> Self {
        Self {
            equipment_id: reading.equipment_id,
            temperature: Some(reading.temperature),
            vibration: Some(reading.vibration),
            throughput: Some(reading.throughput),
            recorded_at: reading.recorded_at,
        }
    }
}

/// The fixed set of equipment identifiers the writer accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownEquipment {
    ids: Vec<String>,
}

impl KnownEquipment {
    /// Blank entries are dropped and duplicates collapsed, keeping first-seen order.
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = Vec::new();
        for id in ids {
            let trimmed = id.as_ref().trim();
            if trimmed.is_empty() || out.iter().any(|existing| existing == trimmed) {
                continue;
            }
            out.push(trimmed.to_string());
        }
        Self { ids: out }
    }

    pub fn contains(&self, equipment_id: &str) -> bool {
        self.ids.iter().any(|id| id == equipment_id)
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl Default for KnownEquipment {
    fn default() -> Self {
        Self::new(DEFAULT_EQUIPMENT_IDS)
    }
}
