use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw record as handed over by the fetch stage: an untyped field map,
/// one per entity per reporting hour.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// Measurement values keyed by field name. Absent values are `None`.
pub type Measurements = BTreeMap<String, Option<f64>>;

/// A raw record after schema coercion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    /// Originating entity (city, customer, ...)
    pub entity: String,
    /// Canonical instant, kept in the offset the source reported
    pub observed_at: DateTime<FixedOffset>,
    /// Every schema measurement field, present or absent
    pub measurements: Measurements,
}

impl NormalizedRecord {
    pub fn measurement(&self, field: &str) -> Option<f64> {
        self.measurements.get(field).copied().flatten()
    }
}

/// Three-level severity tier derived from the composite score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskTier {
    Low,
    Moderate,
    High,
}

impl RiskTier {
    /// Stable integer code stored alongside the label
    pub fn code(self) -> i64 {
        match self {
            RiskTier::Low => 0,
            RiskTier::Moderate => 1,
            RiskTier::High => 2,
        }
    }
}

/// A normalized record plus its derived features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub record: NormalizedRecord,
    /// Bucket name for the primary measurement; `None` when it is absent
    /// or below the lowest bucket
    pub aqi_category: Option<String>,
    pub severity_score: f64,
    pub risk_tier: RiskTier,
    pub risk_flag: String,
    /// Hour of day (0-23) in the reported offset
    pub hour: u32,
}

/// Row shape handed to the store writer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreRow {
    /// Natural key hash of (entity, timestamp); the upsert key
    pub record_key: String,
    pub entity: String,
    /// RFC 3339 timestamp
    pub observed_at: String,
    pub measurements: Measurements,
    pub aqi_category: Option<String>,
    pub severity_score: Option<f64>,
    pub risk_flag: String,
    pub risk_code: i64,
    pub hour: i64,
    pub run_id: String,
}

/// Row shape as read back from the store. Every column is optional so
/// the validator can observe whatever the store actually holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    pub id: i64,
    pub record_key: Option<String>,
    pub entity: Option<String>,
    pub observed_at: Option<String>,
    pub measurements: Measurements,
    pub aqi_category: Option<String>,
    pub severity_score: Option<f64>,
    pub risk_flag: Option<String>,
    pub risk_code: Option<i64>,
    pub hour: Option<i64>,
}

impl StoredRow {
    /// Presence of a derived column by name. `None` means the store has no
    /// such column at all.
    pub fn derived_present(&self, column: &str) -> Option<bool> {
        use crate::constants::{AQI_CATEGORY, HOUR, RISK_CODE, RISK_FLAG, SEVERITY_SCORE};
        match column {
            AQI_CATEGORY => Some(self.aqi_category.is_some()),
            SEVERITY_SCORE => Some(self.severity_score.is_some()),
            RISK_FLAG => Some(self.risk_flag.is_some()),
            RISK_CODE => Some(self.risk_code.is_some()),
            HOUR => Some(self.hour.is_some()),
            _ => None,
        }
    }

    /// Integer value of a coded column by name
    pub fn coded_value(&self, column: &str) -> Option<Option<i64>> {
        use crate::constants::{HOUR, RISK_CODE};
        match column {
            RISK_CODE => Some(self.risk_code),
            HOUR => Some(self.hour),
            _ => None,
        }
    }

    /// Identifier used for uniqueness: the natural key when present,
    /// falling back to entity and timestamp.
    pub fn identifier(&self) -> String {
        match &self.record_key {
            Some(key) => key.clone(),
            None => format!(
                "{}|{}",
                self.entity.as_deref().unwrap_or_default(),
                self.observed_at.as_deref().unwrap_or_default()
            ),
        }
    }

    pub fn from_store_row(id: i64, row: &StoreRow) -> Self {
        Self {
            id,
            record_key: Some(row.record_key.clone()),
            entity: Some(row.entity.clone()),
            observed_at: Some(row.observed_at.clone()),
            measurements: row.measurements.clone(),
            aqi_category: row.aqi_category.clone(),
            severity_score: row.severity_score,
            risk_flag: Some(row.risk_flag.clone()),
            risk_code: Some(row.risk_code),
            hour: Some(row.hour),
        }
    }
}
