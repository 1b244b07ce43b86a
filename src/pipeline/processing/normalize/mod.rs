use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::constants;
use crate::domain::{Measurements, NormalizedRecord, RawRecord};

/// Declared shape of the raw records: which field names the entity, which
/// carries the timestamp, and which hold numeric measurements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeSchema {
    pub entity_field: String,
    pub timestamp_field: String,
    /// A record survives only if at least one of these is present
    pub measurement_fields: Vec<String>,
}

impl Default for NormalizeSchema {
    fn default() -> Self {
        Self {
            entity_field: constants::CITY_FIELD.to_string(),
            timestamp_field: constants::TIME_FIELD.to_string(),
            measurement_fields: constants::default_measurement_fields(),
        }
    }
}

/// Why a raw record was not forwarded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    /// No usable entity value, so the record cannot be keyed
    MissingEntity,
    /// Timestamp absent or not recognised
    InvalidTimestamp,
    /// Every measurement field absent after coercion
    AllMeasurementsMissing,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::MissingEntity => "missing_entity",
            DropReason::InvalidTimestamp => "invalid_timestamp",
            DropReason::AllMeasurementsMissing => "all_missing",
        }
    }
}

/// Result of normalizing one raw record
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizeResult {
    pub outcome: Result<NormalizedRecord, DropReason>,
    /// Measurement values that were present but could not be read as numbers
    pub coercion_failures: usize,
}

/// Counters for one normalization pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeStats {
    pub seen: usize,
    pub emitted: usize,
    pub dropped_missing_entity: usize,
    pub dropped_invalid_timestamp: usize,
    pub dropped_all_missing: usize,
    pub coercion_failures: usize,
}

impl NormalizeStats {
    pub fn dropped(&self) -> usize {
        self.dropped_missing_entity + self.dropped_invalid_timestamp + self.dropped_all_missing
    }

    fn record(&mut self, result: &NormalizeResult) {
        self.seen += 1;
        self.coercion_failures += result.coercion_failures;
        match result.outcome {
            Ok(_) => self.emitted += 1,
            Err(DropReason::MissingEntity) => self.dropped_missing_entity += 1,
            Err(DropReason::InvalidTimestamp) => self.dropped_invalid_timestamp += 1,
            Err(DropReason::AllMeasurementsMissing) => self.dropped_all_missing += 1,
        }
    }
}

/// Trait for turning untyped raw records into typed ones
pub trait Normalizer: Send + Sync {
    fn normalize(&self, record: &RawRecord) -> NormalizeResult;
}

/// Schema-driven normalizer
#[derive(Debug, Clone, Default)]
pub struct DefaultNormalizer {
    pub schema: NormalizeSchema,
}

impl DefaultNormalizer {
    pub fn new(schema: NormalizeSchema) -> Self {
        Self { schema }
    }

    /// Lazily normalize a sequence of raw records. Dropped records are
    /// counted on the returned stream and never yielded.
    pub fn stream<I>(&self, input: I) -> NormalizeStream<'_, I::IntoIter>
    where
        I: IntoIterator<Item = RawRecord>,
    {
        NormalizeStream {
            inner: input.into_iter(),
            normalizer: self,
            stats: NormalizeStats::default(),
        }
    }

    fn extract_entity(&self, record: &RawRecord) -> Option<String> {
        match record.get(&self.schema.entity_field)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl Normalizer for DefaultNormalizer {
    fn normalize(&self, record: &RawRecord) -> NormalizeResult {
        let mut coercion_failures = 0;
        let mut measurements = Measurements::new();
        for field in &self.schema.measurement_fields {
            let value = match coerce_number(record.get(field)) {
                Coerced::Value(v) => Some(v),
                Coerced::Absent => None,
                Coerced::Failed => {
                    coercion_failures += 1;
                    None
                }
            };
            measurements.insert(field.clone(), value);
        }

        let outcome = (|| {
            let entity = self.extract_entity(record).ok_or(DropReason::MissingEntity)?;
            let observed_at = record
                .get(&self.schema.timestamp_field)
                .and_then(parse_timestamp)
                .ok_or(DropReason::InvalidTimestamp)?;
            if measurements.values().all(|v| v.is_none()) {
                return Err(DropReason::AllMeasurementsMissing);
            }
            Ok(NormalizedRecord {
                entity,
                observed_at,
                measurements: measurements.clone(),
            })
        })();

        NormalizeResult {
            outcome,
            coercion_failures,
        }
    }
}

/// Lazy normalization adapter over a raw record iterator
pub struct NormalizeStream<'a, I> {
    inner: I,
    normalizer: &'a dyn Normalizer,
    stats: NormalizeStats,
}

impl<I> NormalizeStream<'_, I> {
    pub fn stats(&self) -> &NormalizeStats {
        &self.stats
    }
}

impl<I> Iterator for NormalizeStream<'_, I>
where
    I: Iterator<Item = RawRecord>,
{
    type Item = NormalizedRecord;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let raw = self.inner.next()?;
            let result = self.normalizer.normalize(&raw);
            self.stats.record(&result);
            crate::observability::metrics::normalize::coercion_failures(result.coercion_failures);
            match result.outcome {
                Ok(record) => {
                    crate::observability::metrics::normalize::record_emitted();
                    return Some(record);
                }
                Err(reason) => {
                    debug!(reason = reason.as_str(), index = self.stats.seen - 1, "dropping raw record");
                    crate::observability::metrics::normalize::record_dropped(reason.as_str());
                }
            }
        }
    }
}

enum Coerced {
    Value(f64),
    Absent,
    Failed,
}

/// Best-effort numeric coercion. Nulls, blanks and non-finite values are
/// absent; anything else unreadable is a coercion failure.
fn coerce_number(value: Option<&Value>) -> Coerced {
    let parsed = match value {
        None | Some(Value::Null) => return Coerced::Absent,
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                return Coerced::Absent;
            }
            s.parse::<f64>().ok()
        }
        Some(_) => None,
    };
    match parsed {
        Some(v) if v.is_finite() => Coerced::Value(v),
        Some(_) => Coerced::Absent,
        None => Coerced::Failed,
    }
}

const OFFSET_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M%z",
    "%Y-%m-%d %H:%M%z",
];

const NAIVE_FORMATS: [&str; 6] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Permissive timestamp recognizer. Values carrying an offset keep it;
/// naive values are read as UTC. Integers are Unix seconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<FixedOffset>> {
    match value {
        Value::String(s) => parse_timestamp_str(s.trim()),
        Value::Number(n) => {
            let secs = n.as_i64()?;
            Utc.timestamp_opt(secs, 0).single().map(|dt| dt.fixed_offset())
        }
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<FixedOffset>> {
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc().fixed_offset());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().fixed_offset())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> RawRecord {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_coerces_strings_and_numbers() {
        let normalizer = DefaultNormalizer::default();
        let result = normalizer.normalize(&raw(json!({
            "city": "Delhi",
            "time": "2024-01-01T05:00",
            "pm10": "42.5",
            "pm2_5": 17,
            "ozone": "n/a",
            "uv_index": null
        })));

        assert_eq!(result.coercion_failures, 1);
        let record = result.outcome.unwrap();
        assert_eq!(record.entity, "Delhi");
        assert_eq!(record.observed_at.hour(), 5);
        assert_eq!(record.measurement("pm10"), Some(42.5));
        assert_eq!(record.measurement("pm2_5"), Some(17.0));
        assert_eq!(record.measurement("ozone"), None);
        assert_eq!(record.measurements.len(), 7);
    }

    #[test]
    fn test_drops_all_missing() {
        let normalizer = DefaultNormalizer::default();
        let result = normalizer.normalize(&raw(json!({
            "city": "Delhi",
            "time": "2024-01-01T05:00",
            "pm10": null,
            "pm2_5": "",
        })));
        assert_eq!(result.outcome, Err(DropReason::AllMeasurementsMissing));
    }

    #[test]
    fn test_drops_invalid_timestamp() {
        let normalizer = DefaultNormalizer::default();
        let result = normalizer.normalize(&raw(json!({
            "city": "Delhi",
            "time": "yesterday-ish",
            "pm10": 10.0,
        })));
        assert_eq!(result.outcome, Err(DropReason::InvalidTimestamp));
    }

    #[test]
    fn test_non_finite_strings_are_absent_not_failures() {
        let normalizer = DefaultNormalizer::default();
        let result = normalizer.normalize(&raw(json!({
            "city": "Delhi",
            "time": "2024-01-01T05:00",
            "pm10": "inf",
            "pm2_5": "NaN",
            "ozone": 3.0,
        })));
        assert_eq!(result.coercion_failures, 0);
        let record = result.outcome.unwrap();
        assert_eq!(record.measurement("pm10"), None);
        assert_eq!(record.measurement("pm2_5"), None);
    }

    #[test]
    fn test_timestamp_keeps_reported_offset() {
        let ts = parse_timestamp(&json!("2024-03-10T23:30:00+05:30")).unwrap();
        assert_eq!(ts.hour(), 23);
        assert_eq!(ts.offset().local_minus_utc(), 5 * 3600 + 1800);

        let naive = parse_timestamp(&json!("2024-03-10 07:15:00")).unwrap();
        assert_eq!(naive.hour(), 7);
        assert_eq!(naive.offset().local_minus_utc(), 0);

        let date_only = parse_timestamp(&json!("2024-03-10")).unwrap();
        assert_eq!(date_only.hour(), 0);

        let epoch = parse_timestamp(&json!(3600)).unwrap();
        assert_eq!(epoch.hour(), 1);
    }

    #[test]
    fn test_stream_counts_drop_reasons_separately() {
        let normalizer = DefaultNormalizer::default();
        let input = vec![
            raw(json!({"city": "Delhi", "time": "2024-01-01T00:00", "pm10": 1.0})),
            raw(json!({"city": "Delhi", "time": "garbage", "pm10": 1.0})),
            raw(json!({"city": "Delhi", "time": "2024-01-01T02:00"})),
            raw(json!({"time": "2024-01-01T03:00", "pm10": 1.0})),
        ];

        let mut stream = normalizer.stream(input);
        let emitted: Vec<_> = stream.by_ref().collect();
        assert_eq!(emitted.len(), 1);

        let stats = stream.stats();
        assert_eq!(stats.seen, 4);
        assert_eq!(stats.emitted, 1);
        assert_eq!(stats.dropped_invalid_timestamp, 1);
        assert_eq!(stats.dropped_all_missing, 1);
        assert_eq!(stats.dropped_missing_entity, 1);
        assert_eq!(stats.dropped(), 3);
    }
}
