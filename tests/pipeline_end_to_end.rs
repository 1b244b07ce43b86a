use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;

use aq_pipeline::app::ports::{StoreReaderPort, StoreWriterPort};
use aq_pipeline::config::PipelineConfig;
use aq_pipeline::domain::{RawRecord, StoreRow};
use aq_pipeline::error::Result;
use aq_pipeline::pipeline::storage::InMemoryStore;
use aq_pipeline::pipeline::validation::{CHECK_MANDATORY_FIELDS, CHECK_ROW_COUNT};
use aq_pipeline::pipeline::{PipelineOrchestrator, RunOptions};

/// Writer that records the size of every batch it receives
struct RecordingWriter {
    inner: Arc<InMemoryStore>,
    batch_sizes: Mutex<Vec<usize>>,
}

#[async_trait]
impl StoreWriterPort for RecordingWriter {
    async fn write_batch(&self, rows: &[StoreRow]) -> Result<()> {
        self.batch_sizes.lock().await.push(rows.len());
        self.inner.write_batch(rows).await
    }
}

fn raw(value: serde_json::Value) -> RawRecord {
    value.as_object().cloned().unwrap()
}

fn five_hourly_records() -> Vec<RawRecord> {
    let pm2_5 = [json!(10), json!(60), json!(150), json!(null), json!(null)];
    pm2_5
        .into_iter()
        .enumerate()
        .map(|(hour, value)| {
            raw(json!({
                "city": "Delhi",
                "time": format!("2024-03-01T{:02}:00", hour),
                "pm10": 20,
                "pm2_5": value,
            }))
        })
        .collect()
}

fn config_with_batch_size(batch_size: usize) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.load.batch_size = batch_size;
    config.load.retry_delay_ms = 0;
    config
}

#[tokio::test]
async fn five_records_flow_through_in_three_batches() {
    let store = Arc::new(InMemoryStore::new());
    let writer = RecordingWriter {
        inner: store.clone(),
        batch_sizes: Mutex::new(Vec::new()),
    };
    let mut config = config_with_batch_size(2);
    config.validation.mandatory_fields = vec!["pm10".to_string()];
    let orchestrator = PipelineOrchestrator::new(config);

    let report = orchestrator
        .run(five_hourly_records(), &writer, Some(store.as_ref()), &RunOptions::validating())
        .await
        .unwrap();

    assert_eq!(report.normalization.seen, 5);
    assert_eq!(report.normalization.emitted, 5);
    assert_eq!(report.normalization.dropped(), 0);
    assert_eq!(*writer.batch_sizes.lock().await, vec![2, 2, 1]);
    assert_eq!(report.load.considered, 5);
    assert_eq!(report.load.committed, 5);
    assert_eq!(report.load.retries_per_batch, vec![0, 0, 0]);

    let rows = store.fetch_all().await.unwrap();
    let hours: Vec<i64> = rows.iter().map(|r| r.hour.unwrap()).collect();
    assert_eq!(hours, vec![0, 1, 2, 3, 4]);

    let categories: Vec<Option<&str>> = rows.iter().map(|r| r.aqi_category.as_deref()).collect();
    assert_eq!(
        categories,
        vec![Some("Good"), Some("Moderate"), Some("Unhealthy"), None, None]
    );

    // pm2_5*5 + pm10*3 with pm10 = 20
    let scores: Vec<f64> = rows.iter().map(|r| r.severity_score.unwrap()).collect();
    assert_eq!(scores, vec![110.0, 360.0, 810.0, 60.0, 60.0]);
    let codes: Vec<i64> = rows.iter().map(|r| r.risk_code.unwrap()).collect();
    assert_eq!(codes, vec![0, 1, 2, 0, 0]);

    let validation = report.validation.unwrap();
    assert!(validation.passed(), "failed: {:?}", validation.failed_checks());
}

#[tokio::test]
async fn absent_mandatory_field_fails_only_its_check() {
    let store = InMemoryStore::new();
    let orchestrator = PipelineOrchestrator::new(config_with_batch_size(2));

    let report = orchestrator
        .run(five_hourly_records(), &store, Some(&store), &RunOptions::validating())
        .await
        .unwrap();

    let validation = report.validation.unwrap();
    assert_eq!(validation.failed_checks(), vec![CHECK_MANDATORY_FIELDS]);
    let mandatory = &validation.checks[CHECK_MANDATORY_FIELDS];
    assert!(mandatory.detail.contains("pm2_5: 2 missing"));
    assert!(mandatory.detail.contains("pm10: 0 missing"));
    assert!(validation.checks[CHECK_ROW_COUNT].passed);
}

#[tokio::test]
async fn all_missing_record_is_never_stored() {
    let store = InMemoryStore::new();
    let orchestrator = PipelineOrchestrator::new(config_with_batch_size(10));
    let input = vec![
        raw(json!({"city": "Delhi", "time": "2024-03-01T00:00", "pm10": 20, "pm2_5": 5})),
        raw(json!({"city": "Delhi", "time": "2024-03-01T01:00", "pm10": null, "pm2_5": "", "ozone": "n/a"})),
        raw(json!({"city": "Delhi", "time": "yesterday", "pm10": 20})),
        raw(json!({"time": "2024-03-01T02:00", "pm10": 20})),
    ];

    let report = orchestrator
        .run(input, &store, Some(&store), &RunOptions::validating())
        .await
        .unwrap();

    assert_eq!(report.normalization.seen, 4);
    assert_eq!(report.normalization.emitted, 1);
    assert_eq!(report.normalization.dropped_all_missing, 1);
    assert_eq!(report.normalization.dropped_invalid_timestamp, 1);
    assert_eq!(report.normalization.dropped_missing_entity, 1);
    assert_eq!(report.normalization.coercion_failures, 1);
    assert_eq!(store.count().await.unwrap(), 1);
    assert!(report.validation.unwrap().passed());
}

#[tokio::test]
async fn offset_timestamps_keep_their_local_hour() {
    let store = InMemoryStore::new();
    let orchestrator = PipelineOrchestrator::new(config_with_batch_size(10));
    let input = vec![raw(json!({
        "city": "Delhi",
        "time": "2024-03-01T23:30:00+05:30",
        "pm10": 20,
        "pm2_5": 5
    }))];

    orchestrator
        .run(input, &store, None, &RunOptions::default())
        .await
        .unwrap();

    let rows = store.fetch_all().await.unwrap();
    assert_eq!(rows[0].hour, Some(23));
    assert_eq!(rows[0].observed_at.as_deref(), Some("2024-03-01T23:30:00+05:30"));
}
