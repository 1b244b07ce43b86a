use aq_pipeline::app::ports::StoreWriterPort;
use aq_pipeline::domain::{Measurements, StoreRow, StoredRow};
use aq_pipeline::idempotency::compute_record_key;
use aq_pipeline::pipeline::storage::InMemoryStore;
use aq_pipeline::pipeline::validation::{
    PostLoadValidator, ValidationConfig, CHECK_CODED_DOMAIN, CHECK_DERIVED_COLUMNS,
    CHECK_MANDATORY_FIELDS, CHECK_ROW_COUNT, CHECK_UNIQUE_IDENTIFIERS,
};

fn store_row(entity: &str, hour: i64) -> StoreRow {
    let observed_at = format!("2024-03-01T{:02}:00:00+00:00", hour);
    let mut measurements = Measurements::new();
    measurements.insert("pm10".to_string(), Some(20.0));
    measurements.insert("pm2_5".to_string(), Some(8.0));
    StoreRow {
        record_key: compute_record_key(entity, &observed_at),
        entity: entity.to_string(),
        observed_at,
        measurements,
        aqi_category: Some("Good".to_string()),
        severity_score: Some(100.0),
        risk_flag: "Low Risk".to_string(),
        risk_code: 0,
        hour,
        run_id: "run-1".to_string(),
    }
}

async fn seeded_store(rows: usize) -> InMemoryStore {
    let store = InMemoryStore::new();
    let batch: Vec<StoreRow> = (0..rows as i64).map(|h| store_row("Delhi", h)).collect();
    store.write_batch(&batch).await.unwrap();
    store
}

#[tokio::test]
async fn clean_store_passes_every_check() {
    let store = seeded_store(3).await;
    let report = PostLoadValidator::default().validate(&store, Some(3)).await.unwrap();

    assert!(report.passed(), "failed: {:?}", report.failed_checks());
    assert_eq!(report.rows, 3);
    assert_eq!(report.checks.len(), 5);
}

#[tokio::test]
async fn duplicate_identifier_is_named_and_other_checks_unaffected() {
    let store = seeded_store(3).await;
    // a second physical row for the same entity and hour
    let duplicate = StoredRow::from_store_row(99, &store_row("Delhi", 1));
    store.insert_raw(vec![duplicate]).await;

    let report = PostLoadValidator::default().validate(&store, Some(4)).await.unwrap();

    assert_eq!(report.failed_checks(), vec![CHECK_UNIQUE_IDENTIFIERS]);
    let unique = &report.checks[CHECK_UNIQUE_IDENTIFIERS];
    assert!(
        unique.detail.contains("Delhi@2024-03-01T01:00:00+00:00 x2"),
        "detail was: {}",
        unique.detail
    );
    assert!(report.checks[CHECK_MANDATORY_FIELDS].passed);
    assert!(report.checks[CHECK_DERIVED_COLUMNS].passed);
    assert!(report.checks[CHECK_CODED_DOMAIN].passed);
    assert!(report.checks[CHECK_ROW_COUNT].passed);
}

#[tokio::test]
async fn every_failing_check_is_reported_together() {
    let store = seeded_store(2).await;
    let mut broken = StoredRow::from_store_row(50, &store_row("Pune", 5));
    broken.measurements.insert("pm10".to_string(), None);
    broken.severity_score = None;
    broken.risk_code = Some(7);
    store.insert_raw(vec![broken]).await;

    let report = PostLoadValidator::default().validate(&store, Some(10)).await.unwrap();

    assert_eq!(
        report.failed_checks(),
        vec![
            CHECK_CODED_DOMAIN,
            CHECK_DERIVED_COLUMNS,
            CHECK_MANDATORY_FIELDS,
            CHECK_ROW_COUNT,
        ]
    );
    assert!(report.checks[CHECK_UNIQUE_IDENTIFIERS].passed);
    assert!(report.checks[CHECK_CODED_DOMAIN].detail.contains("{7}"));
    assert!(report.checks[CHECK_DERIVED_COLUMNS].detail.contains("severity_score: 1 rows missing"));
    assert!(report.checks[CHECK_MANDATORY_FIELDS].detail.contains("pm10: 1 missing"));
    assert!(report.checks[CHECK_ROW_COUNT].detail.contains("3 rows present, 10 expected"));
}

#[tokio::test]
async fn coded_field_can_be_reconfigured() {
    let store = seeded_store(3).await;
    let validator = PostLoadValidator::new(ValidationConfig {
        coded_field: "hour".to_string(),
        valid_codes: (0..2).collect(),
        ..ValidationConfig::default()
    });

    let report = validator.validate(&store, None).await.unwrap();

    assert_eq!(report.failed_checks(), vec![CHECK_CODED_DOMAIN]);
    assert!(report.checks[CHECK_CODED_DOMAIN].detail.contains("{2}"));
}

#[tokio::test]
async fn empty_store_with_no_expectation_passes() {
    let store = InMemoryStore::new();
    let report = PostLoadValidator::default().validate(&store, None).await.unwrap();
    assert!(report.passed());
    assert_eq!(report.rows, 0);
}
