use async_trait::async_trait;
use chrono::{DateTime, Duration};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use aq_pipeline::app::ports::{StoreReaderPort, StoreWriterPort};
use aq_pipeline::domain::{EnrichedRecord, Measurements, NormalizedRecord, StoreRow};
use aq_pipeline::error::{PipelineError, Result};
use aq_pipeline::pipeline::load::{BatchCommitter, CommitPolicy};
use aq_pipeline::pipeline::processing::enrich::FeatureEngine;
use aq_pipeline::pipeline::storage::InMemoryStore;

/// Fails the first N writes of selected batches, keyed by the hour of the
/// batch's first row. Every call is logged.
struct ScriptedWriter {
    inner: InMemoryStore,
    failures: Mutex<HashMap<i64, u32>>,
    calls: Mutex<Vec<i64>>,
}

impl ScriptedWriter {
    fn new(failures: &[(i64, u32)]) -> Self {
        Self {
            inner: InMemoryStore::new(),
            failures: Mutex::new(failures.iter().copied().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl StoreWriterPort for ScriptedWriter {
    async fn write_batch(&self, rows: &[StoreRow]) -> Result<()> {
        let first_hour = rows[0].hour;
        self.calls.lock().await.push(first_hour);
        let mut failures = self.failures.lock().await;
        if let Some(remaining) = failures.get_mut(&first_hour) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(PipelineError::store("connection reset"));
            }
        }
        drop(failures);
        self.inner.write_batch(rows).await
    }
}

fn records(n: usize) -> Vec<EnrichedRecord> {
    let start = DateTime::parse_from_rfc3339("2024-03-01T00:00:00+00:00").unwrap();
    let normalized: Vec<NormalizedRecord> = (0..n)
        .map(|i| {
            let mut measurements = Measurements::new();
            measurements.insert("pm10".to_string(), Some(10.0 * i as f64));
            measurements.insert("pm2_5".to_string(), Some(5.0));
            NormalizedRecord {
                entity: "Delhi".to_string(),
                observed_at: start + Duration::hours(i as i64),
                measurements,
            }
        })
        .collect();
    FeatureEngine::default().enrich_all(normalized)
}

fn committer(batch_size: usize, max_retries: u32) -> BatchCommitter {
    BatchCommitter::new(CommitPolicy {
        batch_size,
        max_retries,
        retry_delay_ms: 1,
    })
}

#[tokio::test]
async fn transient_failures_within_ceiling_commit() {
    let writer = ScriptedWriter::new(&[(0, 2)]);
    let outcome = committer(4, 2)
        .commit(&records(4), "run-1", &writer, &CancellationToken::new())
        .await;

    assert_eq!(outcome.committed, 4);
    assert_eq!(outcome.failed, 0);
    assert_eq!(outcome.retries_per_batch, vec![2]);
    assert_eq!(outcome.batches[0].attempts, 3);
    assert!(outcome.batches[0].committed);
    assert_eq!(*writer.calls.lock().await, vec![0, 0, 0]);
    assert_eq!(writer.inner.count().await.unwrap(), 4);
}

#[tokio::test]
async fn exhausted_batch_is_abandoned_and_run_continues() {
    // batches start at hours 0, 2, 4; the middle one never succeeds
    let writer = ScriptedWriter::new(&[(2, 10)]);
    let outcome = committer(2, 2)
        .commit(&records(5), "run-1", &writer, &CancellationToken::new())
        .await;

    assert_eq!(outcome.considered, 5);
    assert_eq!(outcome.committed, 3);
    assert_eq!(outcome.failed, 2);
    assert_eq!(outcome.skipped, 0);
    assert_eq!(outcome.considered, outcome.committed + outcome.failed + outcome.skipped);
    assert_eq!(outcome.retries_per_batch, vec![0, 2, 0]);
    assert!(!outcome.batches[1].committed);
    assert_eq!(outcome.batches[1].attempts, 3);

    // the batch after the abandoned one is still attempted
    assert_eq!(*writer.calls.lock().await, vec![0, 2, 2, 2, 4]);

    let stored: Vec<i64> = writer
        .inner
        .fetch_all()
        .await
        .unwrap()
        .iter()
        .filter_map(|r| r.hour)
        .collect();
    assert_eq!(stored, vec![0, 1, 4]);
}

#[tokio::test]
async fn zero_retries_means_a_single_attempt() {
    let writer = ScriptedWriter::new(&[(0, 1)]);
    let outcome = committer(10, 0)
        .commit(&records(3), "run-1", &writer, &CancellationToken::new())
        .await;

    assert_eq!(outcome.failed, 3);
    assert_eq!(outcome.retries_per_batch, vec![0]);
    assert_eq!(writer.calls.lock().await.len(), 1);
}

#[tokio::test]
async fn replaying_a_run_does_not_duplicate_rows() {
    let writer = ScriptedWriter::new(&[]);
    let records = records(5);
    let committer = committer(2, 0);

    committer
        .commit(&records, "run-1", &writer, &CancellationToken::new())
        .await;
    let second = committer
        .commit(&records, "run-2", &writer, &CancellationToken::new())
        .await;

    assert_eq!(second.committed, 5);
    assert_eq!(writer.inner.count().await.unwrap(), 5);
}

#[tokio::test]
async fn cancelled_run_skips_unattempted_batches() {
    let writer = ScriptedWriter::new(&[]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = committer(2, 0).commit(&records(5), "run-1", &writer, &cancel).await;

    assert!(outcome.cancelled);
    assert_eq!(outcome.skipped, 5);
    assert_eq!(outcome.committed, 0);
    assert!(writer.calls.lock().await.is_empty());
}
