//! Batch committer: partitions enriched rows into fixed-size batches and
//! commits each through the store writer with a bounded retry loop.
//!
//! Failure is all-or-nothing per batch. A batch that exhausts its attempts
//! is counted as failed and the committer moves on to the next one.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::app::ports::StoreWriterPort;
use crate::constants;
use crate::domain::{EnrichedRecord, StoreRow};
use crate::idempotency::compute_record_key;

/// Batching and retry parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitPolicy {
    pub batch_size: usize,
    /// Additional attempts after the first
    pub max_retries: u32,
    /// Fixed wait between attempts of the same batch
    pub retry_delay_ms: u64,
}

impl Default for CommitPolicy {
    fn default() -> Self {
        Self {
            batch_size: constants::DEFAULT_BATCH_SIZE,
            max_retries: constants::DEFAULT_MAX_RETRIES,
            retry_delay_ms: constants::DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl CommitPolicy {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// One write unit
#[derive(Debug, Clone)]
pub struct Batch {
    /// Position within the run, starting at 0
    pub index: usize,
    /// Offset of the first row within the run's input
    pub start_offset: usize,
    pub rows: Vec<StoreRow>,
    pub retries: u32,
}

/// Per-batch result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub index: usize,
    pub rows: usize,
    pub attempts: u32,
    pub committed: bool,
}

/// Aggregate of one load run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadOutcome {
    pub considered: usize,
    pub committed: usize,
    pub failed: usize,
    /// Rows never attempted because the run was cancelled
    pub skipped: usize,
    pub retries_per_batch: Vec<u32>,
    pub batches: Vec<BatchReport>,
    pub cancelled: bool,
}

/// Convert an enriched record into the row shape the store accepts
pub fn to_store_row(record: &EnrichedRecord, run_id: &str) -> StoreRow {
    // Keyed on the UTC instant; the stored timestamp keeps its reported offset
    let instant = record.record.observed_at.with_timezone(&Utc).to_rfc3339();
    let observed_at = record.record.observed_at.to_rfc3339();
    StoreRow {
        record_key: compute_record_key(&record.record.entity, &instant),
        entity: record.record.entity.clone(),
        observed_at,
        measurements: record.record.measurements.clone(),
        aqi_category: record.aqi_category.clone(),
        severity_score: Some(record.severity_score),
        risk_flag: record.risk_flag.clone(),
        risk_code: record.risk_tier.code(),
        hour: i64::from(record.hour),
        run_id: run_id.to_string(),
    }
}

/// Replace non-finite numbers with null. Returns how many values changed.
pub fn sanitize_row(row: &mut StoreRow) -> usize {
    let mut replaced = 0;
    for value in row.measurements.values_mut() {
        if matches!(value, Some(v) if !v.is_finite()) {
            *value = None;
            replaced += 1;
        }
    }
    if matches!(row.severity_score, Some(v) if !v.is_finite()) {
        row.severity_score = None;
        replaced += 1;
    }
    replaced
}

pub fn sanitize_rows(rows: &mut [StoreRow]) -> usize {
    rows.iter_mut().map(sanitize_row).sum()
}

/// Split rows into consecutive batches, preserving order. The last batch
/// may be short.
pub fn partition(rows: Vec<StoreRow>, batch_size: usize) -> Vec<Batch> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(rows.len().div_ceil(batch_size));
    let mut iter = rows.into_iter().peekable();
    let mut start_offset = 0;
    while iter.peek().is_some() {
        let chunk: Vec<StoreRow> = iter.by_ref().take(batch_size).collect();
        let len = chunk.len();
        batches.push(Batch {
            index: batches.len(),
            start_offset,
            rows: chunk,
            retries: 0,
        });
        start_offset += len;
    }
    batches
}

/// Commits batches serially through a single writer
#[derive(Debug, Clone, Default)]
pub struct BatchCommitter {
    pub policy: CommitPolicy,
}

impl BatchCommitter {
    pub fn new(policy: CommitPolicy) -> Self {
        Self { policy }
    }

    /// Commit every record. Never fails: exhausted batches are counted in
    /// the outcome and the run continues. Cancellation is honoured only
    /// between batches.
    #[instrument(skip_all, fields(run_id = %run_id, records = records.len()))]
    pub async fn commit(
        &self,
        records: &[EnrichedRecord],
        run_id: &str,
        writer: &dyn StoreWriterPort,
        cancel: &CancellationToken,
    ) -> LoadOutcome {
        let mut rows: Vec<StoreRow> = records.iter().map(|r| to_store_row(r, run_id)).collect();
        let sanitized = sanitize_rows(&mut rows);
        if sanitized > 0 {
            warn!(values = sanitized, "replaced non-finite values with null before batching");
        }
        crate::observability::metrics::load::values_sanitized(sanitized);

        let total = rows.len();
        let mut outcome = LoadOutcome {
            considered: total,
            ..LoadOutcome::default()
        };

        info!("📦 Loading {} records in batches of {}", total, self.policy.batch_size);

        for mut batch in partition(rows, self.policy.batch_size) {
            if cancel.is_cancelled() {
                let remaining = total - batch.start_offset;
                warn!(batch = batch.index, remaining, "run cancelled, skipping remaining batches");
                outcome.skipped += remaining;
                outcome.cancelled = true;
                break;
            }

            let report = self.commit_batch(&mut batch, writer).await;
            if report.committed {
                outcome.committed += report.rows;
            } else {
                outcome.failed += report.rows;
            }
            outcome.retries_per_batch.push(batch.retries);
            outcome.batches.push(report);
        }

        info!(
            considered = outcome.considered,
            committed = outcome.committed,
            failed = outcome.failed,
            skipped = outcome.skipped,
            "🎯 load summary"
        );
        crate::observability::metrics::load::run_completed(&outcome);
        outcome
    }

    async fn commit_batch(&self, batch: &mut Batch, writer: &dyn StoreWriterPort) -> BatchReport {
        let rows = batch.rows.len();
        let first = batch.start_offset + 1;
        let last = batch.start_offset + rows;
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            // The write call is the last point non-finite values can be caught.
            let sanitized = sanitize_rows(&mut batch.rows);
            crate::observability::metrics::load::values_sanitized(sanitized);

            let started = std::time::Instant::now();
            let result = writer.write_batch(&batch.rows).await;
            crate::observability::metrics::load::write_duration(started.elapsed().as_secs_f64());

            match result {
                Ok(()) => {
                    info!(
                        batch = batch.index,
                        attempt,
                        rows,
                        outcome = "committed",
                        "✅ Inserted rows {}-{}",
                        first,
                        last
                    );
                    crate::observability::metrics::load::batch_committed(rows, batch.retries);
                    return BatchReport {
                        index: batch.index,
                        rows,
                        attempts: attempt,
                        committed: true,
                    };
                }
                Err(e) => {
                    warn!(
                        batch = batch.index,
                        attempt,
                        rows,
                        outcome = "failed",
                        error = %e,
                        "⚠️ batch write failed"
                    );
                    crate::observability::metrics::load::attempt_failed();
                    if attempt >= max_attempts {
                        error!(
                            batch = batch.index,
                            attempt,
                            rows,
                            outcome = "abandoned",
                            "❌ giving up on rows {}-{}",
                            first,
                            last
                        );
                        crate::observability::metrics::load::batch_failed(rows);
                        return BatchReport {
                            index: batch.index,
                            rows,
                            attempts: attempt,
                            committed: false,
                        };
                    }
                    batch.retries += 1;
                    tokio::time::sleep(self.policy.retry_delay()).await;
                }
            }
        }
    }
}
