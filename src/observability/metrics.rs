//! Metrics for the air quality pipeline
//!
//! Each phase records through the functions in its submodule. Nothing is
//! exported unless `init` installs the Prometheus recorder.

use std::fmt;
use std::net::SocketAddr;
use tracing::info;

/// Enum representing all metric names used in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Normalize
    NormalizeRecordsEmitted,
    NormalizeRecordsDropped,
    NormalizeCoercionFailures,

    // Enrich
    EnrichRecordsEnriched,

    // Load
    LoadValuesSanitized,
    LoadWriteDuration,
    LoadBatchesCommitted,
    LoadRowsCommitted,
    LoadRetries,
    LoadAttemptsFailed,
    LoadBatchesFailed,
    LoadRowsFailed,
    LoadRowsSkipped,

    // Validate
    ValidateChecksPassed,
    ValidateChecksFailed,

    // Run
    RunsCompleted,
    RunDuration,
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::NormalizeRecordsEmitted => "aq_normalize_records_emitted_total",
            MetricName::NormalizeRecordsDropped => "aq_normalize_records_dropped_total",
            MetricName::NormalizeCoercionFailures => "aq_normalize_coercion_failures_total",

            MetricName::EnrichRecordsEnriched => "aq_enrich_records_enriched_total",

            MetricName::LoadValuesSanitized => "aq_load_values_sanitized_total",
            MetricName::LoadWriteDuration => "aq_load_write_duration_seconds",
            MetricName::LoadBatchesCommitted => "aq_load_batches_committed_total",
            MetricName::LoadRowsCommitted => "aq_load_rows_committed_total",
            MetricName::LoadRetries => "aq_load_retries_total",
            MetricName::LoadAttemptsFailed => "aq_load_attempts_failed_total",
            MetricName::LoadBatchesFailed => "aq_load_batches_failed_total",
            MetricName::LoadRowsFailed => "aq_load_rows_failed_total",
            MetricName::LoadRowsSkipped => "aq_load_rows_skipped_total",

            MetricName::ValidateChecksPassed => "aq_validate_checks_passed_total",
            MetricName::ValidateChecksFailed => "aq_validate_checks_failed_total",

            MetricName::RunsCompleted => "aq_runs_completed_total",
            MetricName::RunDuration => "aq_run_duration_seconds",
        }
    }

    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            NormalizeRecordsEmitted,
            NormalizeRecordsDropped,
            NormalizeCoercionFailures,
            EnrichRecordsEnriched,
            LoadValuesSanitized,
            LoadWriteDuration,
            LoadBatchesCommitted,
            LoadRowsCommitted,
            LoadRetries,
            LoadAttemptsFailed,
            LoadBatchesFailed,
            LoadRowsFailed,
            LoadRowsSkipped,
            ValidateChecksPassed,
            ValidateChecksFailed,
            RunsCompleted,
            RunDuration,
        ]
        .into_iter()
    }
}

/// Install the Prometheus exporter. With no port the pipeline runs without
/// a recorder and every metric call is a no-op.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else {
        info!("Metrics exporter disabled");
        return Ok(());
    };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    info!("Prometheus exporter listening on http://{}/metrics", addr);
    Ok(())
}

// ============================================================================
// Normalize Metrics
// ============================================================================

pub mod normalize {
    use super::MetricName;

    pub fn record_emitted() {
        ::metrics::counter!(MetricName::NormalizeRecordsEmitted.as_str()).increment(1);
    }

    /// Record a dropped record, labelled by drop reason
    pub fn record_dropped(reason: &str) {
        ::metrics::counter!(MetricName::NormalizeRecordsDropped.as_str(), "reason" => reason.to_string())
            .increment(1);
    }

    pub fn coercion_failures(count: usize) {
        if count > 0 {
            ::metrics::counter!(MetricName::NormalizeCoercionFailures.as_str()).increment(count as u64);
        }
    }
}

// ============================================================================
// Enrich Metrics
// ============================================================================

pub mod enrich {
    use super::MetricName;

    pub fn records_enriched(count: usize) {
        ::metrics::counter!(MetricName::EnrichRecordsEnriched.as_str()).increment(count as u64);
    }
}

// ============================================================================
// Load Metrics
// ============================================================================

pub mod load {
    use super::MetricName;
    use crate::pipeline::load::LoadOutcome;

    /// Non-finite values replaced with null before a write
    pub fn values_sanitized(count: usize) {
        if count > 0 {
            ::metrics::counter!(MetricName::LoadValuesSanitized.as_str()).increment(count as u64);
        }
    }

    pub fn write_duration(secs: f64) {
        ::metrics::histogram!(MetricName::LoadWriteDuration.as_str()).record(secs);
    }

    pub fn batch_committed(rows: usize, retries: u32) {
        ::metrics::counter!(MetricName::LoadBatchesCommitted.as_str()).increment(1);
        ::metrics::counter!(MetricName::LoadRowsCommitted.as_str()).increment(rows as u64);
        if retries > 0 {
            ::metrics::counter!(MetricName::LoadRetries.as_str()).increment(retries as u64);
        }
    }

    pub fn attempt_failed() {
        ::metrics::counter!(MetricName::LoadAttemptsFailed.as_str()).increment(1);
    }

    pub fn batch_failed(rows: usize) {
        ::metrics::counter!(MetricName::LoadBatchesFailed.as_str()).increment(1);
        ::metrics::counter!(MetricName::LoadRowsFailed.as_str()).increment(rows as u64);
    }

    pub fn run_completed(outcome: &LoadOutcome) {
        if outcome.skipped > 0 {
            ::metrics::counter!(MetricName::LoadRowsSkipped.as_str()).increment(outcome.skipped as u64);
        }
    }
}

// ============================================================================
// Validate Metrics
// ============================================================================

pub mod validate {
    use super::MetricName;

    pub fn check_completed(check: &str, passed: bool) {
        let name = if passed {
            MetricName::ValidateChecksPassed
        } else {
            MetricName::ValidateChecksFailed
        };
        ::metrics::counter!(name.as_str(), "check" => check.to_string()).increment(1);
    }
}

// ============================================================================
// Run Metrics
// ============================================================================

pub mod run {
    use super::MetricName;

    pub fn completed(secs: f64) {
        ::metrics::counter!(MetricName::RunsCompleted.as_str()).increment(1);
        ::metrics::histogram!(MetricName::RunDuration.as_str()).record(secs);
    }
}
