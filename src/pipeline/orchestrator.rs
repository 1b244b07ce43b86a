use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::app::ports::{RawRecordSourcePort, StoreReaderPort, StoreWriterPort};
use crate::config::PipelineConfig;
use crate::domain::{NormalizedRecord, RawRecord};
use crate::error::Result;
use crate::pipeline::load::{BatchCommitter, LoadOutcome};
use crate::pipeline::processing::enrich::FeatureEngine;
use crate::pipeline::processing::normalize::{DefaultNormalizer, NormalizeStats};
use crate::pipeline::validation::{PostLoadValidator, ValidationReport};

/// Everything one run did, in the order it did it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub normalization: NormalizeStats,
    pub load: LoadOutcome,
    pub validation: Option<ValidationReport>,
    pub duration_ms: u64,
}

impl RunReport {
    /// Failed batches and failed checks, which a caller may want to flag
    /// without treating the run as fatal.
    pub fn has_problems(&self) -> bool {
        self.load.failed > 0
            || self.load.cancelled
            || self.validation.as_ref().is_some_and(|v| !v.passed())
    }
}

/// Per-run knobs that are not part of the pipeline configuration
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Run post-load validation when a reader is supplied
    pub validate: bool,
    /// Row count the store should hold afterwards, when the store was not
    /// empty before the run
    pub expected_rows: Option<usize>,
    pub cancel: CancellationToken,
}

impl RunOptions {
    pub fn validating() -> Self {
        Self {
            validate: true,
            ..Self::default()
        }
    }
}

/// Wires normalize, enrich, commit and validate into one run
pub struct PipelineOrchestrator {
    normalizer: DefaultNormalizer,
    engine: FeatureEngine,
    committer: BatchCommitter,
    validator: PostLoadValidator,
}

impl PipelineOrchestrator {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            normalizer: DefaultNormalizer::new(config.schema),
            engine: FeatureEngine::new(config.features),
            committer: BatchCommitter::new(config.load),
            validator: PostLoadValidator::new(config.validation),
        }
    }

    /// Materialise the source, then run. A source error is fatal and
    /// happens before anything is written.
    pub async fn run_source(
        &self,
        source: &dyn RawRecordSourcePort,
        writer: &dyn StoreWriterPort,
        reader: Option<&dyn StoreReaderPort>,
        options: &RunOptions,
    ) -> Result<RunReport> {
        info!("📥 Reading raw records from {}", source.describe());
        let raw = source.read_all()?;
        self.run(raw, writer, reader, options).await
    }

    /// Run the pipeline over `raw`. Only store read failures (counting
    /// before the run, fetching for validation) are errors; batch failures
    /// and failed checks are reported in the `RunReport`.
    pub async fn run(
        &self,
        raw: Vec<RawRecord>,
        writer: &dyn StoreWriterPort,
        reader: Option<&dyn StoreReaderPort>,
        options: &RunOptions,
    ) -> Result<RunReport> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("pipeline_run", run_id = %run_id);
        self.run_inner(run_id, raw, writer, reader, options)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        run_id: String,
        raw: Vec<RawRecord>,
        writer: &dyn StoreWriterPort,
        reader: Option<&dyn StoreReaderPort>,
        options: &RunOptions,
    ) -> Result<RunReport> {
        let started_at = Utc::now();
        let started = Instant::now();

        let rows_before = match reader {
            Some(reader) if options.validate => Some(reader.count().await?),
            _ => None,
        };

        info!("🧹 Normalizing {} raw records", raw.len());
        let (normalized, normalization) = {
            let mut stream = self.normalizer.stream(raw);
            let normalized: Vec<NormalizedRecord> = stream.by_ref().collect();
            (normalized, stream.stats().clone())
        };
        info!(
            seen = normalization.seen,
            emitted = normalization.emitted,
            dropped = normalization.dropped(),
            coercion_failures = normalization.coercion_failures,
            "normalization complete"
        );

        let enriched = self.engine.enrich_all(normalized);
        info!("✨ Enriched {} records", enriched.len());

        let load = self
            .committer
            .commit(&enriched, &run_id, writer, &options.cancel)
            .await;

        let validation = match reader {
            Some(reader) if options.validate => {
                let expected = match rows_before {
                    Some(0) => Some(load.committed),
                    _ => options.expected_rows,
                };
                Some(self.validator.validate(reader, expected).await?)
            }
            _ => None,
        };

        let duration = started.elapsed();
        crate::observability::metrics::run::completed(duration.as_secs_f64());

        let report = RunReport {
            run_id,
            started_at,
            normalization,
            load,
            validation,
            duration_ms: duration.as_millis() as u64,
        };
        info!(
            committed = report.load.committed,
            failed = report.load.failed,
            skipped = report.load.skipped,
            validation_passed = report.validation.as_ref().map(|v| v.passed()),
            duration_ms = report.duration_ms,
            "🏁 run finished"
        );
        Ok(report)
    }
}
