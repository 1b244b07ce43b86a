use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use aq_pipeline::app::ports::{ReportOutputPort, StoreReaderPort, StoreWriterPort};
use aq_pipeline::config::PipelineConfig;
use aq_pipeline::constants;
use aq_pipeline::infra::raw_record_source::{source_for, InputFormat};
use aq_pipeline::infra::report_output_adapter::FileReportOutputAdapter;
use aq_pipeline::observability;
use aq_pipeline::pipeline::storage::{InMemoryStore, SqliteStore};
use aq_pipeline::pipeline::validation::{PostLoadValidator, ValidationReport};
use aq_pipeline::pipeline::{PipelineOrchestrator, RunOptions, RunReport};

#[derive(Parser)]
#[command(name = "aq_pipeline")]
#[command(about = "Hourly air quality normalize, enrich, load and validate pipeline")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize, enrich and load raw records, then validate the store
    Run {
        /// Input files or directories
        #[arg(long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,
        #[arg(long, value_enum, default_value_t = InputFormat::Ndjson)]
        format: InputFormat,
        /// Pipeline configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
        /// SQLite database path (defaults to $AQ_DB_PATH)
        #[arg(long, conflicts_with = "in_memory")]
        db: Option<PathBuf>,
        /// Load into a throwaway in-memory store
        #[arg(long)]
        in_memory: bool,
        #[arg(long)]
        skip_validation: bool,
        /// Row count the store should hold afterwards, if it was not empty
        #[arg(long)]
        expected: Option<usize>,
        /// Write the run report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
        /// Expose Prometheus metrics on this port
        #[arg(long)]
        metrics_port: Option<u16>,
    },
    /// Run the post-load checks against an existing database
    Validate {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        expected: Option<usize>,
    },
    /// Print the DDL for the target table
    PrintSchema,
    /// Print the default configuration as TOML
    PrintConfig,
}

enum Store {
    Sqlite(SqliteStore),
    Memory(InMemoryStore),
}

impl Store {
    fn ports(&self) -> (&dyn StoreWriterPort, &dyn StoreReaderPort) {
        match self {
            Store::Sqlite(s) => (s, s),
            Store::Memory(s) => (s, s),
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<PipelineConfig> {
    match path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            PipelineConfig::load(path).with_context(|| format!("loading config {}", path.display()))
        }
        None => Ok(PipelineConfig::default()),
    }
}

fn db_path(db: Option<PathBuf>) -> PathBuf {
    db.or_else(|| std::env::var(constants::DB_PATH_ENV).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(constants::DEFAULT_DB_PATH))
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current batch");
            child.cancel();
        }
    });
    token
}

fn print_validation(report: &ValidationReport) {
    println!("\n🔍 Validation ({} rows):", report.rows);
    for (name, check) in &report.checks {
        let mark = if check.passed { "✅" } else { "❌" };
        println!("   {} {}: {}", mark, name, check.detail);
    }
}

fn print_run(report: &RunReport) {
    let n = &report.normalization;
    let l = &report.load;
    println!("\n📊 Pipeline Results (run {}):", report.run_id);
    println!("   Raw records: {}", n.seen);
    println!(
        "   Normalized: {} (dropped: {} missing entity, {} invalid timestamp, {} all missing)",
        n.emitted, n.dropped_missing_entity, n.dropped_invalid_timestamp, n.dropped_all_missing
    );
    println!("   Coercion failures: {}", n.coercion_failures);
    println!(
        "   Loaded: {} committed, {} failed, {} skipped of {}",
        l.committed, l.failed, l.skipped, l.considered
    );
    println!("   Batches: {} (retries: {:?})", l.batches.len(), l.retries_per_batch);
    if l.cancelled {
        println!("   ⚠️  Run was cancelled before all batches were attempted");
    }
    if let Some(validation) = &report.validation {
        print_validation(validation);
    }
    println!("   Duration: {} ms", report.duration_ms);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    observability::init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            input,
            format,
            config,
            db,
            in_memory,
            skip_validation,
            expected,
            report,
            metrics_port,
        } => {
            println!("🚀 Running air quality pipeline...");
            observability::metrics::init(metrics_port).context("installing metrics exporter")?;
            let config = load_config(config.as_ref())?;

            let store = if in_memory {
                Store::Memory(InMemoryStore::new())
            } else {
                let path = db_path(db);
                Store::Sqlite(
                    SqliteStore::open(&path)
                        .with_context(|| format!("opening database {}", path.display()))?,
                )
            };
            let (writer, reader) = store.ports();

            let source = source_for(format, input, &config.schema);
            let orchestrator = PipelineOrchestrator::new(config);
            let options = RunOptions {
                validate: !skip_validation,
                expected_rows: expected,
                cancel: cancel_on_ctrl_c(),
            };

            let run_report = orchestrator
                .run_source(source.as_ref(), writer, Some(reader), &options)
                .await
                .context("pipeline run failed")?;

            print_run(&run_report);
            if let Some(path) = report {
                FileReportOutputAdapter::new(path).write_report(&run_report).await?;
            }
            if run_report.has_problems() {
                println!("\n⚠️  Run finished with failed batches or checks");
            } else {
                println!("\n✅ Pipeline completed successfully!");
            }
        }
        Commands::Validate { config, db, expected } => {
            let config = load_config(config.as_ref())?;
            let path = db_path(db);
            let store = SqliteStore::open(&path)
                .with_context(|| format!("opening database {}", path.display()))?;
            let validator = PostLoadValidator::new(config.validation);
            let report = validator
                .validate(&store, expected)
                .await
                .context("reading committed dataset")?;
            print_validation(&report);
            if !report.passed() {
                println!("\n⚠️  Failed checks: {}", report.failed_checks().join(", "));
            }
        }
        Commands::PrintSchema => {
            print!("{}", aq_pipeline::pipeline::storage::sqlite::SCHEMA_SQL);
        }
        Commands::PrintConfig => {
            print!("{}", PipelineConfig::default().to_toml_string()?);
        }
    }

    Ok(())
}
