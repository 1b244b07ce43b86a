// Data processing pipeline: normalization, enrichment, load, and post-load validation

pub mod load;
pub mod orchestrator;
pub mod processing;
pub mod storage;
pub mod validation;

pub use orchestrator::{PipelineOrchestrator, RunOptions, RunReport};
