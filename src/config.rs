use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::constants;
use crate::error::{PipelineError, Result};
use crate::pipeline::load::CommitPolicy;
use crate::pipeline::processing::enrich::FeatureConfig;
use crate::pipeline::processing::normalize::NormalizeSchema;
use crate::pipeline::validation::ValidationConfig;

/// Caller-supplied pipeline configuration. Every section falls back to the
/// hourly air quality defaults, so an empty file is a valid config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub schema: NormalizeSchema,
    pub features: FeatureConfig,
    pub load: CommitPolicy,
    pub validation: ValidationConfig,
}

impl PipelineConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_path = path.as_ref();
        let config_content = fs::read_to_string(config_path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read config file '{}': {}",
                config_path.display(),
                e
            ))
        })?;

        let config: PipelineConfig = toml::from_str(&config_content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let fields = &self.schema.measurement_fields;
        if fields.is_empty() {
            return Err(PipelineError::Config(
                "schema.measurement_fields must not be empty".to_string(),
            ));
        }
        if self.schema.entity_field.is_empty() || self.schema.timestamp_field.is_empty() {
            return Err(PipelineError::Config(
                "schema.entity_field and schema.timestamp_field are required".to_string(),
            ));
        }

        let features = &self.features;
        if !fields.contains(&features.primary_field) {
            return Err(PipelineError::Config(format!(
                "features.primary_field '{}' is not a measurement field",
                features.primary_field
            )));
        }
        if let Some(bound) = features.buckets.iter().find(|b| !b.lower.is_finite()) {
            return Err(PipelineError::Config(format!(
                "bucket '{}' has a non-finite lower bound",
                bound.name
            )));
        }
        if features.buckets.is_empty() {
            return Err(PipelineError::Config("features.buckets must not be empty".to_string()));
        }
        for pair in features.buckets.windows(2) {
            if !(pair[0].lower < pair[1].lower) {
                return Err(PipelineError::Config(format!(
                    "bucket bounds must be strictly ascending: '{}' ({}) then '{}' ({})",
                    pair[0].name, pair[0].lower, pair[1].name, pair[1].lower
                )));
            }
        }
        if !(features.low_cutoff < features.high_cutoff) {
            return Err(PipelineError::Config(format!(
                "features.low_cutoff ({}) must be below features.high_cutoff ({})",
                features.low_cutoff, features.high_cutoff
            )));
        }
        if let Some(unknown) = features.weights.keys().find(|k| !fields.contains(k)) {
            return Err(PipelineError::Config(format!(
                "weight given for unknown measurement field '{}'",
                unknown
            )));
        }
        if let Some((field, _)) = features.weights.iter().find(|(_, w)| !w.is_finite()) {
            return Err(PipelineError::Config(format!("weight for '{}' is not finite", field)));
        }

        let validation = &self.validation;
        if let Some(unknown) = validation.mandatory_fields.iter().find(|f| !fields.contains(f)) {
            return Err(PipelineError::Config(format!(
                "validation.mandatory_fields names '{}', which is not a measurement field",
                unknown
            )));
        }
        if let Some(unknown) = validation
            .required_derived_columns
            .iter()
            .find(|c| !constants::DERIVED_COLUMNS.contains(&c.as_str()))
        {
            return Err(PipelineError::Config(format!(
                "validation.required_derived_columns names unknown column '{}'",
                unknown
            )));
        }
        if !constants::CODED_COLUMNS.contains(&validation.coded_field.as_str()) {
            return Err(PipelineError::Config(format!(
                "validation.coded_field '{}' must be one of {:?}",
                validation.coded_field,
                constants::CODED_COLUMNS
            )));
        }

        if self.load.batch_size == 0 {
            return Err(PipelineError::Config("load.batch_size must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| PipelineError::Config(format!("Failed to render config: {}", e)))
    }
}
