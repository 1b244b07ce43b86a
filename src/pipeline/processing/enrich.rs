use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use chrono::Timelike;

use crate::constants;
use crate::domain::{EnrichedRecord, NormalizedRecord, RiskTier};

/// One categorical bucket. A value belongs to the bucket when it is at
/// least `lower` and below the next bucket's `lower`; the last bucket has
/// no upper bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketBound {
    pub name: String,
    pub lower: f64,
}

/// Labels written for each risk tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierLabels {
    pub low: String,
    pub moderate: String,
    pub high: String,
}

impl Default for TierLabels {
    fn default() -> Self {
        Self {
            low: "Low Risk".to_string(),
            moderate: "Moderate Risk".to_string(),
            high: "High Risk".to_string(),
        }
    }
}

impl TierLabels {
    pub fn label(&self, tier: RiskTier) -> &str {
        match tier {
            RiskTier::Low => &self.low,
            RiskTier::Moderate => &self.moderate,
            RiskTier::High => &self.high,
        }
    }
}

/// Feature derivation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Measurement bucketed into the categorical column
    pub primary_field: String,
    /// Ascending by `lower`
    pub buckets: Vec<BucketBound>,
    /// Composite score weights; absent measurements contribute zero
    pub weights: BTreeMap<String, f64>,
    /// Scores strictly above this are at least moderate
    pub low_cutoff: f64,
    /// Scores strictly above this are high
    pub high_cutoff: f64,
    pub tier_labels: TierLabels,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        let buckets = [
            ("Good", 0.0),
            ("Moderate", 51.0),
            ("Unhealthy", 101.0),
            ("Very Unhealthy", 201.0),
            ("Hazardous", 301.0),
        ]
        .into_iter()
        .map(|(name, lower)| BucketBound {
            name: name.to_string(),
            lower,
        })
        .collect();

        let weights = [
            (constants::PM2_5, 5.0),
            (constants::PM10, 3.0),
            (constants::NITROGEN_DIOXIDE, 4.0),
            (constants::SULPHUR_DIOXIDE, 4.0),
            (constants::CARBON_MONOXIDE, 2.0),
            (constants::OZONE, 3.0),
        ]
        .into_iter()
        .map(|(field, w)| (field.to_string(), w))
        .collect();

        Self {
            primary_field: constants::PM2_5.to_string(),
            buckets,
            weights,
            low_cutoff: 200.0,
            high_cutoff: 400.0,
            tier_labels: TierLabels::default(),
        }
    }
}

/// Trait for deriving features from a normalized record. Implementations
/// must be pure: same input, same output.
pub trait Enricher {
    fn enrich(&self, record: &NormalizedRecord) -> EnrichedRecord;
}

/// Default feature engine driven by `FeatureConfig`
#[derive(Debug, Clone, Default)]
pub struct FeatureEngine {
    pub config: FeatureConfig,
}

impl FeatureEngine {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    /// Bucket name for a primary measurement value
    pub fn categorize(&self, value: f64) -> Option<&str> {
        self.config
            .buckets
            .iter()
            .take_while(|b| value >= b.lower)
            .last()
            .map(|b| b.name.as_str())
    }

    /// Weighted sum over the configured measurement fields
    pub fn composite_score(&self, record: &NormalizedRecord) -> f64 {
        self.config
            .weights
            .iter()
            .map(|(field, weight)| weight * record.measurement(field).unwrap_or(0.0))
            .sum()
    }

    /// A score equal to a cutoff stays in the tier below it.
    pub fn classify_risk(&self, score: f64) -> RiskTier {
        if score > self.config.high_cutoff {
            RiskTier::High
        } else if score > self.config.low_cutoff {
            RiskTier::Moderate
        } else {
            RiskTier::Low
        }
    }

    /// Enrich many records in parallel. Output order matches input order.
    pub fn enrich_all(&self, records: Vec<NormalizedRecord>) -> Vec<EnrichedRecord> {
        let enriched: Vec<EnrichedRecord> = records.par_iter().map(|r| self.enrich(r)).collect();
        crate::observability::metrics::enrich::records_enriched(enriched.len());
        enriched
    }
}

impl Enricher for FeatureEngine {
    fn enrich(&self, record: &NormalizedRecord) -> EnrichedRecord {
        let aqi_category = record
            .measurement(&self.config.primary_field)
            .and_then(|v| self.categorize(v))
            .map(str::to_string);
        let severity_score = self.composite_score(record);
        let risk_tier = self.classify_risk(severity_score);

        EnrichedRecord {
            aqi_category,
            severity_score,
            risk_tier,
            risk_flag: self.config.tier_labels.label(risk_tier).to_string(),
            hour: record.observed_at.hour(),
            record: record.clone(),
        }
    }
}
