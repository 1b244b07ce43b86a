use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use crate::app::ports::StoreReaderPort;
use crate::constants;
use crate::domain::StoredRow;
use crate::error::Result;

/// Check names as they appear in the report
pub const CHECK_MANDATORY_FIELDS: &str = "mandatory_fields_present";
pub const CHECK_UNIQUE_IDENTIFIERS: &str = "unique_identifiers";
pub const CHECK_DERIVED_COLUMNS: &str = "derived_columns_present";
pub const CHECK_CODED_DOMAIN: &str = "coded_values_in_domain";
pub const CHECK_ROW_COUNT: &str = "row_count_matches";

/// Most offending values listed in a check's detail
const DETAIL_SAMPLE_LIMIT: usize = 10;

/// Configuration for post-load validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Measurement fields that must never be null in the store
    pub mandatory_fields: Vec<String>,
    /// Derived columns every row must carry a value for
    pub required_derived_columns: Vec<String>,
    /// Coded categorical column checked against `valid_codes`
    pub coded_field: String,
    pub valid_codes: BTreeSet<i64>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            mandatory_fields: vec![constants::PM10.to_string(), constants::PM2_5.to_string()],
            required_derived_columns: vec![
                constants::SEVERITY_SCORE.to_string(),
                constants::RISK_FLAG.to_string(),
                constants::RISK_CODE.to_string(),
                constants::HOUR.to_string(),
            ],
            coded_field: constants::RISK_CODE.to_string(),
            valid_codes: [0, 1, 2].into_iter().collect(),
        }
    }
}

/// Outcome of one check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    fn pass(detail: impl Into<String>) -> Self {
        Self {
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(detail: impl Into<String>) -> Self {
        Self {
            passed: false,
            detail: detail.into(),
        }
    }
}

/// Union of every check outcome for one validation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub rows: usize,
    pub checks: BTreeMap<String, CheckResult>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.checks.values().all(|c| c.passed)
    }

    pub fn failed_checks(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|(_, c)| !c.passed)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// A single structural check over the committed rows. Checks hold no
/// state and do not see each other's results.
pub trait ValidationCheck: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, rows: &[StoredRow]) -> CheckResult;
}

struct MandatoryFieldsCheck<'a> {
    fields: &'a [String],
}

impl ValidationCheck for MandatoryFieldsCheck<'_> {
    fn name(&self) -> &'static str {
        CHECK_MANDATORY_FIELDS
    }

    fn run(&self, rows: &[StoredRow]) -> CheckResult {
        let counts: Vec<(&str, usize)> = self
            .fields
            .iter()
            .map(|field| {
                let missing = rows
                    .iter()
                    .filter(|row| row.measurements.get(field).copied().flatten().is_none())
                    .count();
                (field.as_str(), missing)
            })
            .collect();

        let detail = counts
            .iter()
            .map(|(field, missing)| format!("{field}: {missing} missing"))
            .collect::<Vec<_>>()
            .join(", ");

        if counts.iter().all(|(_, missing)| *missing == 0) {
            CheckResult::pass(detail)
        } else {
            CheckResult::fail(detail)
        }
    }
}

struct UniqueIdentifierCheck;

impl ValidationCheck for UniqueIdentifierCheck {
    fn name(&self) -> &'static str {
        CHECK_UNIQUE_IDENTIFIERS
    }

    fn run(&self, rows: &[StoredRow]) -> CheckResult {
        let mut seen: BTreeMap<String, (String, usize)> = BTreeMap::new();
        for row in rows {
            let label = format!(
                "{}@{}",
                row.entity.as_deref().unwrap_or("?"),
                row.observed_at.as_deref().unwrap_or("?")
            );
            seen.entry(row.identifier()).or_insert((label, 0)).1 += 1;
        }

        let distinct = seen.len();
        if distinct == rows.len() {
            return CheckResult::pass(format!("{distinct} distinct identifiers across {} rows", rows.len()));
        }

        let duplicates: Vec<String> = seen
            .values()
            .filter(|(_, count)| *count > 1)
            .take(DETAIL_SAMPLE_LIMIT)
            .map(|(label, count)| format!("{label} x{count}"))
            .collect();
        CheckResult::fail(format!(
            "{distinct} distinct identifiers across {} rows; duplicates: {}",
            rows.len(),
            duplicates.join(", ")
        ))
    }
}

struct DerivedColumnsCheck<'a> {
    columns: &'a [String],
}

impl ValidationCheck for DerivedColumnsCheck<'_> {
    fn name(&self) -> &'static str {
        CHECK_DERIVED_COLUMNS
    }

    fn run(&self, rows: &[StoredRow]) -> CheckResult {
        let mut problems = Vec::new();
        for column in self.columns {
            // An unknown column is missing from every row's shape
            if !constants::DERIVED_COLUMNS.contains(&column.as_str()) {
                problems.push(format!("{column}: column does not exist"));
                continue;
            }
            let missing = rows
                .iter()
                .filter(|row| row.derived_present(column) != Some(true))
                .count();
            if missing > 0 {
                problems.push(format!("{column}: {missing} rows missing"));
            }
        }

        if problems.is_empty() {
            CheckResult::pass(format!("all {} derived columns present", self.columns.len()))
        } else {
            CheckResult::fail(problems.join(", "))
        }
    }
}

struct CodedDomainCheck<'a> {
    field: &'a str,
    valid: &'a BTreeSet<i64>,
}

impl ValidationCheck for CodedDomainCheck<'_> {
    fn name(&self) -> &'static str {
        CHECK_CODED_DOMAIN
    }

    fn run(&self, rows: &[StoredRow]) -> CheckResult {
        if !constants::CODED_COLUMNS.contains(&self.field) {
            return CheckResult::fail(format!("{}: column does not exist", self.field));
        }

        let mut found = BTreeSet::new();
        let mut invalid = BTreeSet::new();
        for row in rows {
            match row.coded_value(self.field).flatten() {
                Some(code) => {
                    found.insert(code);
                    if !self.valid.contains(&code) {
                        invalid.insert(code.to_string());
                    }
                }
                None => {
                    invalid.insert("null".to_string());
                }
            }
        }

        if invalid.is_empty() {
            CheckResult::pass(format!("{} codes found: {:?}", self.field, found))
        } else {
            CheckResult::fail(format!(
                "{} out-of-domain values: {{{}}} (allowed {:?})",
                self.field,
                invalid.into_iter().collect::<Vec<_>>().join(", "),
                self.valid
            ))
        }
    }
}

struct RowCountCheck {
    expected: Option<usize>,
}

impl ValidationCheck for RowCountCheck {
    fn name(&self) -> &'static str {
        CHECK_ROW_COUNT
    }

    fn run(&self, rows: &[StoredRow]) -> CheckResult {
        match self.expected {
            None => CheckResult::pass(format!("{} rows present; no expected count supplied", rows.len())),
            Some(expected) if expected == rows.len() => {
                CheckResult::pass(format!("{} rows present, {} expected", rows.len(), expected))
            }
            Some(expected) => CheckResult::fail(format!("{} rows present, {} expected", rows.len(), expected)),
        }
    }
}

/// Runs the full battery of checks against the store
#[derive(Debug, Clone, Default)]
pub struct PostLoadValidator {
    pub config: ValidationConfig,
}

impl PostLoadValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Run every check over an already-read snapshot. Never short-circuits.
    pub fn validate_rows(&self, rows: &[StoredRow], expected_rows: Option<usize>) -> ValidationReport {
        let checks: Vec<Box<dyn ValidationCheck + '_>> = vec![
            Box::new(MandatoryFieldsCheck {
                fields: &self.config.mandatory_fields,
            }),
            Box::new(UniqueIdentifierCheck),
            Box::new(DerivedColumnsCheck {
                columns: &self.config.required_derived_columns,
            }),
            Box::new(CodedDomainCheck {
                field: &self.config.coded_field,
                valid: &self.config.valid_codes,
            }),
            Box::new(RowCountCheck {
                expected: expected_rows,
            }),
        ];

        let mut report = ValidationReport {
            rows: rows.len(),
            checks: BTreeMap::new(),
        };
        for check in checks {
            let result = check.run(rows);
            if result.passed {
                info!(check = check.name(), detail = %result.detail, "✅ check passed");
            } else {
                warn!(check = check.name(), detail = %result.detail, "❌ check failed");
            }
            crate::observability::metrics::validate::check_completed(check.name(), result.passed);
            report.checks.insert(check.name().to_string(), result);
        }
        report
    }

    /// Read the committed dataset and validate it. Errors only when the
    /// store cannot be read.
    pub async fn validate(
        &self,
        reader: &dyn StoreReaderPort,
        expected_rows: Option<usize>,
    ) -> Result<ValidationReport> {
        let rows = reader.fetch_all().await?;
        info!(rows = rows.len(), "🔍 validating committed dataset");
        Ok(self.validate_rows(&rows, expected_rows))
    }
}
