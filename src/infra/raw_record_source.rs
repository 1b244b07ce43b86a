use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::app::ports::RawRecordSourcePort;
use crate::domain::RawRecord;
use crate::error::{PipelineError, Result};
use crate::pipeline::processing::normalize::NormalizeSchema;

/// On-disk layout of the fetch stage's output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum InputFormat {
    /// One JSON object per line
    #[default]
    Ndjson,
    /// Per-entity `{"hourly": {...}}` payload files
    Hourly,
}

impl InputFormat {
    fn extensions(&self) -> &'static [&'static str] {
        match self {
            InputFormat::Ndjson => &["ndjson", "jsonl", "json"],
            InputFormat::Hourly => &["json"],
        }
    }
}

/// Build the source for `format`
pub fn source_for(
    format: InputFormat,
    paths: Vec<PathBuf>,
    schema: &NormalizeSchema,
) -> Box<dyn RawRecordSourcePort> {
    match format {
        InputFormat::Ndjson => Box::new(NdjsonSource::new(paths)),
        InputFormat::Hourly => Box::new(HourlyPayloadSource::new(paths, schema)),
    }
}

/// Expand directories into their matching files, sorted for a stable order
fn expand_paths(paths: &[PathBuf], extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = fs::read_dir(path)
                .map_err(|e| PipelineError::input(format!("cannot list '{}': {}", path.display(), e)))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| {
                    p.extension()
                        .and_then(|ext| ext.to_str())
                        .is_some_and(|ext| extensions.contains(&ext))
                })
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(path.clone());
        }
    }
    Ok(files)
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|e| PipelineError::input(format!("cannot read '{}': {}", path.display(), e)))
}

/// Newline-delimited JSON records
pub struct NdjsonSource {
    paths: Vec<PathBuf>,
}

impl NdjsonSource {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    fn parse(path: &Path, content: &str) -> Result<Vec<RawRecord>> {
        let mut records = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(line).map_err(|e| {
                PipelineError::input(format!("{}:{}: invalid JSON: {}", path.display(), idx + 1, e))
            })?;
            match value {
                Value::Object(map) => records.push(map),
                other => {
                    return Err(PipelineError::input(format!(
                        "{}:{}: expected a JSON object, found {}",
                        path.display(),
                        idx + 1,
                        json_kind(&other)
                    )))
                }
            }
        }
        Ok(records)
    }
}

impl RawRecordSourcePort for NdjsonSource {
    fn read_all(&self) -> Result<Vec<RawRecord>> {
        let mut records = Vec::new();
        for path in expand_paths(&self.paths, InputFormat::Ndjson.extensions())? {
            let content = read_file(&path)?;
            let parsed = Self::parse(&path, &content)?;
            info!("Read {} raw records from {}", parsed.len(), path.display());
            records.extend(parsed);
        }
        Ok(records)
    }

    fn describe(&self) -> String {
        format!("ndjson:{}", display_paths(&self.paths))
    }
}

/// Hourly API payloads, one file per entity named `<entity>_<suffix>.json`.
/// Each payload is flattened into one record per `time` entry.
pub struct HourlyPayloadSource {
    paths: Vec<PathBuf>,
    entity_field: String,
    timestamp_field: String,
}

impl HourlyPayloadSource {
    pub fn new(paths: Vec<PathBuf>, schema: &NormalizeSchema) -> Self {
        Self {
            paths,
            entity_field: schema.entity_field.clone(),
            timestamp_field: schema.timestamp_field.clone(),
        }
    }

    fn flatten(&self, entity: &str, payload: &Value) -> Vec<RawRecord> {
        let Some(hourly) = payload.get("hourly").and_then(Value::as_object) else {
            return Vec::new();
        };
        let times = match hourly.get(&self.timestamp_field).and_then(Value::as_array) {
            Some(times) => times,
            None => return Vec::new(),
        };

        times
            .iter()
            .enumerate()
            .map(|(i, time)| {
                let mut record = Map::new();
                record.insert(self.entity_field.clone(), Value::String(entity.to_string()));
                record.insert(self.timestamp_field.clone(), time.clone());
                for (field, series) in hourly {
                    if field == &self.timestamp_field {
                        continue;
                    }
                    if let Some(series) = series.as_array() {
                        // short series: missing positions are absent
                        record.insert(field.clone(), series.get(i).cloned().unwrap_or(Value::Null));
                    }
                }
                record
            })
            .collect()
    }
}

impl RawRecordSourcePort for HourlyPayloadSource {
    fn read_all(&self) -> Result<Vec<RawRecord>> {
        let mut records = Vec::new();
        for path in expand_paths(&self.paths, InputFormat::Hourly.extensions())? {
            let content = read_file(&path)?;
            let payload: Value = serde_json::from_str(&content).map_err(|e| {
                PipelineError::input(format!("{}: invalid JSON: {}", path.display(), e))
            })?;
            let entity = entity_from_path(&path);
            let flattened = self.flatten(&entity, &payload);
            if flattened.is_empty() {
                warn!("No hourly series in {}", path.display());
            } else {
                info!("Flattened {} hourly records for {} from {}", flattened.len(), entity, path.display());
            }
            records.extend(flattened);
        }
        Ok(records)
    }

    fn describe(&self) -> String {
        format!("hourly:{}", display_paths(&self.paths))
    }
}

/// `new-delhi_2024.json` -> `New-Delhi`
pub fn entity_from_path(path: &Path) -> String {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    title_case(stem.split('_').next().unwrap_or_default())
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for c in s.chars() {
        if prev_alpha {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        prev_alpha = c.is_alphabetic();
    }
    out
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(",")
}
