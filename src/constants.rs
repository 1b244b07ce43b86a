/// Field and table names shared across the pipeline.
/// These are the defaults for the hourly air quality dataset; the schema
/// itself is configurable through `PipelineConfig`.

pub const TABLE_NAME: &str = "air_quality_data";

// Raw record fields
pub const CITY_FIELD: &str = "city";
pub const TIME_FIELD: &str = "time";

pub const PM10: &str = "pm10";
pub const PM2_5: &str = "pm2_5";
pub const CARBON_MONOXIDE: &str = "carbon_monoxide";
pub const NITROGEN_DIOXIDE: &str = "nitrogen_dioxide";
pub const SULPHUR_DIOXIDE: &str = "sulphur_dioxide";
pub const OZONE: &str = "ozone";
pub const UV_INDEX: &str = "uv_index";

// Derived columns
pub const AQI_CATEGORY: &str = "aqi_category";
pub const SEVERITY_SCORE: &str = "severity_score";
pub const RISK_FLAG: &str = "risk_flag";
pub const RISK_CODE: &str = "risk_code";
pub const HOUR: &str = "hour";

pub const DERIVED_COLUMNS: [&str; 5] = [AQI_CATEGORY, SEVERITY_SCORE, RISK_FLAG, RISK_CODE, HOUR];

/// Integer-coded derived columns
pub const CODED_COLUMNS: [&str; 2] = [RISK_CODE, HOUR];

/// Measurement fields in the order they appear in the upstream hourly payload
pub fn default_measurement_fields() -> Vec<String> {
    [PM10, PM2_5, CARBON_MONOXIDE, NITROGEN_DIOXIDE, SULPHUR_DIOXIDE, OZONE, UV_INDEX]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

// Load defaults
pub const DEFAULT_BATCH_SIZE: usize = 200;
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2_000;

/// Environment variable naming the default SQLite database path
pub const DB_PATH_ENV: &str = "AQ_DB_PATH";
pub const DEFAULT_DB_PATH: &str = "data/air_quality.db";
