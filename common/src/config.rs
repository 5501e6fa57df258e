use config::{Config, ConfigError, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashMap;
use tracing::debug;

use crate::{Error, Result};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Seconds; the n-th retry waits `backoff_factor * 2^n`.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound on the summed backoff of one retry sequence.
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Domain filters forwarded as query parameters, e.g. `by_country`.
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            per_page: default_per_page(),
            max_retries: default_max_retries(),
            backoff_factor: default_backoff_factor(),
            timeout_secs: default_timeout_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            page_delay_ms: default_page_delay_ms(),
            max_pages: default_max_pages(),
            headers: HashMap::new(),
            filters: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Local,
    S3,
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3Config {
    #[serde(default = "default_s3_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_s3_region")]
    pub region: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default = "default_s3_bucket")]
    pub bucket: String,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: default_s3_endpoint(),
            region: default_s3_region(),
            access_key: String::new(),
            secret_key: String::new(),
            bucket: default_s3_bucket(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_local_root")]
    pub local_root: String,
    #[serde(default)]
    pub s3: S3Config,
    #[serde(default = "default_raw_prefix")]
    pub raw_prefix: String,
    #[serde(default = "default_silver_prefix")]
    pub silver_prefix: String,
    #[serde(default = "default_gold_prefix")]
    pub gold_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            local_root: default_local_root(),
            s3: S3Config::default(),
            raw_prefix: default_raw_prefix(),
            silver_prefix: default_silver_prefix(),
            gold_prefix: default_gold_prefix(),
        }
    }
}

/// How a silver write treats partitions already in the table.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SilverWriteMode {
    /// Replace only the partitions present in the new batch.
    #[default]
    OverwritePartitions,
    /// Drop every existing partition before writing.
    OverwriteTable,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GoldWriteMode {
    #[default]
    Overwrite,
    /// Keeps earlier runs; the same group rows accumulate once per run.
    Append,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default)]
    pub silver_write_mode: SilverWriteMode,
    #[serde(default)]
    pub gold_write_mode: GoldWriteMode,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_true")]
    pub fail_on_validation: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            silver_write_mode: SilverWriteMode::default(),
            gold_write_mode: GoldWriteMode::default(),
            top_n: default_top_n(),
            fail_on_validation: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ValidationConfig {
    #[serde(default = "default_min_retention")]
    pub min_retention: f64,
    #[serde(default = "default_sum_tolerance")]
    pub sum_tolerance: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_retention: default_min_retention(),
            sum_tolerance: default_sum_tolerance(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openbrewerydb.org/v1".to_string()
}

fn default_per_page() -> u32 {
    200
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_factor() -> f64 {
    1.0
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_backoff_secs() -> u64 {
    60
}

fn default_page_delay_ms() -> u64 {
    100
}

fn default_max_pages() -> u32 {
    10_000
}

fn default_s3_endpoint() -> String {
    "http://localhost:9000".to_string()
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

fn default_s3_bucket() -> String {
    "lakehouse".to_string()
}

fn default_local_root() -> String {
    "data".to_string()
}

fn default_raw_prefix() -> String {
    "bronze/breweries".to_string()
}

fn default_silver_prefix() -> String {
    "silver/breweries".to_string()
}

fn default_gold_prefix() -> String {
    "gold/breweries".to_string()
}

fn default_top_n() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_min_retention() -> f64 {
    0.9
}

fn default_sum_tolerance() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Loads a config file and layers `APP_`-prefixed environment variables on
    /// top, e.g. `APP_API__PER_PAGE=50`.
    pub fn new(path: &str) -> Result<Self> {
        let builder = Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let settings = Self::from_config(builder.build()?)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(config::File::from_str(toml, FileFormat::Toml))
            .build()?;

        let settings = Self::from_config(config)?;
        settings.validate()?;
        Ok(settings)
    }

    fn from_config(config: Config) -> std::result::Result<Self, ConfigError> {
        if let Ok(headers) = config.get_table("api.headers") {
            debug!(?headers, "Loaded API headers from configuration");
        }

        let settings: Settings = config.try_deserialize()?;

        debug!(
            base_url = %settings.api.base_url,
            per_page = settings.api.per_page,
            backend = ?settings.storage.backend,
            "Parsed settings"
        );

        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.per_page == 0 {
            return Err(Error::InvalidInput("api.per_page must be positive".to_string()));
        }
        if !self.api.backoff_factor.is_finite() || self.api.backoff_factor < 0.0 {
            return Err(Error::InvalidInput(format!(
                "api.backoff_factor must be a non-negative number, got {}",
                self.api.backoff_factor
            )));
        }
        if self.api.max_pages == 0 {
            return Err(Error::InvalidInput("api.max_pages must be positive".to_string()));
        }
        let retention = self.validation.min_retention;
        if !(retention > 0.0 && retention <= 1.0) {
            return Err(Error::InvalidInput(format!(
                "validation.min_retention must be in (0, 1], got {}",
                retention
            )));
        }
        if self.pipeline.top_n == 0 {
            return Err(Error::InvalidInput("pipeline.top_n must be positive".to_string()));
        }
        Ok(())
    }
}
