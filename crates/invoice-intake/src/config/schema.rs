use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::job::PipelinePreference;

pub const CONFIG_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub cloud: CloudConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            jobs: JobsConfig::default(),
            pipeline: PipelineConfig::default(),
            cloud: CloudConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Time an analyzed job stays processable.
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    /// How long finished job records are kept before the sweeper purges them.
    #[serde(default = "default_retention_seconds")]
    pub retention_seconds: u64,
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
    /// Keep jobs in SQLite instead of memory.
    #[serde(default)]
    pub persistent: bool,
}

fn default_ttl_seconds() -> u64 {
    3600
}

fn default_retention_seconds() -> u64 {
    86_400
}

fn default_sweep_interval_seconds() -> u64 {
    300
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl_seconds(),
            retention_seconds: default_retention_seconds(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
            persistent: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,
    #[serde(default = "default_extraction_timeout_seconds")]
    pub extraction_timeout_seconds: u64,
    #[serde(default)]
    pub default_preference: PipelinePreference,
}

fn default_quality_threshold() -> f64 {
    crate::pipeline::QUALITY_THRESHOLD
}

fn default_extraction_timeout_seconds() -> u64 {
    120
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            quality_threshold: default_quality_threshold(),
            extraction_timeout_seconds: default_extraction_timeout_seconds(),
            default_preference: PipelinePreference::Auto,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    #[serde(default = "default_api_key_env_var")]
    pub api_key_env_var: String,
    #[serde(default)]
    pub api_key_file: Option<String>,
    /// Where users can create an API key; returned with `requires_api_key`.
    #[serde(default = "default_console_url")]
    pub console_url: String,
}

fn default_api_key_env_var() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_console_url() -> String {
    "https://console.anthropic.com/settings/keys".to_string()
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            api_key_env_var: default_api_key_env_var(),
            api_key_file: None,
            console_url: default_console_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub data_directory: Option<String>,
    #[serde(default)]
    pub temp_directory: Option<String>,
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

fn default_max_upload_bytes() -> u64 {
    50 * 1024 * 1024
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_directory: None,
            temp_directory: None,
            database_path: None,
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl StorageConfig {
    /// Configured data directory, else the platform data dir.
    pub fn data_directory(&self) -> PathBuf {
        match &self.data_directory {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("invoice-intake"),
        }
    }

    pub fn temp_directory(&self) -> PathBuf {
        match &self.temp_directory {
            Some(dir) => PathBuf::from(dir),
            None => self.data_directory().join("temp"),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        match &self.database_path {
            Some(path) => PathBuf::from(path),
            None => crate::db::default_database_path(&self.data_directory()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `invoice_intake=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
