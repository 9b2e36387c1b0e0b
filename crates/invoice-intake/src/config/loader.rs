use std::path::Path;

use crate::config::schema::{Config, CONFIG_VERSION};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != CONFIG_VERSION {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let threshold = config.pipeline.quality_threshold;
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ConfigError::Validation {
            message: format!("quality_threshold must be within 0..1, got {}", threshold),
        });
    }

    if config.jobs.ttl_seconds == 0 {
        return Err(ConfigError::Validation {
            message: "jobs.ttl_seconds must be positive".to_string(),
        });
    }

    if config.jobs.sweep_interval_seconds == 0 {
        return Err(ConfigError::Validation {
            message: "jobs.sweep_interval_seconds must be positive".to_string(),
        });
    }

    if config.pipeline.extraction_timeout_seconds == 0 {
        return Err(ConfigError::Validation {
            message: "pipeline.extraction_timeout_seconds must be positive".to_string(),
        });
    }

    if config.storage.max_upload_bytes == 0 {
        return Err(ConfigError::Validation {
            message: "storage.max_upload_bytes must be positive".to_string(),
        });
    }

    if let Err(e) = tracing_subscriber::EnvFilter::try_new(&config.logging.level) {
        return Err(ConfigError::Validation {
            message: format!("Invalid logging level '{}': {}", config.logging.level, e),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::PipelinePreference;

    #[test]
    fn test_load_minimal_config_uses_defaults() {
        let config = load_config_from_str(r#"{ "version": "1.0" }"#).unwrap();
        assert_eq!(config.jobs.ttl_seconds, 3600);
        assert_eq!(config.jobs.retention_seconds, 86_400);
        assert_eq!(config.pipeline.quality_threshold, 0.6);
        assert_eq!(config.pipeline.extraction_timeout_seconds, 120);
        assert_eq!(config.pipeline.default_preference, PipelinePreference::Auto);
        assert_eq!(config.cloud.api_key_env_var, "ANTHROPIC_API_KEY");
        assert_eq!(config.storage.max_upload_bytes, 50 * 1024 * 1024);
        assert!(!config.logging.json);
    }

    #[test]
    fn test_load_full_config() {
        let config_json = r#"
        {
            "version": "1.0",
            "jobs": { "ttl_seconds": 600, "retention_seconds": 0, "sweep_interval_seconds": 30, "persistent": true },
            "pipeline": { "quality_threshold": 0.75, "extraction_timeout_seconds": 45, "default_preference": "local" },
            "cloud": { "api_key_env_var": "MY_KEY", "api_key_file": "/run/secrets/key" },
            "storage": { "data_directory": "/srv/intake", "max_upload_bytes": 1024 },
            "logging": { "level": "invoice_intake=debug", "json": true }
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(config.jobs.ttl_seconds, 600);
        assert!(config.jobs.persistent);
        assert_eq!(config.pipeline.quality_threshold, 0.75);
        assert_eq!(config.pipeline.default_preference, PipelinePreference::Local);
        assert_eq!(config.cloud.api_key_file.as_deref(), Some("/run/secrets/key"));
        assert_eq!(config.storage.max_upload_bytes, 1024);
        assert!(config.logging.json);
    }

    #[test]
    fn test_schema_rejects_unknown_field() {
        let result = load_config_from_str(r#"{ "version": "1.0", "workers": 4 }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_schema_rejects_threshold_out_of_range() {
        let result =
            load_config_from_str(r#"{ "version": "1.0", "pipeline": { "quality_threshold": 1.5 } }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_schema_rejects_wrong_version() {
        let result = load_config_from_str(r#"{ "version": "2.0" }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_version() {
        let result = load_config_from_str(r#"{ "jobs": {} }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_invalid_json() {
        let result = load_config_from_str("{ not json");
        assert!(matches!(result, Err(ConfigError::ParseJson(_))));
    }

    #[test]
    fn test_validate_rejects_bad_log_filter() {
        let mut config = Config::default();
        config.logging.level = "invoice_intake=loud".to_string();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn test_default_config_is_valid() {
        validate_config(&Config::default()).unwrap();
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("/nonexistent/intake.json");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }
}
