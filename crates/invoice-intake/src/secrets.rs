//! Cloud API key resolution.
//!
//! The key is looked up in priority order:
//!
//! 1. **Direct value** - mostly for tests
//! 2. **File reference** - Docker secrets pattern (`api_key_file: /run/secrets/anthropic`)
//! 3. **Env var reference** - `ANTHROPIC_API_KEY` by default
//!
//! Keys never leave this module unwrapped except through [`ExposeSecret`].

use std::fs;

use secrecy::{ExposeSecret, SecretString};

use crate::config::CloudConfig;
use crate::pipeline::{CredentialCheck, CredentialStatus};

/// Prefix every Anthropic API key starts with.
pub const API_KEY_PREFIX: &str = "sk-ant-";

const MIN_API_KEY_LEN: usize = 21;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Resolves a secret from the first non-empty source.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct.filter(|v| !v.is_empty()) {
        return Ok(SecretString::from(value.to_string()));
    }

    if let Some(path) = file_path.filter(|p| !p.is_empty()) {
        let expanded = expand_home(path);
        return fs::read_to_string(&expanded)
            .map(|content| SecretString::from(content.trim().to_string()))
            .map_err(|e| SecretError::FileReadError {
                path: expanded,
                source: e,
            });
    }

    if let Some(name) = env_var.filter(|n| !n.is_empty()) {
        return match std::env::var(name) {
            // env vars may carry trailing newlines
            Ok(value) => Ok(SecretString::from(value.trim().to_string())),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: name.to_string(),
            }),
        };
    }

    Err(SecretError::NoSourceProvided)
}

/// Like [`resolve_secret`], but an absent source or unset variable is `None`.
pub fn resolve_secret_optional(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<Option<SecretString>> {
    match resolve_secret(direct, file_path, env_var) {
        Ok(secret) if secret.expose_secret().is_empty() => Ok(None),
        Ok(secret) => Ok(Some(secret)),
        Err(SecretError::NoSourceProvided) | Err(SecretError::EnvVarNotSet { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Format check only; the provider is the final judge.
pub fn is_valid_api_key(key: &str) -> bool {
    key.starts_with(API_KEY_PREFIX) && key.len() >= MIN_API_KEY_LEN
}

/// Expands a leading `~` to the user's home directory.
fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}

/// [`CredentialCheck`] reading the key from a file or environment variable
/// on every call, so a key added while running is picked up.
#[derive(Debug, Clone)]
pub struct EnvCredentialCheck {
    env_var: String,
    file_path: Option<String>,
}

impl EnvCredentialCheck {
    pub fn new(env_var: impl Into<String>, file_path: Option<String>) -> Self {
        Self {
            env_var: env_var.into(),
            file_path,
        }
    }

    pub fn from_config(config: &CloudConfig) -> Self {
        Self::new(config.api_key_env_var.clone(), config.api_key_file.clone())
    }

    pub fn api_key(&self) -> Result<Option<SecretString>> {
        resolve_secret_optional(None, self.file_path.as_deref(), Some(&self.env_var))
    }
}

impl CredentialCheck for EnvCredentialCheck {
    fn status(&self) -> CredentialStatus {
        match self.api_key() {
            Ok(Some(key)) => CredentialStatus {
                configured: true,
                valid: is_valid_api_key(key.expose_secret()),
            },
            Ok(None) => CredentialStatus::default(),
            Err(e) => {
                log::warn!("Could not read API key: {}", e);
                CredentialStatus {
                    configured: true,
                    valid: false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const VALID_KEY: &str = "sk-ant-REDACTED";

    #[test]
    #[serial]
    fn test_direct_value_takes_priority() {
        std::env::set_var("INTAKE_TEST_KEY", "from-env");
        let secret = resolve_secret(Some("direct"), None, Some("INTAKE_TEST_KEY")).unwrap();
        assert_eq!(secret.expose_secret(), "direct");
        std::env::remove_var("INTAKE_TEST_KEY");
    }

    #[test]
    #[serial]
    fn test_file_takes_priority_over_env() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "  from-file  ").unwrap();
        std::env::set_var("INTAKE_TEST_KEY", "from-env");

        let path = file.path().to_string_lossy().to_string();
        let secret = resolve_secret(None, Some(&path), Some("INTAKE_TEST_KEY")).unwrap();
        assert_eq!(secret.expose_secret(), "from-file");
        std::env::remove_var("INTAKE_TEST_KEY");
    }

    #[test]
    fn test_no_source_error() {
        assert!(matches!(
            resolve_secret(None, Some(""), None),
            Err(SecretError::NoSourceProvided)
        ));
    }

    #[test]
    fn test_file_not_found_error() {
        let result = resolve_secret(None, Some("/nonexistent/key"), None);
        assert!(matches!(result, Err(SecretError::FileReadError { .. })));
    }

    #[test]
    #[serial]
    fn test_optional_unset_env_is_none() {
        std::env::remove_var("INTAKE_TEST_MISSING");
        let result = resolve_secret_optional(None, None, Some("INTAKE_TEST_MISSING")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_key_format() {
        assert!(is_valid_api_key(VALID_KEY));
        assert!(!is_valid_api_key("sk-ant-short"));
        assert!(!is_valid_api_key("sk-proj-abcdefghijklmnopqrstuv"));
        assert!(!is_valid_api_key(""));
    }

    #[test]
    #[serial]
    fn test_credential_check_from_env() {
        let check = EnvCredentialCheck::new("INTAKE_TEST_KEY", None);

        std::env::remove_var("INTAKE_TEST_KEY");
        assert_eq!(check.status(), CredentialStatus::default());

        std::env::set_var("INTAKE_TEST_KEY", "not-a-key");
        assert_eq!(
            check.status(),
            CredentialStatus {
                configured: true,
                valid: false
            }
        );

        std::env::set_var("INTAKE_TEST_KEY", VALID_KEY);
        assert!(check.status().valid);
        std::env::remove_var("INTAKE_TEST_KEY");
    }

    #[test]
    fn test_credential_check_unreadable_file() {
        let check = EnvCredentialCheck::new("", Some("/nonexistent/key".to_string()));
        let status = check.status();
        assert!(status.configured);
        assert!(!status.valid);
    }

    #[test]
    #[serial]
    fn test_expand_home() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(
            expand_home("~/keys/anthropic"),
            format!("{}/keys/anthropic", home.to_string_lossy())
        );
        assert_eq!(expand_home("/abs/path"), "/abs/path");
    }
}
