//! Configuration module for UpdateHub Utils
//!
//! The configuration store is a YAML file of sections, each a flat map of
//! string keys to string values:
//!
//! ```yaml
//! auth:
//!   access_id: "${UHU_ID:-my-access-id}"
//!   access_secret: "my-secret"
//! settings:
//!   server_url: "https://api.updatehub.io"
//!   upload_concurrency: 4
//! ```
//!
//! `${VAR}` and `${VAR:-default}` references are stored as written and
//! expanded when a value is read, so saving never writes expanded values back
//! to the file. A few environment variables override file values at read time
//! (see [`ACCESS_ID_ENV`], [`ACCESS_SECRET_ENV`], [`SERVER_URL_ENV`]).

use crate::auth::{Credentials, CredentialsError};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Section holding credentials
pub const AUTH_SECTION: &str = "auth";
/// Section holding general settings
pub const SETTINGS_SECTION: &str = "settings";

pub const ACCESS_ID_KEY: &str = "access_id";
pub const ACCESS_SECRET_KEY: &str = "access_secret";
pub const SERVER_URL_KEY: &str = "server_url";
pub const UPLOAD_CONCURRENCY_KEY: &str = "upload_concurrency";
pub const CHUNK_SIZE_KEY: &str = "chunk_size";

/// Overrides `auth.access_id`
pub const ACCESS_ID_ENV: &str = "UHU_ACCESS_ID";
/// Overrides `auth.access_secret`
pub const ACCESS_SECRET_ENV: &str = "UHU_ACCESS_SECRET";
/// Overrides `settings.server_url`
pub const SERVER_URL_ENV: &str = "UHU_SERVER_URL";
/// Overrides the configuration file location
pub const CONFIG_PATH_ENV: &str = "UHU_CONFIG";

pub const DEFAULT_SERVER_URL: &str = "https://api.updatehub.io";
pub const DEFAULT_CONFIG_FILE: &str = ".uhu.yaml";
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 1;
pub const MAX_UPLOAD_CONCURRENCY: usize = 8;
pub const DEFAULT_CHUNK_SIZE: usize = 128 * 1024;
pub const MIN_CHUNK_SIZE: usize = 4096;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

static ENV_VAR_RE: LazyLock<regex_lite::Regex> = LazyLock::new(|| {
    regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").expect("valid regex")
});

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// # Examples
///
/// ```ignore
/// std::env::set_var("MY_VAR", "value");
/// let result = expand_env_vars("prefix-${MY_VAR}-suffix");
/// assert_eq!(result, "prefix-value-suffix");
///
/// let result = expand_env_vars("${MISSING:-default}");
/// assert_eq!(result, "default");
/// ```
pub(crate) fn expand_env_vars(s: &str) -> String {
    ENV_VAR_RE
        .replace_all(s, |cap: &regex_lite::Captures<'_>| {
            match std::env::var(&cap[1]) {
                Ok(value) => value,
                Err(_) => match cap.get(2) {
                    Some(default) => default.as_str().to_string(),
                    // No env var and no default. Keep the original placeholder.
                    None => cap[0].to_string(),
                },
            }
        })
        .into_owned()
}

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn env_override(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Could not determine the home directory")]
    NoHomeDirectory,
}

type Sections = BTreeMap<String, BTreeMap<String, String>>;

/// Accept any YAML scalar as a value and store its string form
fn deserialize_sections<'de, D>(deserializer: D) -> Result<Sections, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Bool(bool),
        Integer(i64),
        Float(f64),
        Text(String),
    }

    let raw: Option<BTreeMap<String, Option<BTreeMap<String, Scalar>>>> =
        Option::deserialize(deserializer)?;

    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(section, values)| {
            let values = values
                .unwrap_or_default()
                .into_iter()
                .map(|(key, value)| {
                    let value = match value {
                        Scalar::Bool(v) => v.to_string(),
                        Scalar::Integer(v) => v.to_string(),
                        Scalar::Float(v) => v.to_string(),
                        Scalar::Text(v) => v,
                    };
                    (key, value)
                })
                .collect();
            (section, values)
        })
        .collect())
}

/// Key/value configuration store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Config {
    #[serde(deserialize_with = "deserialize_sections")]
    sections: Sections,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Load configuration, treating a missing file as empty
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match ConfigLoader::load(path) {
            Err(ConfigError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// `$UHU_CONFIG`, or `~/.uhu.yaml`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        if let Some(path) = env_override(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }
        dirs::home_dir()
            .map(|home| home.join(DEFAULT_CONFIG_FILE))
            .ok_or(ConfigError::NoHomeDirectory)
    }

    /// Write configuration to a file, creating parent directories
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Value as written in the file, `${VAR}` references unexpanded
    pub fn get_raw(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|values| values.get(key))
            .map(String::as_str)
    }

    /// Value with `${VAR}` references expanded
    pub fn get(&self, section: &str, key: &str) -> Option<String> {
        self.get_raw(section, key).map(expand_env_vars)
    }

    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = self.get(SETTINGS_SECTION, SERVER_URL_KEY) {
            if !is_valid_http_url(&url) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid server URL '{}': must start with http:// or https://",
                    url
                )));
            }
        }

        if let Some(value) = self.get(SETTINGS_SECTION, UPLOAD_CONCURRENCY_KEY) {
            match value.parse::<usize>() {
                Ok(n) if n >= 1 => {}
                _ => {
                    return Err(ConfigError::ValidationError(format!(
                        "Invalid upload concurrency '{}': must be a positive integer",
                        value
                    )))
                }
            }
        }

        if let Some(value) = self.get(SETTINGS_SECTION, CHUNK_SIZE_KEY) {
            match value.parse::<usize>() {
                Ok(n) if n >= MIN_CHUNK_SIZE => {}
                _ => {
                    return Err(ConfigError::ValidationError(format!(
                        "Invalid chunk size '{}': must be at least {} bytes",
                        value, MIN_CHUNK_SIZE
                    )))
                }
            }
        }

        Ok(())
    }

    /// API base URL, `UHU_SERVER_URL` first
    pub fn server_url(&self) -> String {
        env_override(SERVER_URL_ENV)
            .or_else(|| self.get(SETTINGS_SECTION, SERVER_URL_KEY))
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string())
    }

    /// Object upload worker bound, clamped to `1..=MAX_UPLOAD_CONCURRENCY`
    pub fn upload_concurrency(&self) -> usize {
        self.get(SETTINGS_SECTION, UPLOAD_CONCURRENCY_KEY)
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(DEFAULT_UPLOAD_CONCURRENCY)
            .clamp(1, MAX_UPLOAD_CONCURRENCY)
    }

    pub fn chunk_size(&self) -> usize {
        self.get(SETTINGS_SECTION, CHUNK_SIZE_KEY)
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(DEFAULT_CHUNK_SIZE)
            .max(MIN_CHUNK_SIZE)
    }

    /// Credentials with environment overrides applied
    pub fn credentials(&self) -> Result<Credentials, CredentialsError> {
        let access_id = env_override(ACCESS_ID_ENV)
            .or_else(|| self.get(AUTH_SECTION, ACCESS_ID_KEY));
        let secret = env_override(ACCESS_SECRET_ENV)
            .or_else(|| self.get(AUTH_SECTION, ACCESS_SECRET_KEY));
        Credentials::from_parts(access_id, secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_and_set() {
        let mut config = Config::default();
        assert!(config.get(AUTH_SECTION, ACCESS_ID_KEY).is_none());

        config.set(AUTH_SECTION, ACCESS_ID_KEY, "id");
        assert_eq!(config.get(AUTH_SECTION, ACCESS_ID_KEY).as_deref(), Some("id"));
        assert!(config.get(SETTINGS_SECTION, ACCESS_ID_KEY).is_none());
    }

    #[test]
    fn test_upload_concurrency_is_clamped() {
        let mut config = Config::default();
        assert_eq!(config.upload_concurrency(), DEFAULT_UPLOAD_CONCURRENCY);

        config.set(SETTINGS_SECTION, UPLOAD_CONCURRENCY_KEY, "64");
        assert_eq!(config.upload_concurrency(), MAX_UPLOAD_CONCURRENCY);
    }

    #[test]
    fn test_chunk_size_has_floor() {
        let mut config = Config::default();
        assert_eq!(config.chunk_size(), DEFAULT_CHUNK_SIZE);

        config.set(SETTINGS_SECTION, CHUNK_SIZE_KEY, "16");
        assert_eq!(config.chunk_size(), MIN_CHUNK_SIZE);
    }

    #[test]
    fn test_config_validation_bad_server_url() {
        let mut config = Config::default();
        config.set(SETTINGS_SECTION, SERVER_URL_KEY, "ftp://example.com");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_bad_concurrency() {
        let mut config = Config::default();
        config.set(SETTINGS_SECTION, UPLOAD_CONCURRENCY_KEY, "zero");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expand_env_vars_keeps_unknown_placeholder() {
        let expanded = expand_env_vars("a: ${UHU_TEST_SURELY_UNSET_VAR}");
        assert_eq!(expanded, "a: ${UHU_TEST_SURELY_UNSET_VAR}");
    }

    #[test]
    fn test_expand_env_vars_default() {
        let expanded = expand_env_vars("a: ${UHU_TEST_SURELY_UNSET_VAR:-fallback}");
        assert_eq!(expanded, "a: fallback");
    }

    #[test]
    fn test_references_expand_on_read_only() {
        std::env::set_var("UHU_CONFIG_UNIT_SECRET", "s3cr3t");
        let mut config = Config::default();
        config.set(AUTH_SECTION, ACCESS_SECRET_KEY, "${UHU_CONFIG_UNIT_SECRET}");

        let expanded = config.get(AUTH_SECTION, ACCESS_SECRET_KEY);
        let raw = config.get_raw(AUTH_SECTION, ACCESS_SECRET_KEY).map(str::to_string);
        let yaml = serde_yaml::to_string(&config).unwrap();
        std::env::remove_var("UHU_CONFIG_UNIT_SECRET");

        assert_eq!(expanded.as_deref(), Some("s3cr3t"));
        assert_eq!(raw.as_deref(), Some("${UHU_CONFIG_UNIT_SECRET}"));
        assert!(yaml.contains("${UHU_CONFIG_UNIT_SECRET}"));
        assert!(!yaml.contains("s3cr3t"));
    }
}
