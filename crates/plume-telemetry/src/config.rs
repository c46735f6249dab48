//! Logging settings for applications embedding Plume.
//!
//! The usual entry point is [`TelemetryConfig::for_debug`], fed from the
//! analytics config's `debug` flag, followed by
//! [`TelemetryConfig::with_env_overrides`].

use crate::sanitization::SanitizationPatterns;
use crate::{Error, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::Level;

pub const ENV_LOG_LEVEL: &str = "PLUME_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "PLUME_LOG_FORMAT";
pub const ENV_FILE_LOGGING: &str = "PLUME_FILE_LOGGING";
/// Setting a directory turns file output on unless `PLUME_FILE_LOGGING` is false.
pub const ENV_LOG_DIR: &str = "PLUME_LOG_DIR";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// When false no output layer is installed at all
    pub enabled: bool,
    pub logging: LoggingConfig,
    pub privacy: PrivacyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub console_enabled: bool,
    /// Daily rolling files under `log_dir`
    pub file_enabled: bool,
    pub log_dir: PathBuf,
    pub log_file_name: String,
    pub include_location: bool,
    pub include_thread_info: bool,
}

/// What the payload sanitizer redacts before adapters log event bodies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivacyConfig {
    pub sanitize_enabled: bool,
    pub redaction_patterns: Vec<String>,
    /// Property names whose values are always replaced
    pub redacted_fields: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(Error::Config {
                message: format!("unknown log level '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => Err(Error::Config {
                message: format!("unknown log format '{}'", other),
            }),
        }
    }
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        let fields = [
            "password",
            "api_key",
            "api_secret",
            "secret",
            "token",
            "authorization",
        ];
        Self {
            sanitize_enabled: true,
            redaction_patterns: SanitizationPatterns::api_credentials(),
            redacted_fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            console_enabled: true,
            file_enabled: false,
            log_dir: default_log_dir(),
            log_file_name: "plume".to_string(),
            include_location: false,
            include_thread_info: false,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::for_debug(false)
    }
}

impl TelemetryConfig {
    /// Debug mode logs at `debug` in the pretty format with source locations,
    /// so adapter payload logs are readable during development.
    pub fn for_debug(debug: bool) -> Self {
        let mut logging = LoggingConfig::default();
        if debug {
            logging.level = LogLevel::Debug;
            logging.format = LogFormat::Pretty;
            logging.include_location = true;
        }
        Self {
            enabled: true,
            logging,
            privacy: PrivacyConfig::default(),
        }
    }

    /// Read a TOML file, then apply environment overrides.
    pub async fn from_toml_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&content).map_err(|e| Error::Config {
            message: format!("Failed to parse {}: {}", path.display(), e),
        })?;
        Ok(config.with_env_overrides())
    }

    /// Apply `PLUME_LOG_*` and `PLUME_FILE_LOGGING` variables. Unparseable
    /// values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(level) = env_parse::<LogLevel>(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
        if let Some(format) = env_parse::<LogFormat>(ENV_LOG_FORMAT) {
            self.logging.format = format;
        }
        if let Ok(dir) = std::env::var(ENV_LOG_DIR) {
            if !dir.trim().is_empty() {
                self.logging.log_dir = PathBuf::from(dir);
                self.logging.file_enabled = true;
            }
        }
        if let Some(enabled) = env_parse::<bool>(ENV_FILE_LOGGING) {
            self.logging.file_enabled = enabled;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.logging.file_enabled && self.logging.log_file_name.trim().is_empty() {
            return Err(Error::Config {
                message: "log_file_name must not be empty when file logging is enabled"
                    .to_string(),
            });
        }

        for pattern in &self.privacy.redaction_patterns {
            regex::Regex::new(pattern).map_err(|e| Error::Config {
                message: format!("Invalid redaction pattern '{}': {}", pattern, e),
            })?;
        }

        Ok(())
    }
}

fn env_parse<T: FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|value| value.parse().ok())
}

fn default_log_dir() -> PathBuf {
    ProjectDirs::from("com", "plume", "plume")
        .map(|dirs| dirs.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("./logs"))
}
