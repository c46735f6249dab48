//! # Plume Telemetry
//!
//! Logging bootstrap for applications embedding Plume, plus the sanitizer the
//! provider adapters run event payloads through before writing them to debug
//! logs.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use plume_telemetry::{TelemetryConfig, TelemetrySystem};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), plume_telemetry::Error> {
//!     let _guard = TelemetrySystem::init(TelemetryConfig::for_debug(true)).await?;
//!
//!     tracing::info!("Application started");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod sanitization;
pub mod system;

pub use config::{LogFormat, LogLevel, LoggingConfig, PrivacyConfig, TelemetryConfig};
pub use sanitization::{default_sanitizer, PayloadSanitizer};
pub use system::{TelemetryGuard, TelemetrySystem};

/// Result type for telemetry operations
pub type Result<T> = std::result::Result<T, Error>;

/// Telemetry-specific errors
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Telemetry system error: {message}")]
    System { message: String },
}
