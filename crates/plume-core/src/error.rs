use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlumeError>;

#[derive(Error, Debug)]
pub enum PlumeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Failed to load config from {path}: {source}")]
    ConfigLoadFailed {
        path: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Failed to initialize {provider}: {message}")]
    Initialization { provider: String, message: String },

    #[error("Invalid event: {message}")]
    Validation { message: String },

    #[error("{provider} call failed: {message}")]
    Vendor { provider: String, message: String },

    #[error(
        "Global analytics instance \"{name}\" not found. \
         Register it first with set_global_analytics() or AnalyticsRegistry::set()"
    )]
    InstanceNotFound { name: String },

    #[error(
        "Singleton analytics instance not created. \
         Call create_singleton() first or use global_analytics()"
    )]
    SingletonMissing,

    #[error("Analytics context error: {message}")]
    Context { message: String },
}

impl PlumeError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn initialization(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Initialization {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn vendor(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Vendor {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Whether the error must reach the caller. Only setup failures do; every
    /// per-event failure is logged and swallowed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config { .. } | Self::ConfigLoadFailed { .. } | Self::Initialization { .. }
        )
    }
}
