use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProviderError>;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Server error: {status_code}, message: {message}")]
    ServerError { status_code: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Client has been shut down")]
    Shutdown,
}

impl ProviderError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::ServerError { status_code, .. } => *status_code >= 500,
            ProviderError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

impl From<ProviderError> for plume_core::PlumeError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Configuration { message } => plume_core::PlumeError::Config { message },
            other => plume_core::PlumeError::Vendor {
                provider: "vendor client".to_string(),
                message: other.to_string(),
            },
        }
    }
}
