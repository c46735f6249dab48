use crate::error::{ProviderError, Result};
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// A JSON POST to a vendor ingestion endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransportRequest {
    pub url: String,
    pub body: Value,
}

impl TransportRequest {
    pub fn new(url: impl Into<String>, body: Value) -> Self {
        Self {
            url: url.into(),
            body,
        }
    }
}

/// Delivery channel used by the vendor clients
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the request and return the decoded JSON response (`Null` for an empty body)
    async fn send(&self, request: TransportRequest) -> Result<Value>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(timeout: Duration) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .user_agent(concat!("plume/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                ProviderError::configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<Value> {
        debug!(url = %request.url, "Sending vendor request");

        let response = self
            .client
            .post(&request.url)
            .json(&request.body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ProviderError::ServerError {
                status_code: status.as_u16(),
                message: text,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&text).map_err(|e| ProviderError::InvalidResponse {
            message: format!("Failed to decode response from {}: {}", request.url, e),
        })
    }
}

/// In-memory transport that records every request.
///
/// Responses are canned per URL fragment; unmatched requests answer `Null`.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    requests: Mutex<Vec<TransportRequest>>,
    responses: Mutex<Vec<(String, Value)>>,
    failing: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer requests whose URL contains `url_fragment` with `response`
    pub fn with_response(self, url_fragment: impl Into<String>, response: Value) -> Self {
        lock(&self.responses).push((url_fragment.into(), response));
        self
    }

    /// Make every subsequent send fail with a 503
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        lock(&self.requests).clone()
    }

    pub fn requests_to(&self, url_fragment: &str) -> Vec<TransportRequest> {
        lock(&self.requests)
            .iter()
            .filter(|r| r.url.contains(url_fragment))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.requests).clear();
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, request: TransportRequest) -> Result<Value> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::ServerError {
                status_code: 503,
                message: "recording transport set to fail".to_string(),
            });
        }

        let response = lock(&self.responses)
            .iter()
            .find(|(fragment, _)| request.url.contains(fragment.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or(Value::Null);

        lock(&self.requests).push(request);
        Ok(response)
    }
}

/// Lock ignoring poisoning; the guarded data stays consistent between statements.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
