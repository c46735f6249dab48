//! Server-side PostHog client.
//!
//! Queue based like posthog-node: captures are buffered and sent to `/batch/`
//! when the queue reaches `flush_at`, on the periodic flush tick, or on an
//! explicit `flush`/`shutdown`. There is no ambient user; every message names
//! its distinct id.

use super::posthog::{flag_is_on, parse_feature_flags};
use super::transport::{lock, Transport, TransportRequest};
use crate::error::{ProviderError, Result};
use chrono::{DateTime, Utc};
use plume_core::{BeforeSendFn, CaptureEvent, Properties};
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct PostHogServerOptions {
    pub host: String,
    pub flush_at: usize,
    /// Zero disables the periodic flush
    pub flush_interval: Duration,
    pub before_send: Option<BeforeSendFn>,
}

impl fmt::Debug for PostHogServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostHogServerOptions")
            .field("host", &self.host)
            .field("flush_at", &self.flush_at)
            .field("flush_interval", &self.flush_interval)
            .field("before_send", &self.before_send.is_some())
            .finish()
    }
}

/// A single capture call
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureMessage {
    pub distinct_id: String,
    pub event: String,
    pub properties: Option<Properties>,
    pub timestamp: Option<DateTime<Utc>>,
    pub groups: Option<Properties>,
}

impl CaptureMessage {
    pub fn new(distinct_id: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            distinct_id: distinct_id.into(),
            event: event.into(),
            properties: None,
            timestamp: None,
            groups: None,
        }
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = Some(properties);
        self
    }

    pub fn with_timestamp(mut self, timestamp: Option<DateTime<Utc>>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

pub struct PostHogServerClient {
    api_key: String,
    options: PostHogServerOptions,
    transport: Arc<dyn Transport>,
    queue: tokio::sync::Mutex<Vec<CaptureEvent>>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl fmt::Debug for PostHogServerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostHogServerClient")
            .field("options", &self.options)
            .field("shut_down", &self.shut_down.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl PostHogServerClient {
    /// Create the client. The periodic flush only starts when called inside a tokio runtime.
    pub fn new(
        api_key: impl Into<String>,
        options: PostHogServerOptions,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Self>> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ProviderError::configuration("PostHog API key is required"));
        }
        if options.flush_at == 0 {
            return Err(ProviderError::configuration("flush_at must be at least 1"));
        }

        let client = Arc::new(Self {
            api_key,
            options,
            transport,
            queue: tokio::sync::Mutex::new(Vec::new()),
            flush_task: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        });

        if !client.options.flush_interval.is_zero() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let task = handle.spawn(periodic_flush(
                    Arc::downgrade(&client),
                    client.options.flush_interval,
                ));
                *lock(&client.flush_task) = Some(task);
            }
        }

        Ok(client)
    }

    pub fn host(&self) -> &str {
        self.options.host.trim_end_matches('/')
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Queue an event. Returns `false` when `before_send` dropped it.
    pub async fn capture(&self, message: CaptureMessage) -> Result<bool> {
        if self.is_shut_down() {
            return Err(ProviderError::Shutdown);
        }

        let mut properties = message.properties.unwrap_or_default();
        if let Some(groups) = message.groups {
            properties.insert("$groups".to_string(), Value::Object(groups));
        }

        let mut event = CaptureEvent::new(message.event, message.distinct_id)
            .with_properties(properties);
        if let Some(timestamp) = message.timestamp {
            event.timestamp = timestamp;
        }

        let event = match &self.options.before_send {
            Some(hook) => match hook(event) {
                Some(event) => event,
                None => {
                    debug!("Event dropped by before_send");
                    return Ok(false);
                }
            },
            None => event,
        };

        let should_flush = {
            let mut queue = self.queue.lock().await;
            queue.push(event);
            queue.len() >= self.options.flush_at
        };

        if should_flush {
            self.flush().await?;
        }

        Ok(true)
    }

    pub async fn identify(&self, distinct_id: &str, properties: Option<Properties>) -> Result<()> {
        let mut payload = Properties::new();
        payload.insert("$set".to_string(), Value::Object(properties.unwrap_or_default()));

        self.capture(CaptureMessage::new(distinct_id, "$identify").with_properties(payload))
            .await?;
        Ok(())
    }

    pub async fn alias(&self, distinct_id: &str, alias: &str) -> Result<()> {
        let mut payload = Properties::new();
        payload.insert("distinct_id".to_string(), json!(distinct_id));
        payload.insert("alias".to_string(), json!(alias));

        self.capture(CaptureMessage::new(distinct_id, "$create_alias").with_properties(payload))
            .await?;
        Ok(())
    }

    /// Set properties on a group. The acting distinct id defaults to `$<type>_<key>`.
    pub async fn group_identify(
        &self,
        group_type: &str,
        group_key: &str,
        properties: Option<Properties>,
        distinct_id: Option<&str>,
    ) -> Result<()> {
        let distinct_id = distinct_id
            .map(str::to_string)
            .unwrap_or_else(|| format!("${}_{}", group_type, group_key));

        let mut payload = Properties::new();
        payload.insert("$group_type".to_string(), json!(group_type));
        payload.insert("$group_key".to_string(), json!(group_key));
        payload.insert(
            "$group_set".to_string(),
            Value::Object(properties.unwrap_or_default()),
        );

        self.capture(CaptureMessage::new(distinct_id, "$groupidentify").with_properties(payload))
            .await?;
        Ok(())
    }

    /// Send everything queued. Events of a failed batch are dropped.
    pub async fn flush(&self) -> Result<()> {
        let batch = std::mem::take(&mut *self.queue.lock().await);
        if batch.is_empty() {
            return Ok(());
        }

        let count = batch.len();
        let body = json!({
            "api_key": self.api_key,
            "batch": batch,
        });

        self.transport
            .send(TransportRequest::new(format!("{}/batch/", self.host()), body))
            .await?;

        debug!(count, "Flushed PostHog batch");
        Ok(())
    }

    /// Flush and stop accepting events
    pub async fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(task) = lock(&self.flush_task).take() {
            task.abort();
        }

        self.flush().await
    }

    pub async fn all_flags(
        &self,
        distinct_id: &str,
        groups: Option<Properties>,
    ) -> Result<Properties> {
        let body = json!({
            "api_key": self.api_key,
            "distinct_id": distinct_id,
            "groups": groups.unwrap_or_default(),
        });
        let response = self
            .transport
            .send(TransportRequest::new(
                format!("{}/decide/?v=3", self.host()),
                body,
            ))
            .await?;

        parse_feature_flags(&response)
    }

    pub async fn feature_flag(
        &self,
        flag: &str,
        distinct_id: &str,
        groups: Option<Properties>,
    ) -> Result<Option<Value>> {
        let mut flags = self.all_flags(distinct_id, groups).await?;
        Ok(flags.remove(flag))
    }

    pub async fn is_feature_enabled(
        &self,
        flag: &str,
        distinct_id: &str,
        groups: Option<Properties>,
    ) -> Result<bool> {
        Ok(self
            .feature_flag(flag, distinct_id, groups)
            .await?
            .as_ref()
            .is_some_and(flag_is_on))
    }
}

impl Drop for PostHogServerClient {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.flush_task).take() {
            task.abort();
        }
    }
}

async fn periodic_flush(client: Weak<PostHogServerClient>, period: Duration) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        interval.tick().await;

        let Some(client) = client.upgrade() else {
            break;
        };
        if client.is_shut_down() {
            break;
        }
        if let Err(e) = client.flush().await {
            warn!(error = %e, "Periodic PostHog flush failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::transport::RecordingTransport;

    fn options(flush_at: usize, flush_interval: Duration) -> PostHogServerOptions {
        PostHogServerOptions {
            host: "https://ph.test".to_string(),
            flush_at,
            flush_interval,
            before_send: None,
        }
    }

    #[tokio::test]
    async fn test_flushes_when_queue_reaches_flush_at() {
        let transport = Arc::new(RecordingTransport::new());
        let client =
            PostHogServerClient::new("phc_test", options(2, Duration::ZERO), transport.clone())
                .unwrap();

        client.capture(CaptureMessage::new("u1", "a")).await.unwrap();
        assert!(transport.requests().is_empty());
        assert_eq!(client.queue_len().await, 1);

        client.capture(CaptureMessage::new("u1", "b")).await.unwrap();
        let batches = transport.requests_to("/batch/");
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].body["batch"].as_array().unwrap().len(), 2);
        assert_eq!(client.queue_len().await, 0);
    }

    #[tokio::test]
    async fn test_explicit_flush_and_empty_flush() {
        let transport = Arc::new(RecordingTransport::new());
        let client =
            PostHogServerClient::new("phc_test", options(20, Duration::ZERO), transport.clone())
                .unwrap();

        client.flush().await.unwrap();
        assert!(transport.requests().is_empty());

        client.capture(CaptureMessage::new("u1", "a")).await.unwrap();
        client.flush().await.unwrap();
        assert_eq!(transport.requests_to("/batch/").len(), 1);
    }

    #[tokio::test]
    async fn test_timestamp_and_groups_are_forwarded() {
        let transport = Arc::new(RecordingTransport::new());
        let client =
            PostHogServerClient::new("phc_test", options(1, Duration::ZERO), transport.clone())
                .unwrap();
        let timestamp = "2024-01-02T03:04:05Z".parse::<DateTime<Utc>>().unwrap();

        let mut groups = Properties::new();
        groups.insert("company".to_string(), json!("acme-inc"));
        let mut message = CaptureMessage::new("u1", "a").with_timestamp(Some(timestamp));
        message.groups = Some(groups);
        client.capture(message).await.unwrap();

        let event = &transport.requests()[0].body["batch"][0];
        assert_eq!(event["timestamp"], json!(timestamp));
        assert_eq!(event["properties"]["$groups"]["company"], json!("acme-inc"));
    }

    #[tokio::test]
    async fn test_shutdown_flushes_and_rejects_new_events() {
        let transport = Arc::new(RecordingTransport::new());
        let client = PostHogServerClient::new(
            "phc_test",
            options(20, Duration::from_secs(10)),
            transport.clone(),
        )
        .unwrap();

        client.capture(CaptureMessage::new("u1", "a")).await.unwrap();
        client.shutdown().await.unwrap();

        assert_eq!(transport.requests_to("/batch/").len(), 1);
        assert!(matches!(
            client.capture(CaptureMessage::new("u1", "b")).await,
            Err(ProviderError::Shutdown)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_flush() {
        let transport = Arc::new(RecordingTransport::new());
        let client = PostHogServerClient::new(
            "phc_test",
            options(20, Duration::from_millis(100)),
            transport.clone(),
        )
        .unwrap();

        client.capture(CaptureMessage::new("u1", "a")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(transport.requests_to("/batch/").len(), 1);
    }

    #[tokio::test]
    async fn test_group_identify_default_distinct_id() {
        let transport = Arc::new(RecordingTransport::new());
        let client =
            PostHogServerClient::new("phc_test", options(1, Duration::ZERO), transport.clone())
                .unwrap();

        client
            .group_identify("company", "acme-inc", None, None)
            .await
            .unwrap();

        let event = &transport.requests()[0].body["batch"][0];
        assert_eq!(event["distinct_id"], json!("$company_acme-inc"));
        assert_eq!(event["event"], json!("$groupidentify"));
    }

    #[tokio::test]
    async fn test_feature_flags_per_distinct_id() {
        let transport = Arc::new(
            RecordingTransport::new()
                .with_response("/decide/", json!({ "featureFlags": { "beta": "test" } })),
        );
        let client =
            PostHogServerClient::new("phc_test", options(20, Duration::ZERO), transport.clone())
                .unwrap();

        assert!(client.is_feature_enabled("beta", "u1", None).await.unwrap());
        assert!(!client.is_feature_enabled("other", "u1", None).await.unwrap());
        assert_eq!(
            transport.requests_to("/decide/")[0].body["distinct_id"],
            json!("u1")
        );
    }
}
