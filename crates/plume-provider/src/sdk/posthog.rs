//! Browser-style PostHog client.
//!
//! Mirrors the surface of posthog-js: a single current distinct id, super
//! properties, cached feature flags and a `before_send` hook that sees every
//! event right before it leaves the process.

use super::transport::{Transport, TransportRequest};
use crate::error::{ProviderError, Result};
use plume_core::{BeforeSendFn, CaptureEvent, Properties};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;
use uuid::Uuid;

#[derive(Clone)]
pub struct PostHogOptions {
    pub api_host: String,
    pub debug: bool,
    pub before_send: Option<BeforeSendFn>,
}

impl fmt::Debug for PostHogOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostHogOptions")
            .field("api_host", &self.api_host)
            .field("debug", &self.debug)
            .field("before_send", &self.before_send.is_some())
            .finish()
    }
}

#[derive(Debug)]
struct ClientState {
    distinct_id: String,
    anonymous_id: String,
    super_properties: Properties,
    feature_flags: HashMap<String, Value>,
}

impl ClientState {
    fn anonymous() -> Self {
        let anonymous_id = Uuid::new_v4().to_string();
        Self {
            distinct_id: anonymous_id.clone(),
            anonymous_id,
            super_properties: Properties::new(),
            feature_flags: HashMap::new(),
        }
    }
}

pub struct PostHogClient {
    api_key: String,
    options: PostHogOptions,
    transport: Arc<dyn Transport>,
    state: RwLock<ClientState>,
}

impl fmt::Debug for PostHogClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostHogClient")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl PostHogClient {
    pub fn init(
        api_key: impl Into<String>,
        options: PostHogOptions,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ProviderError::configuration("PostHog API key is required"));
        }
        if !options.api_host.starts_with("http://") && !options.api_host.starts_with("https://") {
            return Err(ProviderError::configuration(
                "PostHog api_host must start with http:// or https://",
            ));
        }

        Ok(Self {
            api_key,
            options,
            transport,
            state: RwLock::new(ClientState::anonymous()),
        })
    }

    pub fn api_host(&self) -> &str {
        self.options.api_host.trim_end_matches('/')
    }

    pub fn distinct_id(&self) -> String {
        self.read().distinct_id.clone()
    }

    /// Properties merged under every captured event
    pub fn register(&self, properties: Properties) {
        self.write().super_properties.extend(properties);
    }

    /// Capture an event. Returns the event as sent, or `None` when `before_send` dropped it.
    ///
    /// A string `distinct_id` property overrides the current distinct id.
    pub async fn capture(
        &self,
        event: &str,
        properties: Option<Properties>,
    ) -> Result<Option<CaptureEvent>> {
        let (distinct_id, mut merged) = {
            let state = self.read();
            (state.distinct_id.clone(), state.super_properties.clone())
        };
        merged.extend(properties.unwrap_or_default());

        let distinct_id = match merged.remove("distinct_id") {
            Some(Value::String(id)) if !id.is_empty() => id,
            _ => distinct_id,
        };

        let outgoing = CaptureEvent::new(event, distinct_id).with_properties(merged);
        let outgoing = match &self.options.before_send {
            Some(hook) => match hook(outgoing) {
                Some(event) => event,
                None => {
                    debug!(event, "Event dropped by before_send");
                    return Ok(None);
                }
            },
            None => outgoing,
        };

        let body = json!({
            "api_key": self.api_key,
            "uuid": outgoing.uuid,
            "event": outgoing.event,
            "distinct_id": outgoing.distinct_id,
            "properties": outgoing.properties,
            "timestamp": outgoing.timestamp,
        });
        self.transport
            .send(TransportRequest::new(
                format!("{}/capture/", self.api_host()),
                body,
            ))
            .await?;

        Ok(Some(outgoing))
    }

    /// Link the current anonymous visitor to `distinct_id` and set person properties
    pub async fn identify(&self, distinct_id: &str, set: Option<Properties>) -> Result<()> {
        if distinct_id.trim().is_empty() {
            return Err(ProviderError::configuration("distinct_id must not be empty"));
        }

        let anonymous_id = {
            let mut state = self.write();
            state.distinct_id = distinct_id.to_string();
            state.anonymous_id.clone()
        };

        let mut properties = Properties::new();
        properties.insert("$set".to_string(), Value::Object(set.unwrap_or_default()));
        properties.insert("$anon_distinct_id".to_string(), Value::String(anonymous_id));

        self.capture("$identify", Some(properties)).await?;
        Ok(())
    }

    pub async fn group(
        &self,
        group_type: &str,
        group_key: &str,
        properties: Option<Properties>,
    ) -> Result<()> {
        let mut payload = Properties::new();
        payload.insert("$group_type".to_string(), json!(group_type));
        payload.insert("$group_key".to_string(), json!(group_key));
        payload.insert(
            "$group_set".to_string(),
            Value::Object(properties.unwrap_or_default()),
        );

        self.capture("$groupidentify", Some(payload)).await?;
        Ok(())
    }

    /// Forget the identified user; a fresh anonymous id is issued.
    pub fn reset(&self) {
        *self.write() = ClientState::anonymous();
    }

    /// Fetch flags for the current distinct id and cache them
    pub async fn reload_feature_flags(&self) -> Result<()> {
        let body = json!({
            "api_key": self.api_key,
            "distinct_id": self.distinct_id(),
        });
        let response = self
            .transport
            .send(TransportRequest::new(
                format!("{}/decide/?v=3", self.api_host()),
                body,
            ))
            .await?;

        let flags = parse_feature_flags(&response)?;
        self.write().feature_flags = flags.into_iter().collect();
        Ok(())
    }

    pub fn is_feature_enabled(&self, flag: &str) -> bool {
        self.feature_flag(flag).as_ref().is_some_and(flag_is_on)
    }

    pub fn feature_flag(&self, flag: &str) -> Option<Value> {
        self.read().feature_flags.get(flag).cloned()
    }

    fn read(&self) -> RwLockReadGuard<'_, ClientState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ClientState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// `featureFlags` from a `/decide` answer; `Null` means no flags
pub(crate) fn parse_feature_flags(response: &Value) -> Result<Properties> {
    match response.get("featureFlags") {
        Some(Value::Object(flags)) => Ok(flags.clone()),
        None | Some(Value::Null) => Ok(Properties::new()),
        Some(other) => Err(ProviderError::InvalidResponse {
            message: format!("featureFlags must be an object, got {}", other),
        }),
    }
}

/// Multivariate flags are on when they carry a non-empty variant
pub(crate) fn flag_is_on(value: &Value) -> bool {
    match value {
        Value::Bool(enabled) => *enabled,
        Value::String(variant) => !variant.is_empty(),
        _ => false,
    }
}
