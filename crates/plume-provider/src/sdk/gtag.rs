//! gtag.js-style command interface over the GA4 Measurement Protocol.
//!
//! Setup commands (`js`, `config`, `set`) are kept in a bounded data layer.
//! Only `event` commands produce a request. There is no interception point: whatever is passed to
//! [`Gtag::gtag`] is sent as is.

use super::transport::{Transport, TransportRequest};
use crate::error::{ProviderError, Result};
use chrono::{DateTime, Utc};
use plume_core::Properties;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;
use uuid::Uuid;

const COLLECT_URL: &str = "https://www.google-analytics.com/mp/collect";
const DEBUG_COLLECT_URL: &str = "https://www.google-analytics.com/debug/mp/collect";

/// Oldest setup commands are dropped past this length
pub const DATA_LAYER_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum GtagCommand {
    Js(DateTime<Utc>),
    Config { target: String, params: Properties },
    Set(Properties),
    Event { name: String, params: Properties },
}

impl GtagCommand {
    pub fn event(name: impl Into<String>, params: Properties) -> Self {
        Self::Event {
            name: name.into(),
            params,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GtagOptions {
    pub measurement_id: String,
    pub api_secret: String,
    /// Send to the validation endpoint instead of the collection endpoint
    pub debug: bool,
}

#[derive(Debug, Default)]
struct GtagState {
    data_layer: VecDeque<GtagCommand>,
    user_id: Option<String>,
    user_properties: Properties,
    config: Properties,
}

pub struct Gtag {
    options: GtagOptions,
    client_id: String,
    transport: Arc<dyn Transport>,
    state: RwLock<GtagState>,
}

impl fmt::Debug for Gtag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gtag")
            .field("measurement_id", &self.options.measurement_id)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl Gtag {
    pub fn new(options: GtagOptions, transport: Arc<dyn Transport>) -> Self {
        Self {
            options,
            client_id: Uuid::new_v4().to_string(),
            transport,
            state: RwLock::new(GtagState::default()),
        }
    }

    pub fn measurement_id(&self) -> &str {
        &self.options.measurement_id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn endpoint(&self) -> String {
        let base = if self.options.debug {
            DEBUG_COLLECT_URL
        } else {
            COLLECT_URL
        };
        format!(
            "{}?measurement_id={}&api_secret={}",
            base, self.options.measurement_id, self.options.api_secret
        )
    }

    pub async fn gtag(&self, command: GtagCommand) -> Result<()> {
        let request = {
            let mut state = self.write();
            if !matches!(command, GtagCommand::Event { .. }) {
                if state.data_layer.len() == DATA_LAYER_CAPACITY {
                    state.data_layer.pop_front();
                }
                state.data_layer.push_back(command.clone());
            }
            self.apply(&mut state, command)?
        };

        if let Some(request) = request {
            self.transport.send(request).await?;
        }
        Ok(())
    }

    fn apply(&self, state: &mut GtagState, command: GtagCommand) -> Result<Option<TransportRequest>> {
        match command {
            GtagCommand::Js(_) => Ok(None),
            GtagCommand::Config { target, mut params } => {
                if target != self.options.measurement_id {
                    debug!(target, "Ignoring config for another measurement id");
                    return Ok(None);
                }
                match params.remove("user_id") {
                    Some(Value::String(user_id)) => state.user_id = Some(user_id),
                    Some(Value::Null) => state.user_id = None,
                    Some(other) => {
                        return Err(ProviderError::configuration(format!(
                            "user_id must be a string or null, got {}",
                            other
                        )))
                    }
                    None => {}
                }
                state.config.extend(params);
                Ok(None)
            }
            GtagCommand::Set(mut params) => {
                match params.remove("user_properties") {
                    Some(Value::Object(properties)) => state.user_properties = properties,
                    Some(Value::Null) => state.user_properties.clear(),
                    Some(other) => {
                        return Err(ProviderError::configuration(format!(
                            "user_properties must be an object, got {}",
                            other
                        )))
                    }
                    None => {}
                }
                state.config.extend(params);
                Ok(None)
            }
            GtagCommand::Event { name, params } => {
                Ok(Some(TransportRequest::new(self.endpoint(), self.payload(state, name, params))))
            }
        }
    }

    /// Measurement Protocol body for one event
    fn payload(&self, state: &GtagState, name: String, mut params: Properties) -> Value {
        let user_id = match params.remove("user_id") {
            Some(Value::String(user_id)) => Some(user_id),
            _ => state.user_id.clone(),
        };

        if state.config.get("debug_mode") == Some(&Value::Bool(true)) {
            params.insert("debug_mode".to_string(), Value::Bool(true));
        }

        let user_properties: Properties = state
            .user_properties
            .iter()
            .map(|(key, value)| (key.clone(), json!({ "value": value })))
            .collect();

        let mut body = json!({
            "client_id": self.client_id,
            "events": [{ "name": name, "params": params }],
        });
        if let Some(user_id) = user_id {
            body["user_id"] = Value::String(user_id);
        }
        if !user_properties.is_empty() {
            body["user_properties"] = Value::Object(user_properties);
        }
        body
    }

    /// Setup commands issued so far, oldest first
    pub fn data_layer(&self) -> Vec<GtagCommand> {
        self.read().data_layer.iter().cloned().collect()
    }

    pub fn user_id(&self) -> Option<String> {
        self.read().user_id.clone()
    }

    pub fn user_properties(&self) -> Properties {
        self.read().user_properties.clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, GtagState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, GtagState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::transport::RecordingTransport;

    fn gtag(debug: bool) -> (Gtag, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::new());
        let gtag = Gtag::new(
            GtagOptions {
                measurement_id: "G-TEST123".to_string(),
                api_secret: "secret".to_string(),
                debug,
            },
            transport.clone(),
        );
        (gtag, transport)
    }

    fn props(value: Value) -> Properties {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_only_events_are_sent() {
        let (gtag, transport) = gtag(false);

        gtag.gtag(GtagCommand::Js(Utc::now())).await.unwrap();
        gtag.gtag(GtagCommand::Config {
            target: "G-TEST123".to_string(),
            params: Properties::new(),
        })
        .await
        .unwrap();
        assert!(transport.requests().is_empty());

        gtag.gtag(GtagCommand::event("sign_up", props(json!({ "method": "email" }))))
            .await
            .unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].url.starts_with(COLLECT_URL));
        assert!(requests[0].url.contains("measurement_id=G-TEST123"));
        assert_eq!(requests[0].body["events"][0]["name"], json!("sign_up"));
        assert_eq!(requests[0].body["events"][0]["params"]["method"], json!("email"));
        assert_eq!(gtag.data_layer().len(), 2);
    }

    #[tokio::test]
    async fn test_data_layer_stays_bounded() {
        let (gtag, _) = gtag(false);
        gtag.gtag(GtagCommand::Js(Utc::now())).await.unwrap();

        for i in 0..1_000 {
            gtag.gtag(GtagCommand::event("tick", props(json!({ "i": i }))))
                .await
                .unwrap();
        }
        assert_eq!(gtag.data_layer().len(), 1);

        for _ in 0..(DATA_LAYER_CAPACITY * 2) {
            gtag.gtag(GtagCommand::Set(props(json!({ "user_properties": {} }))))
                .await
                .unwrap();
        }
        let data_layer = gtag.data_layer();
        assert_eq!(data_layer.len(), DATA_LAYER_CAPACITY);
        assert!(data_layer
            .iter()
            .all(|command| matches!(command, GtagCommand::Set(_))));
    }

    #[tokio::test]
    async fn test_user_id_and_properties_follow_config_and_set() {
        let (gtag, transport) = gtag(false);

        gtag.gtag(GtagCommand::Config {
            target: "G-TEST123".to_string(),
            params: props(json!({ "user_id": "user-1" })),
        })
        .await
        .unwrap();
        gtag.gtag(GtagCommand::Set(props(json!({ "user_properties": { "plan": "pro" } }))))
            .await
            .unwrap();
        gtag.gtag(GtagCommand::event("login", Properties::new()))
            .await
            .unwrap();

        let body = &transport.requests()[0].body;
        assert_eq!(body["user_id"], json!("user-1"));
        assert_eq!(body["user_properties"]["plan"]["value"], json!("pro"));

        gtag.gtag(GtagCommand::Config {
            target: "G-TEST123".to_string(),
            params: props(json!({ "user_id": null })),
        })
        .await
        .unwrap();
        gtag.gtag(GtagCommand::Set(props(json!({ "user_properties": {} }))))
            .await
            .unwrap();

        assert_eq!(gtag.user_id(), None);
        assert!(gtag.user_properties().is_empty());
    }

    #[tokio::test]
    async fn test_debug_mode_uses_validation_endpoint() {
        let (gtag, transport) = gtag(true);
        gtag.gtag(GtagCommand::Config {
            target: "G-TEST123".to_string(),
            params: props(json!({ "debug_mode": true })),
        })
        .await
        .unwrap();
        gtag.gtag(GtagCommand::event("x", Properties::new()))
            .await
            .unwrap();

        let request = &transport.requests()[0];
        assert!(request.url.starts_with(DEBUG_COLLECT_URL));
        assert_eq!(request.body["events"][0]["params"]["debug_mode"], json!(true));
    }

    #[tokio::test]
    async fn test_invalid_user_id_rejected() {
        let (gtag, _) = gtag(false);
        let result = gtag
            .gtag(GtagCommand::Config {
                target: "G-TEST123".to_string(),
                params: props(json!({ "user_id": 42 })),
            })
            .await;
        assert!(result.is_err());
    }
}
