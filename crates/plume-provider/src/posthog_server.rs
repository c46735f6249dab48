use crate::base::AdapterState;
use crate::error::ProviderError;
use crate::posthog::POSTHOG_PAGEVIEW_EVENT;
use crate::sdk::{
    CaptureMessage, HttpTransport, PostHogServerClient, PostHogServerOptions, Transport,
};
use async_trait::async_trait;
use plume_core::{
    AnalyticsEvent, AnalyticsProvider, BeforeSendChain, BusinessTag, PlumeError,
    PostHogServerProviderConfig, Properties, Result,
};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Distinct id used when an event names neither a user nor an anonymous id
pub const ANONYMOUS_DISTINCT_ID: &str = "anonymous";

/// Adapter over the queue-based server PostHog client.
///
/// Server processes have no ambient visitor, so `reset` flushes the queue
/// instead of clearing an identity.
pub struct PostHogServerProvider {
    config: PostHogServerProviderConfig,
    transport: Option<Arc<dyn Transport>>,
    state: AdapterState<PostHogServerClient>,
}

impl fmt::Debug for PostHogServerProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostHogServerProvider")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl PostHogServerProvider {
    pub fn new(config: PostHogServerProviderConfig, business: BusinessTag) -> Self {
        let state = AdapterState::new("PostHogServer", business, config.enabled, config.debug);
        Self {
            config,
            transport: None,
            state,
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn business(&self) -> &BusinessTag {
        self.state.business()
    }

    pub fn native_instance(&self) -> Option<Arc<PostHogServerClient>> {
        let client = self.state.client();
        if client.is_none() {
            self.state
                .log("Cannot get native instance: provider not enabled or not initialized");
        }
        client
    }

    /// Send queued events now
    pub async fn flush(&self) {
        let Some(client) = self.state.client() else {
            return;
        };
        match client.flush().await {
            Ok(()) => self.state.log("Flushed pending events"),
            Err(e) => self.state.log_error("Failed to flush events", &e),
        }
    }

    /// Flush and stop the client. The adapter reports uninitialized afterwards.
    pub async fn shutdown(&self) {
        let Some(client) = self.state.client() else {
            return;
        };
        match client.shutdown().await {
            Ok(()) => {
                self.state.mark_uninitialized();
                self.state.log("PostHog server client shut down");
            }
            Err(e) => self
                .state
                .log_error("Failed to shutdown PostHog server client", &e),
        }
    }

    pub async fn is_feature_enabled(
        &self,
        flag: &str,
        distinct_id: &str,
        groups: Option<Properties>,
    ) -> bool {
        let Some(client) = self.state.client() else {
            return false;
        };
        client
            .is_feature_enabled(flag, distinct_id, groups)
            .await
            .unwrap_or_else(|e| {
                self.state
                    .log_error(&format!("Failed to check feature flag: {}", flag), &e);
                false
            })
    }

    pub async fn feature_flag(
        &self,
        flag: &str,
        distinct_id: &str,
        groups: Option<Properties>,
    ) -> Option<Value> {
        let client = self.state.client()?;
        client
            .feature_flag(flag, distinct_id, groups)
            .await
            .unwrap_or_else(|e| {
                self.state
                    .log_error(&format!("Failed to get feature flag: {}", flag), &e);
                None
            })
    }

    pub async fn all_flags(&self, distinct_id: &str, groups: Option<Properties>) -> Properties {
        let Some(client) = self.state.client() else {
            return Properties::new();
        };
        client
            .all_flags(distinct_id, groups)
            .await
            .unwrap_or_else(|e| {
                self.state.log_error("Failed to get all feature flags", &e);
                Properties::new()
            })
    }

    pub async fn group_identify(
        &self,
        group_type: &str,
        group_key: &str,
        properties: Option<Properties>,
    ) {
        let Some(client) = self.state.client() else {
            return;
        };

        let properties = self.state.enrich(properties.as_ref());
        match client
            .group_identify(group_type, group_key, Some(properties.clone()), None)
            .await
        {
            Ok(()) => self.state.log_payload(
                &format!("Group identified: {}:{}", group_type, group_key),
                &properties,
            ),
            Err(e) => self.state.log_error(
                &format!("Failed to identify group: {}:{}", group_type, group_key),
                &e,
            ),
        }
    }

    pub async fn alias(&self, distinct_id: &str, alias: &str) {
        let Some(client) = self.state.client() else {
            return;
        };
        match client.alias(distinct_id, alias).await {
            Ok(()) => self
                .state
                .log(&format!("Created alias: {} -> {}", distinct_id, alias)),
            Err(e) => self.state.log_error(
                &format!("Failed to create alias: {} -> {}", distinct_id, alias),
                &e,
            ),
        }
    }

    fn connect(&self) -> std::result::Result<Arc<PostHogServerClient>, ProviderError> {
        let transport: Arc<dyn Transport> = match &self.transport {
            Some(transport) => transport.clone(),
            None => Arc::new(HttpTransport::new(HttpTransport::DEFAULT_TIMEOUT)?),
        };

        let chain = BeforeSendChain::new(
            self.state.business().clone(),
            self.config.before_send.clone(),
        );

        PostHogServerClient::new(
            self.config.key.clone(),
            PostHogServerOptions {
                host: self.config.api_host().to_string(),
                flush_at: self.config.flush_at,
                flush_interval: Duration::from_millis(self.config.flush_interval_ms),
                before_send: Some(chain.into_hook()),
            },
            transport,
        )
    }
}

#[async_trait]
impl AnalyticsProvider for PostHogServerProvider {
    async fn initialize(&self) -> Result<()> {
        if !self.state.is_enabled() || self.state.is_initialized() {
            return Ok(());
        }

        match self.connect() {
            Ok(client) => {
                self.state.install(client);
                self.state.log("PostHog server client initialized successfully");
                self.state.log(&format!(
                    "Using business context: {}",
                    self.state.business()
                ));
                Ok(())
            }
            Err(e) => {
                self.state
                    .log_error("Failed to initialize PostHog server client", &e);
                Err(PlumeError::initialization(self.state.name(), e.to_string()))
            }
        }
    }

    async fn track(&self, event: AnalyticsEvent) -> Result<()> {
        let Some(client) = self.state.client() else {
            return Ok(());
        };
        if !self.state.validate_event(&event) {
            return Ok(());
        }

        let properties = self.state.enrich(Some(&event.properties));
        let distinct_id = event
            .user_id
            .as_deref()
            .or(event.anonymous_id.as_deref())
            .unwrap_or(ANONYMOUS_DISTINCT_ID);

        let message = CaptureMessage::new(distinct_id, event.name.as_str())
            .with_properties(properties.clone())
            .with_timestamp(event.timestamp);

        match client.capture(message).await {
            Ok(_) => self
                .state
                .log_payload(&format!("Tracked event: {}", event.name), &properties),
            Err(e) => self
                .state
                .log_error(&format!("Failed to track event: {}", event.name), &e),
        }
        Ok(())
    }

    async fn identify(&self, user_id: &str, properties: Option<Properties>) -> Result<()> {
        let Some(client) = self.state.client() else {
            return Ok(());
        };

        let properties = self.state.enrich(properties.as_ref());
        match client.identify(user_id, Some(properties.clone())).await {
            Ok(()) => self
                .state
                .log_payload(&format!("Identified user: {}", user_id), &properties),
            Err(e) => self
                .state
                .log_error(&format!("Failed to identify user: {}", user_id), &e),
        }
        Ok(())
    }

    async fn track_page_view(&self, page: &str, properties: Option<Properties>) -> Result<()> {
        if self.state.client().is_none() {
            return Ok(());
        }

        let mut merged = Properties::new();
        merged.insert("page".to_string(), Value::String(page.to_string()));
        merged.extend(properties.unwrap_or_default());
        let merged = self.state.enrich(Some(&merged));

        self.track(AnalyticsEvent::new(POSTHOG_PAGEVIEW_EVENT).with_properties(merged.clone()))
            .await?;
        self.state
            .log_payload(&format!("Tracked page view: {}", page), &merged);
        Ok(())
    }

    /// Flushes pending events; there is no identity to clear server side.
    async fn reset(&self) -> Result<()> {
        if self.state.client().is_none() {
            return Ok(());
        }
        self.flush().await;
        self.state.log("Reset user identity (flushed pending events)");
        Ok(())
    }

    fn provider_name(&self) -> &str {
        self.state.name()
    }

    fn is_initialized(&self) -> bool {
        self.state.is_initialized()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
