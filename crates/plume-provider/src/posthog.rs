use crate::base::AdapterState;
use crate::error::ProviderError;
use crate::sdk::{HttpTransport, PostHogClient, PostHogOptions, Transport};
use async_trait::async_trait;
use plume_core::{
    AnalyticsEvent, AnalyticsProvider, BeforeSendChain, BusinessTag, PlumeError,
    PostHogProviderConfig, Properties, Result,
};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

pub const POSTHOG_PAGEVIEW_EVENT: &str = "$pageview";

/// Adapter over the browser-style PostHog client.
///
/// The client is created with a before-send chain, so events captured
/// directly on [`PostHogProvider::native_instance`] are tagged as well.
pub struct PostHogProvider {
    config: PostHogProviderConfig,
    transport: Option<Arc<dyn Transport>>,
    state: AdapterState<PostHogClient>,
}

impl fmt::Debug for PostHogProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostHogProvider")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl PostHogProvider {
    pub fn new(config: PostHogProviderConfig, business: BusinessTag) -> Self {
        let state = AdapterState::new("PostHog", business, config.enabled, config.debug);
        Self {
            config,
            transport: None,
            state,
        }
    }

    /// Send through `transport` instead of HTTP
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn business(&self) -> &BusinessTag {
        self.state.business()
    }

    /// The underlying client, for APIs the adapter does not wrap.
    ///
    /// Captures made on it still pass through the before-send chain and get
    /// `business` and a default `spm`.
    pub fn native_instance(&self) -> Option<Arc<PostHogClient>> {
        let client = self.state.client();
        if client.is_none() {
            self.state
                .log("Cannot get native instance: provider not enabled or not initialized");
        }
        client
    }

    /// Cached flag state; false until initialized and flags are loaded
    pub fn is_feature_enabled(&self, flag: &str) -> bool {
        match self.state.client() {
            Some(client) => client.is_feature_enabled(flag),
            None => false,
        }
    }

    pub async fn reload_feature_flags(&self) {
        let Some(client) = self.state.client() else {
            return;
        };
        match client.reload_feature_flags().await {
            Ok(()) => self.state.log("Reloaded feature flags"),
            Err(e) => self.state.log_error("Failed to reload feature flags", &e),
        }
    }

    fn connect(&self) -> std::result::Result<PostHogClient, ProviderError> {
        let transport: Arc<dyn Transport> = match &self.transport {
            Some(transport) => transport.clone(),
            None => Arc::new(HttpTransport::new(HttpTransport::DEFAULT_TIMEOUT)?),
        };

        let chain = BeforeSendChain::new(
            self.state.business().clone(),
            self.config.before_send.clone(),
        );

        PostHogClient::init(
            self.config.key.clone(),
            PostHogOptions {
                api_host: self.config.api_host().to_string(),
                debug: self.state.debug(),
                before_send: Some(chain.into_hook()),
            },
            transport,
        )
    }
}

#[async_trait]
impl AnalyticsProvider for PostHogProvider {
    async fn initialize(&self) -> Result<()> {
        if !self.state.is_enabled() || self.state.is_initialized() {
            return Ok(());
        }

        match self.connect() {
            Ok(client) => {
                self.state.install(Arc::new(client));
                self.state.log("PostHog initialized successfully");
                self.state.log(&format!(
                    "Using before_send to add business context: {}",
                    self.state.business()
                ));
                Ok(())
            }
            Err(e) => {
                self.state.log_error("Failed to initialize PostHog", &e);
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

        let mut properties = self.state.enrich(Some(&event.properties));
        if let Some(user_id) = &event.user_id {
            properties.insert("distinct_id".to_string(), Value::String(user_id.clone()));
        }

        match client.capture(&event.name, Some(properties.clone())).await {
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

    async fn reset(&self) -> Result<()> {
        let Some(client) = self.state.client() else {
            return Ok(());
        };

        client.reset();
        self.state.log("Reset user identity");
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
