use crate::base::AdapterState;
use crate::error::ProviderError;
use crate::sdk::{Gtag, GtagCommand, GtagOptions, HttpTransport, Transport};
use async_trait::async_trait;
use chrono::Utc;
use plume_core::{
    AnalyticsEvent, AnalyticsProvider, BusinessTag, Ga4ProviderConfig, PlumeError, Properties,
    Result,
};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

pub const GA4_PAGE_VIEW_EVENT: &str = "page_view";

/// Adapter over the gtag command interface.
///
/// gtag offers no interception hook. Commands sent directly to
/// [`Ga4Provider::native_instance`] are not tagged with `business` or `spm`.
pub struct Ga4Provider {
    config: Ga4ProviderConfig,
    transport: Option<Arc<dyn Transport>>,
    state: AdapterState<Gtag>,
}

impl fmt::Debug for Ga4Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ga4Provider")
            .field("measurement_id", &self.config.measurement_id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Ga4Provider {
    pub fn new(config: Ga4ProviderConfig, business: BusinessTag) -> Self {
        let state = AdapterState::new("Google Analytics 4", business, config.enabled, config.debug);
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

    pub fn measurement_id(&self) -> &str {
        &self.config.measurement_id
    }

    /// Raw gtag handle. Bypasses enrichment entirely.
    pub fn native_instance(&self) -> Option<Arc<Gtag>> {
        let gtag = self.state.client();
        if gtag.is_none() {
            self.state
                .log("Cannot get native instance: provider not enabled or not initialized");
        }
        gtag
    }

    /// GA4 has no feature flags
    pub fn is_feature_enabled(&self, flag: &str) -> bool {
        self.state.log(&format!(
            "Feature flags not supported in GA4. Flag \"{}\" returns false",
            flag
        ));
        false
    }

    fn validate_config(&self) -> std::result::Result<(), ProviderError> {
        let measurement_id = self.config.measurement_id.trim();
        if measurement_id.is_empty() {
            return Err(ProviderError::configuration("GA4 measurement_id is required"));
        }
        if !measurement_id.starts_with("G-") {
            return Err(ProviderError::configuration(format!(
                "GA4 measurement_id must start with \"G-\", got \"{}\"",
                measurement_id
            )));
        }
        if self.config.api_secret.trim().is_empty() {
            return Err(ProviderError::configuration("GA4 api_secret is required"));
        }
        Ok(())
    }

    async fn connect(&self) -> std::result::Result<Gtag, ProviderError> {
        self.validate_config()?;

        let transport: Arc<dyn Transport> = match &self.transport {
            Some(transport) => transport.clone(),
            None => Arc::new(HttpTransport::new(HttpTransport::DEFAULT_TIMEOUT)?),
        };

        let debug_mode = self.state.debug()
            || self.config.gtag_config.get("debug_mode") == Some(&Value::Bool(true));

        let gtag = Gtag::new(
            GtagOptions {
                measurement_id: self.config.measurement_id.clone(),
                api_secret: self.config.api_secret.clone(),
                debug: debug_mode,
            },
            transport,
        );

        let mut params = self.config.gtag_config.clone();
        params.insert("debug_mode".to_string(), Value::Bool(debug_mode));

        gtag.gtag(GtagCommand::Js(Utc::now())).await?;
        gtag.gtag(self.config_command(params)).await?;
        Ok(gtag)
    }

    fn config_command(&self, params: Properties) -> GtagCommand {
        GtagCommand::Config {
            target: self.config.measurement_id.clone(),
            params,
        }
    }

    async fn send(&self, gtag: &Gtag, commands: Vec<GtagCommand>) -> std::result::Result<(), ProviderError> {
        for command in commands {
            gtag.gtag(command).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl AnalyticsProvider for Ga4Provider {
    async fn initialize(&self) -> Result<()> {
        if !self.state.is_enabled() || self.state.is_initialized() {
            return Ok(());
        }

        match self.connect().await {
            Ok(gtag) => {
                self.state.install(Arc::new(gtag));
                self.state.log("Google Analytics 4 initialized successfully");
                self.state
                    .log(&format!("Measurement ID: {}", self.config.measurement_id));
                self.state.log(&format!(
                    "Business context will be added to all events: {}",
                    self.state.business()
                ));
                Ok(())
            }
            Err(e) => {
                self.state
                    .log_error("Failed to initialize Google Analytics 4", &e);
                Err(PlumeError::initialization(self.state.name(), e.to_string()))
            }
        }
    }

    async fn track(&self, event: AnalyticsEvent) -> Result<()> {
        let Some(gtag) = self.state.client() else {
            return Ok(());
        };
        if !self.state.validate_event(&event) {
            return Ok(());
        }

        let mut params = self.state.enrich(Some(&event.properties));
        if let Some(user_id) = &event.user_id {
            params.insert("user_id".to_string(), Value::String(user_id.clone()));
        }

        match gtag
            .gtag(GtagCommand::event(event.name.as_str(), params.clone()))
            .await
        {
            Ok(()) => self
                .state
                .log_payload(&format!("Tracked event: {}", event.name), &params),
            Err(e) => self
                .state
                .log_error(&format!("Failed to track event: {}", event.name), &e),
        }
        Ok(())
    }

    async fn identify(&self, user_id: &str, properties: Option<Properties>) -> Result<()> {
        let Some(gtag) = self.state.client() else {
            return Ok(());
        };

        let mut commands = Vec::with_capacity(3);

        let mut config = Properties::new();
        config.insert("user_id".to_string(), Value::String(user_id.to_string()));
        commands.push(self.config_command(config));

        if let Some(properties) = properties.as_ref().filter(|p| !p.is_empty()) {
            let mut set = Properties::new();
            set.insert(
                "user_properties".to_string(),
                Value::Object(self.state.enrich(Some(properties))),
            );
            commands.push(GtagCommand::Set(set));
        }

        let mut login = self.state.enrich(None);
        login.insert("user_id".to_string(), Value::String(user_id.to_string()));
        commands.push(GtagCommand::event("login", login));

        match self.send(&gtag, commands).await {
            Ok(()) => self.state.log(&format!("Identified user: {}", user_id)),
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

        let mut params = Properties::new();
        params.insert("page_location".to_string(), Value::String(page.to_string()));
        params.insert("page_title".to_string(), Value::String(page.to_string()));
        params.extend(self.state.enrich(properties.as_ref()));

        self.track(AnalyticsEvent::new(GA4_PAGE_VIEW_EVENT).with_properties(params.clone()))
            .await?;
        self.state
            .log_payload(&format!("Tracked page view: {}", page), &params);
        Ok(())
    }

    /// Clears the user id and user properties, then records a `logout` event.
    async fn reset(&self) -> Result<()> {
        let Some(gtag) = self.state.client() else {
            return Ok(());
        };

        let mut config = Properties::new();
        config.insert("user_id".to_string(), Value::Null);
        let mut set = Properties::new();
        set.insert("user_properties".to_string(), Value::Object(Properties::new()));

        let commands = vec![
            self.config_command(config),
            GtagCommand::Set(set),
            GtagCommand::event("logout", self.state.enrich(None)),
        ];

        match self.send(&gtag, commands).await {
            Ok(()) => self.state.log("Reset user identity and tracked logout"),
            Err(e) => self.state.log_error("Failed to reset user identity", &e),
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::RecordingTransport;
    use serde_json::json;

    fn provider(config: Ga4ProviderConfig) -> (Ga4Provider, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::new());
        let provider = Ga4Provider::new(config, BusinessTag::new("acme").unwrap())
            .with_transport(transport.clone());
        (provider, transport)
    }

    async fn ready() -> (Ga4Provider, Arc<RecordingTransport>) {
        let (provider, transport) = provider(Ga4ProviderConfig::new("G-TEST123", "secret"));
        provider.initialize().await.unwrap();
        (provider, transport)
    }

    fn sent_events(transport: &RecordingTransport) -> Vec<Value> {
        transport
            .requests()
            .into_iter()
            .map(|r| r.body)
            .collect()
    }

    #[tokio::test]
    async fn test_initialize_validates_measurement_id() {
        for (measurement_id, secret) in [("", "secret"), ("UA-12345", "secret"), ("G-OK", " ")] {
            let (provider, _) = provider(Ga4ProviderConfig::new(measurement_id, secret));
            let err = provider.initialize().await.unwrap_err();
            assert!(matches!(err, PlumeError::Initialization { .. }));
            assert!(!provider.is_initialized());
        }
    }

    #[tokio::test]
    async fn test_initialize_issues_js_and_config() {
        let mut config = Ga4ProviderConfig::new("G-TEST123", "secret");
        config
            .gtag_config
            .insert("send_page_view".to_string(), json!(false));
        let (provider, transport) = provider(config);
        provider.initialize().await.unwrap();

        let gtag = provider.native_instance().unwrap();
        let data_layer = gtag.data_layer();
        assert!(matches!(data_layer[0], GtagCommand::Js(_)));
        match &data_layer[1] {
            GtagCommand::Config { target, params } => {
                assert_eq!(target, "G-TEST123");
                assert_eq!(params["send_page_view"], json!(false));
                assert_eq!(params["debug_mode"], json!(false));
            }
            other => panic!("expected config command, got {:?}", other),
        }
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_tracking_does_not_grow_data_layer() {
        let (provider, transport) = ready().await;
        for _ in 0..2_000 {
            provider.track(AnalyticsEvent::new("tick")).await.unwrap();
        }

        assert_eq!(transport.requests().len(), 2_000);
        assert_eq!(provider.native_instance().unwrap().data_layer().len(), 2);
    }

    #[tokio::test]
    async fn test_track_enriches_params() {
        let (provider, transport) = ready().await;
        provider
            .track(
                AnalyticsEvent::new("purchase")
                    .with_property("spm", "checkout.pay")
                    .with_user_id("user-1"),
            )
            .await
            .unwrap();

        let body = &sent_events(&transport)[0];
        let params = &body["events"][0]["params"];
        assert_eq!(body["events"][0]["name"], json!("purchase"));
        assert_eq!(body["user_id"], json!("user-1"));
        assert_eq!(params["business"], json!("acme"));
        assert_eq!(params["spm"], json!("acme.checkout.pay"));
    }

    #[tokio::test]
    async fn test_identify_sets_user_and_sends_login() {
        let (provider, transport) = ready().await;
        let mut props = Properties::new();
        props.insert("plan".to_string(), json!("pro"));
        provider.identify("user-1", Some(props)).await.unwrap();

        let gtag = provider.native_instance().unwrap();
        assert_eq!(gtag.user_id().as_deref(), Some("user-1"));
        assert_eq!(gtag.user_properties()["business"], json!("acme"));

        let body = &sent_events(&transport)[0];
        assert_eq!(body["events"][0]["name"], json!("login"));
        assert_eq!(body["user_id"], json!("user-1"));
        assert_eq!(body["user_properties"]["plan"]["value"], json!("pro"));
    }

    #[tokio::test]
    async fn test_identify_without_properties_skips_set() {
        let (provider, _) = ready().await;
        provider.identify("user-1", Some(Properties::new())).await.unwrap();

        let gtag = provider.native_instance().unwrap();
        assert!(!gtag
            .data_layer()
            .iter()
            .any(|command| matches!(command, GtagCommand::Set(_))));
    }

    #[tokio::test]
    async fn test_reset_clears_identity_and_logs_out() {
        let (provider, transport) = ready().await;
        let mut props = Properties::new();
        props.insert("plan".to_string(), json!("pro"));
        provider.identify("user-1", Some(props)).await.unwrap();
        transport.clear();

        provider.reset().await.unwrap();

        let gtag = provider.native_instance().unwrap();
        assert_eq!(gtag.user_id(), None);
        assert!(gtag.user_properties().is_empty());

        let body = &sent_events(&transport)[0];
        assert_eq!(body["events"][0]["name"], json!("logout"));
        assert_eq!(body["events"][0]["params"]["spm"], json!("acme"));
        assert!(body.get("user_id").is_none());
    }

    #[tokio::test]
    async fn test_page_view_params() {
        let (provider, transport) = ready().await;
        provider.track_page_view("/pricing", None).await.unwrap();

        let event = &sent_events(&transport)[0]["events"][0];
        assert_eq!(event["name"], json!("page_view"));
        assert_eq!(event["params"]["page_location"], json!("/pricing"));
        assert_eq!(event["params"]["page_title"], json!("/pricing"));
    }

    #[tokio::test]
    async fn test_native_gtag_bypasses_enrichment() {
        let (provider, transport) = ready().await;
        let gtag = provider.native_instance().unwrap();

        gtag.gtag(GtagCommand::event("raw", Properties::new()))
            .await
            .unwrap();

        let params = &sent_events(&transport)[0]["events"][0]["params"];
        assert!(params.get("business").is_none());
        assert!(params.get("spm").is_none());
    }

    #[test]
    fn test_feature_flags_unsupported() {
        let (provider, _) = provider(Ga4ProviderConfig::new("G-TEST123", "secret"));
        assert!(!provider.is_feature_enabled("anything"));
    }
}
