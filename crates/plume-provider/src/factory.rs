use crate::ga4::Ga4Provider;
use crate::posthog::PostHogProvider;
use crate::posthog_server::PostHogServerProvider;
use crate::sdk::Transport;
use plume_core::{AnalyticsConfig, AnalyticsProvider, BusinessTag, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Registration keys for the built-in adapters
pub const POSTHOG_KEY: &str = "posthog";
pub const POSTHOG_SERVER_KEY: &str = "posthog_server";
pub const GA4_KEY: &str = "ga4";

pub type NamedProvider = (String, Arc<dyn AnalyticsProvider>);

/// Builds the adapters enabled in an [`AnalyticsConfig`]
pub struct ProviderFactory {
    business: BusinessTag,
    transport: Option<Arc<dyn Transport>>,
}

impl ProviderFactory {
    pub fn new(business: BusinessTag) -> Self {
        Self {
            business,
            transport: None,
        }
    }

    pub fn from_config(config: &AnalyticsConfig) -> Result<Self> {
        Ok(Self::new(BusinessTag::new(config.business.clone())?))
    }

    /// Share one transport between every adapter built
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn business(&self) -> &BusinessTag {
        &self.business
    }

    /// Adapters for client applications: `posthog` and `ga4`
    pub fn client_providers(&self, config: &AnalyticsConfig) -> Vec<NamedProvider> {
        let mut providers = Vec::new();

        if let Some(posthog) = config.providers.posthog.as_ref().filter(|c| c.enabled) {
            info!("Creating PostHog provider");
            providers.push(self.posthog(posthog.clone()));
        }

        if let Some(ga4) = config.providers.ga4.as_ref().filter(|c| c.enabled) {
            info!("Creating Google Analytics 4 provider");
            providers.push(self.ga4(ga4.clone()));
        }

        if config.providers.posthog_server.is_some() {
            warn!("posthog_server is not available for client analytics; use create_server_analytics instead");
        }

        providers
    }

    /// Adapters for server processes: `posthog` and `posthog_server`
    pub fn server_providers(&self, config: &AnalyticsConfig) -> Vec<NamedProvider> {
        let mut providers = Vec::new();

        if let Some(posthog) = config.providers.posthog.as_ref().filter(|c| c.enabled) {
            info!("Creating PostHog provider");
            providers.push(self.posthog(posthog.clone()));
        }

        if let Some(server) = config.providers.posthog_server.as_ref().filter(|c| c.enabled) {
            info!("Creating PostHog server provider");
            let mut provider = PostHogServerProvider::new(server.clone(), self.business.clone());
            if let Some(transport) = &self.transport {
                provider = provider.with_transport(transport.clone());
            }
            providers.push((POSTHOG_SERVER_KEY.to_string(), Arc::new(provider)));
        }

        if config.providers.ga4.is_some() {
            warn!("ga4 is not wired for server analytics and will be skipped");
        }

        providers
    }

    fn posthog(&self, config: plume_core::PostHogProviderConfig) -> NamedProvider {
        let mut provider = PostHogProvider::new(config, self.business.clone());
        if let Some(transport) = &self.transport {
            provider = provider.with_transport(transport.clone());
        }
        (POSTHOG_KEY.to_string(), Arc::new(provider))
    }

    fn ga4(&self, config: plume_core::Ga4ProviderConfig) -> NamedProvider {
        let mut provider = Ga4Provider::new(config, self.business.clone());
        if let Some(transport) = &self.transport {
            provider = provider.with_transport(transport.clone());
        }
        (GA4_KEY.to_string(), Arc::new(provider))
    }
}
