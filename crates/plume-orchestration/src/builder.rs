//! Entry points that turn an [`AnalyticsConfig`] into a ready-to-initialize manager.

use crate::manager::AnalyticsManager;
use plume_core::{AnalyticsConfig, PlumeError, Result};
use plume_provider::sdk::Transport;
use plume_provider::{NamedProvider, ProviderFactory};
use plume_telemetry::{TelemetryConfig, TelemetryGuard, TelemetrySystem};
use std::sync::Arc;
use tracing::info;

/// Manager for client applications, wired with the enabled `posthog` and `ga4`
/// adapters. Call [`AnalyticsManager::initialize`] before tracking.
pub fn create_analytics(config: &AnalyticsConfig) -> Result<AnalyticsManager> {
    build(config, None, Target::Client)
}

pub fn create_analytics_with_transport(
    config: &AnalyticsConfig,
    transport: Arc<dyn Transport>,
) -> Result<AnalyticsManager> {
    build(config, Some(transport), Target::Client)
}

/// Manager for server processes, wired with the enabled `posthog` and
/// `posthog_server` adapters.
pub fn create_server_analytics(config: &AnalyticsConfig) -> Result<AnalyticsManager> {
    build(config, None, Target::Server)
}

pub fn create_server_analytics_with_transport(
    config: &AnalyticsConfig,
    transport: Arc<dyn Transport>,
) -> Result<AnalyticsManager> {
    build(config, Some(transport), Target::Server)
}

/// Logging settings for an app using `config`: its `debug` flag picks the
/// level and format, then `PLUME_LOG_*` variables apply.
pub fn telemetry_config(config: &AnalyticsConfig) -> TelemetryConfig {
    TelemetryConfig::for_debug(config.debug).with_env_overrides()
}

/// Install the process-wide tracing subscriber for `config`. Keep the guard
/// alive for as long as file output should keep flushing.
pub async fn init_telemetry(config: &AnalyticsConfig) -> Result<TelemetryGuard> {
    TelemetrySystem::init(telemetry_config(config))
        .await
        .map_err(|e| PlumeError::config(e.to_string()))
}

#[derive(Debug, Clone, Copy)]
enum Target {
    Client,
    Server,
}

fn build(
    config: &AnalyticsConfig,
    transport: Option<Arc<dyn Transport>>,
    target: Target,
) -> Result<AnalyticsManager> {
    config.validate()?;

    let mut factory = ProviderFactory::from_config(config)?;
    if let Some(transport) = transport {
        factory = factory.with_transport(transport);
    }

    let providers: Vec<NamedProvider> = match target {
        Target::Client => factory.client_providers(config),
        Target::Server => factory.server_providers(config),
    };

    let manager = AnalyticsManager::with_business(factory.business().clone(), config.debug);
    for (name, provider) in providers {
        manager.register_provider(name, provider);
    }

    info!(
        business = %manager.business(),
        target = ?target,
        providers = manager.status().providers_count,
        "Created analytics manager"
    );
    Ok(manager)
}

#[cfg(test)]
mod tests {
    use super::*;
    use plume_core::{Ga4ProviderConfig, PostHogProviderConfig, PostHogServerProviderConfig};
    use plume_provider::sdk::RecordingTransport;
    use plume_provider::{GA4_KEY, POSTHOG_KEY, POSTHOG_SERVER_KEY};
    use plume_telemetry::{LogFormat, LogLevel};

    fn names(manager: &AnalyticsManager) -> Vec<String> {
        manager.providers().into_iter().map(|(name, _)| name).collect()
    }

    fn full_config() -> AnalyticsConfig {
        AnalyticsConfig::new("acme")
            .with_posthog(PostHogProviderConfig::new("phc_test"))
            .with_posthog_server(PostHogServerProviderConfig::new("phc_test"))
            .with_ga4(Ga4ProviderConfig::new("G-TEST123", "secret"))
    }

    #[test]
    fn test_blank_business_is_rejected() {
        let err = create_analytics(&AnalyticsConfig::new("")).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_client_entry_point_wires_client_adapters() {
        let manager = create_analytics(&full_config()).unwrap();
        assert_eq!(names(&manager), vec![GA4_KEY, POSTHOG_KEY]);
        assert!(!manager.is_initialized());
    }

    #[tokio::test]
    async fn test_server_entry_point_wires_server_adapters() {
        let transport = Arc::new(RecordingTransport::new());
        let manager =
            create_server_analytics_with_transport(&full_config(), transport.clone()).unwrap();
        assert_eq!(names(&manager), vec![POSTHOG_KEY, POSTHOG_SERVER_KEY]);
    }

    #[test]
    fn test_no_providers_yields_empty_manager() {
        let manager = create_analytics(&AnalyticsConfig::new("acme")).unwrap();
        assert_eq!(manager.status().providers_count, 0);
        assert_eq!(manager.business().as_str(), "acme");
    }

    #[test]
    fn test_telemetry_follows_debug_flag() {
        let verbose = telemetry_config(&AnalyticsConfig::new("acme").with_debug(true));
        assert_eq!(verbose.logging.level, LogLevel::Debug);
        assert_eq!(verbose.logging.format, LogFormat::Pretty);

        let quiet = telemetry_config(&AnalyticsConfig::new("acme"));
        assert_eq!(quiet.logging.level, LogLevel::Info);
        assert!(quiet.enabled);
    }
}
