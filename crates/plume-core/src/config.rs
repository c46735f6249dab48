use crate::hooks::BeforeSendHooks;
use crate::{PlumeError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub const DEFAULT_POSTHOG_HOST: &str = "https://app.posthog.com";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Business tag stamped onto every outgoing event
    pub business: String,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posthog: Option<PostHogProviderConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posthog_server: Option<PostHogServerProviderConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ga4: Option<Ga4ProviderConfig>,
}

/// Browser-style PostHog client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostHogProviderConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub debug: bool,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip)]
    pub before_send: BeforeSendHooks,
}

/// Server-side PostHog client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostHogServerProviderConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub debug: bool,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Queue length that triggers a flush
    #[serde(default = "default_flush_at")]
    pub flush_at: usize,
    /// Periodic flush interval, 0 disables it
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(skip)]
    pub before_send: BeforeSendHooks,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ga4ProviderConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub debug: bool,
    pub measurement_id: String,
    /// Measurement Protocol API secret
    #[serde(default)]
    pub api_secret: String,
    /// Extra parameters sent with the initial `config` command
    #[serde(default)]
    pub gtag_config: crate::event::Properties,
}

fn default_enabled() -> bool {
    true
}

fn default_flush_at() -> usize {
    20
}

fn default_flush_interval_ms() -> u64 {
    10_000
}

impl PostHogProviderConfig {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            enabled: true,
            debug: false,
            key: key.into(),
            host: None,
            before_send: BeforeSendHooks::default(),
        }
    }

    pub fn api_host(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_POSTHOG_HOST)
    }
}

impl PostHogServerProviderConfig {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            enabled: true,
            debug: false,
            key: key.into(),
            host: None,
            flush_at: default_flush_at(),
            flush_interval_ms: default_flush_interval_ms(),
            before_send: BeforeSendHooks::default(),
        }
    }

    pub fn api_host(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_POSTHOG_HOST)
    }
}

impl Ga4ProviderConfig {
    pub fn new(measurement_id: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            enabled: true,
            debug: false,
            measurement_id: measurement_id.into(),
            api_secret: api_secret.into(),
            gtag_config: Default::default(),
        }
    }
}

impl AnalyticsConfig {
    pub fn new(business: impl Into<String>) -> Self {
        Self {
            business: business.into(),
            debug: false,
            providers: ProvidersConfig::default(),
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_posthog(mut self, config: PostHogProviderConfig) -> Self {
        self.providers.posthog = Some(config);
        self
    }

    pub fn with_posthog_server(mut self, config: PostHogServerProviderConfig) -> Self {
        self.providers.posthog_server = Some(config);
        self
    }

    pub fn with_ga4(mut self, config: Ga4ProviderConfig) -> Self {
        self.providers.ga4 = Some(config);
        self
    }

    /// Reject configurations that cannot produce a working manager.
    pub fn validate(&self) -> Result<()> {
        if self.business.trim().is_empty() {
            return Err(PlumeError::config(
                "business is required: every event is tagged with it",
            ));
        }

        if let Some(posthog) = self.providers.posthog.as_ref().filter(|c| c.enabled) {
            if posthog.key.trim().is_empty() {
                return Err(PlumeError::config("providers.posthog.key must be specified"));
            }
        }

        if let Some(server) = self.providers.posthog_server.as_ref().filter(|c| c.enabled) {
            if server.key.trim().is_empty() {
                return Err(PlumeError::config(
                    "providers.posthog_server.key must be specified",
                ));
            }
        }

        if let Some(ga4) = self.providers.ga4.as_ref().filter(|c| c.enabled) {
            if ga4.measurement_id.trim().is_empty() {
                return Err(PlumeError::config(
                    "providers.ga4.measurement_id must be specified",
                ));
            }
        }

        Ok(())
    }

    /// Canonical serialization used to compare configurations.
    ///
    /// Hooks are not part of it, two configs differing only in hooks compare equal.
    pub fn fingerprint(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| PlumeError::ConfigLoadFailed {
            path: "<inline>".to_string(),
            source: Box::new(e),
        })
    }

    pub async fn load(config_path: Option<&Path>) -> Result<Self> {
        let config_file = match config_path {
            Some(path) => path.to_path_buf(),
            None => Self::default_config_path()?,
        };

        if !config_file.exists() {
            return Err(PlumeError::config(format!(
                "No analytics config found at {}",
                config_file.display()
            )));
        }

        info!("Loading analytics config from: {}", config_file.display());
        let content = tokio::fs::read_to_string(&config_file).await?;
        let mut config: AnalyticsConfig =
            toml::from_str(&content).map_err(|e| PlumeError::ConfigLoadFailed {
                path: config_file.display().to_string(),
                source: Box::new(e),
            })?;

        config.load_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("com", "plume", "plume")
            .ok_or_else(|| PlumeError::config("Could not determine config directory"))?;

        Ok(project_dirs.config_dir().join("analytics.toml"))
    }

    pub fn load_env_overrides(&mut self) {
        if let Ok(business) = std::env::var("PLUME_BUSINESS") {
            self.business = business;
        }
        if let Ok(debug) = std::env::var("PLUME_DEBUG") {
            self.debug = debug.parse().unwrap_or(self.debug);
        }

        // PostHog
        if let Ok(key) = std::env::var("POSTHOG_KEY") {
            match self.providers.posthog.as_mut() {
                Some(posthog) => posthog.key = key,
                None => self.providers.posthog = Some(PostHogProviderConfig::new(key)),
            }
        }
        if let Ok(host) = std::env::var("POSTHOG_HOST") {
            if let Some(posthog) = self.providers.posthog.as_mut() {
                posthog.host = Some(host.clone());
            }
            if let Some(server) = self.providers.posthog_server.as_mut() {
                server.host = Some(host);
            }
        }

        // Google Analytics 4
        if let Ok(measurement_id) = std::env::var("GA4_MEASUREMENT_ID") {
            match self.providers.ga4.as_mut() {
                Some(ga4) => ga4.measurement_id = measurement_id,
                None => self.providers.ga4 = Some(Ga4ProviderConfig::new(measurement_id, "")),
            }
        }
        if let Ok(api_secret) = std::env::var("GA4_API_SECRET") {
            if let Some(ga4) = self.providers.ga4.as_mut() {
                ga4.api_secret = api_secret;
            }
        }
    }
}
