pub mod config;
pub mod enrich;
pub mod error;
pub mod event;
pub mod hooks;
pub mod provider;

pub use config::{
    AnalyticsConfig, Ga4ProviderConfig, PostHogProviderConfig, PostHogServerProviderConfig,
    ProvidersConfig,
};
pub use enrich::{enrich_properties, BusinessTag, BUSINESS_KEY, SPM_KEY};
pub use error::{PlumeError, Result};
pub use event::{AnalyticsEvent, EventContext, PredefinedEvent, Properties};
pub use hooks::{BeforeSendChain, BeforeSendFn, BeforeSendHooks, CaptureEvent};
pub use provider::AnalyticsProvider;
