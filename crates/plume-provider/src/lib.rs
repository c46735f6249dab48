//! Provider adapters for Plume.
//!
//! Each adapter wraps a vendor client from [`sdk`], stamps the business tag
//! onto every payload it forwards, and swallows per-event vendor failures.

mod base;
pub mod error;
pub mod factory;
pub mod ga4;
pub mod mock;
pub mod posthog;
pub mod posthog_server;
pub mod sdk;

pub use error::{ProviderError, Result};
pub use factory::{NamedProvider, ProviderFactory, GA4_KEY, POSTHOG_KEY, POSTHOG_SERVER_KEY};
pub use ga4::Ga4Provider;
pub use mock::{MockAnalyticsProvider, RecordedCall};
pub use posthog::PostHogProvider;
pub use posthog_server::PostHogServerProvider;
