use crate::event::{AnalyticsEvent, Properties};
use crate::Result;
use async_trait::async_trait;
use std::any::Any;

/// Capability set every analytics backend adapter implements.
///
/// Only `initialize` surfaces vendor failures. The tracking methods catch and
/// log vendor errors themselves; an `Err` from them means the adapter could not
/// even attempt the call.
#[async_trait]
pub trait AnalyticsProvider: Send + Sync {
    /// Connect to the vendor client. Calling it again once initialized is a no-op.
    async fn initialize(&self) -> Result<()>;

    async fn track(&self, event: AnalyticsEvent) -> Result<()>;

    async fn identify(&self, user_id: &str, properties: Option<Properties>) -> Result<()>;

    async fn track_page_view(&self, page: &str, properties: Option<Properties>) -> Result<()>;

    /// Clear the vendor-side identity. Server-side adapters flush instead.
    async fn reset(&self) -> Result<()>;

    /// Stable identifier used in logs
    fn provider_name(&self) -> &str;

    fn is_initialized(&self) -> bool;

    /// Access to the concrete adapter, e.g. to reach its native client.
    fn as_any(&self) -> &dyn Any;
}
