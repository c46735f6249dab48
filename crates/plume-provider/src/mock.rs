use async_trait::async_trait;
use plume_core::{
    AnalyticsEvent, AnalyticsProvider, BusinessTag, PlumeError, Properties, Result,
};
use serde_json::Value;
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// A call that reached the provider after the initialization guard
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Track(AnalyticsEvent),
    Identify {
        user_id: String,
        properties: Properties,
    },
    PageView {
        page: String,
        properties: Properties,
    },
    Reset,
}

/// In-memory provider that records enriched calls instead of sending them.
/// Useful for tests and for running without vendor credentials.
#[derive(Debug)]
pub struct MockAnalyticsProvider {
    name: String,
    business: BusinessTag,
    initialized: AtomicBool,
    initialize_calls: AtomicUsize,
    init_error: Option<String>,
    track_error: Option<String>,
    init_delay: Option<Duration>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockAnalyticsProvider {
    pub fn new(name: impl Into<String>, business: BusinessTag) -> Self {
        Self {
            name: name.into(),
            business,
            initialized: AtomicBool::new(false),
            initialize_calls: AtomicUsize::new(0),
            init_error: None,
            track_error: None,
            init_delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Make `initialize` fail with `message`
    pub fn failing_initialize(mut self, message: impl Into<String>) -> Self {
        self.init_error = Some(message.into());
        self
    }

    /// Make `track` return a vendor error after recording the event
    pub fn failing_track(mut self, message: impl Into<String>) -> Self {
        self.track_error = Some(message.into());
        self
    }

    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().clone()
    }

    pub fn tracked(&self) -> Vec<AnalyticsEvent> {
        self.lock()
            .iter()
            .filter_map(|call| match call {
                RecordedCall::Track(event) => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn initialize_calls(&self) -> usize {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn record(&self, call: RecordedCall) {
        debug!(provider = %self.name, call = ?call, "Mock provider recorded call");
        self.lock().push(call);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RecordedCall>> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl AnalyticsProvider for MockAnalyticsProvider {
    async fn initialize(&self) -> Result<()> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        if self.is_initialized() {
            return Ok(());
        }

        if let Some(delay) = self.init_delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(message) = &self.init_error {
            return Err(PlumeError::initialization(&self.name, message.clone()));
        }

        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn track(&self, event: AnalyticsEvent) -> Result<()> {
        if !self.is_initialized() || event.validate().is_err() {
            return Ok(());
        }

        let properties = self.business.enrich(Some(&event.properties));
        self.record(RecordedCall::Track(event.with_properties(properties)));

        match &self.track_error {
            Some(message) => Err(PlumeError::vendor(&self.name, message.clone())),
            None => Ok(()),
        }
    }

    async fn identify(&self, user_id: &str, properties: Option<Properties>) -> Result<()> {
        if !self.is_initialized() {
            return Ok(());
        }

        self.record(RecordedCall::Identify {
            user_id: user_id.to_string(),
            properties: self.business.enrich(properties.as_ref()),
        });
        Ok(())
    }

    async fn track_page_view(&self, page: &str, properties: Option<Properties>) -> Result<()> {
        if !self.is_initialized() {
            return Ok(());
        }

        let mut merged = Properties::new();
        merged.insert("page".to_string(), Value::String(page.to_string()));
        merged.extend(properties.unwrap_or_default());

        self.record(RecordedCall::PageView {
            page: page.to_string(),
            properties: self.business.enrich(Some(&merged)),
        });
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        if self.is_initialized() {
            self.record(RecordedCall::Reset);
        }
        Ok(())
    }

    fn provider_name(&self) -> &str {
        &self.name
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mock() -> MockAnalyticsProvider {
        MockAnalyticsProvider::new("mock", BusinessTag::new("acme").unwrap())
    }

    #[tokio::test]
    async fn test_records_only_after_initialize() {
        let provider = mock();
        provider.track(AnalyticsEvent::new("early")).await.unwrap();
        assert!(provider.calls().is_empty());

        provider.initialize().await.unwrap();
        provider.track(AnalyticsEvent::new("late")).await.unwrap();

        let tracked = provider.tracked();
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].properties["business"], json!("acme"));
        assert_eq!(tracked[0].properties["spm"], json!("acme"));
    }

    #[tokio::test]
    async fn test_failing_initialize() {
        let provider = mock().failing_initialize("boom");
        assert!(provider.initialize().await.is_err());
        assert!(!provider.is_initialized());
        assert_eq!(provider.initialize_calls(), 1);
    }

    #[tokio::test]
    async fn test_failing_track_still_records() {
        let provider = mock().failing_track("vendor down");
        provider.initialize().await.unwrap();

        assert!(provider.track(AnalyticsEvent::new("x")).await.is_err());
        assert_eq!(provider.tracked().len(), 1);
    }

    #[tokio::test]
    async fn test_page_view_and_reset() {
        let provider = mock();
        provider.initialize().await.unwrap();

        provider.track_page_view("/home", None).await.unwrap();
        provider.reset().await.unwrap();

        let calls = provider.calls();
        match &calls[0] {
            RecordedCall::PageView { page, properties } => {
                assert_eq!(page, "/home");
                assert_eq!(properties["page"], json!("/home"));
            }
            other => panic!("unexpected call {:?}", other),
        }
        assert_eq!(calls[1], RecordedCall::Reset);
    }
}
