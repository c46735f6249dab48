//! Plumbing shared by the adapters: enablement and initialization guards,
//! debug/error logging, and the slot holding the native client.

use plume_core::{AnalyticsEvent, BusinessTag, Properties};
use serde_json::Value;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, trace};

#[derive(Debug)]
pub(crate) struct AdapterState<C> {
    name: &'static str,
    business: BusinessTag,
    enabled: bool,
    debug: bool,
    initialized: AtomicBool,
    client: RwLock<Option<Arc<C>>>,
}

impl<C> AdapterState<C> {
    pub(crate) fn new(name: &'static str, business: BusinessTag, enabled: bool, debug: bool) -> Self {
        Self {
            name,
            business,
            enabled,
            debug,
            initialized: AtomicBool::new(false),
            client: RwLock::new(None),
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn business(&self) -> &BusinessTag {
        &self.business
    }

    pub(crate) fn debug(&self) -> bool {
        self.debug
    }

    pub(crate) fn is_enabled(&self) -> bool {
        if !self.enabled {
            self.log("Provider is disabled");
        }
        self.enabled
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Native client, when enabled and initialized
    pub(crate) fn client(&self) -> Option<Arc<C>> {
        if !self.is_enabled() || !self.is_initialized() {
            return None;
        }
        self.client
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub(crate) fn install(&self, client: Arc<C>) {
        *self
            .client
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(client);
        self.initialized.store(true, Ordering::SeqCst);
    }

    /// Mark uninitialized, keeping the client for inspection
    pub(crate) fn mark_uninitialized(&self) {
        self.initialized.store(false, Ordering::SeqCst);
    }

    pub(crate) fn enrich(&self, properties: Option<&Properties>) -> Properties {
        self.business.enrich(properties)
    }

    /// Empty names are reported and the event is dropped.
    pub(crate) fn validate_event(&self, event: &AnalyticsEvent) -> bool {
        match event.validate() {
            Ok(()) => true,
            Err(e) => {
                self.log_error("Invalid event", &e);
                false
            }
        }
    }

    pub(crate) fn log(&self, message: &str) {
        if self.debug {
            debug!(provider = self.name, "{}", message);
        } else {
            trace!(provider = self.name, "{}", message);
        }
    }

    /// Debug log with the payload run through the log sanitizer
    pub(crate) fn log_payload(&self, message: &str, payload: &Properties) {
        if self.debug {
            let payload = sanitized(payload);
            debug!(provider = self.name, payload = %payload, "{}", message);
        } else {
            trace!(provider = self.name, "{}", message);
        }
    }

    pub(crate) fn log_error(&self, message: &str, err: &dyn Display) {
        error!(provider = self.name, error = %err, "{}", message);
    }
}

fn sanitized(payload: &Properties) -> Value {
    let payload = Value::Object(payload.clone());
    match plume_telemetry::default_sanitizer() {
        Some(sanitizer) => sanitizer.sanitize_json(payload),
        None => payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(enabled: bool) -> AdapterState<String> {
        AdapterState::new("Test", BusinessTag::new("acme").unwrap(), enabled, true)
    }

    #[test]
    fn test_client_requires_initialization() {
        let state = state(true);
        assert!(state.client().is_none());

        state.install(Arc::new("native".to_string()));
        assert!(state.is_initialized());
        assert_eq!(state.client().as_deref().map(String::as_str), Some("native"));

        state.mark_uninitialized();
        assert!(state.client().is_none());
    }

    #[test]
    fn test_disabled_state_hides_client() {
        let state = state(false);
        state.install(Arc::new("native".to_string()));
        assert!(state.client().is_none());
    }

    #[test]
    fn test_validate_event_rejects_empty_name() {
        let state = state(true);
        assert!(!state.validate_event(&AnalyticsEvent::new("")));
        assert!(state.validate_event(&AnalyticsEvent::new("ok")));
    }

    #[test]
    fn test_sanitized_payload_redacts_secrets() {
        let mut payload = Properties::new();
        payload.insert("password".to_string(), json!("hunter22"));
        payload.insert("spm".to_string(), json!("acme"));

        let clean = sanitized(&payload);
        assert_eq!(clean["password"], json!("[REDACTED]"));
        assert_eq!(clean["spm"], json!("acme"));
    }
}
