//! Before-send interception.
//!
//! Vendor clients that expose a before-send hook run every outbound event
//! through a [`BeforeSendChain`]: user hooks first, in order, then a final
//! business-tagging step that user hooks cannot skip. Any hook returning
//! `None` cancels the event and the tagging step never runs.

use crate::enrich::{spm_is_blank, BusinessTag, BUSINESS_KEY, SPM_KEY};
use crate::event::Properties;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Outbound event as seen by a vendor client right before it is sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureEvent {
    pub uuid: Uuid,
    pub event: String,
    pub distinct_id: String,
    pub properties: Properties,
    pub timestamp: DateTime<Utc>,
}

impl CaptureEvent {
    pub fn new(event: impl Into<String>, distinct_id: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            event: event.into(),
            distinct_id: distinct_id.into(),
            properties: Properties::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }
}

/// A single transform. Returning `None` cancels the event.
pub type BeforeSendFn = Arc<dyn Fn(CaptureEvent) -> Option<CaptureEvent> + Send + Sync>;

/// Ordered list of user supplied before-send hooks.
#[derive(Clone, Default)]
pub struct BeforeSendHooks(Vec<BeforeSendFn>);

impl BeforeSendHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F>(&mut self, hook: F)
    where
        F: Fn(CaptureEvent) -> Option<CaptureEvent> + Send + Sync + 'static,
    {
        self.0.push(Arc::new(hook));
    }

    pub fn with<F>(mut self, hook: F) -> Self
    where
        F: Fn(CaptureEvent) -> Option<CaptureEvent> + Send + Sync + 'static,
    {
        self.push(hook);
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Run every hook in order, stopping at the first cancellation.
    pub fn run(&self, event: CaptureEvent) -> Option<CaptureEvent> {
        self.0.iter().try_fold(event, |event, hook| hook(event))
    }
}

impl fmt::Debug for BeforeSendHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BeforeSendHooks").field(&self.0.len()).finish()
    }
}

impl From<Vec<BeforeSendFn>> for BeforeSendHooks {
    fn from(hooks: Vec<BeforeSendFn>) -> Self {
        Self(hooks)
    }
}

/// User hooks followed by the business-tagging step.
#[derive(Debug, Clone)]
pub struct BeforeSendChain {
    business: BusinessTag,
    user_hooks: BeforeSendHooks,
}

impl BeforeSendChain {
    pub fn new(business: BusinessTag, user_hooks: BeforeSendHooks) -> Self {
        Self {
            business,
            user_hooks,
        }
    }

    pub fn apply(&self, event: CaptureEvent) -> Option<CaptureEvent> {
        // Decided before user hooks run: an spm added by a hook is not the caller's.
        let caller_had_spm = !spm_is_blank(event.properties.get(SPM_KEY));

        let mut event = self.user_hooks.run(event)?;

        event.properties.insert(
            BUSINESS_KEY.to_string(),
            Value::String(self.business.to_string()),
        );

        if !caller_had_spm && spm_is_blank(event.properties.get(SPM_KEY)) {
            event.properties.insert(
                SPM_KEY.to_string(),
                Value::String(self.business.to_string()),
            );
        }

        Some(event)
    }

    /// Package the chain as a single hook for a vendor client.
    pub fn into_hook(self) -> BeforeSendFn {
        Arc::new(move |event| self.apply(event))
    }
}
