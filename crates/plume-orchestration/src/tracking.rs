use crate::context::current_analytics;
use crate::manager::{AnalyticsManager, FanOutReport};
use plume_core::event::FormSubmit;
use plume_core::{Properties, Result, SPM_KEY};
use serde_json::Value;
use std::sync::Arc;

/// Shorthands for the events most applications emit
#[derive(Debug, Clone)]
pub struct EventTracker {
    manager: Arc<AnalyticsManager>,
}

impl EventTracker {
    pub fn new(manager: Arc<AnalyticsManager>) -> Self {
        Self { manager }
    }

    /// Tracker over the ambient context's manager
    pub fn current() -> Result<Self> {
        Ok(Self::new(current_analytics()?))
    }

    pub fn manager(&self) -> &Arc<AnalyticsManager> {
        &self.manager
    }

    /// `button_click` with `button_name`; `context` keys win on collision
    pub async fn track_button_click(
        &self,
        button_name: &str,
        context: Option<Properties>,
    ) -> FanOutReport {
        let mut properties = Properties::new();
        properties.insert(
            "button_name".to_string(),
            Value::String(button_name.to_string()),
        );
        properties.extend(context.unwrap_or_default());
        self.manager.track_named("button_click", properties).await
    }

    pub async fn track_form_submit(&self, form_name: &str, success: bool) -> FanOutReport {
        self.manager
            .track_event(FormSubmit {
                form_name: form_name.to_string(),
                success,
            })
            .await
    }

    /// `user_signup` tagged with `spm` when given
    pub async fn track_user_signup(
        &self,
        spm: Option<&str>,
        extra: Option<Properties>,
    ) -> FanOutReport {
        self.manager
            .track_named("user_signup", with_spm(spm, extra))
            .await
    }

    pub async fn track_user_login(&self, spm: Option<&str>, extra: Option<Properties>) -> FanOutReport {
        self.manager
            .track_named("user_login", with_spm(spm, extra))
            .await
    }

    pub async fn track_page(&self, page: &str, properties: Option<Properties>) -> FanOutReport {
        self.manager.track_page_view(page, properties).await
    }
}

fn with_spm(spm: Option<&str>, extra: Option<Properties>) -> Properties {
    let mut properties = Properties::new();
    if let Some(spm) = spm {
        properties.insert(SPM_KEY.to_string(), Value::String(spm.to_string()));
    }
    properties.extend(extra.unwrap_or_default());
    properties
}

#[cfg(test)]
mod tests {
    use super::*;
    use plume_core::BusinessTag;
    use plume_provider::{MockAnalyticsProvider, RecordedCall};
    use serde_json::json;

    async fn tracker() -> (EventTracker, Arc<MockAnalyticsProvider>) {
        let mock = Arc::new(MockAnalyticsProvider::new(
            "mock",
            BusinessTag::new("acme").unwrap(),
        ));
        let manager = AnalyticsManager::new("acme", false).unwrap();
        manager.register_provider("mock", mock.clone());
        manager.initialize().await;
        (EventTracker::new(Arc::new(manager)), mock)
    }

    #[tokio::test]
    async fn test_button_click() {
        let (tracker, mock) = tracker().await;
        tracker
            .track_button_click("save", json!({ "section": "header" }).as_object().cloned())
            .await;

        let event = &mock.tracked()[0];
        assert_eq!(event.name, "button_click");
        assert_eq!(event.properties["button_name"], json!("save"));
        assert_eq!(event.properties["section"], json!("header"));
    }

    #[tokio::test]
    async fn test_form_submit() {
        let (tracker, mock) = tracker().await;
        tracker.track_form_submit("contact", false).await;

        let event = &mock.tracked()[0];
        assert_eq!(event.name, "form_submit");
        assert_eq!(event.properties["form_name"], json!("contact"));
        assert_eq!(event.properties["success"], json!(false));
    }

    #[tokio::test]
    async fn test_signup_spm_is_business_scoped() {
        let (tracker, mock) = tracker().await;
        tracker
            .track_user_signup(Some("landing.hero"), json!({ "method": "email" }).as_object().cloned())
            .await;
        tracker.track_user_login(None, None).await;

        let events = mock.tracked();
        assert_eq!(events[0].name, "user_signup");
        assert_eq!(events[0].properties["spm"], json!("acme.landing.hero"));
        assert_eq!(events[0].properties["method"], json!("email"));
        assert_eq!(events[1].name, "user_login");
        assert_eq!(events[1].properties["spm"], json!("acme"));
    }

    #[tokio::test]
    async fn test_track_page() {
        let (tracker, mock) = tracker().await;
        tracker.track_page("/pricing", None).await;

        assert!(matches!(
            &mock.calls()[0],
            RecordedCall::PageView { page, .. } if page == "/pricing"
        ));
    }
}
