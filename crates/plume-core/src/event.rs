use crate::{PlumeError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Open, string-keyed event property map.
pub type Properties = serde_json::Map<String, Value>;

/// Manager-level properties merged into every event.
pub type EventContext = Properties;

/// A single analytics event as handed to the manager or an adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    /// Event name, `category:action` style is recommended
    pub name: String,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymous_id: Option<String>,
    /// Defaults to capture time when left empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl AnalyticsEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Properties::new(),
            user_id: None,
            anonymous_id: None,
            timestamp: None,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties.extend(properties);
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_anonymous_id(mut self, anonymous_id: impl Into<String>) -> Self {
        self.anonymous_id = Some(anonymous_id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(PlumeError::Validation {
                message: "Event name is required".to_string(),
            });
        }
        Ok(())
    }
}

/// Serialize any struct into a property map. Non-object values are rejected.
pub fn to_properties<T: Serialize>(value: &T) -> Result<Properties> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Properties::new()),
        other => Err(PlumeError::Validation {
            message: format!("event properties must serialize to an object, got {}", other),
        }),
    }
}

/// Events with a fixed name and a typed property payload.
pub trait PredefinedEvent: Serialize {
    const NAME: &'static str;

    fn into_event(self) -> Result<AnalyticsEvent>
    where
        Self: Sized,
    {
        let properties = to_properties(&self)?;
        Ok(AnalyticsEvent::new(Self::NAME).with_properties(properties))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Email,
    Oauth,
    Phone,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ButtonClick {
    pub button_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

impl PredefinedEvent for ButtonClick {
    const NAME: &'static str = "button_click";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessageSent {
    pub message_length: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl PredefinedEvent for ChatMessageSent {
    const NAME: &'static str = "chat_message_sent";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSubmit {
    pub form_name: String,
    pub success: bool,
}

impl PredefinedEvent for FormSubmit {
    const NAME: &'static str = "form_submit";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageView {
    pub page: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
}

impl PredefinedEvent for PageView {
    const NAME: &'static str = "page_view";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserLogin {
    pub method: AuthMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spm: Option<String>,
}

impl PredefinedEvent for UserLogin {
    const NAME: &'static str = "user_login";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSignup {
    pub method: AuthMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spm: Option<String>,
}

impl PredefinedEvent for UserSignup {
    const NAME: &'static str = "user_signup";
}
