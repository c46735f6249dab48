//! Payload sanitization for debug logs

use crate::{config::PrivacyConfig, Error, Result};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

const REDACTED: &str = "[REDACTED]";

/// Redacts sensitive fields and credential-looking strings from event payloads
#[derive(Debug, Clone)]
pub struct PayloadSanitizer {
    patterns: Vec<Regex>,
    email: Regex,
    redacted_fields: Vec<String>,
    enabled: bool,
}

impl PayloadSanitizer {
    pub fn new(config: &PrivacyConfig) -> Result<Self> {
        let mut patterns = Vec::new();

        for pattern_str in &config.redaction_patterns {
            let regex = Regex::new(pattern_str).map_err(|e| Error::Config {
                message: format!("Invalid redaction pattern '{}': {}", pattern_str, e),
            })?;
            patterns.push(regex);
        }

        let email = Regex::new(SanitizationPatterns::EMAIL).map_err(|e| Error::Config {
            message: format!("Invalid email pattern: {}", e),
        })?;

        Ok(Self {
            patterns,
            email,
            redacted_fields: config
                .redacted_fields
                .iter()
                .map(|f| f.to_lowercase())
                .collect(),
            enabled: config.sanitize_enabled,
        })
    }

    pub fn sanitize_text(&self, text: &str) -> String {
        if !self.enabled {
            return text.to_string();
        }

        let mut sanitized = text.to_string();

        for pattern in &self.patterns {
            sanitized = pattern
                .replace_all(&sanitized, |caps: &regex::Captures| {
                    if caps.len() >= 2 {
                        // keep the field name, drop the value
                        format!("{}={}", &caps[1], REDACTED)
                    } else {
                        REDACTED.to_string()
                    }
                })
                .to_string();
        }

        self.email
            .replace_all(&sanitized, |caps: &regex::Captures| {
                partially_redact_email(&caps[0])
            })
            .to_string()
    }

    pub fn sanitize_json(&self, mut json: Value) -> Value {
        if self.enabled {
            self.sanitize_json_recursive(&mut json);
        }
        json
    }

    fn should_redact_field(&self, field_name: &str) -> bool {
        let field_lower = field_name.to_lowercase();
        self.redacted_fields
            .iter()
            .any(|redacted_field| field_lower.contains(redacted_field.as_str()))
    }

    fn sanitize_json_recursive(&self, value: &mut Value) {
        match value {
            Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    if self.should_redact_field(key) {
                        *val = Value::String(REDACTED.to_string());
                    } else {
                        self.sanitize_json_recursive(val);
                    }
                }
            }
            Value::Array(arr) => {
                for item in arr.iter_mut() {
                    self.sanitize_json_recursive(item);
                }
            }
            Value::String(s) => {
                *s = self.sanitize_text(s);
            }
            _ => {}
        }
    }
}

/// user@domain.com -> u***@d***.com
fn partially_redact_email(email: &str) -> String {
    let Some((user, domain)) = email.split_once('@') else {
        return "[REDACTED_EMAIL]".to_string();
    };

    let redacted_user = match user.chars().next() {
        Some(first) if user.len() > 1 => format!("{}***", first),
        _ => "*".to_string(),
    };

    let redacted_domain = match domain.split_once('.') {
        Some((name, tld)) => match name.chars().next() {
            Some(first) if name.len() > 1 => format!("{}***.{}", first, tld),
            _ => format!("*.{}", tld),
        },
        None => "***".to_string(),
    };

    format!("{}@{}", redacted_user, redacted_domain)
}

/// Sanitizer built from [`PrivacyConfig::default`], shared by every adapter.
pub fn default_sanitizer() -> Option<&'static PayloadSanitizer> {
    static SANITIZER: OnceLock<Option<PayloadSanitizer>> = OnceLock::new();
    SANITIZER
        .get_or_init(|| PayloadSanitizer::new(&PrivacyConfig::default()).ok())
        .as_ref()
}

/// Pre-defined sanitization patterns
pub struct SanitizationPatterns;

impl SanitizationPatterns {
    const EMAIL: &'static str = r"\b[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}\b";

    pub fn api_credentials() -> Vec<String> {
        vec![
            r"(?i)(api_?key|api_?secret|token|secret|password)\s*[:=]\s*['\x22]?[a-zA-Z0-9_\-\.]{8,}['\x22]?"
                .to_string(),
            // PostHog project keys
            r"\bphc_[a-zA-Z0-9]{8,}\b".to_string(),
            r"(?i)bearer\s+[a-zA-Z0-9_\-\.]+".to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sanitizer() -> PayloadSanitizer {
        PayloadSanitizer::new(&PrivacyConfig::default()).unwrap()
    }

    #[test]
    fn test_text_sanitization() {
        let sanitized =
            sanitizer().sanitize_text("init with api_key=sk-1234567890abcdef and key phc_abcdefgh1234");

        assert!(sanitized.contains("api_key=[REDACTED]"));
        assert!(!sanitized.contains("sk-1234567890abcdef"));
        assert!(!sanitized.contains("phc_abcdefgh1234"));
    }

    #[test]
    fn test_email_partial_redaction() {
        assert_eq!(partially_redact_email("user@example.com"), "u***@e***.com");
        assert_eq!(
            sanitizer().sanitize_text("contact user@example.com"),
            "contact u***@e***.com"
        );
    }

    #[test]
    fn test_json_sanitization() {
        let json = sanitizer().sanitize_json(json!({
            "method": "email",
            "password": "secret123",
            "nested": { "auth_token": "abc" },
            "spm": "acme.home"
        }));

        assert_eq!(json["method"], "email");
        assert_eq!(json["password"], "[REDACTED]");
        assert_eq!(json["nested"]["auth_token"], "[REDACTED]");
        assert_eq!(json["spm"], "acme.home");
    }

    #[test]
    fn test_disabled_sanitizer_passes_through() {
        let config = PrivacyConfig {
            sanitize_enabled: false,
            ..PrivacyConfig::default()
        };
        let sanitizer = PayloadSanitizer::new(&config).unwrap();
        let payload = json!({ "password": "kept" });
        assert_eq!(sanitizer.sanitize_json(payload.clone()), payload);
    }

    #[test]
    fn test_default_sanitizer_available() {
        assert!(default_sanitizer().is_some());
    }
}
