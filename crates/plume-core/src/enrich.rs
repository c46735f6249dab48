//! Business tagging for outgoing event properties.
//!
//! Every event leaving a provider carries two keys:
//!
//! - `business`: always the configured business tag, caller values are overwritten
//! - `spm`: a hierarchical tracking path that is either the business tag itself
//!   or starts with `"<business>."`

use crate::event::Properties;
use crate::{PlumeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

pub const BUSINESS_KEY: &str = "business";
pub const SPM_KEY: &str = "spm";

/// Namespace identifying the owning application. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BusinessTag(Arc<str>);

impl BusinessTag {
    pub fn new(tag: impl Into<String>) -> Result<Self> {
        let tag = tag.into();
        if tag.trim().is_empty() {
            return Err(PlumeError::config("business tag is required and must not be empty"));
        }
        Ok(Self(Arc::from(tag)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build a fully qualified spm path, e.g. `myapp.home.cta` for `home.cta`.
    pub fn spm(&self, path: &str) -> String {
        let path = path.trim();
        if path.is_empty() {
            self.0.to_string()
        } else {
            format!("{}.{}", self.0, path)
        }
    }

    pub fn enrich(&self, properties: Option<&Properties>) -> Properties {
        enrich_properties(properties, self.as_str())
    }
}

impl fmt::Display for BusinessTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for BusinessTag {
    type Error = PlumeError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<BusinessTag> for String {
    fn from(tag: BusinessTag) -> Self {
        tag.0.to_string()
    }
}

/// Compute final event properties from caller properties and a business tag.
///
/// The caller map is never mutated. Whitespace-only and non-string `spm`
/// values count as absent.
pub fn enrich_properties(properties: Option<&Properties>, business: &str) -> Properties {
    let mut enriched = properties.cloned().unwrap_or_default();

    enriched.insert(BUSINESS_KEY.to_string(), Value::String(business.to_string()));

    let spm = match enriched.get(SPM_KEY).and_then(Value::as_str) {
        Some(raw) if !raw.trim().is_empty() => {
            if is_business_scoped(raw.trim(), business) {
                None
            } else {
                Some(format!("{}.{}", business, raw))
            }
        }
        _ => Some(business.to_string()),
    };

    if let Some(spm) = spm {
        enriched.insert(SPM_KEY.to_string(), Value::String(spm));
    }
    enriched
}

fn is_business_scoped(spm: &str, business: &str) -> bool {
    spm == business
        || spm
            .strip_prefix(business)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// True unless `value` is a string with non-whitespace content, the same
/// rule [`enrich_properties`] applies.
pub fn spm_is_blank(value: Option<&Value>) -> bool {
    match value.and_then(Value::as_str) {
        Some(s) => s.trim().is_empty(),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn props(value: Value) -> Properties {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_missing_spm_defaults_to_business() {
        let enriched = enrich_properties(Some(&props(json!({ "method": "email" }))), "acme");
        assert_eq!(enriched["business"], json!("acme"));
        assert_eq!(enriched["spm"], json!("acme"));
        assert_eq!(enriched["method"], json!("email"));
    }

    #[test]
    fn test_none_properties_yield_tags_only() {
        let enriched = enrich_properties(None, "acme");
        assert_eq!(enriched.len(), 2);
        assert_eq!(enriched["spm"], json!("acme"));
    }

    #[test]
    fn test_spm_is_prefixed() {
        let enriched = enrich_properties(Some(&props(json!({ "spm": "home.cta" }))), "acme");
        assert_eq!(enriched["spm"], json!("acme.home.cta"));
    }

    #[test]
    fn test_already_prefixed_spm_is_kept() {
        let input = props(json!({ "spm": "acme.already.prefixed" }));
        let enriched = enrich_properties(Some(&input), "acme");
        assert_eq!(enriched["spm"], json!("acme.already.prefixed"));

        let exact = props(json!({ "spm": "acme" }));
        assert_eq!(enrich_properties(Some(&exact), "acme")["spm"], json!("acme"));
    }

    #[test]
    fn test_similar_prefix_without_dot_is_still_prefixed() {
        let input = props(json!({ "spm": "acmecorp.page" }));
        let enriched = enrich_properties(Some(&input), "acme");
        assert_eq!(enriched["spm"], json!("acme.acmecorp.page"));
    }

    #[test]
    fn test_blank_spm_treated_as_absent() {
        for blank in ["", "   ", "\t\n"] {
            let input = props(json!({ "spm": blank }));
            assert_eq!(enrich_properties(Some(&input), "acme")["spm"], json!("acme"));
        }
    }

    #[test]
    fn test_non_string_spm_is_overwritten() {
        for value in [json!(42), json!(true), json!(null), json!({ "a": 1 })] {
            let input = props(json!({ "spm": value }));
            assert_eq!(enrich_properties(Some(&input), "acme")["spm"], json!("acme"));
        }
    }

    #[test]
    fn test_business_cannot_be_spoofed() {
        let input = props(json!({ "business": "spoofed" }));
        assert_eq!(enrich_properties(Some(&input), "acme")["business"], json!("acme"));
    }

    #[test]
    fn test_caller_map_is_not_mutated() {
        let input = props(json!({ "spm": "home" }));
        let _ = enrich_properties(Some(&input), "acme");
        assert_eq!(input, props(json!({ "spm": "home" })));
    }

    #[test]
    fn test_spm_is_blank_only_for_real_strings() {
        assert!(spm_is_blank(None));
        assert!(spm_is_blank(Some(&json!(null))));
        assert!(spm_is_blank(Some(&json!("  "))));
        assert!(spm_is_blank(Some(&json!(42))));
        assert!(spm_is_blank(Some(&json!(["home"]))));
        assert!(!spm_is_blank(Some(&json!("home.cta"))));
    }

    #[test]
    fn test_business_tag_rejects_blank() {
        assert!(BusinessTag::new("").is_err());
        assert!(BusinessTag::new("  ").is_err());
        assert_eq!(BusinessTag::new("acme").unwrap().as_str(), "acme");
    }

    #[test]
    fn test_business_tag_spm_helper() {
        let tag = BusinessTag::new("acme").unwrap();
        assert_eq!(tag.spm("home.cta"), "acme.home.cta");
        assert_eq!(tag.spm(""), "acme");
    }

    fn business_strategy() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,11}"
    }

    fn spm_strategy() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_.]{0,15}"
    }

    proptest! {
        #[test]
        fn prop_absent_spm_becomes_business(business in business_strategy(), key in "[a-z]{1,8}", value in any::<i64>()) {
            prop_assume!(key != SPM_KEY && key != BUSINESS_KEY);
            let mut input = Properties::new();
            input.insert(key, json!(value));
            let enriched = enrich_properties(Some(&input), &business);
            prop_assert_eq!(&enriched[SPM_KEY], &json!(business));
            prop_assert_eq!(&enriched[BUSINESS_KEY], &json!(business));
        }

        #[test]
        fn prop_foreign_spm_is_prefixed(business in business_strategy(), spm in spm_strategy()) {
            let prefix = format!("{}.", business);
            prop_assume!(spm != business && !spm.starts_with(&prefix));
            let expected = json!(format!("{}{}", prefix, spm));
            let input = props(json!({ "spm": spm }));
            let enriched = enrich_properties(Some(&input), &business);
            prop_assert_eq!(&enriched[SPM_KEY], &expected);
        }

        #[test]
        fn prop_enrichment_is_idempotent(business in business_strategy(), spm in proptest::option::of(spm_strategy())) {
            let mut input = Properties::new();
            if let Some(spm) = spm {
                input.insert(SPM_KEY.to_string(), json!(spm));
            }
            let once = enrich_properties(Some(&input), &business);
            let twice = enrich_properties(Some(&once), &business);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_spm_is_business_scoped(business in business_strategy(), spm in proptest::option::of("[a-z0-9_.]{0,12}")) {
            let mut input = Properties::new();
            if let Some(spm) = spm {
                input.insert(SPM_KEY.to_string(), json!(spm));
            }
            let enriched = enrich_properties(Some(&input), &business);
            let result = enriched[SPM_KEY].as_str().unwrap();
            let prefix = format!("{}.", business);
            prop_assert!(result == business || result.starts_with(&prefix));
        }
    }
}
