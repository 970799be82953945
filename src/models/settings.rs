// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Administrator quota settings.
//!
//! The settings document is edited by hand in the admin console, so every
//! field is parsed leniently. A bad or missing quota falls back to
//! [`DEFAULT_AUTO_BLOCK_MINUTES`] instead of failing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Quota used when the settings document has no usable value.
pub const DEFAULT_AUTO_BLOCK_MINUTES: u32 = 30;

/// Raw settings document as stored at `settings/quota`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsDocument {
    /// Quota in minutes (number or numeric string)
    #[serde(default)]
    pub auto_block_duration: Option<Value>,
    /// Support contact phone number
    #[serde(default)]
    pub contact_number: Option<String>,
}

/// Resolved quota settings.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaSettings {
    pub auto_block_duration_minutes: u32,
    pub contact_number: Option<String>,
}

impl Default for QuotaSettings {
    fn default() -> Self {
        Self {
            auto_block_duration_minutes: DEFAULT_AUTO_BLOCK_MINUTES,
            contact_number: None,
        }
    }
}

impl QuotaSettings {
    /// Resolve a (possibly missing) settings document.
    pub fn from_document(doc: Option<&SettingsDocument>) -> Self {
        let Some(doc) = doc else {
            return Self::default();
        };

        let minutes = doc.auto_block_duration.as_ref().and_then(parse_minutes);
        if minutes.is_none() && doc.auto_block_duration.is_some() {
            tracing::warn!(
                value = ?doc.auto_block_duration,
                default_minutes = DEFAULT_AUTO_BLOCK_MINUTES,
                "Unusable autoBlockDuration, using default"
            );
        }

        Self {
            auto_block_duration_minutes: minutes.unwrap_or(DEFAULT_AUTO_BLOCK_MINUTES),
            contact_number: doc
                .contact_number
                .as_ref()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
        }
    }

    /// Quota in seconds.
    pub fn quota_seconds(&self) -> f64 {
        f64::from(self.auto_block_duration_minutes) * 60.0
    }

    /// WhatsApp link for the support contact, digits only.
    pub fn contact_link(&self) -> Option<String> {
        let digits: String = self
            .contact_number
            .as_deref()?
            .chars()
            .filter(char::is_ascii_digit)
            .collect();
        (!digits.is_empty()).then(|| format!("https://wa.me/{}", digits))
    }
}

fn parse_minutes(value: &Value) -> Option<u32> {
    let minutes = match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 1.0)
                .map(|f| f.trunc() as u64)
        }),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }?;

    if minutes == 0 {
        return None;
    }
    u32::try_from(minutes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> SettingsDocument {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_missing_settings_resolve_to_thirty_minutes() {
        let settings = QuotaSettings::from_document(None);
        assert_eq!(settings.quota_seconds(), 1800.0);

        let settings = QuotaSettings::from_document(Some(&doc(json!({}))));
        assert_eq!(settings.quota_seconds(), 1800.0);
    }

    #[test]
    fn test_numeric_and_string_minutes() {
        let settings = QuotaSettings::from_document(Some(&doc(json!({ "autoBlockDuration": 45 }))));
        assert_eq!(settings.auto_block_duration_minutes, 45);

        let settings =
            QuotaSettings::from_document(Some(&doc(json!({ "autoBlockDuration": " 90 " }))));
        assert_eq!(settings.auto_block_duration_minutes, 90);

        let settings =
            QuotaSettings::from_document(Some(&doc(json!({ "autoBlockDuration": 2.9 }))));
        assert_eq!(settings.auto_block_duration_minutes, 2);
    }

    #[test]
    fn test_unusable_minutes_fall_back() {
        for value in [json!(0), json!(-5), json!(0.5), json!("soon"), json!(true), json!(null)] {
            let settings =
                QuotaSettings::from_document(Some(&doc(json!({ "autoBlockDuration": value }))));
            assert_eq!(
                settings.auto_block_duration_minutes, DEFAULT_AUTO_BLOCK_MINUTES,
                "value {:?} should fall back",
                value
            );
        }
    }

    #[test]
    fn test_contact_link_strips_formatting() {
        let settings = QuotaSettings::from_document(Some(&doc(
            json!({ "contactNumber": "+1 (650) 555-0100" }),
        )));
        assert_eq!(
            settings.contact_link(),
            Some("https://wa.me/16505550100".to_string())
        );

        let settings = QuotaSettings::from_document(Some(&doc(json!({ "contactNumber": "n/a" }))));
        assert_eq!(settings.contact_link(), None);
    }
}
