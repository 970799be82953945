// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User record model shared with the admin console.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Display name used when the auth provider has none.
pub const DEFAULT_USER_NAME: &str = "User";

/// Per-user record stored at `users/{uid}`.
///
/// Field names are camelCase on the wire because the admin console reads and
/// writes the same documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    /// Email address
    #[validate(email)]
    #[serde(default)]
    pub email: String,
    /// Display name
    #[validate(length(min = 1, max = 100))]
    #[serde(default = "default_name")]
    pub name: String,
    /// Latched by quota enforcement; only an administrator clears it
    #[serde(default)]
    pub blocked: bool,
    /// Total usage in seconds across all devices
    #[serde(default)]
    pub usage_duration: f64,
    /// Most recent session start
    #[serde(default, with = "firestore::serialize_as_timestamp")]
    pub last_login: DateTime<Utc>,
    /// When the record was created
    #[serde(default, with = "firestore::serialize_as_timestamp")]
    pub registration_date: DateTime<Utc>,
}

fn default_name() -> String {
    DEFAULT_USER_NAME.to_string()
}

impl UserRecord {
    /// A fresh record for a newly registered user.
    pub fn new(email: impl Into<String>, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        let name = name.into();
        Self {
            email: email.into(),
            name: if name.trim().is_empty() {
                default_name()
            } else {
                name
            },
            blocked: false,
            usage_duration: 0.0,
            last_login: now,
            registration_date: now,
        }
    }

    /// Status label shown on the profile page.
    pub fn status_label(&self) -> &'static str {
        if self.blocked {
            "Blocked"
        } else {
            "Active"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_new_record_starts_unblocked_with_zero_usage() {
        let record = UserRecord::new("viewer@example.com", "", now());

        assert_eq!(record.name, "User");
        assert!(!record.blocked);
        assert_eq!(record.usage_duration, 0.0);
        assert_eq!(record.registration_date, record.last_login);
        assert_eq!(record.status_label(), "Active");
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let record = UserRecord::new("viewer@example.com", "Viewer", now());
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["usageDuration"], 0.0);
        assert_eq!(json["blocked"], false);
        assert!(json.get("lastLogin").is_some());
        assert!(json.get("registrationDate").is_some());
    }

    #[test]
    fn test_dates_are_firestore_timestamps() {
        use gcloud_sdk::google::firestore::v1::value::ValueType;

        let record = UserRecord::new("viewer@example.com", "Viewer", now());
        let doc = firestore::FirestoreDb::serialize_to_doc("users/u1", &record).unwrap();

        for field in ["lastLogin", "registrationDate"] {
            assert!(
                matches!(doc.fields[field].value_type, Some(ValueType::TimestampValue(_))),
                "{} is not a timestamp",
                field
            );
        }
    }

    #[test]
    fn test_sparse_document_uses_defaults() {
        let record: UserRecord =
            serde_json::from_value(serde_json::json!({ "email": "a@b.co" })).unwrap();

        assert_eq!(record.name, "User");
        assert!(!record.blocked);
        assert_eq!(record.usage_duration, 0.0);
    }

    #[test]
    fn test_validation_rejects_bad_email() {
        let record = UserRecord::new("not-an-email", "Viewer", now());
        assert!(record.validate().is_err());

        let record = UserRecord::new("viewer@example.com", "Viewer", now());
        assert!(record.validate().is_ok());
    }
}
