// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Quota arithmetic and the usage view shown to the user.

use serde::{Deserialize, Serialize};
use std::fmt;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::models::{QuotaSettings, UserRecord};

/// Seconds of quota left: `max(0, quota - usage)`.
pub fn remaining(usage_seconds: f64, quota_seconds: f64) -> f64 {
    (quota_seconds - usage_seconds).max(0.0)
}

/// Whether a user with this usage must be blocked. True at the boundary.
pub fn should_block(usage_seconds: f64, quota_seconds: f64) -> bool {
    usage_seconds >= quota_seconds
}

/// Format whole seconds as `HH:MM:SS`. Hours are not capped at 99.
pub fn format_hms(total_seconds: u64) -> String {
    let h = total_seconds / 3600;
    let m = (total_seconds % 3600) / 60;
    let s = total_seconds % 60;
    format!("{:02}:{:02}:{:02}", h, m, s)
}

/// Remaining quota as displayed on the profile page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageDisplay {
    /// Whole seconds left (always at least one)
    Remaining(u64),
    Expired,
}

impl UsageDisplay {
    /// Less than one whole second left counts as expired, so the UI never
    /// shows `00:00:00`.
    pub fn from_remaining(remaining_seconds: f64) -> Self {
        let whole = if remaining_seconds.is_finite() && remaining_seconds > 0.0 {
            remaining_seconds.floor() as u64
        } else {
            0
        };
        if whole == 0 {
            UsageDisplay::Expired
        } else {
            UsageDisplay::Remaining(whole)
        }
    }
}

impl fmt::Display for UsageDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsageDisplay::Remaining(secs) => f.write_str(&format_hms(*secs)),
            UsageDisplay::Expired => f.write_str("Expired (Blocked)"),
        }
    }
}

/// Profile view of a user's quota.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct UsageSnapshot {
    pub name: String,
    pub email: String,
    /// "Active" or "Blocked"
    pub status: String,
    pub blocked: bool,
    pub usage_seconds: f64,
    pub quota_seconds: f64,
    pub remaining_seconds: f64,
    /// `HH:MM:SS` or "Expired (Blocked)"
    pub remaining_display: String,
    pub contact_link: Option<String>,
}

impl UsageSnapshot {
    pub fn new(record: &UserRecord, settings: &QuotaSettings) -> Self {
        let quota_seconds = settings.quota_seconds();
        let remaining_seconds = remaining(record.usage_duration, quota_seconds);

        Self {
            name: record.name.clone(),
            email: record.email.clone(),
            status: record.status_label().to_string(),
            blocked: record.blocked,
            usage_seconds: record.usage_duration,
            quota_seconds,
            remaining_seconds,
            remaining_display: UsageDisplay::from_remaining(remaining_seconds).to_string(),
            contact_link: settings.contact_link(),
        }
    }
}
