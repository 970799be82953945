// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Database layer: user records and administrator settings.
//!
//! The engine only talks to the [`UserStore`] and [`SettingsStore`] traits.
//! [`FirestoreDb`] is the production backend; [`MemoryStore`] keeps everything
//! in process for offline use and tests.

pub mod firestore;
pub mod memory;
pub mod subscription;

pub use firestore::FirestoreDb;
pub use memory::MemoryStore;
pub use subscription::{Change, Subscription, SubscriptionHandle};

use crate::error::AppError;
use crate::models::{SettingsDocument, UserRecord};
use chrono::{DateTime, Utc};
use std::future::Future;

/// Collection names as constants.
pub mod collections {
    pub const USERS: &str = "users";
    pub const SETTINGS: &str = "settings";
}

/// Document ID of the quota settings inside [`collections::SETTINGS`].
pub const SETTINGS_DOC_ID: &str = "quota";

/// Wire names of the user record fields written individually.
pub mod fields {
    pub const BLOCKED: &str = "blocked";
    pub const USAGE_DURATION: &str = "usageDuration";
    pub const LAST_LOGIN: &str = "lastLogin";
}

/// Access to per-user records.
pub trait UserStore: Send + Sync + 'static {
    fn get_user(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Option<UserRecord>, AppError>> + Send;

    /// Create a user record unless one already exists.
    ///
    /// Returns `false`, leaving the stored record untouched, when the
    /// document already exists.
    fn create_user(
        &self,
        user_id: &str,
        record: &UserRecord,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Atomically add `delta_seconds` to `usageDuration`.
    ///
    /// Must be a storage-level increment so that concurrent writers on
    /// different devices sum instead of overwriting each other.
    fn increment_usage(
        &self,
        user_id: &str,
        delta_seconds: f64,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn set_blocked(
        &self,
        user_id: &str,
        blocked: bool,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn set_last_login(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Watch a user record. The current contents are delivered first.
    fn subscribe_user(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Subscription<UserRecord>, AppError>> + Send;
}

/// Access to the administrator settings document.
pub trait SettingsStore: Send + Sync + 'static {
    fn get_settings(
        &self,
    ) -> impl Future<Output = Result<Option<SettingsDocument>, AppError>> + Send;

    /// Watch the settings document. The current contents are delivered first.
    fn subscribe_settings(
        &self,
    ) -> impl Future<Output = Result<Subscription<SettingsDocument>, AppError>> + Send;
}
