// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process backend.
//!
//! Clones share state, so several engines built on clones of one store behave
//! like several devices signed into the same account. Writes hold the
//! record's map entry while notifying watchers, so every watcher sees changes
//! in commit order.

use crate::db::subscription::{self, Change, ChangeSender, Subscription};
use crate::db::{SettingsStore, UserStore};
use crate::error::AppError;
use crate::models::{SettingsDocument, UserRecord};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// In-memory user and settings store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    users: DashMap<String, UserRecord>,
    user_watchers: DashMap<String, Vec<ChangeSender<UserRecord>>>,
    settings: DashMap<(), SettingsDocument>,
    settings_watchers: DashMap<(), Vec<ChangeSender<SettingsDocument>>>,
    /// Simulates a lost connection: writes fail, reads keep working
    fail_writes: AtomicBool,
    increments: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a transient error.
    pub fn set_write_failures(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful usage increments (all users).
    pub fn increment_count(&self) -> u64 {
        self.inner.increments.load(Ordering::SeqCst)
    }

    /// Replace the settings document from raw JSON, as an administrator would.
    ///
    /// A document that does not deserialize is stored as empty, which
    /// resolves to the default quota.
    pub fn put_settings_json(&self, value: serde_json::Value) {
        let doc = serde_json::from_value::<SettingsDocument>(value).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Unreadable settings document, storing empty");
            SettingsDocument::default()
        });
        self.put_settings(doc);
    }

    pub fn put_settings(&self, doc: SettingsDocument) {
        let entry = self.inner.settings.entry(()).insert(doc);
        notify(
            &self.inner.settings_watchers,
            &(),
            Change::Updated(entry.value().clone()),
        );
    }

    pub fn remove_settings(&self) {
        if self.inner.settings.remove(&()).is_some() {
            notify(&self.inner.settings_watchers, &(), Change::Removed);
        }
    }

    /// Delete a user record, as an administrator would.
    pub fn remove_user(&self, user_id: &str) {
        if self.inner.users.remove(user_id).is_some() {
            notify(&self.inner.user_watchers, user_id, Change::Removed);
        }
    }

    /// Push a delivery error to every watcher of a user record.
    pub fn inject_user_error(&self, user_id: &str, message: &str) {
        notify(
            &self.inner.user_watchers,
            user_id,
            Change::Error(message.to_string()),
        );
    }

    fn check_writable(&self) -> Result<(), AppError> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Database(
                "Write failed: store unreachable".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply `update` to an existing record and notify watchers.
    fn modify_user<F>(&self, user_id: &str, update: F) -> Result<(), AppError>
    where
        F: FnOnce(&mut UserRecord),
    {
        self.check_writable()?;

        let mut record = self
            .inner
            .users
            .get_mut(user_id)
            .ok_or_else(|| AppError::NotFound(format!("user {}", user_id)))?;
        update(record.value_mut());
        let snapshot = record.value().clone();
        notify(&self.inner.user_watchers, user_id, Change::Updated(snapshot));
        Ok(())
    }
}

/// Send a change to every live watcher of `key`, dropping closed ones.
fn notify<K, Q, T>(watchers: &DashMap<K, Vec<ChangeSender<T>>>, key: &Q, change: Change<T>)
where
    K: Hash + Eq + Borrow<Q>,
    Q: Hash + Eq + ?Sized,
    T: Clone,
{
    if let Some(mut list) = watchers.get_mut(key) {
        list.retain(|w| w.send(change.clone()));
    }
}

impl UserStore for MemoryStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>, AppError> {
        Ok(self.inner.users.get(user_id).map(|r| r.value().clone()))
    }

    async fn create_user(&self, user_id: &str, record: &UserRecord) -> Result<bool, AppError> {
        self.check_writable()?;

        let Entry::Vacant(slot) = self.inner.users.entry(user_id.to_string()) else {
            return Ok(false);
        };
        let entry = slot.insert(record.clone());
        notify(
            &self.inner.user_watchers,
            user_id,
            Change::Updated(entry.value().clone()),
        );
        Ok(true)
    }

    async fn increment_usage(&self, user_id: &str, delta_seconds: f64) -> Result<(), AppError> {
        self.modify_user(user_id, |r| r.usage_duration += delta_seconds)?;
        self.inner.increments.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_blocked(&self, user_id: &str, blocked: bool) -> Result<(), AppError> {
        self.modify_user(user_id, |r| r.blocked = blocked)
    }

    async fn set_last_login(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), AppError> {
        self.modify_user(user_id, |r| r.last_login = at)
    }

    async fn subscribe_user(&self, user_id: &str) -> Result<Subscription<UserRecord>, AppError> {
        let (sender, subscription) = subscription::channel();

        // Hold the record while registering so no write slips in between the
        // initial snapshot and the first notification.
        let current = self.inner.users.get(user_id);
        if let Some(record) = current.as_ref() {
            sender.send(Change::Updated(record.value().clone()));
        }
        self.inner
            .user_watchers
            .entry(user_id.to_string())
            .or_default()
            .push(sender);
        drop(current);

        Ok(subscription)
    }
}

impl SettingsStore for MemoryStore {
    async fn get_settings(&self) -> Result<Option<SettingsDocument>, AppError> {
        Ok(self.inner.settings.get(&()).map(|s| s.value().clone()))
    }

    async fn subscribe_settings(&self) -> Result<Subscription<SettingsDocument>, AppError> {
        let (sender, subscription) = subscription::channel();

        let current = self.inner.settings.get(&());
        if let Some(doc) = current.as_ref() {
            sender.send(Change::Updated(doc.value().clone()));
        }
        self.inner
            .settings_watchers
            .entry(())
            .or_default()
            .push(sender);
        drop(current);

        Ok(subscription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> UserRecord {
        UserRecord::new("viewer@example.com", "Viewer", Utc::now())
    }

    #[tokio::test]
    async fn test_increment_requires_existing_record() {
        let store = MemoryStore::new();
        let err = store.increment_usage("nobody", 5.0).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_create_never_overwrites() {
        let store = MemoryStore::new();
        assert!(store.create_user("u1", &record()).await.unwrap());
        store.increment_usage("u1", 30.0).await.unwrap();

        let mut sub = store.subscribe_user("u1").await.unwrap();
        assert!(!store.create_user("u1", &record()).await.unwrap());

        let fetched = store.get_user("u1").await.unwrap().unwrap();
        assert_eq!(fetched.usage_duration, 30.0);

        // The refused create notifies nobody.
        store.increment_usage("u1", 1.0).await.unwrap();
        let Some(Change::Updated(first)) = sub.next().await else {
            panic!("expected initial snapshot");
        };
        assert_eq!(first.usage_duration, 30.0);
        let Some(Change::Updated(second)) = sub.next().await else {
            panic!("expected increment");
        };
        assert_eq!(second.usage_duration, 31.0);
    }

    #[tokio::test]
    async fn test_subscription_sees_current_then_updates() {
        let store = MemoryStore::new();
        store.create_user("u1", &record()).await.unwrap();

        let mut sub = store.subscribe_user("u1").await.unwrap();
        store.increment_usage("u1", 12.5).await.unwrap();
        store.set_blocked("u1", true).await.unwrap();

        let Some(Change::Updated(first)) = sub.next().await else {
            panic!("expected initial snapshot");
        };
        assert_eq!(first.usage_duration, 0.0);

        let Some(Change::Updated(second)) = sub.next().await else {
            panic!("expected increment");
        };
        assert_eq!(second.usage_duration, 12.5);

        let Some(Change::Updated(third)) = sub.next().await else {
            panic!("expected block");
        };
        assert!(third.blocked);
    }

    #[tokio::test]
    async fn test_write_failures_leave_record_untouched() {
        let store = MemoryStore::new();
        store.create_user("u1", &record()).await.unwrap();

        store.set_write_failures(true);
        let err = store.increment_usage("u1", 10.0).await.unwrap_err();
        assert!(err.is_transient());

        store.set_write_failures(false);
        let fetched = store.get_user("u1").await.unwrap().unwrap();
        assert_eq!(fetched.usage_duration, 0.0);
        assert_eq!(store.increment_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribed_watchers_are_pruned() {
        let store = MemoryStore::new();
        store.create_user("u1", &record()).await.unwrap();

        let sub = store.subscribe_user("u1").await.unwrap();
        sub.handle().unsubscribe();
        store.increment_usage("u1", 1.0).await.unwrap();

        let watchers = store.inner.user_watchers.get("u1").unwrap();
        assert!(watchers.is_empty());
    }

    #[tokio::test]
    async fn test_bad_settings_json_stored_as_empty() {
        let store = MemoryStore::new();
        store.put_settings_json(serde_json::json!({ "contactNumber": 42 }));

        let doc = store.get_settings().await.unwrap();
        assert_eq!(doc, Some(SettingsDocument::default()));
    }
}
