// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Latest administrator quota settings.

use crate::db::{Change, SettingsStore, Subscription};
use crate::models::{QuotaSettings, SettingsDocument};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Holds the current [`QuotaSettings`]; starts at the defaults.
#[derive(Clone)]
pub struct SettingsCache {
    current: Arc<watch::Sender<QuotaSettings>>,
}

impl Default for SettingsCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsCache {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(QuotaSettings::default());
        Self {
            current: Arc::new(tx),
        }
    }

    pub fn current(&self) -> QuotaSettings {
        self.current.borrow().clone()
    }

    pub fn quota_seconds(&self) -> f64 {
        self.current.borrow().quota_seconds()
    }

    /// Receive every settings change.
    pub fn watch(&self) -> watch::Receiver<QuotaSettings> {
        self.current.subscribe()
    }

    fn replace(&self, settings: QuotaSettings) {
        self.current.send_if_modified(|current| {
            if *current == settings {
                return false;
            }
            tracing::info!(
                minutes = settings.auto_block_duration_minutes,
                "Quota settings updated"
            );
            *current = settings;
            true
        });
    }

    /// Point read. On error the previous settings are kept.
    pub async fn refresh<S: SettingsStore>(&self, store: &S) {
        match store.get_settings().await {
            Ok(doc) => self.replace(QuotaSettings::from_document(doc.as_ref())),
            Err(e) => tracing::warn!(error = %e, "Settings refresh failed, keeping previous"),
        }
    }

    /// Apply changes from a settings subscription until it ends or `cancel`
    /// fires.
    pub async fn follow(
        &self,
        mut subscription: Subscription<SettingsDocument>,
        cancel: CancellationToken,
    ) {
        loop {
            let change = tokio::select! {
                _ = cancel.cancelled() => break,
                change = subscription.next() => change,
            };
            match change {
                Some(Change::Updated(doc)) => self.replace(QuotaSettings::from_document(Some(&doc))),
                Some(Change::Removed) => self.replace(QuotaSettings::default()),
                Some(Change::Error(e)) => {
                    tracing::warn!(error = %e, "Settings subscription error, keeping previous")
                }
                None => break,
            }
        }
        tracing::debug!("Settings subscription ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_refresh_without_document_uses_default() {
        let store = MemoryStore::new();
        let cache = SettingsCache::new();

        cache.refresh(&store).await;

        assert_eq!(cache.quota_seconds(), 1800.0);
    }

    #[tokio::test]
    async fn test_follow_applies_updates_and_removal() {
        let store = MemoryStore::new();
        store.put_settings_json(json!({ "autoBlockDuration": 1 }));
        let cache = SettingsCache::new();
        let mut rx = cache.watch();

        let subscription = store.subscribe_settings().await.unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let cache = cache.clone();
            let cancel = cancel.clone();
            async move { cache.follow(subscription, cancel).await }
        });

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().quota_seconds(), 60.0);

        store.put_settings_json(json!({ "autoBlockDuration": "2" }));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().quota_seconds(), 120.0);

        store.remove_settings();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().quota_seconds(), 1800.0);

        cancel.cancel();
        task.await.unwrap();
    }
}
