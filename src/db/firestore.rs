// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Users (usage metering, block flag, login timestamps)
//! - Settings (administrator quota document)
//! - Change listeners on both

use crate::db::collections;
use crate::db::subscription::{self, Change, Subscription};
use crate::db::{fields, SettingsStore, UserStore, SETTINGS_DOC_ID};
use crate::error::AppError;
use crate::models::{SettingsDocument, UserRecord};
use chrono::{DateTime, Utc};
use firestore::{FirestoreListenEvent, FirestoreListenerTarget, FirestoreMemListenStateStorage};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

const USER_LISTENER_TARGET: FirestoreListenerTarget = FirestoreListenerTarget::new(1);
const SETTINGS_LISTENER_TARGET: FirestoreListenerTarget = FirestoreListenerTarget::new(2);

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

#[derive(Serialize, Deserialize)]
struct BlockedPatch {
    blocked: bool,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LastLoginPatch {
    #[serde(with = "firestore::serialize_as_timestamp")]
    last_login: DateTime<Utc>,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a mock Firestore client for testing (offline mode).
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    /// Write a partial document, touching only `field`.
    async fn patch_user<T: Serialize + DeserializeOwned + Send + Sync>(
        &self,
        user_id: &str,
        field: &str,
        patch: &T,
    ) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .fields([field])
            .in_col(collections::USERS)
            .document_id(user_id)
            .object(patch)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Listen to a single document and forward its changes.
    ///
    /// The listener is shut down once the returned subscription is cancelled
    /// or dropped.
    async fn listen_document<T>(
        &self,
        collection: &'static str,
        document_id: &str,
        target: FirestoreListenerTarget,
    ) -> Result<Subscription<T>, AppError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let client = self.get_client()?;

        let mut listener = client
            .create_listener(FirestoreMemListenStateStorage::new())
            .await
            .map_err(|e| AppError::Database(format!("Failed to create listener: {}", e)))?;

        client
            .fluent()
            .select()
            .by_id_in(collection)
            .batch_listen([document_id.to_string()])
            .add_target(target, &mut listener)
            .map_err(|e| AppError::Database(format!("Failed to add listener target: {}", e)))?;

        let (sender, subscription) = subscription::channel::<T>();
        let cancel = sender.cancellation();
        let doc_label = format!("{}/{}", collection, document_id);

        listener
            .start(move |event| {
                let sender = sender.clone();
                async move {
                    match event {
                        FirestoreListenEvent::DocumentChange(change) => {
                            if let Some(doc) = change.document {
                                let decoded = firestore::FirestoreDb::deserialize_doc_to::<T>(&doc)
                                    .map(Change::Updated)
                                    .unwrap_or_else(|e| Change::Error(e.to_string()));
                                sender.send(decoded);
                            }
                        }
                        FirestoreListenEvent::DocumentDelete(_) => {
                            sender.send(Change::Removed);
                        }
                        _ => {}
                    }
                    Ok(())
                }
            })
            .await
            .map_err(|e| AppError::Database(format!("Failed to start listener: {}", e)))?;

        tracing::debug!(document = %doc_label, "Listener started");

        tokio::spawn(async move {
            cancel.cancelled().await;
            if let Err(e) = listener.shutdown().await {
                tracing::warn!(document = %doc_label, error = %e, "Listener shutdown failed");
            } else {
                tracing::debug!(document = %doc_label, "Listener stopped");
            }
        });

        Ok(subscription)
    }
}

impl UserStore for FirestoreDb {
    /// Get a user record by ID.
    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::USERS)
            .obj()
            .one(user_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create a user record. Returns `false` if the document already exists.
    async fn create_user(&self, user_id: &str, record: &UserRecord) -> Result<bool, AppError> {
        let result: Result<(), _> = self
            .get_client()?
            .fluent()
            .insert()
            .into(collections::USERS)
            .document_id(user_id)
            .object(record)
            .execute()
            .await;

        match result {
            Ok(()) => Ok(true),
            Err(firestore::errors::FirestoreError::DataConflictError(_)) => {
                tracing::debug!(user_id, "User record already exists");
                Ok(false)
            }
            Err(e) => Err(AppError::Database(e.to_string())),
        }
    }

    /// Add to `usageDuration` with a server-side increment transform.
    ///
    /// Concurrent increments from other devices are summed by Firestore, so
    /// no read is needed and nothing is overwritten.
    async fn increment_usage(&self, user_id: &str, delta_seconds: f64) -> Result<(), AppError> {
        let client = self.get_client()?;

        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        client
            .fluent()
            .update()
            .in_col(collections::USERS)
            .document_id(user_id)
            .transforms(|t| t.fields([t.field(fields::USAGE_DURATION).increment(delta_seconds)]))
            .only_transform()
            .add_to_transaction(&mut transaction)
            .map_err(|e| {
                AppError::Database(format!("Failed to add increment to transaction: {}", e))
            })?;

        transaction
            .commit()
            .await
            .map_err(|e| AppError::Database(format!("Transaction commit failed: {}", e)))?;

        tracing::debug!(user_id, delta_seconds, "Usage increment committed");
        Ok(())
    }

    async fn set_blocked(&self, user_id: &str, blocked: bool) -> Result<(), AppError> {
        self.patch_user(user_id, fields::BLOCKED, &BlockedPatch { blocked })
            .await
    }

    async fn set_last_login(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), AppError> {
        self.patch_user(user_id, fields::LAST_LOGIN, &LastLoginPatch { last_login: at })
            .await
    }

    async fn subscribe_user(&self, user_id: &str) -> Result<Subscription<UserRecord>, AppError> {
        self.listen_document(collections::USERS, user_id, USER_LISTENER_TARGET)
            .await
    }
}

impl SettingsStore for FirestoreDb {
    /// Read the settings document.
    ///
    /// A document that exists but cannot be decoded is treated as missing so
    /// the quota falls back to its default.
    async fn get_settings(&self) -> Result<Option<SettingsDocument>, AppError> {
        let result: Result<Option<SettingsDocument>, _> = self
            .get_client()?
            .fluent()
            .select()
            .by_id_in(collections::SETTINGS)
            .obj()
            .one(SETTINGS_DOC_ID)
            .await;

        match result {
            Ok(doc) => Ok(doc),
            Err(firestore::errors::FirestoreError::DeserializeError(e)) => {
                tracing::warn!(error = %e, "Unreadable settings document, using defaults");
                Ok(None)
            }
            Err(e) => Err(AppError::Database(e.to_string())),
        }
    }

    async fn subscribe_settings(&self) -> Result<Subscription<SettingsDocument>, AppError> {
        self.listen_document(collections::SETTINGS, SETTINGS_DOC_ID, SETTINGS_LISTENER_TARGET)
            .await
    }
}
