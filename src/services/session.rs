// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Session usage tracking.
//!
//! Elapsed time is committed as an increment and `started_at` is moved
//! forward only after the write has returned, successful or not. A failed
//! write loses that interval instead of re-sending it later: usage may be
//! under-counted after an outage but is never counted twice.

use crate::db::UserStore;
use crate::time_utils::{elapsed_seconds, Clock};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Result of one checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub user_id: String,
    pub elapsed_seconds: f64,
    /// Whether the increment reached the store
    pub committed: bool,
}

#[derive(Debug)]
struct ActiveSession {
    user_id: String,
    started_at: DateTime<Utc>,
}

/// Measures session time and commits it to the user's record.
pub struct SessionTracker<S, C> {
    store: Arc<S>,
    clock: Arc<C>,
    active: Option<ActiveSession>,
}

impl<S: UserStore, C: Clock> SessionTracker<S, C> {
    pub fn new(store: Arc<S>, clock: Arc<C>) -> Self {
        Self {
            store,
            clock,
            active: None,
        }
    }

    /// Start timing a session. Returns `false` (and keeps the running timer)
    /// if a session is already active.
    pub fn start(&mut self, user_id: &str) -> bool {
        if let Some(active) = &self.active {
            tracing::debug!(
                user_id,
                active_user = %active.user_id,
                "Session already started, keeping timer"
            );
            return false;
        }

        let started_at = self.clock.now();
        tracing::info!(user_id, "Usage session started");
        self.active = Some(ActiveSession {
            user_id: user_id.to_string(),
            started_at,
        });
        true
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.user_id.as_str())
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.active.as_ref().map(|a| a.started_at)
    }

    /// Commit the time since the last checkpoint.
    ///
    /// Returns `None` when no session is active.
    pub async fn checkpoint(&mut self) -> Option<Checkpoint> {
        let active = self.active.as_mut()?;
        let now = self.clock.now();
        let elapsed = elapsed_seconds(active.started_at, now);

        if elapsed <= 0.0 {
            // Also covers a clock that stepped backwards.
            active.started_at = now;
            return Some(Checkpoint {
                user_id: active.user_id.clone(),
                elapsed_seconds: 0.0,
                committed: false,
            });
        }

        let result = self.store.increment_usage(&active.user_id, elapsed).await;
        active.started_at = now;

        let committed = match result {
            Ok(()) => {
                tracing::info!(
                    user_id = %active.user_id,
                    elapsed_seconds = elapsed,
                    "Usage checkpoint committed"
                );
                true
            }
            Err(e) => {
                tracing::warn!(
                    user_id = %active.user_id,
                    elapsed_seconds = elapsed,
                    error = %e,
                    "Usage checkpoint failed, interval dropped"
                );
                false
            }
        };

        Some(Checkpoint {
            user_id: active.user_id.clone(),
            elapsed_seconds: elapsed,
            committed,
        })
    }

    /// Final checkpoint, then forget the session.
    pub async fn stop(&mut self) -> Option<Checkpoint> {
        let checkpoint = self.checkpoint().await;
        if let Some(active) = self.active.take() {
            tracing::info!(user_id = %active.user_id, "Usage session stopped");
        }
        checkpoint
    }
}
