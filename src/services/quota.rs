// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Quota enforcement.
//!
//! Enforcement runs on the client and writes the user's own block flag, so a
//! modified client can skip it. A deployment that needs a hard guarantee
//! should restrict the record with security rules (increment-only
//! `usageDuration`, no client writes to `blocked`) and latch the block
//! server-side.

use crate::db::UserStore;
use crate::error::AppError;
use crate::models::usage::{remaining, should_block};
use std::sync::Arc;

/// Outcome of evaluating a user's usage against the quota.
#[derive(Debug, Clone, PartialEq)]
pub enum QuotaDecision {
    Within { remaining_seconds: f64 },
    /// This evaluation latched the block flag
    Blocked,
    AlreadyBlocked,
}

/// Decides and applies the `blocked` transition.
pub struct QuotaEnforcer<S> {
    store: Arc<S>,
}

impl<S: UserStore> QuotaEnforcer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Re-read the user's record and block them if the quota is used up.
    ///
    /// Never clears the flag.
    pub async fn evaluate(
        &self,
        user_id: &str,
        quota_seconds: f64,
    ) -> Result<QuotaDecision, AppError> {
        let record = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {}", user_id)))?;

        if record.blocked {
            return Ok(QuotaDecision::AlreadyBlocked);
        }

        if should_block(record.usage_duration, quota_seconds) {
            self.store.set_blocked(user_id, true).await?;
            tracing::info!(
                user_id,
                usage_seconds = record.usage_duration,
                quota_seconds,
                "Quota exhausted, user blocked"
            );
            return Ok(QuotaDecision::Blocked);
        }

        Ok(QuotaDecision::Within {
            remaining_seconds: remaining(record.usage_duration, quota_seconds),
        })
    }
}
