// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User-visible notifications published by the engine.

use serde::Serialize;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::models::UsageSnapshot;

/// Why a session was forcibly ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum BlockReason {
    /// The record was already blocked when the session started
    BlockedAtLogin,
    /// This client latched the block after a checkpoint
    QuotaExhausted,
    /// The block flag arrived through the record subscription
    BlockedRemotely,
    /// The user record was deleted
    AccountRemoved,
    /// The record subscription failed and the listener fails closed
    ListenerFailure,
}

impl BlockReason {
    /// Message shown to the user.
    pub fn message(&self) -> &'static str {
        match self {
            BlockReason::BlockedAtLogin => "Your account has been blocked.",
            BlockReason::QuotaExhausted => {
                "Your viewing time has expired and your account has been blocked."
            }
            BlockReason::BlockedRemotely => {
                "Your account has been blocked by an administrator."
            }
            BlockReason::AccountRemoved => "Your account is no longer available.",
            BlockReason::ListenerFailure => {
                "Lost contact with the account service. Please sign in again."
            }
        }
    }
}

/// Notification for the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum Notice {
    /// First session of a newly created record
    Welcome { name: String },
    /// Profile and quota view changed
    UsageUpdated { snapshot: UsageSnapshot },
    AccountBlocked { reason: BlockReason, message: String },
    PlaybackFailed { channel_id: String, message: String },
    SignedOut,
    /// Session could not be started
    SessionError { message: String },
}

impl Notice {
    pub fn blocked(reason: BlockReason) -> Self {
        Notice::AccountBlocked {
            reason,
            message: reason.message().to_string(),
        }
    }
}
