// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Block propagation.
//!
//! Watches the signed-in user's record for the lifetime of a session. The
//! block flag may be set by this client, another device on the same account,
//! or an administrator; the listener reacts the same way in every case.

use crate::db::{Change, Subscription, SubscriptionHandle};
use crate::models::{BlockReason, UserRecord};

/// What to do when the record subscription reports an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Log and keep the session; the next checkpoint re-evaluates the quota
    #[default]
    FailOpen,
    /// Treat the error as a revocation
    FailClosed,
}

/// Action requested by the listener.
#[derive(Debug, Clone, PartialEq)]
pub enum ListenerAction {
    Deauthorize(BlockReason),
    /// The record changed but the user may stay
    Refresh(UserRecord),
    Ignore,
}

/// Turns record changes into session actions.
pub struct BlockPropagationListener {
    user_id: String,
    policy: FailurePolicy,
    subscription: Subscription<UserRecord>,
}

impl BlockPropagationListener {
    pub fn new(user_id: &str, policy: FailurePolicy, subscription: Subscription<UserRecord>) -> Self {
        Self {
            user_id: user_id.to_string(),
            policy,
            subscription,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Handle that stops the listener from another task.
    pub fn handle(&self) -> SubscriptionHandle {
        self.subscription.handle()
    }

    /// Wait for the next actionable change. `None` once unsubscribed.
    pub async fn next_action(&mut self) -> Option<ListenerAction> {
        loop {
            let change = self.subscription.next().await?;
            match classify(&self.user_id, self.policy, change) {
                ListenerAction::Ignore => continue,
                action => return Some(action),
            }
        }
    }
}

/// Map a single change to an action.
pub fn classify(user_id: &str, policy: FailurePolicy, change: Change<UserRecord>) -> ListenerAction {
    match change {
        Change::Updated(record) if record.blocked => {
            tracing::warn!(user_id, "Block flag observed on user record");
            ListenerAction::Deauthorize(BlockReason::BlockedRemotely)
        }
        Change::Updated(record) => ListenerAction::Refresh(record),
        Change::Removed => {
            tracing::warn!(user_id, "User record removed");
            ListenerAction::Deauthorize(BlockReason::AccountRemoved)
        }
        Change::Error(e) => match policy {
            FailurePolicy::FailOpen => {
                tracing::warn!(user_id, error = %e, "User record subscription error, keeping session");
                ListenerAction::Ignore
            }
            FailurePolicy::FailClosed => {
                tracing::warn!(user_id, error = %e, "User record subscription error, ending session");
                ListenerAction::Deauthorize(BlockReason::ListenerFailure)
            }
        },
    }
}
