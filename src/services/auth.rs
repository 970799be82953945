// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Authentication provider seam.
//!
//! Credential checks and token issuance happen outside this crate. The engine
//! only needs to know who is signed in, hear about changes, and be able to
//! sign the user out.

use crate::error::AppError;
use std::future::Future;
use tokio::sync::watch;

/// The signed-in user as reported by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

/// Authentication provider used by the engine.
pub trait AuthProvider: Send + Sync + 'static {
    fn current_user(&self) -> Option<AuthUser>;

    /// Auth state changes; the current state is marked seen on subscribe.
    fn subscribe(&self) -> watch::Receiver<Option<AuthUser>>;

    fn sign_out(&self) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Auth state held in process, for hosts that verify credentials elsewhere.
#[derive(Debug)]
pub struct LocalAuth {
    state: watch::Sender<Option<AuthUser>>,
}

impl Default for LocalAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalAuth {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self { state }
    }

    /// Record a user whose credentials the host has already verified.
    pub fn sign_in(&self, user: AuthUser) {
        tracing::info!(user_id = %user.uid, "User signed in");
        self.state.send_replace(Some(user));
    }
}

impl AuthProvider for LocalAuth {
    fn current_user(&self) -> Option<AuthUser> {
        self.state.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<AuthUser>> {
        self.state.subscribe()
    }

    async fn sign_out(&self) -> Result<(), AppError> {
        let previous = self.state.send_replace(None);
        if let Some(user) = previous {
            tracing::info!(user_id = %user.uid, "User signed out");
        }
        Ok(())
    }
}
