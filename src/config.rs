// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Client configuration loaded from environment variables.
//!
//! Quota settings are not configured here: they live in the remote settings
//! document owned by the administrator (see `SettingsCache`).

use crate::services::auth::AuthUser;
use std::env;
use std::time::Duration;

/// Default seconds between periodic usage checkpoints.
pub const DEFAULT_CHECKPOINT_INTERVAL_SECS: u64 = 60;

/// Client configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// GCP project ID holding the Firestore database
    pub gcp_project_id: String,
    /// Seconds between periodic checkpoints (0 disables the timer)
    pub checkpoint_interval_secs: u64,
    /// Sign the user out when the record subscription reports an error
    pub block_listener_fail_closed: bool,

    // --- Daemon session (unused by the library engine) ---
    /// User ID verified by the host's auth provider
    pub session_user_id: Option<String>,
    pub session_user_email: Option<String>,
    pub session_user_name: Option<String>,
    /// Stream to play once the session starts
    pub session_channel_uri: Option<String>,
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        Self {
            gcp_project_id: "test-project".to_string(),
            checkpoint_interval_secs: 0,
            block_listener_fail_closed: false,
            session_user_id: None,
            session_user_email: None,
            session_user_name: None,
            session_channel_uri: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Ok(Self {
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            checkpoint_interval_secs: match env::var("CHECKPOINT_INTERVAL_SECS") {
                Ok(v) => v
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::Invalid("CHECKPOINT_INTERVAL_SECS", v))?,
                Err(_) => DEFAULT_CHECKPOINT_INTERVAL_SECS,
            },
            block_listener_fail_closed: match env::var("BLOCK_LISTENER_FAIL_CLOSED") {
                Ok(v) => parse_bool(&v)
                    .ok_or(ConfigError::Invalid("BLOCK_LISTENER_FAIL_CLOSED", v))?,
                Err(_) => false,
            },
            session_user_id: non_empty_var("SESSION_USER_ID"),
            session_user_email: non_empty_var("SESSION_USER_EMAIL"),
            session_user_name: non_empty_var("SESSION_USER_NAME"),
            session_channel_uri: non_empty_var("SESSION_CHANNEL_URI"),
        })
    }

    /// Period of the checkpoint timer, if enabled.
    pub fn checkpoint_interval(&self) -> Option<Duration> {
        (self.checkpoint_interval_secs > 0)
            .then(|| Duration::from_secs(self.checkpoint_interval_secs))
    }

    /// The user the daemon should sign in.
    pub fn session_user(&self) -> Result<AuthUser, ConfigError> {
        let uid = self
            .session_user_id
            .clone()
            .ok_or(ConfigError::Missing("SESSION_USER_ID"))?;
        Ok(AuthUser {
            uid,
            email: self.session_user_email.clone(),
            display_name: self.session_user_name.clone(),
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}
