// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Usage-Meter client daemon
//!
//! Runs a metered session for the user configured in the environment and
//! logs every notice until Ctrl-C or until the account is blocked.

use anyhow::Context;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use usage_meter::{
    config::Config,
    db::FirestoreDb,
    models::{Channel, Notice},
    services::{HeadlessPlayerFactory, LocalAuth},
    time_utils::SystemClock,
    UsageEngine,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured JSON logging
    init_logging()?;

    // Load configuration from environment
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(
        project = %config.gcp_project_id,
        checkpoint_interval_secs = config.checkpoint_interval_secs,
        "Starting usage meter"
    );

    let user = config.session_user().context("Nothing to meter")?;

    // Initialize Firestore database
    let db = Arc::new(
        FirestoreDb::new(&config.gcp_project_id)
            .await
            .context("Failed to connect to Firestore")?,
    );
    let auth = Arc::new(LocalAuth::new());
    let channel = config.session_channel_uri.clone().map(|uri| Channel {
        id: "configured".to_string(),
        name: "Configured channel".to_string(),
        stream_uri: uri,
    });

    let engine = UsageEngine::new(
        config,
        db,
        Arc::clone(&auth),
        HeadlessPlayerFactory,
        Arc::new(SystemClock),
    );
    let mut notices = engine.subscribe_notices();
    engine.start().await?;

    // The auth state loop begins the session.
    auth.sign_in(user);

    let mut channel = channel;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
            notice = notices.recv() => match notice {
                Ok(notice) => {
                    log_notice(&notice);
                    match notice {
                        Notice::UsageUpdated { .. } => {
                            if let Some(channel) = channel.take() {
                                if let Err(e) = engine.select_channel(&channel).await {
                                    tracing::warn!(error = %e, "Could not start playback");
                                }
                            }
                        }
                        Notice::AccountBlocked { .. } | Notice::SignedOut | Notice::SessionError { .. } => break,
                        _ => {}
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Notice receiver lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}

fn log_notice(notice: &Notice) {
    match serde_json::to_string(notice) {
        Ok(json) => tracing::info!(notice = %json, "Notice"),
        Err(e) => tracing::warn!(error = %e, "Failed to serialize notice"),
    }
}

/// Initialize structured JSON logging.
fn init_logging() -> anyhow::Result<()> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("usage_meter=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
