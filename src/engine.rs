// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-client usage engine.
//!
//! Owns one of each component for a signed-in client and runs the session
//! lifecycle. Engine state sits behind async mutexes that are always taken in
//! the order session, tracker, playback.

use crate::config::Config;
use crate::db::{SettingsStore, SubscriptionHandle, UserStore};
use crate::error::{AppError, Result};
use crate::models::usage::should_block;
use crate::models::{
    BlockReason, Channel, Notice, PlaybackOutcome, PlaybackState, StopReason, UsageSnapshot,
    UserRecord, DEFAULT_USER_NAME,
};
use crate::services::{
    AuthProvider, AuthUser, BlockPropagationListener, Checkpoint, FailurePolicy, ListenerAction,
    PlaybackSessionManager, PlayerFactory, PlayerSignal, QuotaDecision, QuotaEnforcer,
    SessionTracker, SettingsCache,
};
use crate::time_utils::Clock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex, MutexGuard};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use validator::Validate;

const NOTICE_CAPACITY: usize = 64;

/// Resources owned by the active session.
struct SessionGuard {
    user_id: String,
    /// Stops the listener and checkpoint tasks
    cancel: CancellationToken,
    subscription: Option<SubscriptionHandle>,
}

struct EngineInner<S, A, F: PlayerFactory, C> {
    config: Config,
    store: Arc<S>,
    auth: Arc<A>,
    clock: Arc<C>,
    settings: SettingsCache,
    enforcer: QuotaEnforcer<S>,
    session: Mutex<Option<SessionGuard>>,
    tracker: Mutex<SessionTracker<S, C>>,
    playback: Mutex<PlaybackSessionManager<F>>,
    /// Taken by `start()`
    signals: Mutex<Option<mpsc::UnboundedReceiver<PlayerSignal>>>,
    notices: broadcast::Sender<Notice>,
    shutdown: CancellationToken,
}

/// Usage metering and access control for one client.
///
/// Cheap to clone; clones share the same session.
pub struct UsageEngine<S, A, F: PlayerFactory, C> {
    inner: Arc<EngineInner<S, A, F, C>>,
}

impl<S, A, F: PlayerFactory, C> Clone for UsageEngine<S, A, F, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, A, F, C> UsageEngine<S, A, F, C>
where
    S: UserStore + SettingsStore,
    A: AuthProvider,
    F: PlayerFactory,
    C: Clock,
{
    pub fn new(config: Config, store: Arc<S>, auth: Arc<A>, players: F, clock: Arc<C>) -> Self {
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        Self {
            inner: Arc::new(EngineInner {
                settings: SettingsCache::new(),
                enforcer: QuotaEnforcer::new(Arc::clone(&store)),
                session: Mutex::new(None),
                tracker: Mutex::new(SessionTracker::new(Arc::clone(&store), Arc::clone(&clock))),
                playback: Mutex::new(PlaybackSessionManager::new(players, signals_tx)),
                signals: Mutex::new(Some(signals_rx)),
                notices,
                shutdown: CancellationToken::new(),
                config,
                store,
                auth,
                clock,
            }),
        }
    }

    /// Notices for the UI layer.
    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.inner.notices.subscribe()
    }

    pub fn settings(&self) -> &SettingsCache {
        &self.inner.settings
    }

    /// User ID of the active session.
    pub async fn active_user(&self) -> Option<String> {
        self.inner
            .session
            .lock()
            .await
            .as_ref()
            .map(|g| g.user_id.clone())
    }

    pub async fn playback_state(&self) -> PlaybackState {
        self.inner.playback.lock().await.state()
    }

    /// Spawn the background tasks: player signal pump, settings
    /// subscription and auth state loop. Calling it again does nothing.
    pub async fn start(&self) -> Result<()> {
        let Some(signals) = self.inner.signals.lock().await.take() else {
            tracing::debug!("Engine already started");
            return Ok(());
        };

        let cancel = self.inner.shutdown.child_token();
        tokio::spawn({
            let engine = self.clone();
            let cancel = cancel.clone();
            async move { engine.pump_player_signals(signals, cancel).await }
        });

        match self.inner.store.subscribe_settings().await {
            Ok(subscription) => {
                let settings = self.inner.settings.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { settings.follow(subscription, cancel).await });
            }
            Err(e) => {
                tracing::warn!(error = %e, "Settings subscription failed, using point reads");
            }
        }

        tokio::spawn({
            let engine = self.clone();
            async move { engine.follow_auth(cancel).await }
        });

        tracing::info!("Usage engine started");
        Ok(())
    }

    /// Create a user record with zero usage.
    ///
    /// Refuses to overwrite an existing record, which would reset its usage.
    pub async fn register_user(&self, user_id: &str, email: &str, name: &str) -> Result<UserRecord> {
        let record = UserRecord::new(email, name, self.inner.clock.now());
        record.validate()?;

        if !self.inner.store.create_user(user_id, &record).await? {
            return Err(AppError::BadRequest(format!(
                "User {} is already registered",
                user_id
            )));
        }
        tracing::info!(user_id, "User registered");
        Ok(record)
    }

    /// Current quota view for a user.
    pub async fn usage_snapshot(&self, user_id: &str) -> Result<UsageSnapshot> {
        let record = self
            .inner
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {}", user_id)))?;
        Ok(UsageSnapshot::new(&record, &self.inner.settings.current()))
    }

    /// Start a session for a user the auth provider has signed in.
    pub async fn begin_session(&self, user: &AuthUser) -> Result<UsageSnapshot> {
        let mut slot = self.inner.session.lock().await;
        let user_id = user.uid.as_str();

        match slot.as_ref().map(|g| g.user_id.clone()) {
            Some(active) if active == user_id => {
                tracing::debug!(user_id, "Session already active");
                return self.usage_snapshot(user_id).await;
            }
            Some(previous) => {
                tracing::info!(user_id, previous = %previous, "Switching user");
                self.teardown(&mut slot, StopReason::SessionEnded).await;
            }
            None => {}
        }

        self.inner.settings.refresh(self.inner.store.as_ref()).await;
        let settings = self.inner.settings.current();

        let record = match self.inner.store.get_user(user_id).await {
            Ok(Some(record)) => record,
            Ok(None) => self.create_missing_record(user).await?,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Failed to load user record");
                return Err(self.session_failed(e).await);
            }
        };

        if record.blocked {
            tracing::info!(user_id, "Blocked user attempted to sign in");
            self.sign_out().await;
            self.publish(Notice::blocked(BlockReason::BlockedAtLogin));
            return Err(AppError::AccountBlocked);
        }

        if should_block(record.usage_duration, settings.quota_seconds()) {
            tracing::info!(
                user_id,
                usage_seconds = record.usage_duration,
                "Quota already used up at sign in"
            );
            if let Err(e) = self.inner.store.set_blocked(user_id, true).await {
                tracing::warn!(user_id, error = %e, "Failed to latch block flag");
            }
            self.sign_out().await;
            self.publish(Notice::blocked(BlockReason::QuotaExhausted));
            return Err(AppError::AccountBlocked);
        }

        if let Err(e) = self
            .inner
            .store
            .set_last_login(user_id, self.inner.clock.now())
            .await
        {
            tracing::warn!(user_id, error = %e, "Failed to update last login");
        }

        self.inner.tracker.lock().await.start(user_id);

        let cancel = self.inner.shutdown.child_token();
        let listener = match self.inner.store.subscribe_user(user_id).await {
            Ok(subscription) => Some(BlockPropagationListener::new(
                user_id,
                self.failure_policy(),
                subscription,
            )),
            Err(e) if self.failure_policy() == FailurePolicy::FailClosed => {
                tracing::warn!(user_id, error = %e, "User record subscription failed");
                self.inner.tracker.lock().await.stop().await;
                self.sign_out().await;
                self.publish(Notice::blocked(BlockReason::ListenerFailure));
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(user_id, error = %e, "User record subscription failed, continuing");
                None
            }
        };

        *slot = Some(SessionGuard {
            user_id: user_id.to_string(),
            cancel: cancel.clone(),
            subscription: listener.as_ref().map(|l| l.handle()),
        });

        if let Some(listener) = listener {
            tokio::spawn({
                let engine = self.clone();
                let cancel = cancel.clone();
                async move { engine.run_listener(listener, cancel).await }
            });
        }

        if let Some(period) = self.inner.config.checkpoint_interval() {
            let first_tick = Instant::now() + period;
            tokio::spawn({
                let engine = self.clone();
                async move { engine.run_checkpoints(first_tick, period, cancel).await }
            });
        }

        drop(slot);

        let snapshot = UsageSnapshot::new(&record, &settings);
        tracing::info!(
            user_id,
            remaining_seconds = snapshot.remaining_seconds,
            "Session started"
        );
        self.publish(Notice::UsageUpdated {
            snapshot: snapshot.clone(),
        });
        Ok(snapshot)
    }

    /// Commit elapsed time, then check the quota.
    ///
    /// Returns `None` when no session is active.
    pub async fn checkpoint(&self) -> Option<Checkpoint> {
        // Held until the decision is acted on, so a record listener that sees
        // our own block flag finds the session already gone.
        let slot = self.inner.session.lock().await;
        let checkpoint = self.inner.tracker.lock().await.checkpoint().await?;
        if !checkpoint.committed {
            return Some(checkpoint);
        }

        let reason = match self
            .inner
            .enforcer
            .evaluate(&checkpoint.user_id, self.inner.settings.quota_seconds())
            .await
        {
            Ok(QuotaDecision::Within { remaining_seconds }) => {
                tracing::debug!(user_id = %checkpoint.user_id, remaining_seconds, "Within quota");
                None
            }
            Ok(QuotaDecision::Blocked) => Some(BlockReason::QuotaExhausted),
            Ok(QuotaDecision::AlreadyBlocked) => Some(BlockReason::BlockedRemotely),
            Err(e) => {
                tracing::warn!(user_id = %checkpoint.user_id, error = %e, "Quota check failed");
                None
            }
        };

        if let Some(reason) = reason {
            self.revoke_locked(slot, Some(&checkpoint.user_id), reason)
                .await;
        }
        Some(checkpoint)
    }

    /// Play a channel, replacing whatever is playing.
    pub async fn select_channel(&self, channel: &Channel) -> Result<()> {
        let slot = self.inner.session.lock().await;
        if slot.is_none() {
            return Err(AppError::Unauthorized);
        }

        let result = self.inner.playback.lock().await.select_channel(channel);
        drop(slot);

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                self.publish(Notice::PlaybackFailed {
                    channel_id: channel.id.clone(),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    pub async fn stop_playback(&self, reason: StopReason) -> Option<PlaybackOutcome> {
        self.inner.playback.lock().await.stop(reason)
    }

    /// Voluntary logout.
    pub async fn end_session(&self) -> Result<()> {
        let mut slot = self.inner.session.lock().await;
        let ended = self.teardown(&mut slot, StopReason::SessionEnded).await;
        drop(slot);

        if ended.is_none() {
            return Ok(());
        }
        self.inner.auth.sign_out().await?;
        self.publish(Notice::SignedOut);
        Ok(())
    }

    /// Forcibly end the active session. Returns `false` if there was none.
    pub async fn deauthorize(&self, reason: BlockReason) -> bool {
        self.revoke(None, reason).await
    }

    /// Client is closing: final checkpoint and stop all background tasks.
    /// The user stays signed in.
    pub async fn shutdown(&self) {
        let mut slot = self.inner.session.lock().await;
        self.teardown(&mut slot, StopReason::SessionEnded).await;
        drop(slot);

        self.inner.shutdown.cancel();
        tracing::info!("Usage engine shut down");
    }

    /// Deauthorize the active session, optionally only if it belongs to
    /// `expected_user`.
    async fn revoke(&self, expected_user: Option<&str>, reason: BlockReason) -> bool {
        let slot = self.inner.session.lock().await;
        self.revoke_locked(slot, expected_user, reason).await
    }

    async fn revoke_locked(
        &self,
        mut slot: MutexGuard<'_, Option<SessionGuard>>,
        expected_user: Option<&str>,
        reason: BlockReason,
    ) -> bool {
        if let Some(expected) = expected_user {
            if slot.as_ref().map(|g| g.user_id.as_str()) != Some(expected) {
                return false;
            }
        }

        let Some(user_id) = self.teardown(&mut slot, StopReason::AccessRevoked).await else {
            return false;
        };
        drop(slot);

        tracing::warn!(user_id = %user_id, reason = ?reason, "Session deauthorized");
        self.sign_out().await;
        self.publish(Notice::blocked(reason));
        true
    }

    /// Release everything the session owns. Returns the user ID if a session
    /// was active.
    async fn teardown(
        &self,
        slot: &mut Option<SessionGuard>,
        reason: StopReason,
    ) -> Option<String> {
        let guard = slot.take()?;
        guard.cancel.cancel();
        if let Some(subscription) = &guard.subscription {
            subscription.unsubscribe();
        }

        self.inner.playback.lock().await.stop(reason);

        let last = self.inner.tracker.lock().await.stop().await;
        if last.is_some_and(|c| c.committed) {
            // The block flag is latched for the next sign in; this session is
            // already ending.
            match self
                .inner
                .enforcer
                .evaluate(&guard.user_id, self.inner.settings.quota_seconds())
                .await
            {
                Ok(QuotaDecision::Blocked) => {
                    tracing::info!(user_id = %guard.user_id, "Quota used up during final checkpoint")
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(user_id = %guard.user_id, error = %e, "Final quota check failed")
                }
            }
        }

        tracing::info!(user_id = %guard.user_id, "Session ended");
        Some(guard.user_id)
    }

    async fn create_missing_record(&self, user: &AuthUser) -> Result<UserRecord> {
        let name = user
            .display_name
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_NAME.to_string());
        let record = UserRecord::new(
            user.email.clone().unwrap_or_default(),
            name,
            self.inner.clock.now(),
        );

        match self.inner.store.create_user(&user.uid, &record).await {
            Ok(true) => {
                tracing::info!(user_id = %user.uid, "Created user record");
                self.publish(Notice::Welcome {
                    name: record.name.clone(),
                });
                Ok(record)
            }
            Ok(false) => {
                // Another device created it after our read.
                tracing::info!(user_id = %user.uid, "User record appeared, reloading");
                match self.inner.store.get_user(&user.uid).await {
                    Ok(Some(existing)) => Ok(existing),
                    Ok(None) => {
                        let e = AppError::NotFound(format!("user {}", user.uid));
                        Err(self.session_failed(e).await)
                    }
                    Err(e) => Err(self.session_failed(e).await),
                }
            }
            Err(e) => {
                tracing::warn!(user_id = %user.uid, error = %e, "Failed to create user record");
                Err(self.session_failed(e).await)
            }
        }
    }

    /// Report a session that could not start and sign the user out.
    async fn session_failed(&self, error: AppError) -> AppError {
        self.publish(Notice::SessionError {
            message: error.to_string(),
        });
        self.sign_out().await;
        error
    }

    async fn run_listener(&self, mut listener: BlockPropagationListener, cancel: CancellationToken) {
        let user_id = listener.user_id().to_string();
        loop {
            let action = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                action = listener.next_action() => action,
            };

            match action {
                Some(ListenerAction::Deauthorize(reason)) => {
                    self.revoke(Some(&user_id), reason).await;
                    break;
                }
                Some(ListenerAction::Refresh(record)) => {
                    self.publish(Notice::UsageUpdated {
                        snapshot: UsageSnapshot::new(&record, &self.inner.settings.current()),
                    });
                }
                Some(ListenerAction::Ignore) => {}
                None => break,
            }
        }
        tracing::debug!(user_id = %user_id, "Block listener stopped");
    }

    async fn run_checkpoints(&self, first_tick: Instant, period: Duration, cancel: CancellationToken) {
        let mut interval = tokio::time::interval_at(first_tick, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.checkpoint().await;
                }
            }
        }
        tracing::debug!("Checkpoint timer stopped");
    }

    async fn pump_player_signals(
        &self,
        mut signals: mpsc::UnboundedReceiver<PlayerSignal>,
        cancel: CancellationToken,
    ) {
        loop {
            let signal = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                signal = signals.recv() => match signal {
                    Some(signal) => signal,
                    None => break,
                },
            };

            let outcome = self.inner.playback.lock().await.handle_signal(signal);
            if let Some(PlaybackOutcome::Errored { session, message }) = outcome {
                self.publish(Notice::PlaybackFailed {
                    channel_id: session.channel_id,
                    message,
                });
            }
        }
    }

    async fn follow_auth(&self, cancel: CancellationToken) {
        let mut rx = self.inner.auth.subscribe();
        let initial = rx.borrow_and_update().clone();
        if let Some(user) = initial {
            self.begin_from_auth(&user).await;
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            let state = rx.borrow_and_update().clone();
            match state {
                Some(user) => self.begin_from_auth(&user).await,
                None => {
                    // Signed out elsewhere; sign_out must not be called again.
                    let mut slot = self.inner.session.lock().await;
                    if self.teardown(&mut slot, StopReason::SessionEnded).await.is_some() {
                        drop(slot);
                        self.publish(Notice::SignedOut);
                    }
                }
            }
        }
        tracing::debug!("Auth state loop stopped");
    }

    async fn begin_from_auth(&self, user: &AuthUser) {
        if let Err(e) = self.begin_session(user).await {
            tracing::debug!(user_id = %user.uid, error = %e, "Session not started");
        }
    }

    async fn sign_out(&self) {
        if let Err(e) = self.inner.auth.sign_out().await {
            tracing::warn!(error = %e, "Sign out failed");
        }
    }

    fn failure_policy(&self) -> FailurePolicy {
        if self.inner.config.block_listener_fail_closed {
            FailurePolicy::FailClosed
        } else {
            FailurePolicy::FailOpen
        }
    }

    fn publish(&self, notice: Notice) {
        tracing::debug!(notice = ?notice, "Publishing notice");
        // No receivers is fine.
        let _ = self.inner.notices.send(notice);
    }
}
