// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Live channel playback session management.
//!
//! At most one player exists at a time. State machine:
//!
//! ```text
//! Idle -> Starting -> Playing -> Stopped -> Idle
//!            \           \
//!             +-----------+---> Errored -> Idle
//! ```
//!
//! Players report readiness and failures asynchronously through
//! [`PlayerEvents`]. Each selection gets a new generation number and signals
//! from older generations are dropped, so a disposed player cannot affect the
//! session that replaced it.

use crate::error::AppError;
use crate::models::{Channel, PlaybackOutcome, PlaybackSession, PlaybackState, StopReason};
use tokio::sync::mpsc;

/// Player control surface.
pub trait Player: Send + 'static {
    fn attach(&mut self, stream_uri: &str) -> Result<(), AppError>;
    fn play(&mut self) -> Result<(), AppError>;
    fn pause(&mut self);
    /// Release the player. Called exactly once per player.
    fn dispose(&mut self);
}

/// Creates one player per channel selection.
pub trait PlayerFactory: Send + Sync + 'static {
    type Player: Player;

    fn create(&self, events: PlayerEvents) -> Self::Player;
}

/// Event reported by a player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    Ready,
    Error(String),
}

/// A player event tagged with the selection it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSignal {
    pub generation: u64,
    pub event: PlayerEvent,
}

/// The player's `onReady` / `onError` callbacks.
#[derive(Debug, Clone)]
pub struct PlayerEvents {
    generation: u64,
    tx: mpsc::UnboundedSender<PlayerSignal>,
}

impl PlayerEvents {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn ready(&self) {
        self.emit(PlayerEvent::Ready);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(PlayerEvent::Error(message.into()));
    }

    fn emit(&self, event: PlayerEvent) {
        // The manager may already be gone during shutdown.
        let _ = self.tx.send(PlayerSignal {
            generation: self.generation,
            event,
        });
    }
}

enum Phase {
    Starting,
    Playing,
}

struct ActivePlayback<P> {
    session: PlaybackSession,
    phase: Phase,
    player: P,
}

/// Owns the single active playback session.
pub struct PlaybackSessionManager<F: PlayerFactory> {
    factory: F,
    signals: mpsc::UnboundedSender<PlayerSignal>,
    generation: u64,
    active: Option<ActivePlayback<F::Player>>,
}

impl<F: PlayerFactory> PlaybackSessionManager<F> {
    /// Player signals are delivered to `signals`; the owner feeds them back
    /// through [`handle_signal`](Self::handle_signal).
    pub fn new(factory: F, signals: mpsc::UnboundedSender<PlayerSignal>) -> Self {
        Self {
            factory,
            signals,
            generation: 0,
            active: None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        match &self.active {
            None => PlaybackState::Idle,
            Some(active) => match active.phase {
                Phase::Starting => PlaybackState::Starting,
                Phase::Playing => PlaybackState::Playing,
            },
        }
    }

    pub fn session(&self) -> Option<&PlaybackSession> {
        self.active.as_ref().map(|a| &a.session)
    }

    /// Start a new session for `channel`, tearing down any existing one.
    ///
    /// Returns the outcome of the replaced session, if there was one.
    pub fn select_channel(&mut self, channel: &Channel) -> Result<Option<PlaybackOutcome>, AppError> {
        let replaced = self.stop(StopReason::Replaced);

        self.generation += 1;
        let session = PlaybackSession {
            channel_id: channel.id.clone(),
            stream_uri: channel.stream_uri.clone(),
            generation: self.generation,
        };

        let mut player = self.factory.create(PlayerEvents {
            generation: self.generation,
            tx: self.signals.clone(),
        });

        if let Err(e) = player.attach(&channel.stream_uri) {
            tracing::warn!(channel_id = %channel.id, error = %e, "Player attach failed");
            player.dispose();
            return Err(AppError::Playback(format!(
                "Failed to open channel {}: {}",
                channel.name, e
            )));
        }

        tracing::info!(
            channel_id = %channel.id,
            generation = self.generation,
            "Playback starting"
        );
        self.active = Some(ActivePlayback {
            session,
            phase: Phase::Starting,
            player,
        });

        Ok(replaced)
    }

    /// Apply a player signal. Returns an outcome if the session ended.
    pub fn handle_signal(&mut self, signal: PlayerSignal) -> Option<PlaybackOutcome> {
        let active = match self.active.as_mut() {
            Some(active) if active.session.generation == signal.generation => active,
            _ => {
                tracing::debug!(generation = signal.generation, "Ignoring stale player signal");
                return None;
            }
        };

        let starting = matches!(active.phase, Phase::Starting);
        match signal.event {
            PlayerEvent::Ready if starting => match active.player.play() {
                Ok(()) => {
                    active.phase = Phase::Playing;
                    tracing::info!(channel_id = %active.session.channel_id, "Playback playing");
                    None
                }
                Err(e) => self.fail(e.to_string()),
            },
            PlayerEvent::Ready => None,
            PlayerEvent::Error(message) => self.fail(message),
        }
    }

    /// Stop the active session, if any, and release its player.
    pub fn stop(&mut self, reason: StopReason) -> Option<PlaybackOutcome> {
        let mut active = self.active.take()?;
        release(&mut active.player);
        tracing::info!(
            channel_id = %active.session.channel_id,
            reason = ?reason,
            "Playback stopped"
        );
        Some(PlaybackOutcome::Stopped {
            session: active.session,
            reason,
        })
    }

    fn fail(&mut self, message: String) -> Option<PlaybackOutcome> {
        let mut active = self.active.take()?;
        release(&mut active.player);
        tracing::warn!(
            channel_id = %active.session.channel_id,
            error = %message,
            "Playback failed"
        );
        Some(PlaybackOutcome::Errored {
            session: active.session,
            message,
        })
    }
}

fn release<P: Player>(player: &mut P) {
    player.pause();
    player.dispose();
}

/// Player for the headless daemon: logs calls and reports ready on attach.
pub struct HeadlessPlayer {
    events: PlayerEvents,
    stream_uri: Option<String>,
}

impl Player for HeadlessPlayer {
    fn attach(&mut self, stream_uri: &str) -> Result<(), AppError> {
        if stream_uri.trim().is_empty() {
            return Err(AppError::Playback("empty stream URI".to_string()));
        }
        tracing::debug!(stream_uri, "Headless player attached");
        self.stream_uri = Some(stream_uri.to_string());
        self.events.ready();
        Ok(())
    }

    fn play(&mut self) -> Result<(), AppError> {
        tracing::debug!(stream_uri = ?self.stream_uri, "Headless player playing");
        Ok(())
    }

    fn pause(&mut self) {
        tracing::debug!(stream_uri = ?self.stream_uri, "Headless player paused");
    }

    fn dispose(&mut self) {
        tracing::debug!(stream_uri = ?self.stream_uri, "Headless player disposed");
        self.stream_uri = None;
    }
}

/// Factory for [`HeadlessPlayer`].
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessPlayerFactory;

impl PlayerFactory for HeadlessPlayerFactory {
    type Player = HeadlessPlayer;

    fn create(&self, events: PlayerEvents) -> HeadlessPlayer {
        HeadlessPlayer {
            events,
            stream_uri: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(id: &str) -> Channel {
        Channel {
            id: id.to_string(),
            name: format!("Channel {}", id),
            stream_uri: format!("https://cdn.example.com/{}/index.m3u8", id),
        }
    }

    #[test]
    fn test_headless_player_reports_ready() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut manager = PlaybackSessionManager::new(HeadlessPlayerFactory, tx);

        manager.select_channel(&channel("news")).unwrap();
        assert_eq!(manager.state(), PlaybackState::Starting);

        let signal = rx.try_recv().unwrap();
        assert_eq!(signal.event, PlayerEvent::Ready);
        assert!(manager.handle_signal(signal).is_none());
        assert_eq!(manager.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_headless_player_rejects_empty_uri() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut manager = PlaybackSessionManager::new(HeadlessPlayerFactory, tx);
        let mut bad = channel("x");
        bad.stream_uri = " ".to_string();

        let err = manager.select_channel(&bad).unwrap_err();
        assert!(matches!(err, AppError::Playback(_)));
        assert_eq!(manager.state(), PlaybackState::Idle);
    }
}
