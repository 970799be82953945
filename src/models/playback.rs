// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Live channel and playback session models.

use serde::{Deserialize, Serialize};

/// A live channel as listed by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    /// HLS playlist URI
    pub stream_uri: String,
}

/// The single active playback session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSession {
    pub channel_id: String,
    pub stream_uri: String,
    /// Tags player signals; signals from an older generation are stale
    pub generation: u64,
}

/// Observable playback state.
///
/// `Stopped` and `Errored` are passed through on the way back to `Idle` and
/// are reported as a [`PlaybackOutcome`] rather than held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Starting,
    Playing,
    Stopped,
    Errored,
}

/// Why a playback session was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// User navigated away from the player
    Navigation,
    UserStop,
    /// Account blocked or signed out remotely
    AccessRevoked,
    /// Another channel was selected
    Replaced,
    /// Logout or client shutdown
    SessionEnded,
}

/// How a playback session ended. The player has been released in both cases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Stopped {
        session: PlaybackSession,
        reason: StopReason,
    },
    Errored {
        session: PlaybackSession,
        message: String,
    },
}

impl PlaybackOutcome {
    pub fn state(&self) -> PlaybackState {
        match self {
            PlaybackOutcome::Stopped { .. } => PlaybackState::Stopped,
            PlaybackOutcome::Errored { .. } => PlaybackState::Errored,
        }
    }

    pub fn session(&self) -> &PlaybackSession {
        match self {
            PlaybackOutcome::Stopped { session, .. } | PlaybackOutcome::Errored { session, .. } => {
                session
            }
        }
    }
}
