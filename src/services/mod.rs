// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - session, quota and playback logic.

pub mod auth;
pub mod block_listener;
pub mod playback;
pub mod quota;
pub mod session;
pub mod settings_cache;

pub use auth::{AuthProvider, AuthUser, LocalAuth};
pub use block_listener::{BlockPropagationListener, FailurePolicy, ListenerAction};
pub use playback::{
    HeadlessPlayerFactory, PlaybackSessionManager, Player, PlayerEvent, PlayerEvents,
    PlayerFactory, PlayerSignal,
};
pub use quota::{QuotaDecision, QuotaEnforcer};
pub use session::{Checkpoint, SessionTracker};
pub use settings_cache::SettingsCache;
