// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Data models for the engine.

pub mod notice;
pub mod playback;
pub mod settings;
pub mod usage;
pub mod user;

pub use notice::{BlockReason, Notice};
pub use playback::{Channel, PlaybackOutcome, PlaybackSession, PlaybackState, StopReason};
pub use settings::{QuotaSettings, SettingsDocument};
pub use usage::{UsageDisplay, UsageSnapshot};
pub use user::{UserRecord, DEFAULT_USER_NAME};
