// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Usage-Meter: time-quota metering and access control for a live TV client
//!
//! This crate tracks how long a signed-in user watches, commits that time to
//! the user's record in Firestore, and blocks the account once the
//! administrator's quota is used up. Blocks set on any device or by an
//! administrator end every active session for that account.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod services;
pub mod time_utils;

pub use engine::UsageEngine;
