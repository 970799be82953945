// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use chrono::{TimeZone, Utc};
use serde_json::json;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use usage_meter::config::Config;
use usage_meter::db::{FirestoreDb, MemoryStore, UserStore};
use usage_meter::error::AppError;
use usage_meter::models::{Channel, Notice, PlaybackState, UserRecord};
use usage_meter::services::{AuthUser, LocalAuth, Player, PlayerEvents, PlayerFactory};
use usage_meter::time_utils::ManualClock;
use usage_meter::UsageEngine;

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Create a mock database connection (offline).
#[allow(dead_code)]
pub fn test_db_offline() -> FirestoreDb {
    FirestoreDb::new_mock()
}

/// Unique ID for test isolation against a shared emulator.
#[allow(dead_code)]
pub fn unique_user_id(prefix: &str) -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("{}-{}", prefix, nanos)
}

#[allow(dead_code)]
pub fn test_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 1, 20, 0, 0).unwrap(),
    ))
}

#[allow(dead_code)]
pub fn auth_user(uid: &str) -> AuthUser {
    AuthUser {
        uid: uid.to_string(),
        email: Some(format!("{}@example.com", uid)),
        display_name: Some("Test Viewer".to_string()),
    }
}

#[allow(dead_code)]
pub fn channel(id: &str) -> Channel {
    Channel {
        id: id.to_string(),
        name: format!("Channel {}", id),
        stream_uri: format!("https://cdn.example.com/live/{}/index.m3u8", id),
    }
}

/// Set the administrator quota in whole minutes.
#[allow(dead_code)]
pub fn set_quota_minutes(store: &MemoryStore, minutes: u32) {
    store.put_settings_json(json!({
        "autoBlockDuration": minutes,
        "contactNumber": "+1 (650) 555-0100",
    }));
}

/// Insert a user record directly.
#[allow(dead_code)]
pub async fn seed_user(store: &MemoryStore, uid: &str, usage_seconds: f64, blocked: bool) {
    let mut record = UserRecord::new(format!("{}@example.com", uid), "Test Viewer", Utc::now());
    record.usage_duration = usage_seconds;
    record.blocked = blocked;
    store.create_user(uid, &record).await.unwrap();
}

#[allow(dead_code)]
pub async fn usage_of(store: &MemoryStore, uid: &str) -> f64 {
    store.get_user(uid).await.unwrap().unwrap().usage_duration
}

// ─── Player double ──────────────────────────────────────────────────────────

/// A call made on a recorded player, tagged with its generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerCall {
    Attach(u64, String),
    Play(u64),
    Pause(u64),
    Dispose(u64),
}

#[derive(Default)]
struct Recorder {
    calls: Vec<PlayerCall>,
    events: Vec<PlayerEvents>,
    auto_ready: bool,
    fail_attach: bool,
    fail_play: bool,
}

/// Records every player call and hands out the players' event senders.
#[derive(Clone, Default)]
pub struct RecordingPlayerFactory {
    recorder: Arc<Mutex<Recorder>>,
}

#[allow(dead_code)]
impl RecordingPlayerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Players report ready as soon as they attach.
    pub fn auto_ready() -> Self {
        let factory = Self::default();
        factory.recorder.lock().unwrap().auto_ready = true;
        factory
    }

    pub fn set_fail_attach(&self, fail: bool) {
        self.recorder.lock().unwrap().fail_attach = fail;
    }

    pub fn set_fail_play(&self, fail: bool) {
        self.recorder.lock().unwrap().fail_play = fail;
    }

    pub fn calls(&self) -> Vec<PlayerCall> {
        self.recorder.lock().unwrap().calls.clone()
    }

    /// Event sender of the player created for `generation`.
    pub fn events(&self, generation: u64) -> PlayerEvents {
        self.recorder
            .lock()
            .unwrap()
            .events
            .iter()
            .find(|e| e.generation() == generation)
            .cloned()
            .expect("no player for generation")
    }

    pub fn players_created(&self) -> usize {
        self.recorder.lock().unwrap().events.len()
    }
}

pub struct RecordingPlayer {
    generation: u64,
    events: PlayerEvents,
    recorder: Arc<Mutex<Recorder>>,
}

impl RecordingPlayer {
    fn record(&self, call: PlayerCall) {
        self.recorder.lock().unwrap().calls.push(call);
    }
}

impl Player for RecordingPlayer {
    fn attach(&mut self, stream_uri: &str) -> Result<(), AppError> {
        self.record(PlayerCall::Attach(self.generation, stream_uri.to_string()));
        let (fail, auto_ready) = {
            let r = self.recorder.lock().unwrap();
            (r.fail_attach, r.auto_ready)
        };
        if fail {
            return Err(AppError::Playback("unsupported stream".to_string()));
        }
        if auto_ready {
            self.events.ready();
        }
        Ok(())
    }

    fn play(&mut self) -> Result<(), AppError> {
        self.record(PlayerCall::Play(self.generation));
        if self.recorder.lock().unwrap().fail_play {
            return Err(AppError::Playback("autoplay rejected".to_string()));
        }
        Ok(())
    }

    fn pause(&mut self) {
        self.record(PlayerCall::Pause(self.generation));
    }

    fn dispose(&mut self) {
        self.record(PlayerCall::Dispose(self.generation));
    }
}

impl PlayerFactory for RecordingPlayerFactory {
    type Player = RecordingPlayer;

    fn create(&self, events: PlayerEvents) -> RecordingPlayer {
        self.recorder.lock().unwrap().events.push(events.clone());
        RecordingPlayer {
            generation: events.generation(),
            events,
            recorder: Arc::clone(&self.recorder),
        }
    }
}

// ─── Engine harness ─────────────────────────────────────────────────────────

pub type TestEngine = UsageEngine<MemoryStore, LocalAuth, RecordingPlayerFactory, ManualClock>;

/// One client device signed into a shared store.
#[allow(dead_code)]
pub struct Device {
    pub engine: TestEngine,
    pub auth: Arc<LocalAuth>,
    pub clock: Arc<ManualClock>,
    pub players: RecordingPlayerFactory,
    pub notices: broadcast::Receiver<Notice>,
}

#[allow(dead_code)]
impl Device {
    pub fn new(store: &MemoryStore) -> Self {
        Self::with_config(store, Config::default())
    }

    pub fn with_config(store: &MemoryStore, config: Config) -> Self {
        let auth = Arc::new(LocalAuth::new());
        let clock = test_clock();
        let players = RecordingPlayerFactory::auto_ready();
        let engine = UsageEngine::new(
            config,
            Arc::new(store.clone()),
            Arc::clone(&auth),
            players.clone(),
            Arc::clone(&clock),
        );
        let notices = engine.subscribe_notices();
        Self {
            engine,
            auth,
            clock,
            players,
            notices,
        }
    }

    /// Advance the device clock and commit a checkpoint.
    pub async fn watch_for(&self, seconds: f64) {
        self.clock.advance_secs(seconds);
        self.engine.checkpoint().await;
    }

    /// Wait for the first notice matching `pred`, skipping others.
    pub async fn expect_notice<F>(&mut self, pred: F) -> Notice
    where
        F: Fn(&Notice) -> bool,
    {
        let notices = &mut self.notices;
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match notices.recv().await {
                    Ok(notice) if pred(&notice) => return notice,
                    Ok(_) => continue,
                    Err(e) => panic!("notice channel failed: {}", e),
                }
            }
        })
        .await
        .expect("timed out waiting for notice")
    }

    pub async fn wait_for_session(&self, active: bool) {
        let engine = &self.engine;
        wait_until(|| async move { engine.active_user().await.is_some() == active }).await;
    }

    pub async fn wait_for_playback(&self, state: PlaybackState) {
        let engine = &self.engine;
        wait_until(|| async move { engine.playback_state().await == state }).await;
    }

    pub async fn wait_for_quota(&self, quota_seconds: f64) {
        let engine = &self.engine;
        wait_until(|| async move { engine.settings().quota_seconds() == quota_seconds }).await;
    }

    /// Notices already published, without waiting.
    pub fn drain_notices(&mut self) -> Vec<Notice> {
        let mut out = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            out.push(notice);
        }
        out
    }
}

/// Poll `cond`, yielding to spawned tasks between attempts.
#[allow(dead_code)]
pub async fn wait_until<F, Fut>(mut cond: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..1000 {
        if cond().await {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not met");
}

/// Let spawned tasks run without advancing time.
#[allow(dead_code)]
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
