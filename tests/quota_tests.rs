// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use std::sync::Arc;
use usage_meter::db::{MemoryStore, UserStore};
use usage_meter::error::AppError;
use usage_meter::services::{QuotaDecision, QuotaEnforcer};

mod common;
use common::seed_user;

#[tokio::test]
async fn test_within_quota_reports_remaining() {
    let store = MemoryStore::new();
    seed_user(&store, "u1", 20.0, false).await;
    let enforcer = QuotaEnforcer::new(Arc::new(store.clone()));

    let decision = enforcer.evaluate("u1", 60.0).await.unwrap();
    assert_eq!(
        decision,
        QuotaDecision::Within {
            remaining_seconds: 40.0
        }
    );
    assert!(!store.get_user("u1").await.unwrap().unwrap().blocked);
}

#[tokio::test]
async fn test_reaching_quota_latches_block() {
    let store = MemoryStore::new();
    seed_user(&store, "u1", 60.0, false).await;
    let enforcer = QuotaEnforcer::new(Arc::new(store.clone()));

    assert_eq!(
        enforcer.evaluate("u1", 60.0).await.unwrap(),
        QuotaDecision::Blocked
    );
    assert!(store.get_user("u1").await.unwrap().unwrap().blocked);

    // A raised quota does not lift the block; only an administrator can.
    assert_eq!(
        enforcer.evaluate("u1", 3600.0).await.unwrap(),
        QuotaDecision::AlreadyBlocked
    );
    assert!(store.get_user("u1").await.unwrap().unwrap().blocked);
}

#[tokio::test]
async fn test_already_blocked_does_not_write() {
    let store = MemoryStore::new();
    seed_user(&store, "u1", 0.0, true).await;
    store.set_write_failures(true);
    let enforcer = QuotaEnforcer::new(Arc::new(store.clone()));

    assert_eq!(
        enforcer.evaluate("u1", 60.0).await.unwrap(),
        QuotaDecision::AlreadyBlocked
    );
}

#[tokio::test]
async fn test_missing_user_is_not_found() {
    let enforcer = QuotaEnforcer::new(Arc::new(MemoryStore::new()));

    let err = enforcer.evaluate("ghost", 60.0).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_failed_block_write_is_reported() {
    let store = MemoryStore::new();
    seed_user(&store, "u1", 90.0, false).await;
    store.set_write_failures(true);
    let enforcer = QuotaEnforcer::new(Arc::new(store.clone()));

    let err = enforcer.evaluate("u1", 60.0).await.unwrap_err();
    assert!(err.is_transient());
}
