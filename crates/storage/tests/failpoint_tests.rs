#![allow(clippy::expect_used, clippy::panic)]
//! Integration tests for fail-point injection.
//!
//! These tests require the `failpoints` feature:
//! ```bash
//! cargo test -p keymint-storage --features failpoints --test failpoint_tests
//! ```

use keymint_storage::{
    KeyVault, MemoryBackend, StorageBackend, StorageError,
    testutil::{placeholder_record, shared_stores},
};

#[tokio::test]
async fn unreachable_store_fails_insert_without_partial_record() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("memory-before-commit", "return").expect("failed to configure fail point");

    let (vault, _) = shared_stores();
    let err = vault.insert(&placeholder_record("lost", 0)).await.expect_err("insert should fail");
    assert!(matches!(err, StorageError::Connection { .. }), "got {err:?}");

    fail::remove("memory-before-commit");
    assert_eq!(vault.count().await.expect("count"), 0, "no record may be left behind");
    assert!(vault.backend().is_empty(), "no index or head entry may be left behind");

    scenario.teardown();
}

#[tokio::test]
async fn unreachable_store_fails_bootstrap() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("memory-before-commit", "return").expect("failed to configure fail point");

    let (vault, _) = shared_stores();
    let result = vault.insert_if_empty(&placeholder_record("first", 0)).await;
    assert!(matches!(result, Err(StorageError::Connection { .. })), "got {result:?}");

    fail::remove("memory-before-commit");
    assert!(vault.insert_if_empty(&placeholder_record("first", 0)).await.expect("retry succeeds"));

    scenario.teardown();
}

#[tokio::test]
async fn health_check_failpoint_returns_error() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("memory-health-check", "return").expect("failed to configure fail point");

    let backend = MemoryBackend::new();
    assert!(backend.health_check().await.is_err(), "health check should fail");

    scenario.teardown();
}

#[tokio::test]
async fn health_check_without_failpoint_succeeds() {
    let scenario = fail::FailScenario::setup();

    let backend = MemoryBackend::new();
    assert!(backend.health_check().await.is_ok(), "health check should succeed");

    scenario.teardown();
}
