//! Concurrency tests for the key vault and trigger store.
//!
//! Every task works on a clone of one `MemoryBackend`, which behaves like
//! separate processes sharing a database.

#![allow(clippy::expect_used, clippy::panic)]

use std::collections::HashSet;

use chrono::Duration;
use keymint_storage::{
    KeyVault, StorageError, TriggerRecord, TriggerStore,
    testutil::{epoch, placeholder_record, shared_stores},
};
use tokio::task::JoinSet;

/// Number of concurrent tasks for most tests.
const CONCURRENCY: usize = 16;

/// Number of contended rounds for the exactly-one-winner tests.
const ROUNDS: usize = 25;

// ---------------------------------------------------------------------------
// Bootstrap guard
// ---------------------------------------------------------------------------

/// Many first callers race `insert_if_empty`; exactly one record survives and
/// exactly one caller is told it won.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bootstrap_has_exactly_one_winner() {
    for round in 0..ROUNDS {
        let (vault, _) = shared_stores();

        let mut set = JoinSet::new();
        for task_id in 0..CONCURRENCY {
            let vault = vault.clone();
            set.spawn(async move {
                let record = placeholder_record(&format!("r{round}-t{task_id}"), task_id as i64);
                vault.insert_if_empty(&record).await
            });
        }

        let mut winners = 0usize;
        while let Some(result) = set.join_next().await {
            if result.expect("task should not panic").expect("insert should not error") {
                winners += 1;
            }
        }

        assert_eq!(winners, 1, "round {round}: exactly one bootstrap should win");
        assert_eq!(vault.count().await.expect("count"), 1, "round {round}: one record stored");
    }
}

// ---------------------------------------------------------------------------
// Parallel rotations
// ---------------------------------------------------------------------------

/// Concurrent inserts with distinct ids all land and stay ordered.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_inserts_are_all_visible_in_order() {
    let (vault, _) = shared_stores();

    let mut set = JoinSet::new();
    for task_id in 0..CONCURRENCY {
        let vault = vault.clone();
        set.spawn(async move {
            vault.insert(&placeholder_record(&format!("k{task_id:02}"), task_id as i64)).await
        });
    }
    while let Some(result) = set.join_next().await {
        result.expect("task should not panic").expect("insert should succeed");
    }

    let records = vault.recent_n(CONCURRENCY).await.expect("recent_n");
    assert_eq!(records.len(), CONCURRENCY);

    let ids: HashSet<_> = records.iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids.len(), CONCURRENCY, "ids must be distinct");
    assert!(records.windows(2).all(|w| w[0].created_at > w[1].created_at));
    assert_eq!(records[0].id, format!("k{:02}", CONCURRENCY - 1));
}

// ---------------------------------------------------------------------------
// Trigger claims
// ---------------------------------------------------------------------------

/// Every instance reads the same due trigger and tries to claim it; exactly
/// one replacement succeeds per round and the rest conflict.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn trigger_claim_has_exactly_one_winner_per_round() {
    let (_, triggers) = shared_stores();
    let interval_ms = 60_000;
    triggers
        .create(&TriggerRecord::new("rotate", epoch(), interval_ms, None))
        .await
        .expect("create");

    for round in 0..ROUNDS {
        let current = triggers.load("rotate").await.expect("load").expect("trigger exists");
        let now = current.next_fire_at + Duration::milliseconds(5);

        let mut set = JoinSet::new();
        for task_id in 0..CONCURRENCY {
            let triggers = triggers.clone();
            let current = current.clone();
            set.spawn(async move {
                let next = current.fired(now, Duration::seconds(60), &format!("node-{task_id}"))?;
                triggers.replace(&current, &next).await
            });
        }

        let mut successes = 0usize;
        let mut conflicts = 0usize;
        while let Some(result) = set.join_next().await {
            match result.expect("task should not panic") {
                Ok(()) => successes += 1,
                Err(StorageError::Conflict) => conflicts += 1,
                Err(e) => panic!("unexpected error in round {round}: {e}"),
            }
        }

        assert_eq!(successes, 1, "round {round}: exactly one claim should succeed");
        assert_eq!(conflicts, CONCURRENCY - 1, "round {round}: all other claims conflict");
    }

    let final_state = triggers.load("rotate").await.expect("load").expect("trigger exists");
    assert_eq!(final_state.times_fired, ROUNDS as u64);
}
