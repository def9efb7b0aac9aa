//! End-to-end tests of the key timeline, the published key set and token
//! issuance, with several instances sharing one store.

#![allow(clippy::expect_used, clippy::panic)]

use std::{collections::HashSet, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use keymint_issuer::{
    AuthenticatedClient, ClaimWhitelist, FireOutcome, IssuerError, JwkPublisher, RotationConfig,
    TokenRequest, TokenSigner,
    testutil::{SharedStore, TEST_ISSUER, forge_token},
    verify_with_key_set,
};
use keymint_storage::KeyVault;
use tokio::task::JoinSet;

/// Number of instances racing the first key.
const INSTANCES: usize = 8;

fn signer(store: &SharedStore) -> TokenSigner {
    TokenSigner::new(
        store.lifecycle(),
        ClaimWhitelist::new(["team", "env"]).expect("valid whitelist"),
        Duration::from_secs(1800),
    )
}

fn request() -> TokenRequest {
    TokenRequest::new(TEST_ISSUER, AuthenticatedClient::new("svc-a", ["ALL"]))
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

/// Instances that all find the vault empty agree on one key and leave
/// exactly one record behind.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_callers_bootstrap_one_key() {
    let store = SharedStore::new();

    let mut set = JoinSet::new();
    for _ in 0..INSTANCES {
        let lifecycle = store.lifecycle();
        set.spawn(async move { lifecycle.current_signing_key().await.map(|k| k.kid().to_owned()) });
    }

    let mut kids = HashSet::new();
    while let Some(result) = set.join_next().await {
        kids.insert(result.expect("task should not panic").expect("bootstrap should succeed"));
    }

    assert_eq!(kids.len(), 1, "every caller must see the same key: {kids:?}");
    assert_eq!(store.vault().count().await.expect("count"), 1);
}

/// Concurrent callers within one manager share the bootstrap as well.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_in_one_process_bootstrap_one_key() {
    let store = SharedStore::new();
    let lifecycle = store.lifecycle();

    let mut set = JoinSet::new();
    for _ in 0..INSTANCES {
        let lifecycle = Arc::clone(&lifecycle);
        set.spawn(async move { lifecycle.current_signing_key().await.map(|k| k.kid().to_owned()) });
    }
    while let Some(result) = set.join_next().await {
        result.expect("task should not panic").expect("bootstrap should succeed");
    }

    assert_eq!(store.vault().count().await.expect("count"), 1);
}

/// First requests racing the scheduler's first fire on an empty store. The
/// bootstrap guard admits at most one bootstrap record, the fire adds exactly
/// one rotation on top, and every caller ends up with a key the vault holds.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn first_callers_race_the_first_scheduled_rotation() {
    let store = SharedStore::new();
    let config = RotationConfig::builder().initial_delay_ms(0).interval_ms(86_400_000).build();
    let schedulers =
        [store.scheduler("node-a", config.clone()), store.scheduler("node-b", config)];
    let registered_at = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).expect("valid timestamp");
    for scheduler in &schedulers {
        scheduler.register(registered_at).await.expect("register");
    }

    let mut callers = JoinSet::new();
    for _ in 0..INSTANCES {
        let lifecycle = store.lifecycle();
        callers.spawn(async move {
            lifecycle.current_signing_key().await.map(|k| k.kid().to_owned())
        });
    }
    let mut fires = JoinSet::new();
    for scheduler in &schedulers {
        let scheduler = Arc::clone(scheduler);
        fires.spawn(async move { scheduler.evaluate(registered_at).await });
    }

    let mut kids = HashSet::new();
    while let Some(result) = callers.join_next().await {
        kids.insert(result.expect("task should not panic").expect("first request should succeed"));
    }
    let mut rotated = 0;
    while let Some(result) = fires.join_next().await {
        match result.expect("task should not panic").expect("evaluate") {
            FireOutcome::Fired { .. } => rotated += 1,
            FireOutcome::LostRace => {},
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!(rotated, 1, "exactly one instance claims the first fire");

    let count = store.vault().count().await.expect("count");
    assert!((1..=2).contains(&count), "one rotation plus at most one bootstrap, got {count}");

    let stored: HashSet<_> = store
        .vault()
        .recent_n(10)
        .await
        .expect("read timeline")
        .into_iter()
        .map(|record| record.id)
        .collect();
    assert!(kids.is_subset(&stored), "callers saw keys {kids:?}, vault holds {stored:?}");
}

// ---------------------------------------------------------------------------
// Rotation and the verification window
// ---------------------------------------------------------------------------

#[tokio::test]
async fn current_key_moves_forward_with_every_rotation() {
    let store = SharedStore::new();
    let lifecycle = store.lifecycle();
    let mut previous = lifecycle.current_signing_key().await.expect("bootstrap");

    for _ in 0..3 {
        let rotated = lifecycle.rotate().await.expect("rotate");
        let current = lifecycle.current_signing_key().await.expect("current");
        assert_eq!(current.kid(), rotated.kid);
        assert!(current.created_at() > previous.created_at());
        previous = current;
    }
}

/// A rotation committed by one instance is visible to another on its next
/// call, with no cache in between.
#[tokio::test]
async fn rotation_by_another_instance_is_seen_immediately() {
    let store = SharedStore::new();
    let serving = store.lifecycle();
    let rotating = store.lifecycle();
    let publisher = JwkPublisher::new(Arc::clone(&serving), 5);

    let before = serving.current_signing_key().await.expect("bootstrap");
    let rotated = rotating.rotate().await.expect("rotate");

    assert_eq!(serving.current_signing_key().await.expect("current").kid(), rotated.kid);
    let set = publisher.key_set().await.expect("key set");
    assert_eq!(set.keys[0].kid, rotated.kid);
    assert_eq!(set.keys[1].kid, before.kid());
}

#[tokio::test]
async fn key_set_window_is_bounded_distinct_and_public() {
    let store = SharedStore::new();
    let lifecycle = store.lifecycle();
    for _ in 0..7 {
        lifecycle.rotate().await.expect("rotate");
    }

    let set = JwkPublisher::new(lifecycle, 5).key_set().await.expect("key set");
    assert_eq!(set.keys.len(), 5);
    let kids: HashSet<_> = set.keys.iter().map(|k| k.kid.as_str()).collect();
    assert_eq!(kids.len(), 5);

    let document = serde_json::to_value(&set).expect("serialize");
    for key in document["keys"].as_array().expect("keys array") {
        let fields: HashSet<_> = key.as_object().expect("object").keys().cloned().collect();
        let expected: HashSet<_> =
            ["kty", "use", "alg", "kid", "n", "e"].into_iter().map(str::to_owned).collect();
        assert_eq!(fields, expected, "only public members may be published");
    }
}

// ---------------------------------------------------------------------------
// Issuance and verification
// ---------------------------------------------------------------------------

#[tokio::test]
async fn whitelisted_claim_is_signed_into_the_token() {
    let store = SharedStore::new();
    let signer = signer(&store);

    let issued = signer.issue(&request().with_claim("team", "x")).await.expect("issue");
    let set = JwkPublisher::new(store.lifecycle(), 5).key_set().await.expect("key set");
    let claims = verify_with_key_set(&issued.access_token, &set, TEST_ISSUER).expect("verify");

    assert_eq!(claims.extensions.get("team"), Some(&serde_json::json!("x")));
    assert_eq!(claims.sub, "svc-a");
    assert_eq!(claims.scope, "ALL");
    assert_eq!(claims.exp - claims.iat, 1800);
}

#[tokio::test]
async fn unlisted_claim_rejects_the_request() {
    let store = SharedStore::new();
    let signer = signer(&store);

    let err = signer
        .issue(&request().with_claim("team", "x").with_claim("role", "admin"))
        .await
        .expect_err("role is not whitelisted");

    assert_eq!(err.to_string(), "Claim role not white listed.");
}

#[tokio::test]
async fn token_verifies_only_against_its_own_kid() {
    let store = SharedStore::new();
    let signer = signer(&store);
    let lifecycle = store.lifecycle();

    let issued = signer.issue(&request()).await.expect("issue");
    lifecycle.rotate().await.expect("rotate");

    let set = JwkPublisher::new(Arc::clone(&lifecycle), 5).key_set().await.expect("key set");
    assert_eq!(set.keys.len(), 2);
    verify_with_key_set(&issued.access_token, &set, TEST_ISSUER)
        .expect("old token still verifies inside the window");

    // Same kid, different key material.
    let forged = forge_token(&issued.kid);
    assert!(matches!(
        verify_with_key_set(&forged, &set, TEST_ISSUER),
        Err(IssuerError::InvalidToken(_))
    ));

    // The signing key is outside a window of one.
    let narrow = JwkPublisher::new(lifecycle, 1).key_set().await.expect("key set");
    assert!(narrow.find(&issued.kid).is_none());
    assert!(matches!(
        verify_with_key_set(&issued.access_token, &narrow, TEST_ISSUER),
        Err(IssuerError::InvalidToken(_))
    ));
}

#[tokio::test]
async fn wrong_issuer_fails_verification() {
    let store = SharedStore::new();
    let issued = signer(&store).issue(&request()).await.expect("issue");
    let set = JwkPublisher::new(store.lifecycle(), 5).key_set().await.expect("key set");

    assert!(verify_with_key_set(&issued.access_token, &set, "https://other.test").is_err());
}
