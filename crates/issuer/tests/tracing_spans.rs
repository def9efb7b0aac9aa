//! Verifies that lifecycle and issuance operations emit the expected spans.

#![allow(clippy::expect_used)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use keymint_issuer::{
    AuthenticatedClient, ClaimWhitelist, TokenRequest, TokenSigner,
    testutil::{SharedStore, TEST_ISSUER},
};
use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

// ---------------------------------------------------------------------------
// Collecting layer — records span names as they are created
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct SpanCollector {
    spans: Arc<Mutex<Vec<String>>>,
}

impl<S> tracing_subscriber::Layer<S> for SpanCollector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        _attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if let Some(span) = ctx.span(id) {
            self.spans.lock().expect("lock poisoned").push(span.name().to_owned());
        }
    }
}

fn collect() -> (SpanCollector, Arc<Mutex<Vec<String>>>) {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);
    (collector, spans)
}

fn assert_spans(recorded: &[String], expected: &[&str]) {
    for name in expected {
        assert!(recorded.iter().any(|s| s == name), "expected a '{name}' span, got: {recorded:?}");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn issue_creates_nested_spans() {
    let (collector, spans) = collect();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(collector));

    let store = SharedStore::new();
    let signer = TokenSigner::new(
        store.lifecycle(),
        ClaimWhitelist::default(),
        Duration::from_secs(60),
    );
    signer
        .issue(&TokenRequest::new(TEST_ISSUER, AuthenticatedClient::new("svc", ["ALL"])))
        .await
        .expect("issue should succeed");

    let recorded = spans.lock().expect("lock poisoned");
    assert_spans(&recorded, &["issue", "current_signing_key", "insert_if_empty", "recent_n"]);
}

#[tokio::test]
async fn rotate_creates_span() {
    let (collector, spans) = collect();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(collector));

    let store = SharedStore::new();
    store.lifecycle().rotate().await.expect("rotate should succeed");

    let recorded = spans.lock().expect("lock poisoned");
    assert_spans(&recorded, &["rotate", "insert", "commit"]);
}

#[tokio::test]
async fn verification_key_set_creates_span() {
    let (collector, spans) = collect();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(collector));

    let store = SharedStore::new();
    store.lifecycle().verification_key_set(5).await.expect("read window");

    let recorded = spans.lock().expect("lock poisoned");
    assert_spans(&recorded, &["verification_key_set", "recent_n"]);
}
