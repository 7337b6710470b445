//! Shared helpers for the integration tests: mock server responders, client
//! construction and log capture.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use fetcher_core::client::ClientBuilder;
use fetcher_core::{FetchClient, RetryPolicy};
use tracing_subscriber::EnvFilter;
use wiremock::{MockServer, Request, Respond, ResponseTemplate};

/// Routes crate logs to the test writer. Set `RUST_LOG=fetcher_core=debug`
/// to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Retries with millisecond backoff so tests stay fast.
pub fn quick_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy::with_max_retries(max_retries)
        .delays(Duration::from_millis(5), Duration::from_millis(20))
        .max_jitter(Duration::ZERO)
}

/// A builder pointed at `server` with fast retries.
pub fn client_for(server: &MockServer) -> ClientBuilder {
    init_tracing();
    FetchClient::builder()
        .base_url(
            format!("{}/", server.uri())
                .parse()
                .expect("mock server uri should parse"),
        )
        .retry(quick_retry(2))
}

/// Answers with `statuses[n]` for the n-th request, repeating the last
/// status once the list is exhausted.
pub struct StatusSequence {
    statuses: Vec<u16>,
    body: &'static str,
    calls: Arc<AtomicUsize>,
}

impl StatusSequence {
    pub fn new(statuses: &[u16], body: &'static str) -> Self {
        Self {
            statuses: statuses.to_vec(),
            body,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl Respond for StatusSequence {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let status = self
            .statuses
            .get(call)
            .or_else(|| self.statuses.last())
            .copied()
            .unwrap_or(200);
        ResponseTemplate::new(status).set_body_string(self.body)
    }
}
