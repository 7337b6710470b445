use std::time::Duration;

use crate::abort::AbortSignal;
use crate::body::Body;
use crate::message::{Headers, RedirectPolicy, RequestCache};
use crate::retry::RetryPolicy;

/// Per-call settings. Every field defaults to "use the client's setting".
///
/// Middlewares receive the options by reference; the client has already
/// moved `headers` and `body` onto the request by then, so those two read as
/// empty inside the chain.
#[derive(Debug, Default)]
pub struct RequestOptions {
    /// Merged over the client's default headers.
    pub headers: Headers,
    pub body: Option<Body>,
    /// Cancels the whole call, retries and backoff included.
    pub signal: Option<AbortSignal>,
    /// Per-attempt timeout override.
    pub timeout: Option<Duration>,
    pub throw_on_http_error: Option<bool>,
    /// Skip the cache middleware for this call.
    pub bypass_cache: bool,
    /// Replaces the client's retry policy for this call, e.g. to allow
    /// retrying a `POST` that carries an idempotency key.
    pub retry: Option<RetryPolicy>,
    pub redirect: Option<RedirectPolicy>,
    pub cache: Option<RequestCache>,
}

impl RequestOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes `value` as the body and sets `Content-Type: application/json`.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if `value` cannot be encoded.
    pub fn json<T: serde::Serialize + ?Sized>(self, value: &T) -> Result<Self, serde_json::Error> {
        let encoded = serde_json::to_vec(value)?;
        Ok(self.header("Content-Type", "application/json").body(encoded))
    }

    #[must_use]
    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn throw_on_http_error(mut self, throw: bool) -> Self {
        self.throw_on_http_error = Some(throw);
        self
    }

    #[must_use]
    pub fn bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }

    #[must_use]
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    #[must_use]
    pub fn redirect(mut self, redirect: RedirectPolicy) -> Self {
        self.redirect = Some(redirect);
        self
    }

    #[must_use]
    pub fn cache(mut self, cache: RequestCache) -> Self {
        self.cache = Some(cache);
        self
    }
}
