//! Retry policy, failure classification and backoff computation.

use std::collections::BTreeSet;
use std::time::Duration;

use rand::Rng;
use reqwest::Method;
use tracing::{debug, instrument};

use crate::error::FetchError;

/// Default number of retries after the initial attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff (1 second).
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap (32 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Default upper bound for random jitter added to each delay (500ms).
const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(500);

/// Statuses retried by default.
pub const DEFAULT_RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: timeouts, connection resets, 503.
    Transient,

    /// Failure that won't succeed regardless of retries.
    ///
    /// Examples: TLS certificate errors, invalid URLs, cancellation.
    Permanent,

    /// Authentication or authorization required (401, 403).
    NeedsAuth,

    /// Server rate limiting (HTTP 429). Retried, honouring `Retry-After`.
    RateLimited,
}

impl FailureType {
    /// Returns true for the classes that may be retried.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited)
    }
}

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// # Default Values
///
/// - `max_retries`: 3 (so up to 4 attempts in total)
/// - `idempotent_methods_only`: true
/// - `retryable_status_codes`: 408, 429, 500, 502, 503, 504
/// - `base_delay`: 1 second
/// - `max_delay`: 32 seconds
/// - `backoff_multiplier`: 2.0
/// - `max_jitter`: 500ms
///
/// # Delay Calculation
///
/// ```text
/// delay = clamp(base_delay * multiplier^(retry - 1) + jitter, base_delay, max_delay)
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    idempotent_methods_only: bool,
    retryable_status_codes: BTreeSet<u16>,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f32,
    max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            idempotent_methods_only: true,
            retryable_status_codes: DEFAULT_RETRYABLE_STATUS_CODES.into_iter().collect(),
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with `max_retries`, using defaults for other settings.
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self::with_max_retries(0)
    }

    /// Sets the backoff delays.
    #[must_use]
    pub fn delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay.max(base_delay);
        self
    }

    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f32) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    #[must_use]
    pub fn max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Allows retrying non-idempotent methods (e.g. POST carrying an
    /// idempotency key).
    #[must_use]
    pub fn idempotent_methods_only(mut self, only: bool) -> Self {
        self.idempotent_methods_only = only;
        self
    }

    #[must_use]
    pub fn retryable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }

    /// Returns the maximum number of retries after the first attempt.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Returns true when `method` may be retried under this policy.
    #[must_use]
    pub fn allows_method(&self, method: &Method) -> bool {
        !self.idempotent_methods_only || is_idempotent(method)
    }

    /// Classifies a response status, or `None` when the status is not one
    /// this policy retries.
    #[must_use]
    pub fn classify_status(&self, status: u16) -> Option<FailureType> {
        if !self.retryable_status_codes.contains(&status) {
            return None;
        }
        Some(if status == 429 {
            FailureType::RateLimited
        } else {
            FailureType::Transient
        })
    }

    /// Determines whether to retry after `attempt` (1-indexed) failed.
    #[instrument(skip(self), fields(max_retries = self.max_retries))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        match failure_type {
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure - retry would not help".to_string(),
                };
            }
            FailureType::NeedsAuth => {
                return RetryDecision::DoNotRetry {
                    reason: "authentication required - retry without auth would not help"
                        .to_string(),
                };
            }
            FailureType::Transient | FailureType::RateLimited => {}
        }

        if attempt > self.max_retries {
            debug!(attempt, max = self.max_retries, "max retries reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max retries ({}) exhausted", self.max_retries),
            };
        }

        let delay = self.calculate_delay(attempt);

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Delay before retry number `retry` (1-indexed).
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub(crate) fn calculate_delay(&self, retry: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exponent = f64::from(retry.saturating_sub(1));
        let delay_ms = base_ms * f64::from(self.backoff_multiplier).powf(exponent);
        let jittered_ms = delay_ms + self.calculate_jitter().as_millis() as f64;

        let floor_ms = base_ms;
        let cap_ms = self.max_delay.as_millis() as f64;
        Duration::from_millis(jittered_ms.clamp(floor_ms, cap_ms) as u64)
    }

    /// Random jitter between 0 and `max_jitter`.
    #[allow(clippy::cast_possible_truncation)]
    fn calculate_jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

/// GET, HEAD, PUT, DELETE and OPTIONS.
#[must_use]
pub fn is_idempotent(method: &Method) -> bool {
    [
        Method::GET,
        Method::HEAD,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ]
    .contains(method)
}

/// Classifies an error into a failure type for retry decisions.
///
/// | Error | Type | Rationale |
/// |-------|------|-----------|
/// | Timeout | Transient | Network may recover |
/// | Network (most) | Transient | Server may come back |
/// | Network (TLS) | Permanent | Certificate/config issue |
/// | Network (refused redirect) | Permanent | Same answer next time |
/// | Http 401/403 | NeedsAuth | Credentials required |
/// | Http 429 | RateLimited | Retry with backoff |
/// | Http 408/5xx | Transient | Server-side, may be temporary |
/// | Cancelled | Permanent | The caller asked to stop |
/// | Decode, AlreadyConsumed, Middleware, InvalidUrl | Permanent | Won't change on retry |
#[must_use]
pub fn classify_error(error: &FetchError) -> FailureType {
    match error {
        FetchError::Timeout { .. } => FailureType::Transient,

        FetchError::Network { message, .. } => {
            if is_tls_error(message) || is_refused_redirect(message) {
                FailureType::Permanent
            } else {
                FailureType::Transient
            }
        }

        FetchError::Http { status, .. } => classify_http_status(*status),

        FetchError::Cancelled { .. }
        | FetchError::Decode { .. }
        | FetchError::RetryExhausted { .. }
        | FetchError::AlreadyConsumed
        | FetchError::Middleware { .. }
        | FetchError::InvalidUrl { .. } => FailureType::Permanent,
    }
}

/// Explicit match arms are used for each status code for documentation purposes.
#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureType {
    match status {
        401 => FailureType::NeedsAuth,   // Unauthorized
        403 => FailureType::NeedsAuth,   // Forbidden
        408 => FailureType::Transient,   // Request Timeout
        429 => FailureType::RateLimited, // Too Many Requests
        status if (400..500).contains(&status) => FailureType::Permanent,
        status if (500..600).contains(&status) => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}

/// TLS failures surface as network errors; their message is the only signal.
fn is_tls_error(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("certificate")
        || message.contains("tls")
        || message.contains("ssl")
        || message.contains("handshake")
}

/// Raised by the transport under `RedirectPolicy::Error`.
fn is_refused_redirect(message: &str) -> bool {
    message.contains("while redirects are disabled")
}
