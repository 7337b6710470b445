//! Retry orchestration with exponential backoff.
//!
//! [`execute`] wraps one pipeline invocation in a loop. After each attempt
//! the outcome is classified:
//! - a response whose status is not in the policy's retryable set is final
//! - an error classified [`FailureType::Permanent`] or [`FailureType::NeedsAuth`] is final
//! - anything else is retried, if the method passes the idempotency gate
//!
//! Once retries run out the last failure is wrapped in
//! [`FetchError::RetryExhausted`]. The abort signal is checked before each
//! attempt and observed during every backoff wait.
//!
//! # Example
//!
//! ```
//! use fetcher_core::retry::{FailureType, RetryDecision, RetryPolicy, classify_error};
//! use fetcher_core::FetchError;
//!
//! let policy = RetryPolicy::default();
//! let error = FetchError::network("https://example.com/feed", "connection reset");
//!
//! match policy.should_retry(classify_error(&error), 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {}", reason);
//!     }
//! }
//! ```

mod policy;
mod retry_after;

pub use policy::{
    DEFAULT_MAX_RETRIES, DEFAULT_RETRYABLE_STATUS_CODES, FailureType, RetryDecision, RetryPolicy,
    classify_error, is_idempotent,
};
pub use retry_after::parse_retry_after;

use std::future::Future;

use tracing::{debug, info, instrument};

use crate::abort::{self, AbortSignal};
use crate::error::{FetchError, RetryFailure};
use crate::message::{Request, Response};

/// Runs `attempt` until it succeeds, fails permanently, or retries run out.
///
/// Each attempt receives its own copy of `request` (see
/// [`Request::try_clone`]), so streamed bodies are replayed rather than
/// consumed once.
///
/// # Errors
///
/// - [`FetchError::Cancelled`] (or the signal's timeout) when `signal` fires
///   before an attempt, during a failed attempt or during a backoff wait
/// - [`FetchError::RetryExhausted`] when every allowed attempt failed
/// - the attempt's own error when it is not retryable
#[instrument(skip_all, fields(method = %request.method(), url = %request.url()))]
pub async fn execute<F, Fut>(
    policy: &RetryPolicy,
    mut request: Request,
    signal: &AbortSignal,
    mut attempt_fn: F,
) -> Result<Response, FetchError>
where
    F: FnMut(Request) -> Fut,
    Fut: Future<Output = Result<Response, FetchError>>,
{
    let retry_method_allowed = policy.allows_method(request.method());
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        signal.throw_if_aborted()?;
        debug!(attempt, "sending attempt");

        let outgoing = request.try_clone()?;
        let result = attempt_fn(outgoing).await;

        let failure_type = match &result {
            Ok(response) => match policy.classify_status(response.status()) {
                Some(failure_type) => failure_type,
                None => return result,
            },
            // The caller's own signal ends the loop, whatever its reason.
            Err(_) if signal.is_aborted() => return Err(signal.abort_error()),
            Err(error) => classify_error(error),
        };

        if !failure_type.is_retryable() || !retry_method_allowed {
            debug!(attempt, ?failure_type, retry_method_allowed, "failure is final");
            return result;
        }

        let retry_after = result.as_ref().ok().and_then(|response| {
            response
                .headers()
                .get("retry-after")
                .as_deref()
                .and_then(parse_retry_after)
        });

        match policy.should_retry(failure_type, attempt) {
            RetryDecision::Retry {
                delay: backoff_delay,
                attempt: next_attempt,
            } => {
                let delay = retry_after.map_or(backoff_delay, |wait| wait.min(policy.max_delay()));
                info!(
                    attempt = next_attempt,
                    max_retries = policy.max_retries(),
                    delay_ms = delay.as_millis(),
                    using_retry_after = retry_after.is_some(),
                    outcome = %describe(&result),
                    "retrying request"
                );
                drop(result);
                abort::race(signal, async {
                    tokio::time::sleep(delay).await;
                    Ok(())
                })
                .await?;
            }
            RetryDecision::DoNotRetry { reason } => {
                debug!(%reason, attempts = attempt, "not retrying request");
                let last = match result {
                    Ok(response) => RetryFailure::Response(Box::new(response)),
                    Err(error) => RetryFailure::Error(Box::new(error)),
                };
                return Err(FetchError::RetryExhausted {
                    attempts: attempt,
                    last,
                });
            }
        }
    }
}

fn describe(result: &Result<Response, FetchError>) -> String {
    match result {
        Ok(response) => format!("HTTP {}", response.status()),
        Err(error) => error.to_string(),
    }
}
