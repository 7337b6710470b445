//! Error types for the fetch engine.
//!
//! Every failure that can leave the client facade is a [`FetchError`]. Variants
//! carry the context needed for logging and retry classification, so callers
//! never have to parse messages.

use std::fmt;

use thiserror::Error;

use crate::body::BodyError;
use crate::message::Response;

/// Boxed error used for causes whose concrete type is owned by a collaborator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Which phase of a request ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutPhase {
    /// Establishing the connection.
    Connect,
    /// Waiting for or reading the response.
    Request,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => f.write_str("connect"),
            Self::Request => f.write_str("request"),
        }
    }
}

/// The last failure observed before retries ran out.
#[derive(Debug)]
pub enum RetryFailure {
    /// The final attempt failed with an error.
    Error(Box<FetchError>),
    /// The final attempt produced a retryable response (e.g. 503).
    Response(Box<Response>),
}

impl fmt::Display for RetryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(error) => write!(f, "{error}"),
            Self::Response(response) => write!(f, "HTTP {}", response.status()),
        }
    }
}

/// Errors that can occur while executing a request.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport-level failure (DNS, connection refused, TLS, broken stream).
    #[error("network error requesting {url}: {message}")]
    Network {
        /// The URL being requested.
        url: String,
        /// Human-readable description of the failure.
        message: String,
        /// The underlying transport error, when one exists.
        #[source]
        source: Option<BoxError>,
    },

    /// The request did not finish in time.
    #[error("{phase} timeout")]
    Timeout {
        /// Which phase timed out.
        phase: TimeoutPhase,
    },

    /// The request was cancelled through its abort signal.
    #[error("request cancelled: {reason}")]
    Cancelled {
        /// The reason passed to `AbortSignal::abort`.
        reason: String,
    },

    /// Non-2xx response while `throw_on_http_error` is enabled.
    #[error("HTTP {status} from {url}")]
    Http {
        /// The HTTP status code.
        status: u16,
        /// The URL that produced the response.
        url: String,
        /// The full response, body still unread.
        response: Box<Response>,
    },

    /// JSON parsing or the caller-supplied mapping failed.
    #[error("failed to decode response body: {cause}")]
    Decode {
        /// The parse or mapping error.
        #[source]
        cause: BoxError,
    },

    /// Every allowed attempt failed.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        /// Total attempts made, including the first one.
        attempts: u32,
        /// The final failure.
        last: RetryFailure,
    },

    /// A body stream was iterated a second time.
    #[error("body already consumed")]
    AlreadyConsumed,

    /// A middleware failed internally.
    #[error("middleware `{middleware}` failed: {cause}")]
    Middleware {
        /// Name reported by the failing middleware.
        middleware: String,
        /// The middleware's own error.
        #[source]
        cause: BoxError,
    },

    /// The request URL could not be parsed or resolved.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The offending URL string.
        url: String,
    },
}

impl FetchError {
    /// Creates a network error without an underlying source.
    pub fn network(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            url: url.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a network error wrapping a transport error.
    pub fn network_with_source(
        url: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        let source = source.into();
        Self::Network {
            url: url.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(phase: TimeoutPhase) -> Self {
        Self::Timeout { phase }
    }

    /// Creates a cancellation error.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Creates an HTTP status error that keeps the response.
    #[must_use]
    pub fn http(response: Response) -> Self {
        Self::Http {
            status: response.status(),
            url: response
                .url()
                .map(ToString::to_string)
                .unwrap_or_default(),
            response: Box::new(response),
        }
    }

    /// Creates a decode error.
    pub fn decode(cause: impl Into<BoxError>) -> Self {
        Self::Decode {
            cause: cause.into(),
        }
    }

    /// Creates a middleware error, preserving which middleware failed.
    pub fn middleware(middleware: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self::Middleware {
            middleware: middleware.into(),
            cause: cause.into(),
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Returns true for timeouts of either phase.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true when the request was cancelled by its signal.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns the HTTP status carried by the error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::RetryExhausted {
                last: RetryFailure::Response(response),
                ..
            } => Some(response.status()),
            _ => None,
        }
    }
}

impl From<BodyError> for FetchError {
    fn from(error: BodyError) -> Self {
        match error {
            BodyError::AlreadyConsumed => Self::AlreadyConsumed,
            BodyError::Aborted { reason } => reason.into_error(),
            BodyError::Source { message, source } => Self::Network {
                url: String::new(),
                message,
                source: source.map(|source| Box::new(ArcError(source)) as BoxError),
            },
        }
    }
}

/// Adapter that lets a shared body error sit in a `Box<dyn Error>` chain.
#[derive(Debug)]
struct ArcError(std::sync::Arc<dyn std::error::Error + Send + Sync + 'static>);

impl fmt::Display for ArcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for ArcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::abort::AbortReason;

    #[test]
    fn test_fetch_error_network_display() {
        let error = FetchError::network("https://example.com/feed", "connection refused");
        let msg = error.to_string();
        assert!(msg.contains("network error"), "Expected kind in: {msg}");
        assert!(msg.contains("https://example.com/feed"), "Expected URL in: {msg}");
        assert!(msg.contains("connection refused"), "Expected cause in: {msg}");
    }

    #[test]
    fn test_fetch_error_timeout_phase_display() {
        assert_eq!(
            FetchError::timeout(TimeoutPhase::Connect).to_string(),
            "connect timeout"
        );
        assert_eq!(
            FetchError::timeout(TimeoutPhase::Request).to_string(),
            "request timeout"
        );
    }

    #[test]
    fn test_fetch_error_http_keeps_status_and_url() {
        let response = Response::builder(404)
            .url("https://example.com/missing".parse().unwrap())
            .build();
        let error = FetchError::http(response);
        assert_eq!(error.status(), Some(404));
        let msg = error.to_string();
        assert!(msg.contains("404"), "Expected status in: {msg}");
        assert!(msg.contains("https://example.com/missing"), "Expected URL in: {msg}");
    }

    #[test]
    fn test_fetch_error_middleware_keeps_provenance() {
        let error = FetchError::middleware("auth", "token endpoint unreachable");
        let msg = error.to_string();
        assert!(msg.contains("`auth`"), "Expected middleware name in: {msg}");
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn test_retry_exhausted_reports_last_response_status() {
        let error = FetchError::RetryExhausted {
            attempts: 3,
            last: RetryFailure::Response(Box::new(Response::builder(503).build())),
        };
        assert_eq!(error.status(), Some(503));
        assert!(error.to_string().contains("3 attempts"));
        assert!(error.to_string().contains("HTTP 503"));
    }

    #[test]
    fn test_body_error_conversion() {
        assert!(matches!(
            FetchError::from(BodyError::AlreadyConsumed),
            FetchError::AlreadyConsumed
        ));
        let aborted = BodyError::Aborted {
            reason: AbortReason::Timeout(TimeoutPhase::Request),
        };
        assert!(FetchError::from(aborted).is_timeout());
        let cancelled = BodyError::Aborted {
            reason: AbortReason::from("user left"),
        };
        assert!(FetchError::from(cancelled).is_cancelled());
    }
}
