use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{Middleware, Next};
use crate::client::RequestOptions;
use crate::error::{BoxError, FetchError};
use crate::message::{Request, Response};

/// Supplies bearer tokens, possibly by refreshing them.
#[async_trait]
pub trait TokenProvider: Send + Sync + fmt::Debug {
    /// Returns the current token, or `None` to send the request
    /// unauthenticated.
    async fn token(&self) -> Result<Option<String>, BoxError>;
}

/// A fixed token. Redacted in `Debug` output.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken([REDACTED])")
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<Option<String>, BoxError> {
        Ok(Some(self.0.clone()))
    }
}

/// Adds `Authorization: Bearer <token>` unless the request already carries an
/// `Authorization` header.
#[derive(Debug, Clone)]
pub struct AuthMiddleware {
    provider: Arc<dyn TokenProvider>,
    scheme: String,
}

impl AuthMiddleware {
    #[must_use]
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            provider,
            scheme: "Bearer".to_string(),
        }
    }

    /// Replaces the `Bearer` scheme, e.g. with `Token`.
    #[must_use]
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }
}

#[async_trait]
impl Middleware for AuthMiddleware {
    fn name(&self) -> &str {
        "auth"
    }

    async fn intercept(
        &self,
        request: Request,
        options: &RequestOptions,
        next: Next<'_>,
    ) -> Result<Response, FetchError> {
        if request.headers().has("authorization") {
            return next.run(request, options).await;
        }
        let token = self
            .provider
            .token()
            .await
            .map_err(|error| FetchError::middleware(self.name(), error))?;
        let request = match token {
            Some(token) => request.with_header("Authorization", format!("{} {token}", self.scheme)),
            None => {
                debug!(url = %request.url(), "no token available, sending unauthenticated");
                request
            }
        };
        next.run(request, options).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::transport::Timeouts;
    use crate::transport::testing::ScriptedTransport;

    #[derive(Debug)]
    struct Failing;

    #[async_trait]
    impl TokenProvider for Failing {
        async fn token(&self) -> Result<Option<String>, BoxError> {
            Err("refresh endpoint unreachable".into())
        }
    }

    #[derive(Debug)]
    struct Anonymous;

    #[async_trait]
    impl TokenProvider for Anonymous {
        async fn token(&self) -> Result<Option<String>, BoxError> {
            Ok(None)
        }
    }

    async fn send(
        middleware: AuthMiddleware,
        request: Request,
    ) -> (Result<Response, FetchError>, ScriptedTransport) {
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(middleware)];
        let transport = ScriptedTransport::always(200);
        let result = Next::new(&chain, &transport, Timeouts::default())
            .run(request, &RequestOptions::default())
            .await;
        (result, transport)
    }

    fn request() -> Request {
        Request::get("https://api.example.com/me".parse().unwrap())
    }

    #[tokio::test]
    async fn test_adds_bearer_token() {
        let (result, transport) =
            send(AuthMiddleware::new(Arc::new(StaticToken::new("t0k"))), request()).await;
        assert!(result.is_ok());
        assert_eq!(
            transport.requests()[0].headers.get("authorization").as_deref(),
            Some("Bearer t0k")
        );
    }

    #[tokio::test]
    async fn test_caller_authorization_wins() {
        let (_, transport) = send(
            AuthMiddleware::new(Arc::new(Failing)),
            request().with_header("Authorization", "Basic abc"),
        )
        .await;
        assert_eq!(
            transport.requests()[0].headers.get("authorization").as_deref(),
            Some("Basic abc")
        );
    }

    #[tokio::test]
    async fn test_provider_failure_is_middleware_error() {
        let (result, transport) = send(AuthMiddleware::new(Arc::new(Failing)), request()).await;
        match result.unwrap_err() {
            FetchError::Middleware { middleware, .. } => assert_eq!(middleware, "auth"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_no_token_sends_unauthenticated() {
        let (result, transport) = send(AuthMiddleware::new(Arc::new(Anonymous)), request()).await;
        assert!(result.is_ok());
        assert!(!transport.requests()[0].headers.has("authorization"));
    }

    #[tokio::test]
    async fn test_custom_scheme() {
        let middleware = AuthMiddleware::new(Arc::new(StaticToken::new("k"))).with_scheme("Token");
        let (_, transport) = send(middleware, request()).await;
        assert_eq!(
            transport.requests()[0].headers.get("authorization").as_deref(),
            Some("Token k")
        );
    }

    #[test]
    fn test_static_token_debug_redacted() {
        assert_eq!(format!("{:?}", StaticToken::new("secret")), "StaticToken([REDACTED])");
    }
}
