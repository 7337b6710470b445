use async_trait::async_trait;
use uuid::Uuid;

use super::{Middleware, Next};
use crate::client::RequestOptions;
use crate::error::FetchError;
use crate::message::{Request, Response};

/// Header carrying the correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Tags each request with a random UUID v4 unless the caller already set one.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdMiddleware;

#[async_trait]
impl Middleware for RequestIdMiddleware {
    fn name(&self) -> &str {
        "request-id"
    }

    async fn intercept(
        &self,
        request: Request,
        options: &RequestOptions,
        next: Next<'_>,
    ) -> Result<Response, FetchError> {
        let request = if request.headers().has(REQUEST_ID_HEADER) {
            request
        } else {
            request.with_header(REQUEST_ID_HEADER, Uuid::new_v4().to_string())
        };
        next.run(request, options).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::transport::Timeouts;
    use crate::transport::testing::ScriptedTransport;

    async fn send(request: Request) -> ScriptedTransport {
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(RequestIdMiddleware)];
        let transport = ScriptedTransport::always(200);
        Next::new(&chain, &transport, Timeouts::default())
            .run(request, &RequestOptions::default())
            .await
            .unwrap();
        transport
    }

    #[tokio::test]
    async fn test_adds_uuid_v4() {
        let transport = send(Request::get("https://example.com/".parse().unwrap())).await;
        let id = transport.requests()[0].headers.get(REQUEST_ID_HEADER).unwrap();
        let parsed = Uuid::parse_str(&id).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
    }

    #[tokio::test]
    async fn test_keeps_caller_id() {
        let request =
            Request::get("https://example.com/".parse().unwrap()).with_header("X-Request-Id", "abc-123");
        let transport = send(request).await;
        let headers = &transport.requests()[0].headers;
        assert_eq!(headers.get(REQUEST_ID_HEADER).as_deref(), Some("abc-123"));
        assert_eq!(headers.len(), 1);
    }
}
