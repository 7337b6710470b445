use std::time::Instant;

use async_trait::async_trait;
use tracing::{Instrument, debug, info_span, warn};

use super::{Middleware, Next};
use crate::client::RequestOptions;
use crate::error::FetchError;
use crate::message::{Request, Response};

/// Wraps the rest of the chain in an `http.request` span and logs the
/// outcome with its elapsed time. Query strings are left out of the logged
/// URL.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    async fn intercept(
        &self,
        request: Request,
        options: &RequestOptions,
        next: Next<'_>,
    ) -> Result<Response, FetchError> {
        let mut target = request.url().clone();
        target.set_query(None);
        let span = info_span!("http.request", method = %request.method(), url = %target);

        async move {
            let started = Instant::now();
            debug!("sending request");
            let result = next.run(request, options).await;
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            match &result {
                Ok(response) => debug!(status = response.status(), elapsed_ms, "response received"),
                Err(error) => warn!(%error, elapsed_ms, "request failed"),
            }
            result
        }
        .instrument(span)
        .await
    }
}
