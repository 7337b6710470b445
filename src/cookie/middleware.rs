use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::jar::CookieJar;
use super::parse::Cookie;
use crate::client::RequestOptions;
use crate::clock::{Clock, SystemClock};
use crate::error::FetchError;
use crate::message::{Request, Response};
use crate::middleware::{Middleware, Next};

/// Attaches jar cookies to outgoing requests and stores `Set-Cookie`
/// responses back into the jar.
///
/// Jar failures and malformed `Set-Cookie` values are logged and never fail
/// the request.
pub struct CookieMiddleware {
    jar: Arc<dyn CookieJar>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for CookieMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieMiddleware")
            .field("jar", &self.jar)
            .finish_non_exhaustive()
    }
}

impl CookieMiddleware {
    #[must_use]
    pub fn new(jar: Arc<dyn CookieJar>) -> Self {
        Self {
            jar,
            clock: Arc::new(SystemClock),
        }
    }

    /// Sets the time used to resolve `Max-Age` on received cookies.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn attach(&self, request: Request) -> Request {
        let cookies = match self.jar.load(request.url()).await {
            Ok(cookies) => cookies,
            Err(error) => {
                warn!(url = %request.url(), %error, "cookie jar load failed, sending without cookies");
                return request;
            }
        };
        if cookies.is_empty() {
            return request;
        }

        let pairs = cookies.iter().map(Cookie::pair).collect::<Vec<_>>().join("; ");
        debug!(url = %request.url(), count = cookies.len(), "attaching cookies");
        request.map_headers(|headers| {
            let value = match headers.get("cookie") {
                Some(existing) if !existing.trim().is_empty() => format!("{existing}; {pairs}"),
                _ => pairs,
            };
            headers.set("Cookie", value);
        })
    }

    async fn store(&self, request_url: &url::Url, response: &Response) {
        let received = response.headers().get_set_cookie();
        if received.is_empty() {
            return;
        }
        let origin = response.url().unwrap_or(request_url);
        let now = self.clock.now();

        let cookies: Vec<Cookie> = received
            .into_iter()
            .filter_map(|value| match Cookie::parse(value, origin, now) {
                Ok(cookie) => Some(cookie),
                Err(error) => {
                    debug!(url = %origin, %error, "dropping malformed Set-Cookie");
                    None
                }
            })
            .collect();
        if cookies.is_empty() {
            return;
        }
        if let Err(error) = self.jar.save(origin, cookies).await {
            warn!(url = %origin, %error, "cookie jar save failed");
        }
    }
}

#[async_trait]
impl Middleware for CookieMiddleware {
    fn name(&self) -> &str {
        "cookie"
    }

    async fn intercept(
        &self,
        request: Request,
        options: &RequestOptions,
        next: Next<'_>,
    ) -> Result<Response, FetchError> {
        let url = request.url().clone();
        let request = self.attach(request).await;
        let response = next.run(request, options).await?;
        self.store(&url, &response).await;
        Ok(response)
    }
}
