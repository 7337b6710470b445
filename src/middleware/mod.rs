//! The request pipeline.
//!
//! A [`Middleware`] sees every request on its way to the transport and every
//! response on its way back. The client runs the configured list in order: the
//! first middleware runs first, and the transport is the terminal step reached
//! through [`Next`].
//!
//! A middleware may:
//! - short-circuit by returning a response without calling `next`
//! - call `next` with an updated request (built with the `with_*` methods)
//! - post-process the response returned by `next`
//! - fail, which aborts the rest of the chain
//!
//! # Example
//!
//! ```
//! use async_trait::async_trait;
//! use fetcher_core::client::RequestOptions;
//! use fetcher_core::message::{Request, Response};
//! use fetcher_core::middleware::{Middleware, Next};
//! use fetcher_core::FetchError;
//!
//! #[derive(Debug)]
//! struct Tagger;
//!
//! #[async_trait]
//! impl Middleware for Tagger {
//!     fn name(&self) -> &str {
//!         "tagger"
//!     }
//!
//!     async fn intercept(
//!         &self,
//!         request: Request,
//!         options: &RequestOptions,
//!         next: Next<'_>,
//!     ) -> Result<Response, FetchError> {
//!         next.run(request.with_header("x-client", "fetcher"), options).await
//!     }
//! }
//! ```

mod auth;
mod logging;
mod request_id;

pub use auth::{AuthMiddleware, StaticToken, TokenProvider};
pub use logging::LoggingMiddleware;
pub use request_id::{REQUEST_ID_HEADER, RequestIdMiddleware};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::client::RequestOptions;
use crate::error::FetchError;
use crate::message::{Request, Response};
use crate::transport::{SendOptions, Timeouts, Transport};

/// A unit of behavior wrapped around the transport.
#[async_trait]
pub trait Middleware: Send + Sync + fmt::Debug {
    /// Short identifier used in logs and in [`FetchError::Middleware`].
    fn name(&self) -> &str;

    /// Handles `request`, usually by calling `next.run(..)` exactly once.
    async fn intercept(
        &self,
        request: Request,
        options: &RequestOptions,
        next: Next<'_>,
    ) -> Result<Response, FetchError>;
}

/// The remainder of the chain after the current middleware.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    middlewares: &'a [Arc<dyn Middleware>],
    transport: &'a dyn Transport,
    timeouts: Timeouts,
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field(
                "remaining",
                &self.middlewares.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .field("transport", &self.transport)
            .finish()
    }
}

impl<'a> Next<'a> {
    /// Starts a chain over `middlewares` that ends at `transport`.
    #[must_use]
    pub fn new(
        middlewares: &'a [Arc<dyn Middleware>],
        transport: &'a dyn Transport,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            middlewares,
            transport,
            timeouts,
        }
    }

    /// Invokes the next middleware, or the transport when none remain.
    ///
    /// # Errors
    ///
    /// Returns whatever the rest of the chain fails with.
    pub async fn run(
        self,
        request: Request,
        options: &RequestOptions,
    ) -> Result<Response, FetchError> {
        match self.middlewares.split_first() {
            Some((current, rest)) => {
                let next = Self {
                    middlewares: rest,
                    ..self
                };
                current.intercept(request, options, next).await
            }
            None => {
                let send_options = SendOptions::for_request(&request, self.timeouts);
                self.transport.send(request, &send_options).await
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::transport::testing::ScriptedTransport;

    #[derive(Debug)]
    struct Recorder {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Middleware for Recorder {
        fn name(&self) -> &str {
            self.label
        }

        async fn intercept(
            &self,
            request: Request,
            options: &RequestOptions,
            next: Next<'_>,
        ) -> Result<Response, FetchError> {
            self.log.lock().unwrap().push(format!("{} in", self.label));
            let response = next
                .run(request.map_headers(|h| h.append("x-trail", self.label)), options)
                .await;
            self.log.lock().unwrap().push(format!("{} out", self.label));
            response
        }
    }

    #[derive(Debug)]
    struct ShortCircuit;

    #[async_trait]
    impl Middleware for ShortCircuit {
        fn name(&self) -> &str {
            "short-circuit"
        }

        async fn intercept(
            &self,
            _request: Request,
            _options: &RequestOptions,
            _next: Next<'_>,
        ) -> Result<Response, FetchError> {
            Ok(Response::builder(299).body("from middleware").build())
        }
    }

    fn request() -> Request {
        Request::get("https://example.com/feed".parse().unwrap())
    }

    #[tokio::test]
    async fn test_chain_runs_in_list_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let middlewares: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(Recorder {
                label: "a",
                log: Arc::clone(&log),
            }),
            Arc::new(Recorder {
                label: "b",
                log: Arc::clone(&log),
            }),
        ];
        let transport = ScriptedTransport::always(200);
        let options = RequestOptions::default();

        let response = Next::new(&middlewares, &transport, Timeouts::default())
            .run(request(), &options)
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(*log.lock().unwrap(), vec!["a in", "b in", "b out", "a out"]);
        let seen = transport.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].headers.get("x-trail").as_deref(), Some("a, b"));
    }

    #[tokio::test]
    async fn test_short_circuit_skips_transport() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let middlewares: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(Recorder {
                label: "outer",
                log: Arc::clone(&log),
            }),
            Arc::new(ShortCircuit),
        ];
        let transport = ScriptedTransport::always(200);
        let options = RequestOptions::default();

        let response = Next::new(&middlewares, &transport, Timeouts::default())
            .run(request(), &options)
            .await
            .unwrap();

        assert_eq!(response.status(), 299);
        assert_eq!(response.text().await.unwrap(), "from middleware");
        assert_eq!(transport.calls(), 0);
        assert_eq!(*log.lock().unwrap(), vec!["outer in", "outer out"]);
    }

    #[tokio::test]
    async fn test_empty_chain_goes_straight_to_transport() {
        let transport = ScriptedTransport::always(204);
        let options = RequestOptions::default();
        let response = Next::new(&[], &transport, Timeouts::default())
            .run(request(), &options)
            .await
            .unwrap();
        assert_eq!(response.status(), 204);
        assert_eq!(transport.calls(), 1);
    }
}
