//! The wire transport seam.
//!
//! The pipeline never opens sockets itself. Its innermost step hands the
//! request to a [`Transport`], which owns TLS, DNS and connection pooling.
//! [`ReqwestTransport`] is the default.

mod reqwest_transport;

pub use reqwest_transport::ReqwestTransport;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::abort::AbortSignal;
use crate::error::FetchError;
use crate::message::{RedirectPolicy, Request, Response};

/// Time limits applied to a single attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeouts {
    /// Limit for the whole request, up to the response head.
    pub request: Option<Duration>,
    /// Limit for establishing the connection.
    pub connect: Option<Duration>,
}

/// Per-send settings handed to the transport alongside the request.
#[derive(Debug, Clone)]
pub struct SendOptions {
    pub timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub redirect: RedirectPolicy,
    pub keep_alive: bool,
    /// Must be observed before any I/O starts and for as long as the
    /// response body is being produced.
    pub signal: AbortSignal,
}

impl SendOptions {
    /// Derives the options from the request's own policy fields.
    #[must_use]
    pub fn for_request(request: &Request, timeouts: Timeouts) -> Self {
        Self {
            timeout: timeouts.request,
            connect_timeout: timeouts.connect,
            redirect: request.redirect(),
            keep_alive: request.keep_alive(),
            signal: request.signal().clone(),
        }
    }
}

/// Sends one request over the wire.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Performs the exchange.
    ///
    /// Implementations fail fast when `options.signal` is already aborted and
    /// report failures as [`FetchError::Network`] or [`FetchError::Timeout`].
    async fn send(&self, request: Request, options: &SendOptions) -> Result<Response, FetchError>;
}
