//! Default transport built on `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::Client;
use reqwest::redirect::Policy;
use tracing::{debug, instrument};
use url::Url;

use super::{SendOptions, Transport};
use crate::abort;
use crate::body::{Body, BodyError};
use crate::client::constants::{CONNECT_TIMEOUT_SECS, MAX_REDIRECTS};
use crate::error::{FetchError, TimeoutPhase};
use crate::message::{Headers, RedirectPolicy, Request, Response};
use crate::user_agent;

/// Sends requests with a pooled `reqwest::Client`.
///
/// Two clients share the connection settings: one follows redirects, the other
/// returns 3xx responses as-is (used for [`RedirectPolicy::Manual`] and
/// [`RedirectPolicy::Error`]).
///
/// Response header names arrive lowercased and grouped by name, so the
/// [`Headers`] of a response keep neither the server's casing nor its exact
/// line order. Lookups are case-insensitive and repeated values keep their
/// relative order.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    following: Client,
    manual: Client,
}

impl ReqwestTransport {
    /// Builds a transport with the default connect timeout.
    ///
    /// # Errors
    ///
    /// Returns the builder error if the TLS backend cannot be initialised.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
    }

    /// Builds a transport with an explicit connect timeout.
    ///
    /// # Errors
    ///
    /// Returns the builder error if the TLS backend cannot be initialised.
    #[instrument(level = "debug")]
    pub fn with_connect_timeout(connect_timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            following: base_client_builder(connect_timeout)
                .redirect(Policy::limited(MAX_REDIRECTS))
                .build()?,
            manual: base_client_builder(connect_timeout)
                .redirect(Policy::none())
                .build()?,
        })
    }

    fn client_for(&self, redirect: RedirectPolicy) -> &Client {
        match redirect {
            RedirectPolicy::Follow => &self.following,
            RedirectPolicy::Error | RedirectPolicy::Manual => &self.manual,
        }
    }
}

fn base_client_builder(connect_timeout: Duration) -> reqwest::ClientBuilder {
    Client::builder()
        .connect_timeout(connect_timeout)
        .gzip(true)
        .user_agent(user_agent::default_user_agent())
}

fn map_error(error: &reqwest::Error, url: &Url) -> FetchError {
    if error.is_timeout() {
        let phase = if error.is_connect() {
            TimeoutPhase::Connect
        } else {
            TimeoutPhase::Request
        };
        return FetchError::timeout(phase);
    }
    FetchError::network(url.as_str(), error_chain(error))
}

/// Flattens the error and its sources into one line, since reqwest's own
/// message rarely says what actually failed.
fn error_chain(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn to_reqwest_body(body: &Body) -> Result<Option<reqwest::Body>, FetchError> {
    if let Some(bytes) = body.as_bytes() {
        return Ok((!bytes.is_empty()).then(|| reqwest::Body::from(bytes)));
    }
    let stream = body.stream()?;
    Ok(Some(reqwest::Body::wrap_stream(stream)))
}

fn convert_headers(headers: &reqwest::header::HeaderMap) -> Headers {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[instrument(skip(self, request, options), fields(method = %request.method(), url = %request.url()))]
    async fn send(&self, request: Request, options: &SendOptions) -> Result<Response, FetchError> {
        options.signal.throw_if_aborted()?;

        let url = request.url().clone();
        let mut builder = self
            .client_for(options.redirect)
            .request(request.method().clone(), url.clone());
        for (name, value) in request.headers().iter_raw() {
            builder = builder.header(name, value);
        }
        if !options.keep_alive {
            builder = builder.header(reqwest::header::CONNECTION, "close");
        }
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = to_reqwest_body(request.body())? {
            builder = builder.body(body);
        }

        let response = abort::race(&options.signal, async {
            builder.send().await.map_err(|error| map_error(&error, &url))
        })
        .await?;

        let status = response.status();
        if options.redirect == RedirectPolicy::Error && status.is_redirection() {
            return Err(FetchError::network(
                url.as_str(),
                format!("redirect ({status}) received while redirects are disabled"),
            ));
        }

        let final_url = response.url().clone();
        let redirected = final_url != url;
        let headers = convert_headers(response.headers());
        debug!(status = status.as_u16(), redirected, "response head received");

        let stream = response.bytes_stream().map_err(BodyError::from_error);
        let body = Body::from_stream(stream).with_abort(options.signal.clone());

        let mut builder = Response::builder(status.as_u16())
            .headers(headers)
            .url(final_url)
            .redirected(redirected)
            .body(body);
        if let Some(reason) = status.canonical_reason() {
            builder = builder.status_text(reason);
        }
        Ok(builder.build())
    }
}
