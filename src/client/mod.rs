//! The client facade.
//!
//! [`FetchClient`] resolves URLs, merges default headers, runs each attempt
//! through the middleware chain under a per-attempt timeout, retries per the
//! [`RetryPolicy`](crate::retry::RetryPolicy) and finally applies the HTTP
//! error policy.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use fetcher_core::cache::{CacheMiddleware, MemoryCacheStore};
//! use fetcher_core::client::{FetchClient, RequestOptions};
//! use fetcher_core::middleware::{LoggingMiddleware, RequestIdMiddleware};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = FetchClient::builder()
//!     .base_url("https://api.example.com/v1/".parse()?)
//!     .middleware(RequestIdMiddleware)
//!     .middleware(CacheMiddleware::new(Arc::new(MemoryCacheStore::default())))
//!     .middleware(LoggingMiddleware)
//!     .build()?;
//!
//! let response = client.get("feed", RequestOptions::new()).await?;
//! println!("{}", response.text().await?);
//! # Ok(())
//! # }
//! ```

pub mod constants;

mod config;
mod options;
mod result;

pub use config::{ClientConfig, ConfigError};
pub use options::RequestOptions;
pub use result::FetchResult;

use std::mem;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use self::constants::{CONNECT_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS};
use crate::abort::{self, AbortSignal};
use crate::error::{BoxError, FetchError, TimeoutPhase};
use crate::message::{Headers, Method, RedirectPolicy, Request, Response};
use crate::middleware::{Middleware, Next};
use crate::retry::{self, RetryPolicy};
use crate::transport::{ReqwestTransport, Timeouts, Transport};

struct ClientInner {
    base_url: Option<Url>,
    default_headers: Headers,
    timeouts: Timeouts,
    redirect: RedirectPolicy,
    keep_alive: bool,
    throw_on_http_error: bool,
    retry: RetryPolicy,
    middlewares: Vec<Arc<dyn Middleware>>,
    transport: Arc<dyn Transport>,
}

/// A configured HTTP client. Cloning is cheap and clones share state.
#[derive(Clone)]
pub struct FetchClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for FetchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchClient")
            .field("base_url", &self.inner.base_url.as_ref().map(Url::as_str))
            .field("default_headers", &self.inner.default_headers)
            .field("timeouts", &self.inner.timeouts)
            .field("retry", &self.inner.retry)
            .field(
                "middlewares",
                &self.inner.middlewares.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .field("transport", &self.inner.transport)
            .finish_non_exhaustive()
    }
}

/// Builder for [`FetchClient`].
#[derive(Debug)]
pub struct ClientBuilder {
    base_url: Option<Url>,
    default_headers: Headers,
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    redirect: RedirectPolicy,
    keep_alive: bool,
    throw_on_http_error: bool,
    retry: RetryPolicy,
    middlewares: Vec<Arc<dyn Middleware>>,
    transport: Option<Arc<dyn Transport>>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            base_url: None,
            default_headers: Headers::new(),
            timeout: Some(Duration::from_secs(REQUEST_TIMEOUT_SECS)),
            connect_timeout: Some(Duration::from_secs(CONNECT_TIMEOUT_SECS)),
            redirect: RedirectPolicy::default(),
            keep_alive: true,
            throw_on_http_error: true,
            retry: RetryPolicy::default(),
            middlewares: Vec::new(),
            transport: None,
        }
    }
}

impl ClientBuilder {
    /// Starts from `config`, after validating it.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut builder = Self::default();
        if let Some(base_url) = &config.base_url {
            builder.base_url = Some(config::parse_base_url(base_url)?);
        }
        if let Some(secs) = config.timeout_secs {
            builder.timeout = Some(Duration::from_secs(secs));
        }
        if let Some(secs) = config.connect_timeout_secs {
            builder.connect_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(max_retries) = config.max_retries {
            builder.retry = RetryPolicy::with_max_retries(max_retries);
        }
        if let Some(retry_non_idempotent) = config.retry_non_idempotent {
            builder.retry = builder.retry.idempotent_methods_only(!retry_non_idempotent);
        }
        if let Some(throw) = config.throw_on_http_error {
            builder.throw_on_http_error = throw;
        }
        if let Some(redirect) = config.redirect {
            builder.redirect = redirect;
        }
        if let Some(keep_alive) = config.keep_alive {
            builder.keep_alive = keep_alive;
        }
        for (name, value) in &config.default_headers {
            builder.default_headers.set(name, value);
        }
        Ok(builder)
    }

    /// Base for relative request URLs. Keep the trailing slash when joining
    /// onto a path prefix such as `/v1/`.
    #[must_use]
    pub fn base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// Sent with every request unless the request sets the same header.
    #[must_use]
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.set(name, value);
        self
    }

    /// Per-attempt timeout; `None` disables it.
    #[must_use]
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn redirect(mut self, redirect: RedirectPolicy) -> Self {
        self.redirect = redirect;
        self
    }

    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// When true (the default) a non-2xx response becomes [`FetchError::Http`].
    #[must_use]
    pub fn throw_on_http_error(mut self, throw: bool) -> Self {
        self.throw_on_http_error = throw;
        self
    }

    #[must_use]
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Appends a middleware. The first one added runs first.
    #[must_use]
    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Appends a middleware that is shared with other owners.
    #[must_use]
    pub fn middleware_arc(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Replaces the default [`ReqwestTransport`].
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Builds the client, creating the default transport if none was set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Transport`] if the reqwest client cannot be
    /// built (for example, no TLS backend is available).
    pub fn build(self) -> Result<FetchClient, ConfigError> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => {
                let connect = self
                    .connect_timeout
                    .unwrap_or(Duration::from_secs(CONNECT_TIMEOUT_SECS));
                Arc::new(ReqwestTransport::with_connect_timeout(connect)?) as Arc<dyn Transport>
            }
        };
        debug!(
            middlewares = self.middlewares.len(),
            base_url = ?self.base_url.as_ref().map(Url::as_str),
            "built fetch client"
        );
        Ok(FetchClient {
            inner: Arc::new(ClientInner {
                base_url: self.base_url,
                default_headers: self.default_headers,
                timeouts: Timeouts {
                    request: self.timeout,
                    connect: self.connect_timeout,
                },
                redirect: self.redirect,
                keep_alive: self.keep_alive,
                throw_on_http_error: self.throw_on_http_error,
                retry: self.retry,
                middlewares: self.middlewares,
                transport,
            }),
        })
    }
}

static DEFAULT_CLIENT: OnceLock<FetchClient> = OnceLock::new();

/// A process-wide client with default settings, built on first use.
///
/// # Errors
///
/// Returns [`ConfigError::Transport`] if the default transport cannot be
/// built. A later call tries again.
pub fn default_client() -> Result<&'static FetchClient, ConfigError> {
    if let Some(client) = DEFAULT_CLIENT.get() {
        return Ok(client);
    }
    let client = FetchClient::builder().build()?;
    Ok(DEFAULT_CLIENT.get_or_init(|| client))
}

/// Parses the response body as JSON.
///
/// # Errors
///
/// Returns [`FetchError::Decode`] when the body is not valid JSON for `T`,
/// or the body's own error when it cannot be read.
pub async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, FetchError> {
    response.json::<T>().await
}

/// Parses the response body as JSON, then applies `mapper`.
///
/// # Errors
///
/// Both parse failures and mapper failures become [`FetchError::Decode`].
pub async fn decode_with<T, U, E, F>(response: Response, mapper: F) -> Result<U, FetchError>
where
    T: DeserializeOwned,
    E: Into<BoxError>,
    F: FnOnce(T) -> Result<U, E>,
{
    let value = decode::<T>(response).await?;
    mapper(value).map_err(FetchError::decode)
}

macro_rules! verbs {
    ($($(#[$doc:meta])* $name:ident, $try_name:ident => $method:ident;)*) => {
        $(
            $(#[$doc])*
            ///
            /// # Errors
            ///
            /// See [`FetchClient::send`].
            pub async fn $name(&self, url: &str, options: RequestOptions) -> Result<Response, FetchError> {
                self.request(Method::$method, url, options).await
            }

            /// Like the throwing variant, but captures failures as data.
            pub async fn $try_name(&self, url: &str, options: RequestOptions) -> FetchResult<Response> {
                self.request(Method::$method, url, options).await.into()
            }
        )*
    };
}

impl FetchClient {
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// A client with default settings and the reqwest transport.
    ///
    /// # Errors
    ///
    /// See [`ClientBuilder::build`].
    pub fn new() -> Result<Self, ConfigError> {
        Self::builder().build()
    }

    verbs! {
        /// Sends a `GET`.
        get, try_get => GET;
        /// Sends a `POST`.
        post, try_post => POST;
        /// Sends a `PUT`.
        put, try_put => PUT;
        /// Sends a `PATCH`.
        patch, try_patch => PATCH;
        /// Sends a `DELETE`.
        delete, try_delete => DELETE;
        /// Sends a `HEAD`.
        head, try_head => HEAD;
        /// Sends an `OPTIONS`.
        options, try_options => OPTIONS;
    }

    /// Builds a request for `method` and `url` with the client's redirect and
    /// keep-alive settings, then [`send`](Self::send)s it.
    ///
    /// # Errors
    ///
    /// [`FetchError::InvalidUrl`] when `url` cannot be resolved, otherwise as
    /// [`send`](Self::send).
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<Response, FetchError> {
        let url = self.resolve_url(url)?;
        let request = Request::new(method, url)
            .with_redirect(self.inner.redirect)
            .with_keep_alive(self.inner.keep_alive);
        self.send(request, options).await
    }

    /// Resolves `url` against the base URL when it is relative.
    ///
    /// # Errors
    ///
    /// [`FetchError::InvalidUrl`] for unparsable URLs and for relative URLs
    /// when no base URL is configured.
    pub fn resolve_url(&self, url: &str) -> Result<Url, FetchError> {
        match Url::parse(url) {
            Ok(absolute) => Ok(absolute),
            Err(url::ParseError::RelativeUrlWithoutBase) => self
                .inner
                .base_url
                .as_ref()
                .and_then(|base| base.join(url).ok())
                .ok_or_else(|| FetchError::invalid_url(url)),
            Err(_) => Err(FetchError::invalid_url(url)),
        }
    }

    /// Sends `request` through the middleware chain with retries.
    ///
    /// Headers are layered: client defaults, then the request's own headers,
    /// then `options.headers`; later layers win.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Http`] for a non-2xx final response when the error
    ///   policy is on (3xx responses are exempt under
    ///   [`RedirectPolicy::Manual`])
    /// - [`FetchError::RetryExhausted`] when every allowed attempt failed
    /// - [`FetchError::Cancelled`] or [`FetchError::Timeout`] from the signal
    /// - any other error raised by a middleware or the transport
    #[instrument(skip_all, fields(method = %request.method(), url = %request.url()))]
    pub async fn send(
        &self,
        request: Request,
        mut options: RequestOptions,
    ) -> Result<Response, FetchError> {
        let inner = &*self.inner;

        let mut headers = inner.default_headers.clone();
        headers.extend_from(request.headers());
        headers.extend_from(&mem::take(&mut options.headers));
        let mut request = request.with_headers(headers);
        if let Some(body) = options.body.take() {
            request = request.with_body(body);
        }
        if let Some(redirect) = options.redirect {
            request = request.with_redirect(redirect);
        }
        if let Some(cache) = options.cache {
            request = request.with_cache(cache);
        }

        let signal = match &options.signal {
            Some(caller) => AbortSignal::any(&[caller.clone(), request.signal().clone()]),
            None => request.signal().clone(),
        };
        let policy = options.retry.clone().unwrap_or_else(|| inner.retry.clone());
        let timeouts = Timeouts {
            request: options.timeout.or(inner.timeouts.request),
            connect: inner.timeouts.connect,
        };
        let throw = options
            .throw_on_http_error
            .unwrap_or(inner.throw_on_http_error);
        let manual_redirects = request.redirect() == RedirectPolicy::Manual;

        let options = &options;
        let response = retry::execute(&policy, request, &signal, |attempt| {
            let child = AbortSignal::any(std::slice::from_ref(&signal));
            let next = Next::new(&inner.middlewares, inner.transport.as_ref(), timeouts);
            async move {
                let attempt = attempt.with_signal(child.clone());
                abort::with_timeout(
                    &child,
                    timeouts.request,
                    TimeoutPhase::Request,
                    next.run(attempt, options),
                )
                .await
            }
        })
        .await?;

        let status = response.status();
        let exempt = manual_redirects && (300..400).contains(&status);
        if throw && !response.ok() && !exempt {
            debug!(status, "http error policy rejected response");
            return Err(FetchError::http(response));
        }
        Ok(response)
    }

    /// Like [`send`](Self::send), but captures failures as data.
    pub async fn try_send(&self, request: Request, options: RequestOptions) -> FetchResult<Response> {
        self.send(request, options).await.into()
    }
}
