use reqwest::Method;
use serde::Deserialize;
use url::Url;

use crate::abort::AbortSignal;
use crate::body::{Body, BodyError};

use super::headers::Headers;

/// How the transport treats redirect responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedirectPolicy {
    /// Follow redirects transparently.
    #[default]
    Follow,
    /// Fail with a network error when a redirect is received.
    Error,
    /// Return the 3xx response to the caller unchanged.
    Manual,
}

/// Caching hint carried by a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestCache {
    /// Normal HTTP caching.
    #[default]
    Default,
    /// Skip the cache entirely: no lookup, no write.
    NoStore,
    /// Skip the lookup but store the fresh response.
    Reload,
    /// Use a stored entry only after revalidating it.
    NoCache,
}

/// An outgoing HTTP request.
///
/// Requests are never modified in place by the pipeline. The `with_*` methods
/// consume the request and return the updated one, moving the body along with
/// it.
#[derive(Debug)]
pub struct Request {
    method: Method,
    url: Url,
    headers: Headers,
    body: Body,
    signal: AbortSignal,
    redirect: RedirectPolicy,
    keep_alive: bool,
    cache: RequestCache,
}

impl Request {
    /// Creates a request with an empty body and a fresh signal.
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Headers::new(),
            body: Body::empty(),
            signal: AbortSignal::new(),
            redirect: RedirectPolicy::default(),
            keep_alive: true,
            cache: RequestCache::default(),
        }
    }

    /// Shorthand for a `GET` request.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> &Body {
        &self.body
    }

    #[must_use]
    pub fn signal(&self) -> &AbortSignal {
        &self.signal
    }

    #[must_use]
    pub fn redirect(&self) -> RedirectPolicy {
        self.redirect
    }

    #[must_use]
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    #[must_use]
    pub fn cache(&self) -> RequestCache {
        self.cache
    }

    #[must_use]
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = url;
        self
    }

    /// Replaces every value of `name` with `value`.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Applies `update` to the headers and returns the updated request.
    #[must_use]
    pub fn map_headers<F>(mut self, update: F) -> Self
    where
        F: FnOnce(&mut Headers),
    {
        update(&mut self.headers);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = signal;
        self
    }

    #[must_use]
    pub fn with_redirect(mut self, redirect: RedirectPolicy) -> Self {
        self.redirect = redirect;
        self
    }

    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: RequestCache) -> Self {
        self.cache = cache;
        self
    }

    /// Takes the body, leaving the request's metadata behind.
    #[must_use]
    pub fn into_body(self) -> Body {
        self.body
    }

    /// Produces an independent copy of this request.
    ///
    /// The body is forked: `self` keeps one branch and the copy gets the other.
    /// Both share the same abort signal.
    ///
    /// # Errors
    ///
    /// Returns [`BodyError::AlreadyConsumed`] if the body was already read.
    pub fn try_clone(&mut self) -> Result<Self, BodyError> {
        Ok(Self {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.try_clone()?,
            signal: self.signal.clone(),
            redirect: self.redirect,
            keep_alive: self.keep_alive,
            cache: self.cache,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures_util::stream;

    fn url() -> Url {
        "https://api.example.com/items?page=2".parse().unwrap()
    }

    #[test]
    fn test_request_defaults() {
        let request = Request::get(url());
        assert_eq!(request.method(), &Method::GET);
        assert_eq!(request.redirect(), RedirectPolicy::Follow);
        assert_eq!(request.cache(), RequestCache::Default);
        assert!(request.keep_alive());
        assert!(request.headers().is_empty());
        assert!(!request.signal().is_aborted());
    }

    #[test]
    fn test_with_header_replaces_existing_value() {
        let request = Request::get(url())
            .with_header("Accept", "text/html")
            .with_header("accept", "application/json");
        assert_eq!(
            request.headers().get("Accept").as_deref(),
            Some("application/json")
        );
    }

    #[test]
    fn test_map_headers_appends() {
        let request = Request::get(url())
            .with_header("Cookie", "a=1")
            .map_headers(|headers| headers.append("Cookie", "b=2"));
        assert_eq!(request.headers().get("cookie").as_deref(), Some("a=1, b=2"));
    }

    #[tokio::test]
    async fn test_try_clone_forks_streamed_body() {
        let mut request = Request::new(Method::PUT, url()).with_body(Body::from_stream(
            stream::iter(vec![Ok(Bytes::from_static(b"up")), Ok(Bytes::from_static(b"load"))]),
        ));
        let copy = request.try_clone().unwrap();
        assert_eq!(copy.method(), &Method::PUT);
        assert_eq!(copy.body().text().await.unwrap(), "upload");
        assert_eq!(request.body().text().await.unwrap(), "upload");
    }

    #[tokio::test]
    async fn test_try_clone_after_read_fails() {
        let mut request = Request::new(Method::POST, url()).with_body(Body::from_stream(
            stream::iter(vec![Ok(Bytes::from_static(b"once"))]),
        ));
        request.body().bytes().await.unwrap();
        assert!(matches!(
            request.try_clone(),
            Err(BodyError::AlreadyConsumed)
        ));
    }

    #[test]
    fn test_clone_shares_signal() {
        let mut request = Request::get(url());
        let copy = request.try_clone().unwrap();
        request.signal().abort("stop");
        assert!(copy.signal().is_aborted());
    }
}
