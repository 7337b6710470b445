use bytes::Bytes;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use url::Url;

use crate::body::{Body, BodyError};
use crate::error::FetchError;

use super::headers::Headers;

/// An HTTP response.
#[derive(Debug)]
pub struct Response {
    status: u16,
    status_text: String,
    headers: Headers,
    body: Body,
    url: Option<Url>,
    redirected: bool,
}

/// Builds a [`Response`]. Used by transports, by the cache when it replays a
/// stored entry, and by tests.
#[derive(Debug)]
pub struct ResponseBuilder {
    response: Response,
}

impl ResponseBuilder {
    /// Overrides the reason phrase derived from the status code.
    #[must_use]
    pub fn status_text(mut self, text: impl Into<String>) -> Self {
        self.response.status_text = text.into();
        self
    }

    /// Appends a header value.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.response.headers.append(name, value);
        self
    }

    #[must_use]
    pub fn headers(mut self, headers: Headers) -> Self {
        self.response.headers = headers;
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.response.body = body.into();
        self
    }

    #[must_use]
    pub fn url(mut self, url: Url) -> Self {
        self.response.url = Some(url);
        self
    }

    #[must_use]
    pub fn redirected(mut self, redirected: bool) -> Self {
        self.response.redirected = redirected;
        self
    }

    #[must_use]
    pub fn build(self) -> Response {
        self.response
    }
}

impl Response {
    /// Starts building a response with `status`.
    #[must_use]
    pub fn builder(status: u16) -> ResponseBuilder {
        let status_text = StatusCode::from_u16(status)
            .ok()
            .and_then(|code| code.canonical_reason())
            .unwrap_or_default()
            .to_string();
        ResponseBuilder {
            response: Self {
                status,
                status_text,
                headers: Headers::new(),
                body: Body::empty(),
                url: None,
                redirected: false,
            },
        }
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    #[must_use]
    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// True for statuses in `200..300`.
    #[must_use]
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// The final URL, after redirects. `None` for synthesized responses.
    #[must_use]
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    #[must_use]
    pub fn redirected(&self) -> bool {
        self.redirected
    }

    /// Returns the response with its headers replaced.
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Returns the response with its body replaced.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn into_body(self) -> Body {
        self.body
    }

    /// Produces an independent copy, forking the body.
    ///
    /// # Errors
    ///
    /// Returns [`BodyError::AlreadyConsumed`] if the body was already read.
    pub fn try_clone(&mut self) -> Result<Self, BodyError> {
        Ok(Self {
            status: self.status,
            status_text: self.status_text.clone(),
            headers: self.headers.clone(),
            body: self.body.try_clone()?,
            url: self.url.clone(),
            redirected: self.redirected,
        })
    }

    /// Reads the whole body.
    ///
    /// # Errors
    ///
    /// Fails if the body was already consumed or its stream failed.
    pub async fn bytes(&self) -> Result<Bytes, FetchError> {
        Ok(self.body.bytes().await?)
    }

    /// Reads the whole body as text.
    ///
    /// # Errors
    ///
    /// Same as [`Response::bytes`].
    pub async fn text(&self) -> Result<String, FetchError> {
        Ok(self.body.text().await?)
    }

    /// Reads the body and parses it as JSON.
    ///
    /// # Errors
    ///
    /// Same as [`Response::bytes`], plus [`FetchError::Decode`] on bad JSON.
    pub async fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        self.body.json().await
    }
}
