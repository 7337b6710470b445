//! The cookie model and `Set-Cookie` parsing.

use std::fmt;
use std::net::IpAddr;
use std::time::{Duration, SystemTime};

use url::Url;

/// Longest lifetime a cookie may be given, 400 days.
const MAX_AGE_CAP_SECS: u64 = 400 * 24 * 60 * 60;

/// The `SameSite` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

/// Reasons a `Set-Cookie` value is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CookieParseError {
    /// No `name=value` pair before the first `;`.
    #[error("missing name=value pair")]
    MissingPair,

    /// The pair has an empty name.
    #[error("empty cookie name")]
    EmptyName,

    /// The request URL has no host to scope the cookie to.
    #[error("request url has no host")]
    NoHost,

    /// The `Domain` attribute does not cover the request host.
    #[error("domain {domain} does not match host {host}")]
    DomainMismatch { domain: String, host: String },
}

/// A stored cookie.
///
/// The value is redacted in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    value: String,
    /// Lower-case domain without a leading dot.
    pub domain: String,
    /// True when no `Domain` attribute was given: the cookie is sent to the
    /// exact origin host only, never to subdomains.
    pub host_only: bool,
    pub path: String,
    pub expires: Option<SystemTime>,
    /// `Max-Age` in seconds, as received.
    pub max_age: Option<i64>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
}

impl fmt::Debug for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cookie")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .field("domain", &self.domain)
            .field("host_only", &self.host_only)
            .field("path", &self.path)
            .field("expires", &self.expires)
            .field("max_age", &self.max_age)
            .field("secure", &self.secure)
            .field("http_only", &self.http_only)
            .field("same_site", &self.same_site)
            .finish()
    }
}

impl Cookie {
    /// Creates a host-only session cookie for `domain` at path `/`.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into().trim_start_matches('.').to_ascii_lowercase(),
            host_only: true,
            path: "/".to_string(),
            expires: None,
            max_age: None,
            secure: false,
            http_only: false,
            same_site: None,
        }
    }

    /// Returns the cookie value. Avoid logging it.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Parses one `Set-Cookie` header value received for `url` at `now`.
    ///
    /// Unknown attributes and malformed `Expires`/`Max-Age` values are
    /// ignored. `Max-Age` takes precedence over `Expires`.
    ///
    /// # Errors
    ///
    /// Returns [`CookieParseError`] when the name/value pair is missing, the
    /// URL has no host, or the `Domain` attribute does not match the host.
    pub fn parse(set_cookie: &str, url: &Url, now: SystemTime) -> Result<Self, CookieParseError> {
        let host = url
            .host_str()
            .ok_or(CookieParseError::NoHost)?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_ascii_lowercase();

        let mut parts = set_cookie.split(';');
        let pair = parts.next().unwrap_or_default();
        let (name, value) = pair.split_once('=').ok_or(CookieParseError::MissingPair)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(CookieParseError::EmptyName);
        }

        let mut cookie = Self::new(name, value.trim().trim_matches('"'), host.clone());
        cookie.path = default_path(url);

        for attribute in parts {
            let (key, argument) = match attribute.split_once('=') {
                Some((key, argument)) => (key.trim(), argument.trim()),
                None => (attribute.trim(), ""),
            };
            match key.to_ascii_lowercase().as_str() {
                "domain" if !argument.is_empty() => {
                    let domain = argument.trim_start_matches('.').to_ascii_lowercase();
                    if !domain_matches(&host, &domain) {
                        return Err(CookieParseError::DomainMismatch { domain, host });
                    }
                    cookie.host_only = host.parse::<IpAddr>().is_ok();
                    cookie.domain = domain;
                }
                "path" if argument.starts_with('/') => cookie.path = argument.to_string(),
                "expires" => {
                    if let Ok(at) = httpdate::parse_http_date(argument) {
                        cookie.expires = Some(at);
                    }
                }
                "max-age" => {
                    if let Ok(seconds) = argument.parse::<i64>() {
                        cookie.max_age = Some(seconds);
                    }
                }
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                "samesite" => {
                    cookie.same_site = match argument.to_ascii_lowercase().as_str() {
                        "strict" => Some(SameSite::Strict),
                        "lax" => Some(SameSite::Lax),
                        "none" => Some(SameSite::None),
                        _ => cookie.same_site,
                    };
                }
                _ => {}
            }
        }

        if let Some(seconds) = cookie.max_age {
            cookie.expires = match u64::try_from(seconds) {
                Ok(seconds) if seconds > 0 => {
                    now.checked_add(Duration::from_secs(seconds.min(MAX_AGE_CAP_SECS)))
                }
                _ => Some(SystemTime::UNIX_EPOCH),
            };
        }
        Ok(cookie)
    }

    /// True once `Max-Age` was zero or negative, or the expiry is not after
    /// `now`. Session cookies never expire.
    #[must_use]
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.max_age.is_some_and(|seconds| seconds <= 0)
            || self.expires.is_some_and(|expires| expires <= now)
    }

    /// True if the cookie should be sent with a request to `url`.
    #[must_use]
    pub fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_ascii_lowercase();
        let domain_ok = if self.host_only {
            host == self.domain
        } else {
            domain_matches(&host, &self.domain)
        };
        domain_ok
            && path_matches(url.path(), &self.path)
            && (!self.secure || url.scheme() == "https")
    }

    /// `name=value` as sent in a `Cookie` header.
    #[must_use]
    pub fn pair(&self) -> String {
        format!("{}={}", self.name, self.value)
    }

    /// Identity for replacement: two cookies with the same name, domain and
    /// path are the same cookie.
    pub(crate) fn same_identity(&self, other: &Self) -> bool {
        self.name == other.name && self.domain == other.domain && self.path == other.path
    }
}

/// `host` equals `domain` or is a subdomain of it. IP hosts match exactly.
pub(crate) fn domain_matches(host: &str, domain: &str) -> bool {
    if host == domain {
        return true;
    }
    if host.parse::<IpAddr>().is_ok() {
        return false;
    }
    host.strip_suffix(domain)
        .is_some_and(|prefix| prefix.ends_with('.'))
}

/// `/app` matches `/app`, `/app/` and `/app/page`, but not `/application`.
fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    request_path.strip_prefix(cookie_path).is_some_and(|rest| {
        cookie_path.ends_with('/') || rest.starts_with('/')
    })
}

/// The directory of the request path: `/app/page` gives `/app`, `/page` gives `/`.
fn default_path(url: &Url) -> String {
    let path = url.path();
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(index) => path[..index].to_string(),
    }
}
