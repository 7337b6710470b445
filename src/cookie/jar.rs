use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;
use url::Url;

use super::parse::Cookie;
use crate::clock::{Clock, SystemClock};
use crate::error::BoxError;

/// Errors reported by a [`CookieJar`] backend.
#[derive(Debug, thiserror::Error)]
#[error("cookie jar unavailable: {message}")]
pub struct CookieJarError {
    pub message: String,
    #[source]
    pub source: Option<BoxError>,
}

/// Pluggable cookie storage.
#[async_trait]
pub trait CookieJar: Send + Sync + fmt::Debug {
    /// Returns the unexpired cookies that match `url`.
    async fn load(&self, url: &Url) -> Result<Vec<Cookie>, CookieJarError>;

    /// Stores `cookies` received from `url`.
    ///
    /// Expired cookies are purged first. An incoming cookie replaces any
    /// stored cookie with the same name, domain and path; an incoming cookie
    /// that is already expired only deletes.
    async fn save(&self, url: &Url, cookies: Vec<Cookie>) -> Result<(), CookieJarError>;

    async fn clear(&self) -> Result<(), CookieJarError>;
}

/// In-memory jar, sharded by cookie domain.
pub struct MemoryCookieJar {
    cookies: DashMap<String, Vec<Cookie>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryCookieJar {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryCookieJar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCookieJar")
            .field("domains", &self.cookies.len())
            .field("cookies", &self.len())
            .finish()
    }
}

impl MemoryCookieJar {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            cookies: DashMap::new(),
            clock,
        }
    }

    /// Number of stored cookies, expired ones included until the next save.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cookies.iter().map(|entry| entry.value().len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `a.b.example.com` yields itself, `b.example.com`, `example.com` and `com`.
fn candidate_domains(host: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(Some(host), |&domain| {
        domain.split_once('.').map(|(_, parent)| parent)
    })
}

#[async_trait]
impl CookieJar for MemoryCookieJar {
    async fn load(&self, url: &Url) -> Result<Vec<Cookie>, CookieJarError> {
        let Some(host) = url.host_str() else {
            return Ok(Vec::new());
        };
        let host = host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_ascii_lowercase();
        let now = self.clock.now();

        let mut found = Vec::new();
        for domain in candidate_domains(&host) {
            if let Some(stored) = self.cookies.get(domain) {
                found.extend(
                    stored
                        .iter()
                        .filter(|cookie| !cookie.is_expired(now) && cookie.matches(url))
                        .cloned(),
                );
            }
        }
        // Longer paths first, as user agents send them.
        found.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
        Ok(found)
    }

    async fn save(&self, url: &Url, cookies: Vec<Cookie>) -> Result<(), CookieJarError> {
        let now = self.clock.now();
        self.cookies.retain(|_, stored| {
            stored.retain(|cookie| !cookie.is_expired(now));
            !stored.is_empty()
        });

        for cookie in cookies {
            let domain = cookie.domain.clone();
            let emptied = {
                let mut stored = self.cookies.entry(domain.clone()).or_default();
                stored.retain(|existing| !existing.same_identity(&cookie));
                if cookie.is_expired(now) {
                    debug!(name = %cookie.name, %domain, "expired cookie removed");
                } else {
                    debug!(name = %cookie.name, %domain, path = %cookie.path, "cookie stored");
                    stored.push(cookie);
                }
                stored.is_empty()
            };
            if emptied {
                self.cookies.remove_if(&domain, |_, stored| stored.is_empty());
            }
        }
        debug!(host = url.host_str().unwrap_or_default(), total = self.len(), "cookie jar updated");
        Ok(())
    }

    async fn clear(&self) -> Result<(), CookieJarError> {
        self.cookies.clear();
        Ok(())
    }
}
