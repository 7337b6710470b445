use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tracing::{debug, warn};
use url::Url;

use super::control::CacheControl;
use super::store::{CacheStore, CachedResponse};
use crate::client::RequestOptions;
use crate::clock::{Clock, SystemClock};
use crate::error::FetchError;
use crate::message::{Headers, Method, Request, RequestCache, Response};
use crate::middleware::{Middleware, Next};

type KeyFn = dyn Fn(&Method, &Url) -> String + Send + Sync;

/// `"<METHOD> <URL>"`.
#[must_use]
pub fn default_cache_key(method: &Method, url: &Url) -> String {
    format!("{method} {url}")
}

/// HTTP caching with conditional revalidation.
///
/// Per request:
/// 1. Non-cacheable methods and bypassed requests go straight to `next`.
/// 2. A fresh entry is returned without calling `next`.
/// 3. A stale entry with an ETag turns the request into a conditional one.
/// 4. A `304` refreshes the stale entry and returns the cached body.
/// 5. Otherwise the live response's `Cache-Control` decides what is stored.
pub struct CacheMiddleware {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    methods: HashSet<Method>,
    key_fn: Arc<KeyFn>,
}

impl fmt::Debug for CacheMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheMiddleware")
            .field("store", &self.store)
            .field("clock", &self.clock)
            .field("methods", &self.methods)
            .finish_non_exhaustive()
    }
}

impl CacheMiddleware {
    /// Caches `GET` and `HEAD` responses in `store`, keyed by
    /// [`default_cache_key`].
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            methods: [Method::GET, Method::HEAD].into_iter().collect(),
            key_fn: Arc::new(default_cache_key),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_key_fn<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&Method, &Url) -> String + Send + Sync + 'static,
    {
        self.key_fn = Arc::new(key_fn);
        self
    }

    fn bypassed(&self, request: &Request, options: &RequestOptions) -> bool {
        !self.methods.contains(request.method())
            || options.bypass_cache
            || request.cache() == RequestCache::NoStore
    }

    async fn lookup(&self, key: &str) -> Option<CachedResponse> {
        match self.store.read(key).await {
            Ok(entry) => entry,
            Err(error) => {
                warn!(%key, %error, "cache read failed, treating as miss");
                None
            }
        }
    }

    async fn remove(&self, key: &str) {
        if let Err(error) = self.store.delete(key).await {
            warn!(%key, %error, "cache delete failed");
        }
    }

    /// Stores `entry` if it carries an expiry or a validator, otherwise drops
    /// whatever was stored under `key`.
    async fn persist(&self, key: &str, entry: CachedResponse) {
        if !entry.is_storable() {
            self.remove(key).await;
            return;
        }
        debug!(%key, expires_at = ?entry.expires_at, etag = ?entry.etag, "storing response");
        if let Err(error) = self.store.write(key, entry).await {
            warn!(%key, %error, "cache write failed");
        }
    }

    async fn revalidated(&self, key: &str, cached: CachedResponse, not_modified: &Response) -> Response {
        let mut headers = cached.headers.clone();
        headers.extend_from(not_modified.headers());
        let now = self.clock.now();

        let refreshed = CachedResponse {
            headers,
            stored_at: now,
            ..cached
        };
        let control = cache_control(&refreshed.headers);
        let response = refreshed.to_response();
        if control.no_store {
            self.remove(key).await;
        } else {
            let etag = refreshed.headers.get("etag").or_else(|| refreshed.etag.clone());
            let expires_at = expiry(&control, now, etag.is_some());
            self.persist(
                key,
                CachedResponse {
                    expires_at,
                    etag,
                    ..refreshed
                },
            )
            .await;
        }
        response
    }

    async fn store_live(&self, key: &str, mut response: Response) -> Response {
        let control = cache_control(response.headers());
        if control.no_store {
            debug!(%key, "no-store response, dropping any cached entry");
            self.remove(key).await;
            return response;
        }
        if !response.ok() {
            return response;
        }

        let now = self.clock.now();
        let etag = response.headers().get("etag");
        let Some(expires_at) = expiry(&control, now, etag.is_some()) else {
            return response;
        };

        let copy = match response.try_clone() {
            Ok(copy) => copy,
            Err(error) => {
                warn!(%key, %error, "response body unavailable, not caching");
                return response;
            }
        };
        match copy.bytes().await {
            Ok(body) => {
                let entry = CachedResponse {
                    status: copy.status(),
                    status_text: copy.status_text().to_string(),
                    headers: copy.headers().clone(),
                    body,
                    url: copy.url().cloned(),
                    stored_at: now,
                    expires_at: Some(expires_at),
                    etag,
                };
                self.persist(key, entry).await;
            }
            Err(error) => debug!(%key, %error, "body read failed, not caching"),
        }
        response
    }
}

fn cache_control(headers: &Headers) -> CacheControl {
    headers
        .get("cache-control")
        .map(|value| CacheControl::parse(&value))
        .unwrap_or_default()
}

/// When a response stops being fresh, or `None` if it should not be stored.
///
/// `no-cache` and validator-only responses are stored already stale so every
/// later use revalidates. A lifetime the clock cannot represent is not stored.
fn expiry(control: &CacheControl, now: SystemTime, has_etag: bool) -> Option<SystemTime> {
    if control.no_cache {
        return Some(now);
    }
    if let Some(seconds) = control.max_age {
        return now.checked_add(Duration::from_secs(seconds));
    }
    has_etag.then_some(now)
}

#[async_trait]
impl Middleware for CacheMiddleware {
    fn name(&self) -> &str {
        "cache"
    }

    async fn intercept(
        &self,
        request: Request,
        options: &RequestOptions,
        next: Next<'_>,
    ) -> Result<Response, FetchError> {
        if self.bypassed(&request, options) {
            return next.run(request, options).await;
        }

        let key = (self.key_fn)(request.method(), request.url());
        let cached = match request.cache() {
            RequestCache::Reload => None,
            _ => self.lookup(&key).await,
        };

        if let Some(entry) = &cached {
            if request.cache() != RequestCache::NoCache && entry.is_fresh(self.clock.now()) {
                debug!(%key, "cache hit");
                return Ok(entry.to_response());
            }
        }

        let mut request = request;
        if let Some(etag) = cached.as_ref().and_then(|entry| entry.etag.clone()) {
            if !request.headers().has("if-none-match") {
                debug!(%key, %etag, "revalidating stale entry");
                request = request.with_header("If-None-Match", etag);
            }
        }

        let response = next.run(request, options).await?;

        if response.status() == 304 {
            if let Some(entry) = cached {
                debug!(%key, "not modified, serving refreshed entry");
                return Ok(self.revalidated(&key, entry, &response).await);
            }
            return Ok(response);
        }

        Ok(self.store_live(&key, response).await)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::cache::store::MemoryCacheStore;
    use crate::transport::Timeouts;
    use crate::transport::testing::ScriptedTransport;

    struct Harness {
        store: Arc<MemoryCacheStore>,
        clock: Arc<ManualClock>,
        chain: Vec<Arc<dyn Middleware>>,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(MemoryCacheStore::new(16));
            let clock = Arc::new(ManualClock::new(
                SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
            ));
            let middleware = CacheMiddleware::new(Arc::clone(&store) as Arc<dyn CacheStore>)
                .with_clock(Arc::clone(&clock) as Arc<dyn Clock>);
            Self {
                store,
                clock,
                chain: vec![Arc::new(middleware)],
            }
        }

        async fn fetch(&self, transport: &ScriptedTransport, request: Request) -> Response {
            self.fetch_with(transport, request, &RequestOptions::default())
                .await
        }

        async fn fetch_with(
            &self,
            transport: &ScriptedTransport,
            request: Request,
            options: &RequestOptions,
        ) -> Response {
            Next::new(&self.chain, transport, Timeouts::default())
                .run(request, options)
                .await
                .unwrap()
        }
    }

    fn get(path: &str) -> Request {
        Request::get(format!("https://api.example.com{path}").parse().unwrap())
    }

    fn respond(status: u16, headers: &[(&str, &str)], body: &'static str) -> Response {
        let mut builder = Response::builder(status).body(body);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.build()
    }

    #[tokio::test]
    async fn test_fresh_hit_skips_transport_then_revalidates_when_stale() {
        let harness = Harness::new();
        let transport = ScriptedTransport::new(|call, recorded| {
            if call == 0 {
                Ok(respond(
                    200,
                    &[("Cache-Control", "max-age=60"), ("ETag", "\"v1\"")],
                    "feed v1",
                ))
            } else {
                assert_eq!(
                    recorded.headers.get("if-none-match").as_deref(),
                    Some("\"v1\"")
                );
                Ok(respond(304, &[("Cache-Control", "max-age=60")], ""))
            }
        });

        let first = harness.fetch(&transport, get("/feed")).await;
        assert_eq!(first.text().await.unwrap(), "feed v1");

        harness.clock.advance(Duration::from_secs(30));
        let second = harness.fetch(&transport, get("/feed")).await;
        assert_eq!(second.text().await.unwrap(), "feed v1");
        assert_eq!(transport.calls(), 1, "fresh entry must not reach the transport");

        harness.clock.advance(Duration::from_secs(31));
        let third = harness.fetch(&transport, get("/feed")).await;
        assert_eq!(transport.calls(), 2);
        assert_eq!(third.status(), 200);
        assert_eq!(third.text().await.unwrap(), "feed v1");
    }

    #[tokio::test]
    async fn test_huge_max_age_is_clamped_not_fatal() {
        let harness = Harness::new();
        let transport = ScriptedTransport::new(|_, _| {
            Ok(respond(
                200,
                &[("Cache-Control", "max-age=18446744073709551615")],
                "forever",
            ))
        });

        let first = harness.fetch(&transport, get("/forever")).await;
        assert_eq!(first.status(), 200);
        assert_eq!(first.text().await.unwrap(), "forever");
        assert_eq!(harness.store.len(), 1);

        harness.clock.advance(Duration::from_secs(365 * 24 * 60 * 60));
        let second = harness.fetch(&transport, get("/forever")).await;
        assert_eq!(second.text().await.unwrap(), "forever");
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn test_expiry_beyond_clock_range_is_not_storable() {
        let control = CacheControl {
            max_age: Some(u64::MAX),
            ..CacheControl::default()
        };
        assert_eq!(expiry(&control, SystemTime::now(), true), None);
    }

    #[tokio::test]
    async fn test_not_modified_merges_headers_and_refreshes_expiry() {
        let harness = Harness::new();
        let transport = ScriptedTransport::new(|call, _| {
            Ok(match call {
                0 => respond(
                    200,
                    &[
                        ("Cache-Control", "no-cache"),
                        ("ETag", "\"v1\""),
                        ("Content-Type", "application/json"),
                    ],
                    "[1,2,3]",
                ),
                _ => respond(
                    304,
                    &[("Cache-Control", "max-age=120"), ("ETag", "\"v1\"")],
                    "",
                ),
            })
        });

        harness.fetch(&transport, get("/list")).await;
        let merged = harness.fetch(&transport, get("/list")).await;
        assert_eq!(merged.status(), 200);
        assert_eq!(
            merged.headers().get("content-type").as_deref(),
            Some("application/json")
        );
        assert_eq!(
            merged.headers().get("cache-control").as_deref(),
            Some("max-age=120")
        );
        assert_eq!(merged.text().await.unwrap(), "[1,2,3]");

        // Refreshed entry is now fresh for two minutes.
        harness.clock.advance(Duration::from_secs(60));
        harness.fetch(&transport, get("/list")).await;
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_no_store_is_never_retrievable() {
        let harness = Harness::new();
        let transport = ScriptedTransport::new(|call, _| {
            Ok(if call == 0 {
                respond(200, &[("Cache-Control", "max-age=600")], "cached")
            } else {
                respond(200, &[("Cache-Control", "no-store")], "secret")
            })
        });

        harness.fetch(&transport, get("/me")).await;
        assert!(harness.store.contains("GET https://api.example.com/me"));

        let options = RequestOptions {
            bypass_cache: true,
            ..RequestOptions::default()
        };
        harness.fetch_with(&transport, get("/me"), &options).await;
        assert!(harness.store.contains("GET https://api.example.com/me"));

        harness.clock.advance(Duration::from_secs(601));
        let fresh = harness.fetch(&transport, get("/me")).await;
        assert_eq!(fresh.text().await.unwrap(), "secret");
        assert!(!harness.store.contains("GET https://api.example.com/me"));

        harness.fetch(&transport, get("/me")).await;
        assert_eq!(transport.calls(), 4);
    }

    #[tokio::test]
    async fn test_no_cache_stored_immediately_stale() {
        let harness = Harness::new();
        let transport = ScriptedTransport::new(|_, _| {
            Ok(respond(200, &[("Cache-Control", "no-cache")], "body"))
        });
        harness.fetch(&transport, get("/nc")).await;
        let entry = harness
            .store
            .read("GET https://api.example.com/nc")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.expires_at, Some(harness.clock.now()));

        harness.fetch(&transport, get("/nc")).await;
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_uncacheable_responses_not_stored() {
        let harness = Harness::new();
        let transport = ScriptedTransport::new(|call, _| {
            Ok(match call {
                0 => respond(200, &[], "no directives"),
                _ => respond(500, &[("Cache-Control", "max-age=60")], "oops"),
            })
        });
        harness.fetch(&transport, get("/plain")).await;
        harness.fetch(&transport, get("/error")).await;
        assert!(harness.store.is_empty());
    }

    #[tokio::test]
    async fn test_etag_only_response_revalidates() {
        let harness = Harness::new();
        let transport = ScriptedTransport::new(|call, recorded| {
            if call == 1 {
                assert_eq!(
                    recorded.headers.get("If-None-Match").as_deref(),
                    Some("\"abc\"")
                );
            }
            Ok(respond(200, &[("ETag", "\"abc\"")], "v"))
        });
        harness.fetch(&transport, get("/etag")).await;
        harness.fetch(&transport, get("/etag")).await;
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_caller_if_none_match_not_overwritten() {
        let harness = Harness::new();
        let transport = ScriptedTransport::new(|call, recorded| {
            if call == 1 {
                assert_eq!(
                    recorded.headers.get("if-none-match").as_deref(),
                    Some("\"mine\"")
                );
            }
            Ok(respond(200, &[("ETag", "\"server\"")], "v"))
        });
        harness.fetch(&transport, get("/x")).await;
        harness
            .fetch(
                &transport,
                get("/x").with_header("If-None-Match", "\"mine\""),
            )
            .await;
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_non_cacheable_method_passes_through() {
        let harness = Harness::new();
        let transport = ScriptedTransport::new(|_, _| {
            Ok(respond(200, &[("Cache-Control", "max-age=60")], "created"))
        });
        let post = Request::new(
            Method::POST,
            "https://api.example.com/items".parse().unwrap(),
        );
        harness.fetch(&transport, post).await;
        assert!(harness.store.is_empty());
    }

    #[tokio::test]
    async fn test_request_cache_modes() {
        let harness = Harness::new();
        let transport = ScriptedTransport::new(|_, _| {
            Ok(respond(
                200,
                &[("Cache-Control", "max-age=60"), ("ETag", "\"e\"")],
                "v",
            ))
        });
        harness.fetch(&transport, get("/m")).await;

        harness
            .fetch(&transport, get("/m").with_cache(RequestCache::NoStore))
            .await;
        assert_eq!(transport.calls(), 2);

        harness
            .fetch(&transport, get("/m").with_cache(RequestCache::NoCache))
            .await;
        assert_eq!(transport.calls(), 3);
        let recorded = transport.requests();
        assert_eq!(
            recorded[2].headers.get("if-none-match").as_deref(),
            Some("\"e\"")
        );

        harness
            .fetch(&transport, get("/m").with_cache(RequestCache::Reload))
            .await;
        assert_eq!(transport.calls(), 4);
        assert!(!transport.requests()[3].headers.has("if-none-match"));

        harness.fetch(&transport, get("/m")).await;
        assert_eq!(transport.calls(), 4);
    }

    #[tokio::test]
    async fn test_custom_key_function() {
        let store = Arc::new(MemoryCacheStore::new(4));
        let middleware = CacheMiddleware::new(Arc::clone(&store) as Arc<dyn CacheStore>)
            .with_key_fn(|_, url| url.path().to_string());
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(middleware)];
        let transport = ScriptedTransport::new(|_, _| {
            Ok(respond(200, &[("Cache-Control", "max-age=60")], "v"))
        });
        Next::new(&chain, &transport, Timeouts::default())
            .run(get("/keyed?x=1"), &RequestOptions::default())
            .await
            .unwrap();
        assert!(store.contains("/keyed"));
    }
}
