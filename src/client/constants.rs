//! Default limits for the client, transport, retry and cache layers.

use std::time::Duration;

/// Default connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default per-attempt request timeout (5 minutes).
pub const REQUEST_TIMEOUT_SECS: u64 = 300;

/// Redirects followed before the transport gives up.
pub const MAX_REDIRECTS: usize = 10;

/// Maximum Retry-After header value (1 hour) to prevent excessive delays.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Entry bound of the default in-memory cache store.
pub const DEFAULT_MAX_CACHE_ENTRIES: usize = 256;

/// Accepted range for configured timeouts, in seconds.
pub const TIMEOUT_SECS_RANGE: std::ops::RangeInclusive<u64> = 1..=3600;

/// Upper bound for configured retries.
pub const MAX_CONFIGURED_RETRIES: u32 = 10;
