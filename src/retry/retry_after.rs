//! `Retry-After` header parsing.

use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::client::constants::MAX_RETRY_AFTER;

/// Parses a `Retry-After` value given as delta-seconds or an HTTP-date.
///
/// Negative, past and unparseable values yield `None`. Values above one hour
/// are capped.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use fetcher_core::retry::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("soon"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    parse_retry_after_at(header_value, SystemTime::now())
}

pub(crate) fn parse_retry_after_at(header_value: &str, now: SystemTime) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }

        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        return Some(cap(duration));
    }

    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        return match datetime.duration_since(now) {
            Ok(duration) => Some(cap(duration)),
            Err(_) => {
                debug!(value = header_value, "Retry-After date is in the past, ignoring");
                None
            }
        };
    }

    debug!(value = header_value, "unparseable Retry-After value, ignoring");
    None
}

fn cap(duration: Duration) -> Duration {
    if duration > MAX_RETRY_AFTER {
        warn!(
            delay_secs = duration.as_secs(),
            max_secs = MAX_RETRY_AFTER.as_secs(),
            "Retry-After exceeds maximum, capping at 1 hour"
        );
        return MAX_RETRY_AFTER;
    }
    duration
}
