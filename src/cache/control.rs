//! `Cache-Control` response directive parsing.

use tracing::debug;

/// The subset of `Cache-Control` directives the cache acts on.
///
/// Parsing never fails: unknown directives are ignored and malformed values
/// are treated as absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub no_store: bool,
    pub no_cache: bool,
    /// `max-age` in seconds.
    pub max_age: Option<u64>,
    pub must_revalidate: bool,
    pub private: bool,
    pub public: bool,
}

/// Largest delta-seconds value honored; bigger values are clamped to it.
pub const MAX_DELTA_SECONDS: u64 = 1 << 31;

impl CacheControl {
    /// Parses a header value such as `public, max-age=60`.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let mut control = Self::default();
        for directive in value.split(',') {
            let directive = directive.trim();
            if directive.is_empty() {
                continue;
            }
            let (name, argument) = match directive.split_once('=') {
                Some((name, argument)) => (name.trim(), Some(argument.trim().trim_matches('"'))),
                None => (directive, None),
            };
            match name.to_ascii_lowercase().as_str() {
                "no-store" => control.no_store = true,
                "no-cache" => control.no_cache = true,
                "must-revalidate" => control.must_revalidate = true,
                "private" => control.private = true,
                "public" => control.public = true,
                "max-age" => match argument.map(str::parse::<u64>) {
                    Some(Ok(seconds)) => control.max_age = Some(seconds.min(MAX_DELTA_SECONDS)),
                    _ => debug!(directive, "ignoring malformed max-age"),
                },
                _ => {}
            }
        }
        control
    }
}
