//! Case-insensitive, case-preserving header multimap.

use std::fmt;

/// Name of the header hidden from the generic accessors.
const SET_COOKIE: &str = "set-cookie";

/// Header names whose values are redacted in `Debug` output.
const SENSITIVE: [&str; 4] = ["authorization", "cookie", "proxy-authorization", SET_COOKIE];

/// An ordered multimap of header name/value pairs.
///
/// Lookups ignore ASCII case; storage keeps the name exactly as inserted so
/// iteration reproduces what the caller wrote. `Set-Cookie` values are
/// excluded from [`get`](Self::get), [`has`](Self::has) and [`iter`](Self::iter)
/// and are only reachable through [`get_set_cookie`](Self::get_set_cookie).
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

fn is_set_cookie(name: &str) -> bool {
    name.eq_ignore_ascii_case(SET_COOKIE)
}

impl Headers {
    /// Creates an empty header set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all values for `name` joined with `", "`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        if is_set_cookie(name) {
            return None;
        }
        let mut values = self
            .entries
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str());
        let first = values.next()?;
        Some(values.fold(first.to_string(), |mut joined, value| {
            joined.push_str(", ");
            joined.push_str(value);
            joined
        }))
    }

    /// Returns true if at least one value exists for `name`.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        !is_set_cookie(name) && self.entries.iter().any(|(key, _)| key.eq_ignore_ascii_case(name))
    }

    /// Replaces every value for `name` with `value`.
    ///
    /// The first existing entry keeps its position; the others are removed.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        let mut slot = None;
        let mut index = 0;
        self.entries.retain(|(key, _)| {
            let matches = key.eq_ignore_ascii_case(&name);
            let keep = !matches || slot.is_none();
            if matches && slot.is_none() {
                slot = Some(index);
            }
            if keep {
                index += 1;
            }
            keep
        });
        match slot {
            Some(position) => self.entries[position] = (name, value),
            None => self.entries.push((name, value)),
        }
    }

    /// Adds a value for `name`, keeping existing ones.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Removes every value for `name`.
    pub fn delete(&mut self, name: &str) {
        self.entries.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
    }

    /// Returns every `Set-Cookie` value in arrival order.
    #[must_use]
    pub fn get_set_cookie(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(key, _)| is_set_cookie(key))
            .map(|(_, value)| value.as_str())
            .collect()
    }

    /// Iterates over name/value pairs, skipping `Set-Cookie`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .filter(|(key, _)| !is_set_cookie(key))
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Iterates over every pair including `Set-Cookie`, for transports that
    /// must put the full set on the wire.
    pub fn iter_raw(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Overwrites this set with every name present in `other`.
    ///
    /// Names absent from `other` are left untouched; names present in `other`
    /// lose all of their previous values.
    pub fn extend_from(&mut self, other: &Headers) {
        for (name, _) in &other.entries {
            self.delete(name);
        }
        self.entries.extend(other.entries.iter().cloned());
    }

    /// Number of stored entries, `Set-Cookie` included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, value) in &self.entries {
            if SENSITIVE.iter().any(|sensitive| name.eq_ignore_ascii_case(sensitive)) {
                map.entry(name, &"[REDACTED]");
            } else {
                map.entry(name, value);
            }
        }
        map.finish()
    }
}

impl<N, V> FromIterator<(N, V)> for Headers
where
    N: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}
