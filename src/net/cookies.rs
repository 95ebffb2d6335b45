//! Server session cookie tracking.
//!
//! Only `name=value` pairs are kept; domain/path attributes are ignored since
//! every request targets the single configured API origin.

#[cfg(test)]
#[path = "cookies_test.rs"]
mod cookies_test;

use std::collections::BTreeMap;

use cookie::Cookie;
use time::{Duration, OffsetDateTime};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionCookies {
    pairs: BTreeMap<String, String>,
}

impl SessionCookies {
    /// Parse a `Cookie` request-header value (`"a=1; b=2"`).
    #[must_use]
    pub fn from_header(raw: &str) -> Self {
        let pairs = Cookie::split_parse(raw)
            .filter_map(Result::ok)
            .map(|cookie| (cookie.name().to_owned(), unquote(cookie.value()).to_owned()))
            .filter(|(name, value)| !name.is_empty() && !value.is_empty())
            .collect();
        Self { pairs }
    }

    /// Apply one `Set-Cookie` response-header value. Returns true if the
    /// stored pairs changed.
    pub fn apply_set_cookie(&mut self, raw: &str) -> bool {
        let Ok(cookie) = Cookie::parse(raw) else {
            return false;
        };
        let name = cookie.name();
        if name.is_empty() {
            return false;
        }

        let value = unquote(cookie.value());
        if value.is_empty() || is_expired(&cookie, OffsetDateTime::now_utc()) {
            return self.pairs.remove(name).is_some();
        }
        self.pairs.insert(name.to_owned(), value.to_owned()).as_deref() != Some(value)
    }

    /// Render as a `Cookie` request-header value, or `None` when empty.
    #[must_use]
    pub fn header_value(&self) -> Option<String> {
        if self.pairs.is_empty() {
            return None;
        }
        let joined = self
            .pairs
            .iter()
            .map(|(name, value)| Cookie::new(name.as_str(), value.as_str()).to_string())
            .collect::<Vec<_>>()
            .join("; ");
        Some(joined)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs.get(name).map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
    }
}

/// Servers clear a cookie with `Max-Age=0` or an `Expires` date in the past.
fn is_expired(cookie: &Cookie<'_>, now: OffsetDateTime) -> bool {
    cookie.max_age().is_some_and(|age| age <= Duration::ZERO)
        || cookie.expires_datetime().is_some_and(|at| at <= now)
}

fn unquote(value: &str) -> &str {
    value.trim_matches('"')
}
