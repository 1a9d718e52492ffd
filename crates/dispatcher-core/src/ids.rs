//! Branded ID newtypes.
//!
//! [`CallId`] wraps the UUID v4 string carried in the envelope `id` field, so
//! a call id cannot be confused with any other string. [`HandlerCookie`] is
//! the opaque handle returned by event handler registration.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier correlating an RPC call with its response.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    /// Generate a fresh random id (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an id received from the wire.
    #[must_use]
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume self and return the inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<str> for CallId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CallId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

static NEXT_COOKIE: AtomicU64 = AtomicU64::new(1);

/// Opaque handle identifying one event handler registration.
///
/// Cookies are process-unique and increase monotonically, which the
/// dispatcher relies on to keep handlers in registration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandlerCookie(u64);

impl HandlerCookie {
    /// Allocate the next cookie.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_COOKIE.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for HandlerCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cookie-{}", self.0)
    }
}
