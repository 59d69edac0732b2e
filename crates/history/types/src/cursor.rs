//! Opaque pagination cursors.

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// An opaque continuation token returned by a paginated read.
///
/// The token is defined by the storage backend. Application code only passes it back
/// to fetch the next page and never inspects or builds one itself. It serializes as the
/// bare token string, so it can be handed to callers and returned unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    /// Wraps a backend continuation token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token, for backend implementations.
    pub fn as_token(&self) -> &str {
        &self.0
    }
}

/// A single page of results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    /// The items in this page.
    pub items: Vec<T>,
    /// Cursor for the next page. `None` marks the final page.
    pub next: Option<Cursor>,
}

impl<T> Page<T> {
    /// Creates a new [`Page`].
    pub const fn new(items: Vec<T>, next: Option<Cursor>) -> Self {
        Self { items, next }
    }

    /// Returns `true` if this is the final page.
    pub const fn is_last(&self) -> bool {
        self.next.is_none()
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self { items: Vec::new(), next: None }
    }
}
