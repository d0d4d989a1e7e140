//! A header map with case-insensitive keys.
//!
//! The same type is used for building outbound requests and for looking up inbound response
//! headers, so the encode and decode paths cannot diverge on key casing. Keys are normalized to
//! lower-case on insertion; lookups lower-case the query.

use std::collections::HashMap;

/// A mapping from lower-cased header name to header value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: HashMap<String, String>,
}

impl Headers {
    /// Create an empty header map.
    pub fn new() -> Headers {
        Headers::default()
    }

    /// Insert a header, replacing any previous value stored under the same name (compared
    /// case-insensitively). Empty names are silently ignored.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        if name.is_empty() {
            return;
        }
        self.entries.insert(name.to_lowercase(), value.into());
    }

    /// Look up a header by name, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Whether a header with the given name is present.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_lowercase())
    }

    /// Iterate over `(name, value)` pairs. Names are lower-cased.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of headers stored.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> Extend<(&'a str, &'a str)> for Headers {
    fn extend<T: IntoIterator<Item = (&'a str, &'a str)>>(&mut self, iter: T) {
        for (name, value) in iter {
            self.insert(name, value);
        }
    }
}
