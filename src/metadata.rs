//! Request metadata
//!
//! A transport-neutral multimap of lowercase keys to string values, mirroring
//! RPC metadata. Converts to and from `http::HeaderMap`.

use std::collections::BTreeMap;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

use crate::{Error, Result};

/// Service name of the calling component
pub const SERVICE_NAME: &str = "service-name";
/// Id of the calling component
pub const ID: &str = "id";
/// Short-lived token (peer) or bearer token (end user)
pub const TOKEN: &str = "token";
/// Network address of the calling component
pub const NET_ADDRESS: &str = "net-address";
/// `authorization: Bearer <token>`
pub const AUTHORIZATION: &str = "authorization";

/// Multimap of request metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: BTreeMap<String, Vec<String>>,
}

impl Metadata {
    /// Create empty metadata
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to exactly one value, replacing existing values
    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.entries
            .insert(key.to_ascii_lowercase(), vec![value.into()]);
    }

    /// Add a value to `key`
    pub fn append(&mut self, key: &str, value: impl Into<String>) {
        self.entries
            .entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// All values of `key`
    pub fn get_all(&self, key: &str) -> &[String] {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The value of `key` if it has exactly one non-empty value
    pub fn get_single(&self, key: &str) -> Option<&str> {
        match self.get_all(key) {
            [value] if !value.is_empty() => Some(value.as_str()),
            _ => None,
        }
    }

    /// Keys in order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no keys
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read metadata from HTTP headers
    ///
    /// Non-UTF-8 header values are skipped.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut metadata = Self::new();
        for (name, value) in headers {
            match value.to_str() {
                Ok(v) => metadata.append(name.as_str(), v),
                Err(_) => debug!(header = %name, "Skipping non-UTF-8 header value"),
            }
        }
        metadata
    }

    /// Write metadata into HTTP headers
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if a key or value is not a valid header.
    pub fn to_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (key, values) in &self.entries {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| Error::invalid_argument("Metadata", format!("{key}: {e}")))?;
            for value in values {
                let value = HeaderValue::from_str(value)
                    .map_err(|e| Error::invalid_argument("Metadata", format!("{key}: {e}")))?;
                headers.append(name.clone(), value);
            }
        }
        Ok(headers)
    }
}

impl From<&HeaderMap> for Metadata {
    fn from(headers: &HeaderMap) -> Self {
        Self::from_headers(headers)
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut metadata = Self::new();
        for (k, v) in iter {
            metadata.append(k.as_ref(), v);
        }
        metadata
    }
}
