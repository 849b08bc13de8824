//! Discovery registry boundary
//!
//! The registry itself lives elsewhere; this crate only looks announcements up.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A component's registration as published to the discovery registry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Announcement {
    /// Component id
    pub id: String,
    /// Service class
    pub service_name: String,
    /// Reachable network address
    pub net_address: String,
    /// SPKI PEM public key; empty if the component publishes none
    pub public_key: String,
    /// Certificate PEM; may be empty
    pub certificate: String,
    /// Free-form registration metadata
    pub metadata: BTreeMap<String, String>,
}

/// Lookup of published announcements
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Find the announcement for `service_name`/`id`
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if none is registered, or `Error::Discovery`
    /// if the registry is unreachable.
    async fn get(&self, service_name: &str, id: &str) -> Result<Announcement>;
}

/// In-process registry for embedding and tests
#[derive(Debug, Default)]
pub struct InMemoryDiscovery {
    entries: DashMap<(String, String), Announcement>,
}

impl InMemoryDiscovery {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace an announcement
    pub fn register(&self, announcement: Announcement) {
        let key = (announcement.service_name.clone(), announcement.id.clone());
        self.entries.insert(key, announcement);
    }

    /// Remove an announcement, returning it if present
    pub fn deregister(&self, service_name: &str, id: &str) -> Option<Announcement> {
        self.entries
            .remove(&(service_name.to_string(), id.to_string()))
            .map(|(_, a)| a)
    }

    /// Number of registered announcements
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Discovery for InMemoryDiscovery {
    async fn get(&self, service_name: &str, id: &str) -> Result<Announcement> {
        self.entries
            .get(&(service_name.to_string(), id.to_string()))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::NotFound {
                service_name: service_name.to_string(),
                id: id.to_string(),
            })
    }
}
