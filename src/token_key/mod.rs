//! Issuer public keys for end-user token validation
//!
//! Keys are fetched from every registered issuer (`GET <url>/key`), kept in an
//! in-memory map and written through to a file cache. Lookups are synchronous
//! and never wait on a refresh longer than a map read.

pub mod cache;

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::future::join_all;
use jsonwebtoken::Algorithm;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::auth_server::{AuthServerEndpoint, AuthServerRegistry};
use crate::token;
use crate::{Error, Result};

pub use cache::TokenKeyCache;

/// An issuer's token-signing public key, as served by the issuer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenKey {
    /// JWT algorithm name (e.g. `ES256`)
    pub algorithm: String,
    /// SPKI PEM public key
    pub key: String,
}

impl TokenKey {
    /// Create a token key
    pub fn new(algorithm: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            key: key.into(),
        }
    }

    /// Parsed JWT algorithm
    ///
    /// # Errors
    ///
    /// Returns `Error::Token(InvalidAlgorithm)` for unknown or symmetric algorithms.
    pub fn jwt_algorithm(&self) -> Result<Algorithm> {
        token::parse_algorithm(&self.algorithm).ok_or_else(|| {
            jsonwebtoken::errors::Error::from(jsonwebtoken::errors::ErrorKind::InvalidAlgorithm)
                .into()
        })
    }

    /// Check the algorithm is accepted and the key parses for it
    ///
    /// # Errors
    ///
    /// Returns `Error::Token` if not.
    pub fn validate(&self) -> Result<()> {
        token::decoding_key(self.jwt_algorithm()?, &self.key).map(|_| ())
    }

    /// Short SHA-256 fingerprint of the key, for logs
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.key.as_bytes());
        hex::encode(digest)[..16].to_string()
    }
}

/// Source of issuer token keys
#[async_trait]
pub trait TokenKeyProvider: Send + Sync {
    /// Refresh keys from their source
    ///
    /// # Errors
    ///
    /// Returns an error only if nothing could be refreshed.
    async fn update(&self) -> Result<()>;

    /// Current key for `issuer`
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyUnavailable` if no key is known.
    fn lookup(&self, issuer: &str) -> Result<Arc<TokenKey>>;

    /// Issuers with a known key
    fn issuers(&self) -> Vec<String>;
}

impl fmt::Debug for dyn TokenKeyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenKeyProvider")
            .field("issuers", &self.issuers())
            .finish()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// HTTP provider
// ────────────────────────────────────────────────────────────────────────────

/// Fetches keys from every registered issuer
pub struct HttpTokenKeyProvider {
    registry: Arc<AuthServerRegistry>,
    client: reqwest::Client,
    cache: Option<TokenKeyCache>,
    keys: RwLock<HashMap<String, Arc<TokenKey>>>,
}

impl HttpTokenKeyProvider {
    /// Create a provider, warming the key map from `cache`
    ///
    /// # Errors
    ///
    /// Returns `Error::Http` if the HTTP client cannot be built.
    pub fn new(
        registry: Arc<AuthServerRegistry>,
        cache: Option<TokenKeyCache>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self::with_client(registry, cache, client))
    }

    /// Create a provider with a preconfigured HTTP client
    pub fn with_client(
        registry: Arc<AuthServerRegistry>,
        cache: Option<TokenKeyCache>,
        client: reqwest::Client,
    ) -> Self {
        let provider = Self {
            registry,
            client,
            cache,
            keys: RwLock::new(HashMap::new()),
        };
        provider.warm_from_cache();
        provider
    }

    fn warm_from_cache(&self) {
        let Some(cache) = &self.cache else {
            return;
        };

        let mut warmed = 0usize;
        for issuer in self.registry.issuers() {
            let Some(key) = cache.load(issuer) else {
                continue;
            };
            if let Err(e) = key.validate() {
                warn!(issuer = %issuer, error = %e, "Ignoring unusable cached token key");
                continue;
            }
            self.keys.write().insert(issuer.to_string(), Arc::new(key));
            warmed += 1;
        }

        if warmed > 0 {
            info!(count = warmed, "Token keys loaded from cache");
        }
    }

    async fn fetch(&self, endpoint: &AuthServerEndpoint) -> Result<TokenKey> {
        let url = format!("{}/key", endpoint.url());
        debug!(issuer = %endpoint.issuer_id(), url = %url, "Fetching token key");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::IssuerStatus {
                issuer: endpoint.issuer_id().to_string(),
                status: status.as_u16(),
            });
        }

        let key: TokenKey = response.json().await?;
        key.validate()?;
        Ok(key)
    }

    fn store(&self, issuer: &str, key: TokenKey) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.save(issuer, &key) {
                warn!(issuer = %issuer, error = %e, "Failed to cache token key");
            }
        }

        let key = Arc::new(key);
        let previous = self.keys.write().insert(issuer.to_string(), Arc::clone(&key));
        if previous.as_deref() != Some(&*key) {
            info!(issuer = %issuer, fingerprint = %key.fingerprint(), "Token key updated");
        }
    }

    /// Number of issuers with a known key
    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    /// Whether no key is known
    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}

impl fmt::Debug for HttpTokenKeyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTokenKeyProvider")
            .field("issuers", &self.registry.len())
            .field("cached", &self.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenKeyProvider for HttpTokenKeyProvider {
    async fn update(&self) -> Result<()> {
        if self.registry.is_empty() {
            return Ok(());
        }

        let results = join_all(
            self.registry
                .iter()
                .map(|endpoint| async move { (endpoint.issuer_id(), self.fetch(endpoint).await) }),
        )
        .await;

        let mut failed = Vec::new();
        for (issuer, result) in results {
            match result {
                Ok(key) => self.store(issuer, key),
                Err(e) => {
                    warn!(issuer = %issuer, error = %e, "Failed to update token key, keeping previous");
                    failed.push(issuer);
                }
            }
        }

        if failed.len() == self.registry.len() {
            return Err(Error::KeyUnavailable(failed.join(", ")));
        }
        Ok(())
    }

    fn lookup(&self, issuer: &str) -> Result<Arc<TokenKey>> {
        self.keys
            .read()
            .get(issuer)
            .cloned()
            .ok_or_else(|| Error::KeyUnavailable(issuer.to_string()))
    }

    fn issuers(&self) -> Vec<String> {
        let mut issuers: Vec<String> = self.keys.read().keys().cloned().collect();
        issuers.sort();
        issuers
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Static provider
// ────────────────────────────────────────────────────────────────────────────

/// Fixed set of keys, for embedding without issuer endpoints
#[derive(Debug, Default)]
pub struct StaticTokenKeyProvider {
    keys: HashMap<String, Arc<TokenKey>>,
}

impl StaticTokenKeyProvider {
    /// Create an empty provider
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key for `issuer`
    #[must_use]
    pub fn with_key(mut self, issuer: impl Into<String>, key: TokenKey) -> Self {
        self.keys.insert(issuer.into(), Arc::new(key));
        self
    }
}

#[async_trait]
impl TokenKeyProvider for StaticTokenKeyProvider {
    async fn update(&self) -> Result<()> {
        Ok(())
    }

    fn lookup(&self, issuer: &str) -> Result<Arc<TokenKey>> {
        self.keys
            .get(issuer)
            .cloned()
            .ok_or_else(|| Error::KeyUnavailable(issuer.to_string()))
    }

    fn issuers(&self) -> Vec<String> {
        let mut issuers: Vec<String> = self.keys.keys().cloned().collect();
        issuers.sort();
        issuers
    }
}
