//! Outgoing credentials
//!
//! Every outbound call carries four metadata keys: `service-name`, `id`,
//! `token` and `net-address`. The token is a fresh short-lived JWT unless the
//! caller supplies one.

use std::sync::Arc;

use tracing::debug;

use crate::identity::Identity;
use crate::metadata::{self, Metadata};
use crate::token::{self, ShortLivedClaims, Signer};
use crate::{Error, Result};

/// Builds short-lived tokens and outgoing request metadata
#[derive(Debug, Clone)]
pub struct CredentialBuilder {
    identity: Arc<Identity>,
    signer: Option<Arc<Signer>>,
}

impl CredentialBuilder {
    /// Create a builder for `identity`, signing with `signer` if present
    #[must_use]
    pub fn new(identity: Arc<Identity>, signer: Option<Arc<Signer>>) -> Self {
        Self { identity, signer }
    }

    /// Identity stamped onto outgoing requests
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Sign a 20 second token with `iss = sub = <own id>`
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` when no signing key is configured, or
    /// `Error::Token` if signing fails.
    pub fn build_token(&self) -> Result<String> {
        self.token_issued_at(token::now_secs())
    }

    fn token_issued_at(&self, now: u64) -> Result<String> {
        let signer = self
            .signer
            .as_deref()
            .ok_or_else(|| Error::Internal("no signing key configured".into()))?;
        let claims = ShortLivedClaims::new(&self.identity.id, now);
        token::sign(&claims, signer)
    }

    /// Build outgoing metadata
    ///
    /// An absent or empty `explicit_token` is replaced by a freshly built one.
    /// If building fails the request still goes out, with an empty token.
    pub fn build_outgoing_context(&self, explicit_token: Option<&str>) -> Metadata {
        let token = match explicit_token.filter(|t| !t.is_empty()) {
            Some(t) => t.to_string(),
            None => self.build_token().unwrap_or_else(|e| {
                debug!(id = %self.identity.id, error = %e, "Failed to build token, sending without one");
                String::new()
            }),
        };

        let mut md = Metadata::new();
        md.insert(metadata::SERVICE_NAME, self.identity.service_name.as_str());
        md.insert(metadata::ID, self.identity.id.as_str());
        md.insert(metadata::TOKEN, token);
        md.insert(metadata::NET_ADDRESS, self.identity.net_address.as_str());
        md
    }
}
