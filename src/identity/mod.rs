//! Component identity and key material
//!
//! [`IdentityManager::init`] loads the component key, derives the public key
//! and optionally builds a TLS credential. All material is immutable after
//! initialization. There is no silent key generation: a missing key is fatal.

pub mod keys;
pub mod tls;

use std::{collections::BTreeMap, path::Path, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::IdentityConfig;
use crate::discovery::Announcement;
use crate::token::Signer;
use crate::{Error, Result};

pub use keys::{ComponentKey, KeyAlgorithm, generate_keypair};
pub use tls::{CertInfo, TlsCredential, generate_certificate};

/// This component's identity as announced to peers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Unique component id
    pub id: String,
    /// Service class
    pub service_name: String,
    /// Reachable network address
    pub net_address: String,
    /// SPKI PEM public key
    pub public_key: String,
    /// Certificate chain PEM (empty without TLS)
    pub certificate: String,
}

impl From<&Identity> for Announcement {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id.clone(),
            service_name: identity.service_name.clone(),
            net_address: identity.net_address.clone(),
            public_key: identity.public_key.clone(),
            certificate: identity.certificate.clone(),
            metadata: BTreeMap::new(),
        }
    }
}

/// Owner of the component's key material
#[derive(Debug)]
pub struct IdentityManager {
    identity: Arc<Identity>,
    signer: Arc<Signer>,
    tls: Option<TlsCredential>,
}

impl IdentityManager {
    /// Load key material from `key_dir`
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the id is empty or the key cannot be loaded,
    /// and `Error::Tls` if `use_tls` is set and the credential cannot be built.
    pub fn init(config: &IdentityConfig, key_dir: &Path, use_tls: bool) -> Result<Self> {
        if config.id.is_empty() {
            return Err(Error::Config("identity.id is not configured".into()));
        }

        let key = ComponentKey::load(key_dir)?;
        let signer = key.signer()?;

        let tls = if use_tls {
            Some(TlsCredential::load(key_dir)?)
        } else {
            None
        };

        let identity = Identity {
            id: config.id.clone(),
            service_name: config.service_name.clone(),
            net_address: config.net_address.clone(),
            public_key: key.public_key_pem(),
            certificate: tls
                .as_ref()
                .map(|t| t.certificate_pem().to_string())
                .unwrap_or_default(),
        };

        info!(
            id = %identity.id,
            service_name = %identity.service_name,
            algorithm = %key.algorithm(),
            tls = use_tls,
            "Component identity loaded"
        );

        Ok(Self {
            identity: Arc::new(identity),
            signer: Arc::new(signer),
            tls,
        })
    }

    /// Shared identity
    pub fn identity(&self) -> Arc<Identity> {
        Arc::clone(&self.identity)
    }

    /// Token signer
    pub fn signer(&self) -> Arc<Signer> {
        Arc::clone(&self.signer)
    }

    /// TLS credential, if built
    pub fn tls(&self) -> Option<&TlsCredential> {
        self.tls.as_ref()
    }
}
