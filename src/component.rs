//! Component trust context
//!
//! [`Component`] owns everything a component process needs to authenticate
//! itself and its callers: identity and key material, the issuer registry,
//! issuer token keys, and the validators built on them. Nothing is global;
//! share it behind an `Arc`.

use std::{sync::Arc, time::Duration};

use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::auth_server::AuthServerRegistry;
use crate::config::Config;
use crate::credentials::CredentialBuilder;
use crate::discovery::{Announcement, Discovery};
use crate::exchange::AppKeyExchanger;
use crate::identity::{Identity, IdentityManager, TlsCredential};
use crate::metadata::Metadata;
use crate::peer::{PeerTrust, PeerTrustValidator};
use crate::token_key::{HttpTokenKeyProvider, TokenKeyCache, TokenKeyProvider};
use crate::user::{EndUserValidator, TrustClaims};
use crate::Result;

/// A component's trust context
#[derive(Debug)]
pub struct Component {
    identity: IdentityManager,
    registry: Arc<AuthServerRegistry>,
    token_keys: Arc<dyn TokenKeyProvider>,
    credentials: CredentialBuilder,
    peers: PeerTrustValidator,
    users: EndUserValidator,
    exchanger: AppKeyExchanger,
}

impl Component {
    /// Initialize from configuration
    ///
    /// Parses the issuer registry, loads key material (fatal on failure),
    /// warms issuer keys from the cache and attempts one refresh. A failed
    /// refresh is logged, not fatal.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for a malformed registry or missing key, and
    /// `Error::Tls` if TLS is enabled and the credential cannot be built.
    pub async fn init(config: &Config, discovery: Arc<dyn Discovery>) -> Result<Self> {
        let registry = Arc::new(AuthServerRegistry::from_config(
            &config.auth.servers,
            config.auth.default_server.as_deref(),
        )?);
        let identity = IdentityManager::init(&config.identity, &config.key_dir, config.use_tls)?;

        let provider = HttpTokenKeyProvider::new(
            Arc::clone(&registry),
            Some(TokenKeyCache::new(&config.key_dir)),
            config.auth.request_timeout,
        )?;
        let exchanger = AppKeyExchanger::new(Arc::clone(&registry), config.auth.request_timeout)?;

        let component = Self::from_parts(
            identity,
            registry,
            Arc::new(provider),
            discovery,
            exchanger,
        );

        if let Err(e) = component.token_keys.update().await {
            warn!(error = %e, "Initial token key update failed");
        }

        info!(
            id = %component.identity().id,
            issuers = component.registry.len(),
            "Component trust initialized"
        );
        Ok(component)
    }

    /// Assemble from already-built parts
    pub fn from_parts(
        identity: IdentityManager,
        registry: Arc<AuthServerRegistry>,
        token_keys: Arc<dyn TokenKeyProvider>,
        discovery: Arc<dyn Discovery>,
        exchanger: AppKeyExchanger,
    ) -> Self {
        let credentials = CredentialBuilder::new(identity.identity(), Some(identity.signer()));
        Self {
            credentials,
            peers: PeerTrustValidator::new(discovery),
            users: EndUserValidator::new(Some(Arc::clone(&token_keys))),
            identity,
            registry,
            token_keys,
            exchanger,
        }
    }

    /// This component's identity
    pub fn identity(&self) -> Arc<Identity> {
        self.identity.identity()
    }

    /// Announcement this component publishes to the registry
    pub fn announcement(&self) -> Announcement {
        Announcement::from(&*self.identity())
    }

    /// TLS credential, if enabled
    pub fn tls(&self) -> Option<&TlsCredential> {
        self.identity.tls()
    }

    /// Issuer registry
    pub fn registry(&self) -> &Arc<AuthServerRegistry> {
        &self.registry
    }

    /// Issuer token keys
    pub fn token_keys(&self) -> &Arc<dyn TokenKeyProvider> {
        &self.token_keys
    }

    /// Outgoing credential builder
    pub fn credentials(&self) -> &CredentialBuilder {
        &self.credentials
    }

    /// Peer trust validator
    pub fn peer_validator(&self) -> &PeerTrustValidator {
        &self.peers
    }

    /// End-user token validator
    pub fn user_validator(&self) -> &EndUserValidator {
        &self.users
    }

    /// Sign a short-lived token for an outbound call
    ///
    /// # Errors
    ///
    /// See [`CredentialBuilder::build_token`].
    pub fn build_token(&self) -> Result<String> {
        self.credentials.build_token()
    }

    /// Metadata for an outbound call
    pub fn outgoing_context(&self, explicit_token: Option<&str>) -> Metadata {
        self.credentials.build_outgoing_context(explicit_token)
    }

    /// Validate an inbound call from another component
    ///
    /// # Errors
    ///
    /// See [`PeerTrustValidator::validate`].
    pub async fn validate_peer(&self, md: &Metadata) -> Result<PeerTrust> {
        self.peers.validate(md).await
    }

    /// Validate an inbound end-user call
    ///
    /// # Errors
    ///
    /// See [`EndUserValidator::validate`].
    pub fn validate_user(&self, md: &Metadata) -> Result<TrustClaims> {
        self.users.validate(md)
    }

    /// Exchange an app key for a bearer token
    ///
    /// # Errors
    ///
    /// See [`AppKeyExchanger::exchange`].
    pub async fn exchange_app_key(&self, app_id: &str, key: &str) -> Result<String> {
        self.exchanger.exchange(app_id, key).await
    }

    /// Refresh issuer token keys now
    ///
    /// # Errors
    ///
    /// Returns an error only if every issuer failed.
    pub async fn update_token_keys(&self) -> Result<()> {
        self.token_keys.update().await
    }

    /// Spawn a background task that refreshes issuer keys every `interval`.
    ///
    /// The first refresh happens one `interval` from now. The task exits when
    /// the `shutdown` receiver fires.
    pub fn spawn_token_key_refresh(
        &self,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let provider = Arc::clone(&self.token_keys);
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = provider.update().await {
                            warn!(error = %e, "Token key refresh failed");
                        }
                    }
                    _ = shutdown.recv() => {
                        debug!("Token key refresh shutting down");
                        break;
                    }
                }
            }
        })
    }
}
