//! Peer-to-peer trust validation
//!
//! An inbound call from another component carries `id`, `service-name` and
//! (usually) `token`. The caller's announcement is looked up in discovery and,
//! when it publishes a public key, the token is verified against that key.
//!
//! Every failure is delayed by one second before it is returned. The delay is
//! a timer local to the failing call, so concurrent validations never wait on
//! each other.

use std::{sync::Arc, time::Duration};

use tracing::{debug, warn};

use crate::discovery::{Announcement, Discovery};
use crate::metadata::{self, Metadata};
use crate::token::{self, ShortLivedClaims};
use crate::{Error, Result};

/// Delay applied before returning any validation failure
pub const FAILURE_DELAY: Duration = Duration::from_secs(1);

/// Outcome of a successful peer validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerTrust {
    /// The registry admitted the peer but it publishes no public key, so the
    /// claim cannot be checked cryptographically. Trust rests on the registry.
    Unverified(Announcement),
    /// The peer's token verified against its announced key
    Verified {
        /// The peer's announcement
        announcement: Announcement,
        /// Claims of the peer's token
        claims: ShortLivedClaims,
    },
}

impl PeerTrust {
    /// The peer's announcement
    pub fn announcement(&self) -> &Announcement {
        match self {
            Self::Unverified(announcement) | Self::Verified { announcement, .. } => announcement,
        }
    }

    /// Whether the token was cryptographically verified
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified { .. })
    }
}

/// Validates inbound calls from other components
#[derive(Clone)]
pub struct PeerTrustValidator {
    discovery: Arc<dyn Discovery>,
    failure_delay: Duration,
}

impl PeerTrustValidator {
    /// Create a validator over `discovery`
    pub fn new(discovery: Arc<dyn Discovery>) -> Self {
        Self {
            discovery,
            failure_delay: FAILURE_DELAY,
        }
    }

    /// Override the failure delay
    #[must_use]
    pub fn with_failure_delay(mut self, delay: Duration) -> Self {
        self.failure_delay = delay;
        self
    }

    /// Validate the caller described by `md`
    ///
    /// # Errors
    ///
    /// - `Error::InvalidArgument` for missing `id`/`service-name`, a missing
    ///   token when the peer publishes a key, or an issuer mismatch
    /// - the discovery error, unchanged, if the lookup fails
    /// - `Error::Token` if the token fails signature or expiry checks
    pub async fn validate(&self, md: &Metadata) -> Result<PeerTrust> {
        let result = self.check(md).await;

        if let Err(e) = &result {
            warn!(
                id = md.get_single(metadata::ID).unwrap_or_default(),
                service_name = md.get_single(metadata::SERVICE_NAME).unwrap_or_default(),
                error = %e,
                "Peer validation failed"
            );
            tokio::time::sleep(self.failure_delay).await;
        }

        result
    }

    async fn check(&self, md: &Metadata) -> Result<PeerTrust> {
        let id = md
            .get_single(metadata::ID)
            .ok_or_else(|| Error::invalid_argument("Metadata", "id missing"))?;
        let service_name = md
            .get_single(metadata::SERVICE_NAME)
            .ok_or_else(|| Error::invalid_argument("Metadata", "service-name missing"))?;
        let token = md.get_single(metadata::TOKEN);

        let announcement = self.discovery.get(service_name, id).await?;

        if announcement.public_key.is_empty() {
            debug!(id = %id, service_name = %service_name, "Peer publishes no key, trusting registration");
            return Ok(PeerTrust::Unverified(announcement));
        }

        let token = token.ok_or_else(|| Error::invalid_argument("Metadata", "token missing"))?;
        let claims = token::verify_peer_token(token, &announcement.public_key)?;

        if claims.iss != id {
            return Err(Error::invalid_argument(
                "Metadata",
                "token was issued by different component id",
            ));
        }

        debug!(id = %id, service_name = %service_name, "Peer verified");
        Ok(PeerTrust::Verified {
            announcement,
            claims,
        })
    }
}

impl std::fmt::Debug for PeerTrustValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerTrustValidator")
            .field("failure_delay", &self.failure_delay)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::InMemoryDiscovery;
    use crate::identity::{ComponentKey, KeyAlgorithm};
    use crate::token::Signer;
    use tokio::time::Instant;

    struct Peer {
        key: ComponentKey,
        signer: Signer,
    }

    impl Peer {
        fn new() -> Self {
            let key = ComponentKey::generate(KeyAlgorithm::Es256).unwrap();
            let signer = key.signer().unwrap();
            Self { key, signer }
        }

        fn token(&self, iss: &str) -> String {
            token::sign(&ShortLivedClaims::new(iss, token::now_secs()), &self.signer).unwrap()
        }

        fn announcement(&self, id: &str) -> Announcement {
            Announcement {
                id: id.into(),
                service_name: "broker".into(),
                net_address: "b:1".into(),
                public_key: self.key.public_key_pem(),
                ..Announcement::default()
            }
        }
    }

    fn md(id: &str, token: Option<&str>) -> Metadata {
        let mut md = Metadata::new();
        md.insert(metadata::ID, id);
        md.insert(metadata::SERVICE_NAME, "broker");
        if let Some(t) = token {
            md.insert(metadata::TOKEN, t);
        }
        md
    }

    fn validator(discovery: InMemoryDiscovery) -> PeerTrustValidator {
        PeerTrustValidator::new(Arc::new(discovery))
    }

    #[tokio::test(start_paused = true)]
    async fn verified_peer() {
        // GIVEN: a registered peer with a key and a fresh token
        let peer = Peer::new();
        let discovery = InMemoryDiscovery::new();
        discovery.register(peer.announcement("b1"));

        // WHEN: validating
        let trust = validator(discovery)
            .validate(&md("b1", Some(&peer.token("b1"))))
            .await
            .unwrap();

        // THEN: verified with claims
        assert!(trust.is_verified());
        assert_eq!(trust.announcement().id, "b1");
        let PeerTrust::Verified { claims, .. } = trust else {
            panic!("expected verified");
        };
        assert_eq!(claims.iss, "b1");
    }

    #[tokio::test(start_paused = true)]
    async fn keyless_peer_is_unverified() {
        let discovery = InMemoryDiscovery::new();
        discovery.register(Announcement {
            id: "b1".into(),
            service_name: "broker".into(),
            ..Announcement::default()
        });

        let trust = validator(discovery).validate(&md("b1", None)).await.unwrap();
        assert!(matches!(trust, PeerTrust::Unverified(a) if a.id == "b1"));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_id_is_invalid_argument() {
        let mut md = Metadata::new();
        md.insert(metadata::SERVICE_NAME, "broker");
        let err = validator(InMemoryDiscovery::new())
            .validate(&md)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { reason, .. } if reason == "id missing"));
    }

    #[tokio::test(start_paused = true)]
    async fn multi_valued_service_name_is_missing() {
        let mut md = md("b1", None);
        md.append(metadata::SERVICE_NAME, "router");
        let err = validator(InMemoryDiscovery::new())
            .validate(&md)
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::InvalidArgument { reason, .. } if reason == "service-name missing")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_peer_propagates_discovery_error() {
        let err = validator(InMemoryDiscovery::new())
            .validate(&md("ghost", None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { id, .. } if id == "ghost"));
    }

    #[tokio::test(start_paused = true)]
    async fn keyed_peer_without_token() {
        let peer = Peer::new();
        let discovery = InMemoryDiscovery::new();
        discovery.register(peer.announcement("b1"));

        let err = validator(discovery)
            .validate(&md("b1", None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { reason, .. } if reason == "token missing"));
    }

    #[tokio::test(start_paused = true)]
    async fn token_from_other_component_rejected() {
        // GIVEN: a token signed with b1's key but issued as b2
        let peer = Peer::new();
        let discovery = InMemoryDiscovery::new();
        discovery.register(peer.announcement("b1"));

        // WHEN: presenting it as b1
        let err = validator(discovery)
            .validate(&md("b1", Some(&peer.token("b2"))))
            .await
            .unwrap_err();

        // THEN
        assert!(matches!(
            err,
            Error::InvalidArgument { reason, .. } if reason == "token was issued by different component id"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn token_signed_by_wrong_key_rejected() {
        let registered = Peer::new();
        let impostor = Peer::new();
        let discovery = InMemoryDiscovery::new();
        discovery.register(registered.announcement("b1"));

        let err = validator(discovery)
            .validate(&md("b1", Some(&impostor.token("b1"))))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Token(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_is_delayed_one_second() {
        let start = Instant::now();
        let result = validator(InMemoryDiscovery::new())
            .validate(&md("ghost", None))
            .await;
        assert!(result.is_err());
        assert!(start.elapsed() >= FAILURE_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn success_is_not_delayed() {
        let discovery = InMemoryDiscovery::new();
        discovery.register(Announcement {
            id: "b1".into(),
            service_name: "broker".into(),
            ..Announcement::default()
        });

        let start = Instant::now();
        validator(discovery).validate(&md("b1", None)).await.unwrap();
        assert!(start.elapsed() < FAILURE_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_failures_are_not_serialized() {
        // GIVEN: ten failing validations started together
        let validator = validator(InMemoryDiscovery::new());
        let start = Instant::now();

        // WHEN: awaiting them all
        let results = futures::future::join_all(
            (0..10).map(|i| {
                let validator = validator.clone();
                async move { validator.validate(&md(&format!("ghost-{i}"), None)).await }
            }),
        )
        .await;

        // THEN: total time is one delay, not ten
        assert!(results.iter().all(Result::is_err));
        assert!(start.elapsed() < FAILURE_DELAY * 2);
    }
}
