//! End-user bearer token validation
//!
//! Tokens are issued by one of the registered auth servers. The unverified
//! `iss` claim selects the cached issuer key; the token is then verified
//! against it. All rejections surface as an opaque `PermissionDenied`.

use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::metadata::{self, Metadata};
use crate::token;
use crate::token_key::TokenKeyProvider;
use crate::{Error, Result};

/// Claims of a validated end-user token
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustClaims {
    /// Issuer id
    pub iss: String,
    /// Subject (user or app id)
    pub sub: String,
    /// Subject type (e.g. `user`, `app`)
    #[serde(rename = "type")]
    pub subject_type: String,
    /// OAuth client that obtained the token
    pub client: String,
    /// Granted scopes
    pub scope: Vec<String>,
    /// Application id -> rights
    pub apps: BTreeMap<String, Vec<String>>,
    /// Gateway id -> rights
    pub gateways: BTreeMap<String, Vec<String>>,
    /// Component id -> rights
    pub components: BTreeMap<String, Vec<String>>,
    /// Expiry (Unix seconds)
    pub exp: u64,
    /// Issued at (Unix seconds)
    pub iat: u64,
}

impl TrustClaims {
    /// Rights granted on `app_id`
    pub fn app_rights(&self, app_id: &str) -> &[String] {
        self.apps
            .get(app_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Whether `right` is granted on `app_id`
    pub fn has_app_right(&self, app_id: &str, right: &str) -> bool {
        self.app_rights(app_id).iter().any(|r| r == right)
    }

    /// Whether `scope` was granted
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope.iter().any(|s| s == scope)
    }
}

/// Extract the end-user token from request metadata
///
/// `authorization: Bearer <token>` wins when single-valued; otherwise the
/// single-valued `token` key is used.
///
/// # Errors
///
/// Returns `Error::InvalidArgument("token missing")` if neither is present.
pub fn token_from_metadata(md: &Metadata) -> Result<&str> {
    let bearer = md.get_single(metadata::AUTHORIZATION).and_then(|value| {
        value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
    });

    bearer
        .or_else(|| md.get_single(metadata::TOKEN))
        .ok_or_else(|| Error::invalid_argument("Metadata", "token missing"))
}

/// Validates end-user bearer tokens against cached issuer keys
#[derive(Clone, Default)]
pub struct EndUserValidator {
    provider: Option<Arc<dyn TokenKeyProvider>>,
}

impl EndUserValidator {
    /// Create a validator; without a provider every validation is an internal error
    pub fn new(provider: Option<Arc<dyn TokenKeyProvider>>) -> Self {
        Self { provider }
    }

    /// Validate the end-user token carried by `md`
    ///
    /// # Errors
    ///
    /// - `Error::InvalidArgument` if no token is present
    /// - `Error::Internal` if no key provider is configured
    /// - `Error::PermissionDenied` for any token rejection
    pub fn validate(&self, md: &Metadata) -> Result<TrustClaims> {
        let token = token_from_metadata(md)?;
        let provider = self
            .provider
            .as_deref()
            .ok_or_else(|| Error::Internal("no token key provider configured".into()))?;

        validate_token(provider, token).map_err(|e| {
            debug!(error = %e, "End-user token rejected");
            Error::PermissionDenied("token is not valid".into())
        })
    }
}

impl std::fmt::Debug for EndUserValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndUserValidator")
            .field("provider", &self.provider.is_some())
            .finish()
    }
}

/// Verify `token` against the key of its (unverified) issuer
fn validate_token(provider: &dyn TokenKeyProvider, token: &str) -> Result<TrustClaims> {
    let issuer = token::unverified_issuer(token)?;
    let key = provider.lookup(&issuer)?;
    let algorithm = key.jwt_algorithm()?;

    let header = jsonwebtoken::decode_header(token)?;
    if header.alg != algorithm {
        return Err(
            jsonwebtoken::errors::Error::from(jsonwebtoken::errors::ErrorKind::InvalidAlgorithm)
                .into(),
        );
    }

    let claims: TrustClaims = token::verify(token, &key.key)?;
    debug!(issuer = %claims.iss, sub = %claims.sub, "End-user token accepted");
    Ok(claims)
}
