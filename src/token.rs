//! JWT signing and verification
//!
//! Only asymmetric algorithms are accepted. Validation uses zero clock leeway
//! and requires both `exp` and `iss`.

use std::{
    fmt,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use base64::Engine;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation,
    errors::{Error as JwtError, ErrorKind},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::Result;

/// Lifetime of a component-issued short-lived token
pub const SHORT_LIVED_TTL: Duration = Duration::from_secs(20);

/// Algorithms accepted for signing and verification
pub const ACCEPTED_ALGORITHMS: [Algorithm; 6] = [
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
];

/// Whether `alg` is an accepted asymmetric algorithm
#[must_use]
pub fn is_accepted(alg: Algorithm) -> bool {
    ACCEPTED_ALGORITHMS.contains(&alg)
}

/// Parse an algorithm name (`ES256`, `EdDSA`, ...) into an accepted algorithm
pub fn parse_algorithm(name: &str) -> Option<Algorithm> {
    name.parse::<Algorithm>().ok().filter(|alg| is_accepted(*alg))
}

/// Seconds since the Unix epoch
#[must_use]
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

// ────────────────────────────────────────────────────────────────────────────
// Signing
// ────────────────────────────────────────────────────────────────────────────

/// Private signing key of this component
pub struct Signer {
    algorithm: Algorithm,
    key: EncodingKey,
}

impl Signer {
    /// Build a signer from a PKCS#8 PEM private key
    ///
    /// # Errors
    ///
    /// Returns `Error::Token` for an unsupported algorithm or unparsable key.
    pub fn from_pem(algorithm: Algorithm, private_key_pem: &str) -> Result<Self> {
        let pem = private_key_pem.as_bytes();
        let key = match algorithm {
            Algorithm::ES256 | Algorithm::ES384 => EncodingKey::from_ec_pem(pem)?,
            Algorithm::EdDSA => EncodingKey::from_ed_pem(pem)?,
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => {
                EncodingKey::from_rsa_pem(pem)?
            }
            _ => return Err(JwtError::from(ErrorKind::InvalidAlgorithm).into()),
        };
        Ok(Self { algorithm, key })
    }

    /// Signing algorithm
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Claims of a short-lived component token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortLivedClaims {
    /// Issuing component id
    pub iss: String,
    /// Subject, equal to `iss`
    pub sub: String,
    /// Issued at
    pub iat: u64,
    /// Not before, equal to `iat`
    pub nbf: u64,
    /// Expiry
    pub exp: u64,
}

impl ShortLivedClaims {
    /// Claims for `component_id` issued at `now` (Unix seconds)
    #[must_use]
    pub fn new(component_id: &str, now: u64) -> Self {
        Self {
            iss: component_id.to_string(),
            sub: component_id.to_string(),
            iat: now,
            nbf: now,
            exp: now + SHORT_LIVED_TTL.as_secs(),
        }
    }
}

/// Sign `claims` with `signer`
///
/// # Errors
///
/// Returns `Error::Token` if encoding fails.
pub fn sign<T: Serialize>(claims: &T, signer: &Signer) -> Result<String> {
    let header = Header::new(signer.algorithm);
    Ok(jsonwebtoken::encode(&header, claims, &signer.key)?)
}

// ────────────────────────────────────────────────────────────────────────────
// Verification
// ────────────────────────────────────────────────────────────────────────────

/// Parse a PEM public key for `algorithm`
///
/// # Errors
///
/// Returns `Error::Token` for symmetric algorithms or an unparsable key.
pub fn decoding_key(algorithm: Algorithm, public_key_pem: &str) -> Result<DecodingKey> {
    let pem = public_key_pem.as_bytes();
    let key = match algorithm {
        Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(pem)?,
        Algorithm::EdDSA => DecodingKey::from_ed_pem(pem)?,
        Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => DecodingKey::from_rsa_pem(pem)?,
        _ => return Err(JwtError::from(ErrorKind::InvalidAlgorithm).into()),
    };
    Ok(key)
}

/// Strict validation for `algorithm`: zero leeway, `exp` and `iss` required
#[must_use]
pub fn validation(algorithm: Algorithm) -> Validation {
    let mut v = Validation::new(algorithm);
    v.leeway = 0;
    v.validate_aud = false;
    v.validate_nbf = true;
    v.set_required_spec_claims(&["exp", "iss"]);
    v
}

/// Verify a token against a PEM public key, returning its claims
///
/// The algorithm is taken from the token header and must be accepted.
///
/// # Errors
///
/// Returns `Error::Token` for a bad signature, expired token, symmetric
/// algorithm, or malformed token or key.
pub fn verify<T: DeserializeOwned + Clone>(token: &str, public_key_pem: &str) -> Result<T> {
    let header = jsonwebtoken::decode_header(token)?;
    if !is_accepted(header.alg) {
        return Err(JwtError::from(ErrorKind::InvalidAlgorithm).into());
    }
    let key = decoding_key(header.alg, public_key_pem)?;
    let data = jsonwebtoken::decode::<T>(token, &key, &validation(header.alg))?;
    Ok(data.claims)
}

/// Verify a peer's short-lived token against the peer's announced public key
///
/// # Errors
///
/// See [`verify`].
pub fn verify_peer_token(token: &str, public_key_pem: &str) -> Result<ShortLivedClaims> {
    verify(token, public_key_pem)
}

#[derive(Deserialize)]
struct IssuerOnly {
    #[serde(default)]
    iss: String,
}

/// Read the `iss` claim without verifying the signature
///
/// Used only to select which issuer key to verify with.
///
/// # Errors
///
/// Returns `Error::Token(InvalidToken)` if the payload cannot be decoded.
pub fn unverified_issuer(token: &str) -> Result<String> {
    let invalid = || JwtError::from(ErrorKind::InvalidToken);

    let payload = token.split('.').nth(1).ok_or_else(invalid)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| invalid())?;
    let claims: IssuerOnly = serde_json::from_slice(&bytes).map_err(|_| invalid())?;
    Ok(claims.iss)
}
