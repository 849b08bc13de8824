//! Component key pair: loading, algorithm detection and generation.
//!
//! The private key lives at `<key_dir>/server.key` as PKCS#8 PEM. Supported
//! algorithms are ECDSA P-256 (ES256, default), ECDSA P-384 (ES384) and
//! Ed25519 (EdDSA).

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use jsonwebtoken::Algorithm;
use rcgen::{KeyPair, PKCS_ECDSA_P256_SHA256, PKCS_ECDSA_P384_SHA384, PKCS_ED25519, SignatureAlgorithm};
use tracing::info;

use crate::token::Signer;
use crate::{Error, Result};

/// Private key file name
pub const PRIVATE_KEY_FILE: &str = "server.key";
/// Derived public key file name
pub const PUBLIC_KEY_FILE: &str = "server.pub";

/// Supported component key algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyAlgorithm {
    /// ECDSA P-256 with SHA-256
    #[default]
    Es256,
    /// ECDSA P-384 with SHA-384
    Es384,
    /// Ed25519
    EdDsa,
}

impl KeyAlgorithm {
    /// JWT algorithm used for tokens signed with this key
    #[must_use]
    pub fn jwt(self) -> Algorithm {
        match self {
            Self::Es256 => Algorithm::ES256,
            Self::Es384 => Algorithm::ES384,
            Self::EdDsa => Algorithm::EdDSA,
        }
    }

    fn rcgen(self) -> &'static SignatureAlgorithm {
        match self {
            Self::Es256 => &PKCS_ECDSA_P256_SHA256,
            Self::Es384 => &PKCS_ECDSA_P384_SHA384,
            Self::EdDsa => &PKCS_ED25519,
        }
    }

    fn from_rcgen(alg: &SignatureAlgorithm) -> Option<Self> {
        [Self::Es256, Self::Es384, Self::EdDsa]
            .into_iter()
            .find(|candidate| candidate.rcgen() == alg)
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Es256 => "es256",
            Self::Es384 => "es384",
            Self::EdDsa => "ed25519",
        })
    }
}

impl FromStr for KeyAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "es256" | "p256" | "ecdsa-p256" => Ok(Self::Es256),
            "es384" | "p384" | "ecdsa-p384" => Ok(Self::Es384),
            "ed25519" | "eddsa" => Ok(Self::EdDsa),
            other => Err(Error::Config(format!("Unsupported key algorithm: {other}"))),
        }
    }
}

/// The component's loaded key pair
pub struct ComponentKey {
    key_pair: KeyPair,
    algorithm: KeyAlgorithm,
}

impl ComponentKey {
    /// Load `<key_dir>/server.key`
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file is missing, unreadable, not PKCS#8
    /// PEM, or uses an unsupported algorithm.
    pub fn load(key_dir: &Path) -> Result<Self> {
        let path = key_dir.join(PRIVATE_KEY_FILE);
        let pem = fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("Cannot read '{}': {e}", path.display())))?;
        Self::from_pem(&pem)
            .map_err(|e| Error::Config(format!("Invalid key in '{}': {e}", path.display())))
    }

    /// Parse a PKCS#8 PEM private key
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the key is unparsable or of an unsupported algorithm.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key_pair = KeyPair::from_pem(pem)
            .map_err(|e| Error::Config(format!("Failed to parse private key: {e}")))?;
        let algorithm = KeyAlgorithm::from_rcgen(key_pair.algorithm()).ok_or_else(|| {
            Error::Config("Unsupported private key algorithm (need P-256, P-384 or Ed25519)".into())
        })?;
        Ok(Self {
            key_pair,
            algorithm,
        })
    }

    /// Generate a fresh key
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if key generation fails.
    pub fn generate(algorithm: KeyAlgorithm) -> Result<Self> {
        let key_pair = KeyPair::generate_for(algorithm.rcgen())
            .map_err(|e| Error::Config(format!("Failed to generate {algorithm} key: {e}")))?;
        Ok(Self {
            key_pair,
            algorithm,
        })
    }

    /// Key algorithm
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    /// SPKI PEM public key
    pub fn public_key_pem(&self) -> String {
        self.key_pair.public_key_pem()
    }

    /// PKCS#8 PEM private key
    pub fn private_key_pem(&self) -> String {
        self.key_pair.serialize_pem()
    }

    /// Build a token signer for this key
    ///
    /// # Errors
    ///
    /// Returns `Error::Token` if the key cannot be used for JWT signing.
    pub fn signer(&self) -> Result<Signer> {
        Signer::from_pem(self.algorithm.jwt(), &self.private_key_pem())
    }

    pub(crate) fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }
}

impl fmt::Debug for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentKey")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Generate `<key_dir>/server.key` (mode 0600) and `<key_dir>/server.pub`
///
/// Refuses to replace an existing key unless `overwrite` is set.
///
/// # Errors
///
/// Returns `Error::Config` if the key exists and `overwrite` is false, or if
/// generation or writing fails.
pub fn generate_keypair(
    key_dir: &Path,
    algorithm: KeyAlgorithm,
    overwrite: bool,
) -> Result<PathBuf> {
    let key_path = key_dir.join(PRIVATE_KEY_FILE);
    if key_path.exists() && !overwrite {
        return Err(Error::Config(format!(
            "'{}' already exists (pass --force to replace it)",
            key_path.display()
        )));
    }

    fs::create_dir_all(key_dir)
        .map_err(|e| Error::Config(format!("Cannot create dir '{}': {e}", key_dir.display())))?;

    let key = ComponentKey::generate(algorithm)?;
    write_file(&key_path, &key.private_key_pem(), true)?;
    write_file(&key_dir.join(PUBLIC_KEY_FILE), &key.public_key_pem(), false)?;

    info!(path = %key_path.display(), algorithm = %algorithm, "Generated component key");
    Ok(key_path)
}

/// Write `contents` to `path`, restricting permissions to the owner when `private`
pub(crate) fn write_file(path: &Path, contents: &str, private: bool) -> Result<()> {
    fs::write(path, contents)
        .map_err(|e| Error::Config(format!("Cannot write '{}': {e}", path.display())))?;

    #[cfg(unix)]
    if private {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = private;

    Ok(())
}
