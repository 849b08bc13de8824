//! TLS credential loading and certificate inspection
//! and self-signed generation for operator tooling.
//!
//! All certificate and key files are expected in **PEM format**.

use std::{fmt, fs, path::Path, sync::Arc};

use rcgen::{CertificateParams, DistinguishedName, DnType, date_time_ymd};
use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tracing::{debug, info, warn};
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::FromDer;

use super::keys::{ComponentKey, PRIVATE_KEY_FILE, write_file};
use crate::token::now_secs;
use crate::{Error, Result};

/// Certificate chain file name
pub const CERT_FILE: &str = "server.cert";

// ─────────────────────────────────────────────────────────────────────────────
// TLS credential
// ─────────────────────────────────────────────────────────────────────────────

/// Server TLS credential bound to the component key
#[derive(Clone)]
pub struct TlsCredential {
    server_config: Arc<ServerConfig>,
    certificate_pem: String,
    info: CertInfo,
}

impl TlsCredential {
    /// Load `<key_dir>/server.cert` and `<key_dir>/server.key` into a rustls
    /// server config (aws-lc-rs provider).
    ///
    /// An expired or not-yet-valid leaf certificate is logged, not rejected.
    ///
    /// # Errors
    ///
    /// Returns `Error::Tls` if either file cannot be read or parsed, or if the
    /// certificate does not match the key.
    pub fn load(key_dir: &Path) -> Result<Self> {
        let cert_path = key_dir.join(CERT_FILE);
        let key_path = key_dir.join(PRIVATE_KEY_FILE);

        let certificate_pem = fs::read_to_string(&cert_path)
            .map_err(|e| Error::Tls(format!("Cannot read '{}': {e}", cert_path.display())))?;
        let certs = load_certs(&cert_path)?;
        let key = load_private_key(&key_path)?;

        let info = CertInfo::from_der(&certs[0])?;
        if !info.is_valid_at(now_secs()) {
            warn!(
                cert = %cert_path.display(),
                not_before = info.not_before,
                not_after = info.not_after,
                "Component certificate is outside its validity period"
            );
        }

        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let mut server_config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Tls(format!("TLS protocol setup failed: {e}")))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| Error::Tls(format!("TLS config error (cert/key mismatch?): {e}")))?;

        // Prefer HTTP/2, fall back to HTTP/1.1
        server_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

        debug!(
            cert = %cert_path.display(),
            common_name = ?info.common_name,
            "TLS credential built"
        );

        Ok(Self {
            server_config: Arc::new(server_config),
            certificate_pem,
            info,
        })
    }

    /// rustls server config for the hosting transport
    pub fn server_config(&self) -> Arc<ServerConfig> {
        Arc::clone(&self.server_config)
    }

    /// Certificate chain as PEM
    pub fn certificate_pem(&self) -> &str {
        &self.certificate_pem
    }

    /// Leaf certificate details
    pub fn info(&self) -> &CertInfo {
        &self.info
    }
}

impl fmt::Debug for TlsCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsCredential")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PEM loading
// ─────────────────────────────────────────────────────────────────────────────

/// Load all certificates from a PEM file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or contains no valid PEM
/// certificate blocks.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem_data = read_file(path)?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut pem_data.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            Error::Tls(format!("Failed to parse certs from '{}': {e}", path.display()))
        })?;

    if certs.is_empty() {
        return Err(Error::Tls(format!(
            "No certificates found in '{}'",
            path.display()
        )));
    }

    Ok(certs)
}

/// Load the first private key from a PEM file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or contains no private key.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let pem_data = read_file(path)?;
    rustls_pemfile::private_key(&mut pem_data.as_slice())
        .map_err(|e| {
            Error::Tls(format!(
                "Failed to parse private key from '{}': {e}",
                path.display()
            ))
        })?
        .ok_or_else(|| Error::Tls(format!("No private key found in '{}'", path.display())))
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::Tls(format!("Cannot read '{}': {e}", path.display())))
}

// ─────────────────────────────────────────────────────────────────────────────
// Certificate inspection
// ─────────────────────────────────────────────────────────────────────────────

/// Fields of a leaf certificate used for logging and operator output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertInfo {
    /// Subject Common Name
    pub common_name: Option<String>,
    /// Subject Alternative Name DNS entries
    pub san_dns_names: Vec<String>,
    /// Start of validity (Unix seconds)
    pub not_before: i64,
    /// End of validity (Unix seconds)
    pub not_after: i64,
}

impl CertInfo {
    /// Parse a DER-encoded certificate
    ///
    /// # Errors
    ///
    /// Returns `Error::Tls` if the certificate cannot be parsed.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::Tls(format!("Failed to parse certificate: {e}")))?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|attr| attr.as_str().ok())
            .map(str::to_owned);

        let mut san_dns_names = Vec::new();
        if let Ok(Some(san_ext)) = cert.subject_alternative_name() {
            for name in &san_ext.value.general_names {
                if let GeneralName::DNSName(dns) = name {
                    san_dns_names.push((*dns).to_owned());
                }
            }
        }

        let validity = cert.validity();
        Ok(Self {
            common_name,
            san_dns_names,
            not_before: validity.not_before.timestamp(),
            not_after: validity.not_after.timestamp(),
        })
    }

    /// Whether `now` (Unix seconds) lies within the validity period
    #[must_use]
    pub fn is_valid_at(&self, now: u64) -> bool {
        let now = i64::try_from(now).unwrap_or(i64::MAX);
        self.not_before <= now && now <= self.not_after
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Self-signed generation (CLI helper)
// ─────────────────────────────────────────────────────────────────────────────

/// Write a self-signed `<key_dir>/server.cert` for the existing `server.key`
///
/// `names` become DNS subject alternative names; the first is also the CN.
///
/// # Errors
///
/// Returns `Error::Config` if the key is missing, the certificate exists and
/// `overwrite` is false, `names` is empty, or generation fails.
pub fn generate_certificate(
    key_dir: &Path,
    names: &[String],
    validity_days: u32,
    overwrite: bool,
) -> Result<String> {
    let cert_path = key_dir.join(CERT_FILE);
    if cert_path.exists() && !overwrite {
        return Err(Error::Config(format!(
            "'{}' already exists (pass --force to replace it)",
            cert_path.display()
        )));
    }
    let Some(common_name) = names.first() else {
        return Err(Error::Config(
            "At least one certificate name is required".into(),
        ));
    };

    let key = ComponentKey::load(key_dir)?;

    let mut params = CertificateParams::new(names.to_vec())
        .map_err(|e| Error::Config(format!("Invalid certificate name: {e}")))?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name.as_str());
    params.distinguished_name = dn;
    params.not_after = validity_to_date(validity_days)?;

    let cert = params
        .self_signed(key.key_pair())
        .map_err(|e| Error::Config(format!("Certificate generation failed: {e}")))?;
    let pem = cert.pem();
    write_file(&cert_path, &pem, false)?;

    info!(path = %cert_path.display(), common_name = %common_name, validity_days, "Generated self-signed certificate");
    Ok(pem)
}

/// Convert a validity period (days) into a future date for `rcgen`.
fn validity_to_date(days: u32) -> Result<time::OffsetDateTime> {
    let future_secs = now_secs().saturating_add(u64::from(days) * 86_400);

    let dt = time::OffsetDateTime::from_unix_timestamp(
        i64::try_from(future_secs).unwrap_or(i64::MAX),
    )
    .map_err(|e| Error::Config(format!("Date calculation error: {e}")))?;

    Ok(date_time_ymd(dt.year(), dt.month() as u8, dt.day()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::keys::{KeyAlgorithm, generate_keypair};

    fn key_dir_with_cert(algorithm: KeyAlgorithm) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        generate_keypair(dir.path(), algorithm, false).unwrap();
        generate_certificate(
            dir.path(),
            &["broker-1.local".to_string(), "localhost".to_string()],
            30,
            false,
        )
        .unwrap();
        dir
    }

    #[test]
    fn load_builds_server_config() {
        // GIVEN: a key directory with key and self-signed certificate
        let dir = key_dir_with_cert(KeyAlgorithm::Es256);

        // WHEN: loading the credential
        let tls = TlsCredential::load(dir.path()).unwrap();

        // THEN: certificate details are extracted
        assert!(tls.certificate_pem().contains("BEGIN CERTIFICATE"));
        assert_eq!(tls.info().common_name.as_deref(), Some("broker-1.local"));
        assert_eq!(
            tls.info().san_dns_names,
            vec!["broker-1.local".to_string(), "localhost".to_string()]
        );
        assert!(tls.info().is_valid_at(now_secs()));
        assert_eq!(
            tls.server_config().alpn_protocols,
            vec![b"h2".to_vec(), b"http/1.1".to_vec()]
        );
    }

    #[test]
    fn load_ed25519_credential() {
        let dir = key_dir_with_cert(KeyAlgorithm::EdDsa);
        assert!(TlsCredential::load(dir.path()).is_ok());
    }

    #[test]
    fn missing_cert_is_tls_error() {
        let dir = tempfile::tempdir().unwrap();
        generate_keypair(dir.path(), KeyAlgorithm::Es256, false).unwrap();
        let err = TlsCredential::load(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Tls(msg) if msg.contains("server.cert")));
    }

    #[test]
    fn mismatched_key_is_tls_error() {
        // GIVEN: a certificate for one key, then the key replaced
        let dir = key_dir_with_cert(KeyAlgorithm::Es256);
        generate_keypair(dir.path(), KeyAlgorithm::Es256, true).unwrap();

        // WHEN / THEN
        assert!(matches!(
            TlsCredential::load(dir.path()).unwrap_err(),
            Error::Tls(_)
        ));
    }

    #[test]
    fn generate_certificate_requires_names_and_key() {
        let dir = tempfile::tempdir().unwrap();
        assert!(generate_certificate(dir.path(), &["a".into()], 1, false).is_err());
        generate_keypair(dir.path(), KeyAlgorithm::Es256, false).unwrap();
        assert!(generate_certificate(dir.path(), &[], 1, false).is_err());
    }

    #[test]
    fn generate_certificate_refuses_overwrite() {
        let dir = key_dir_with_cert(KeyAlgorithm::Es384);
        assert!(generate_certificate(dir.path(), &["x".into()], 1, false).is_err());
        assert!(generate_certificate(dir.path(), &["x".into()], 1, true).is_ok());
    }

    #[test]
    fn validity_window() {
        let info = CertInfo {
            not_before: 100,
            not_after: 200,
            ..CertInfo::default()
        };
        assert!(!info.is_valid_at(99));
        assert!(info.is_valid_at(100));
        assert!(info.is_valid_at(200));
        assert!(!info.is_valid_at(201));
    }
}
