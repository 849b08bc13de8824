//! Auth server (issuer) registry
//!
//! Issuers are configured as `issuer id -> endpoint string`, where the endpoint
//! string is `[username[:password]@]scheme://domain[/]` or the URL-userinfo
//! spelling `scheme://[username[:password]@]domain[/]`.

use std::{collections::BTreeMap, fmt, sync::LazyLock};

use regex::Regex;

use crate::{Error, Result};

/// Character class for passwords: alphanumerics plus ASCII punctuation except `/` and backtick
const PASSWORD: &str = r##"[0-9A-Za-z!"#$%&'()*+,.:;<=>?@\[\]^_{|}~-]+"##;

/// `[user[:password]@]scheme://domain[/]`
static PREFIX_FORM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^(?:(?P<user>[0-9a-z_-]+)(?::(?P<password>{PASSWORD}))?@)?(?P<scheme>https?)://(?P<domain>[0-9a-z.-]+)/?$"
    ))
    .expect("static auth server pattern")
});

/// `scheme://[user[:password]@]domain[/]`
static USERINFO_FORM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^(?P<scheme>https?)://(?:(?P<user>[0-9a-z_-]+)(?::(?P<password>{PASSWORD}))?@)?(?P<domain>[0-9a-z.-]+)/?$"
    ))
    .expect("static auth server pattern")
});

static ISSUER_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Za-z_.-]+$").expect("static issuer id pattern"));

/// A parsed issuer endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct AuthServerEndpoint {
    issuer_id: String,
    url: String,
    username: String,
    password: String,
}

impl AuthServerEndpoint {
    /// Parse an endpoint string for `issuer_id`
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the issuer if the id or string is malformed.
    pub fn parse(issuer_id: &str, s: &str) -> Result<Self> {
        validate_issuer_id(issuer_id)?;

        let caps = PREFIX_FORM
            .captures(s)
            .or_else(|| USERINFO_FORM.captures(s))
            .ok_or_else(|| {
                Error::Config(format!("Malformed auth server for issuer {issuer_id}"))
            })?;

        let group = |name: &str| caps.name(name).map_or("", |m| m.as_str());
        Ok(Self {
            issuer_id: issuer_id.to_string(),
            url: format!("{}://{}", group("scheme"), group("domain")),
            username: group("user").to_string(),
            password: group("password").to_string(),
        })
    }

    /// Build an endpoint from already-split parts
    ///
    /// The URL is taken as-is (trailing `/` removed), which allows ports and
    /// loopback addresses that the configuration grammar does not.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the issuer id is malformed or the URL is not http(s).
    pub fn new(
        issuer_id: &str,
        url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        validate_issuer_id(issuer_id)?;
        let parsed = url::Url::parse(url)
            .map_err(|e| Error::Config(format!("Invalid URL for issuer {issuer_id}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "Unsupported scheme for issuer {issuer_id}: {}",
                parsed.scheme()
            )));
        }
        Ok(Self {
            issuer_id: issuer_id.to_string(),
            url: url.trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
        })
    }

    /// Issuer id
    pub fn issuer_id(&self) -> &str {
        &self.issuer_id
    }

    /// Base URL (`scheme://domain`)
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Client username (empty if none)
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Client password (empty if none)
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Whether client credentials are configured
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty()
    }
}

impl fmt::Debug for AuthServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthServerEndpoint")
            .field("issuer_id", &self.issuer_id)
            .field("url", &self.url)
            .field("username", &self.username)
            .field(
                "password",
                &if self.password.is_empty() { "" } else { "***" },
            )
            .finish()
    }
}

fn validate_issuer_id(issuer_id: &str) -> Result<()> {
    if issuer_id == "." || issuer_id == ".." || !ISSUER_ID.is_match(issuer_id) {
        return Err(Error::Config(format!("Invalid issuer id: {issuer_id:?}")));
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Registry
// ────────────────────────────────────────────────────────────────────────────

/// Immutable set of issuer endpoints, ordered by issuer id
#[derive(Debug, Clone, Default)]
pub struct AuthServerRegistry {
    servers: BTreeMap<String, AuthServerEndpoint>,
    default_issuer: Option<String>,
}

impl AuthServerRegistry {
    /// Parse every configured server. One malformed entry fails the whole registry.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for a malformed entry or an unknown default issuer.
    pub fn from_config(
        servers: &BTreeMap<String, String>,
        default_issuer: Option<&str>,
    ) -> Result<Self> {
        let endpoints = servers
            .iter()
            .map(|(id, s)| AuthServerEndpoint::parse(id, s))
            .collect::<Result<Vec<_>>>()?;
        Self::from_endpoints(endpoints, default_issuer)
    }

    /// Build a registry from endpoints
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` on duplicate issuer ids or an unknown default issuer.
    pub fn from_endpoints(
        endpoints: impl IntoIterator<Item = AuthServerEndpoint>,
        default_issuer: Option<&str>,
    ) -> Result<Self> {
        let mut servers = BTreeMap::new();
        for endpoint in endpoints {
            let id = endpoint.issuer_id.clone();
            if servers.insert(id.clone(), endpoint).is_some() {
                return Err(Error::Config(format!("Duplicate auth server {id}")));
            }
        }

        if let Some(default) = default_issuer {
            if !servers.contains_key(default) {
                return Err(Error::Config(format!(
                    "Default auth server {default} not registered"
                )));
            }
        }

        Ok(Self {
            servers,
            default_issuer: default_issuer.map(str::to_string),
        })
    }

    /// Look up an issuer
    pub fn get(&self, issuer: &str) -> Option<&AuthServerEndpoint> {
        self.servers.get(issuer)
    }

    /// Iterate endpoints in issuer-id order
    pub fn iter(&self) -> impl Iterator<Item = &AuthServerEndpoint> {
        self.servers.values()
    }

    /// Issuer ids in order
    pub fn issuers(&self) -> impl Iterator<Item = &str> {
        self.servers.keys().map(String::as_str)
    }

    /// Number of issuers
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Whether no issuer is configured
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Configured default issuer, else the lowest issuer id
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the registry is empty.
    pub fn default_issuer(&self) -> Result<&AuthServerEndpoint> {
        let endpoint = match &self.default_issuer {
            Some(id) => self.servers.get(id),
            None => self.servers.values().next(),
        };
        endpoint.ok_or_else(|| Error::Config("No auth server registered".to_string()))
    }
}
