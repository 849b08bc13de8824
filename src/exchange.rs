//! Application access key exchange
//!
//! An app key has the form `<issuer>.<secret>`. Keys without an issuer prefix
//! belong to the default issuer. The key is traded for a bearer token at the
//! issuer's OAuth endpoint with a password grant scoped to the app.

use std::{collections::HashMap, sync::Arc, time::Duration};

use serde::Deserialize;
use tracing::{debug, info};

use crate::auth_server::AuthServerRegistry;
use crate::{Error, Result};

/// Issuer prefix of an app key, if it has a non-empty one
#[must_use]
pub fn key_issuer(key: &str) -> Option<&str> {
    key.split_once('.')
        .map(|(issuer, _)| issuer)
        .filter(|issuer| !issuer.is_empty())
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Exchanges application access keys for bearer tokens
#[derive(Debug, Clone)]
pub struct AppKeyExchanger {
    registry: Arc<AuthServerRegistry>,
    client: reqwest::Client,
}

impl AppKeyExchanger {
    /// Create an exchanger over `registry`
    ///
    /// # Errors
    ///
    /// Returns `Error::Http` if the HTTP client cannot be built.
    pub fn new(registry: Arc<AuthServerRegistry>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self::with_client(registry, client))
    }

    /// Create an exchanger with a preconfigured HTTP client
    pub fn with_client(registry: Arc<AuthServerRegistry>, client: reqwest::Client) -> Self {
        Self { registry, client }
    }

    /// Exchange `key` for an access token on behalf of `app_id`
    ///
    /// # Errors
    ///
    /// - `Error::Config` if the key's issuer is not registered
    /// - `Error::Http` on transport failure
    /// - `Error::Exchange` if the issuer rejects the request
    pub async fn exchange(&self, app_id: &str, key: &str) -> Result<String> {
        let (issuer, key) = match key_issuer(key) {
            Some(issuer) => (issuer.to_string(), key.to_string()),
            None => {
                let issuer = self.registry.default_issuer()?.issuer_id().to_string();
                let key = format!("{issuer}.{key}");
                (issuer, key)
            }
        };

        let endpoint = self
            .registry
            .get(&issuer)
            .ok_or_else(|| Error::Config(format!("auth server {issuer} not registered")))?;

        let scope = format!("apps:{app_id}");
        let mut params = HashMap::new();
        params.insert("grant_type", "password");
        params.insert("username", app_id);
        params.insert("password", key.as_str());
        params.insert("scope", scope.as_str());

        let url = format!("{}/users/token", endpoint.url());
        debug!(issuer = %issuer, app_id = %app_id, url = %url, "Exchanging app key");

        let mut request = self.client.post(&url).form(&params);
        if endpoint.has_credentials() {
            request = request.basic_auth(endpoint.username(), Some(endpoint.password()));
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Exchange { status, body });
        }

        let token: TokenResponse = response.json().await?;
        info!(issuer = %issuer, app_id = %app_id, "App key exchanged for token");
        Ok(token.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_issuer_prefix() {
        assert_eq!(key_issuer("main.abc123"), Some("main"));
        assert_eq!(key_issuer("main.abc.def"), Some("main"));
        assert_eq!(key_issuer("abc123"), None);
        assert_eq!(key_issuer(".abc"), None);
    }

    #[tokio::test]
    async fn unknown_issuer_is_config_error() {
        let exchanger =
            AppKeyExchanger::new(Arc::new(AuthServerRegistry::default()), Duration::from_secs(1))
                .unwrap();
        let err = exchanger.exchange("app", "nowhere.secret").await.unwrap_err();
        assert!(
            matches!(err, Error::Config(msg) if msg == "auth server nowhere not registered")
        );
    }

    #[tokio::test]
    async fn unprefixed_key_without_servers_is_config_error() {
        let exchanger =
            AppKeyExchanger::new(Arc::new(AuthServerRegistry::default()), Duration::from_secs(1))
                .unwrap();
        assert!(matches!(
            exchanger.exchange("app", "secret").await,
            Err(Error::Config(_))
        ));
    }
}
