//! Shared helpers for integration tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use component_trust::auth_server::{AuthServerEndpoint, AuthServerRegistry};
use component_trust::config::IdentityConfig;
use component_trust::identity::{ComponentKey, IdentityManager, KeyAlgorithm, generate_keypair};
use component_trust::token::{self, Signer};
use component_trust::token_key::TokenKey;
use serde_json::{Value, json};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

/// A token issuer with its own signing key
pub struct Issuer {
    pub signer: Signer,
    pub key: TokenKey,
}

impl Issuer {
    pub fn new(algorithm: KeyAlgorithm) -> Self {
        let key = ComponentKey::generate(algorithm).expect("generate issuer key");
        Self {
            signer: key.signer().expect("issuer signer"),
            key: TokenKey::new(format!("{:?}", algorithm.jwt()), key.public_key_pem()),
        }
    }

    pub fn token(&self, claims: &Value) -> String {
        token::sign(claims, &self.signer).expect("sign issuer token")
    }

    /// Serve this issuer's key at `GET /key`
    pub async fn serve_key(&self, server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&self.key))
            .mount(server)
            .await;
    }
}

/// End-user claims issued by `iss`, expiring `ttl` seconds from now
pub fn user_claims(iss: &str, sub: &str, ttl: u64) -> Value {
    let now = token::now_secs();
    json!({
        "iss": iss,
        "sub": sub,
        "type": "user",
        "client": "console",
        "scope": ["apps"],
        "apps": { "my-app": ["settings"] },
        "iat": now,
        "exp": now + ttl,
    })
}

/// Registry of mock issuers, `(issuer id, server)`
pub fn registry(servers: &[(&str, &MockServer)]) -> Arc<AuthServerRegistry> {
    let endpoints = servers.iter().map(|(id, server)| {
        AuthServerEndpoint::new(id, &server.uri(), "", "").expect("mock endpoint")
    });
    Arc::new(AuthServerRegistry::from_endpoints(endpoints, None).expect("mock registry"))
}

/// Generate a key pair in `dir` and load an identity from it
pub fn identity(dir: &Path, id: &str, service_name: &str) -> IdentityManager {
    generate_keypair(dir, KeyAlgorithm::Es256, false).expect("generate keypair");
    IdentityManager::init(
        &IdentityConfig {
            id: id.to_string(),
            service_name: service_name.to_string(),
            net_address: format!("{id}:1904"),
        },
        dir,
        false,
    )
    .expect("load identity")
}
