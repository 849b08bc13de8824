//! App key exchange against a mock auth server

mod common;

use std::sync::Arc;
use std::time::Duration;

use component_trust::Error;
use component_trust::auth_server::{AuthServerEndpoint, AuthServerRegistry};
use component_trust::exchange::AppKeyExchanger;
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{basic_auth, body_string_contains, header, method, path},
};

fn exchanger(registry: Arc<AuthServerRegistry>) -> AppKeyExchanger {
    AppKeyExchanger::new(registry, Duration::from_secs(5)).unwrap()
}

/// The key is posted as a password grant scoped to the app
#[tokio::test]
async fn prefixed_key_is_exchanged_at_its_issuer() {
    // GIVEN: an auth server accepting the app's password grant
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users/token"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("grant_type=password"))
        .and(body_string_contains("username=my-app"))
        .and(body_string_contains("password=main.s3cret"))
        .and(body_string_contains("scope=apps%3Amy-app"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "tok-1", "token_type": "bearer"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    // WHEN: exchanging a key with an issuer prefix
    let token = exchanger(common::registry(&[("main", &server)]))
        .exchange("my-app", "main.s3cret")
        .await
        .unwrap();

    // THEN: the issued token is returned
    assert_eq!(token, "tok-1");
}

/// Issuer credentials are sent as HTTP basic auth
#[tokio::test]
async fn credentials_sent_as_basic_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users/token"))
        .and(basic_auth("svc", "pw"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "tok-2"})))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = AuthServerEndpoint::new("main", &server.uri(), "svc", "pw").unwrap();
    let registry = Arc::new(AuthServerRegistry::from_endpoints([endpoint], None).unwrap());

    let token = exchanger(registry).exchange("app", "main.k").await.unwrap();
    assert_eq!(token, "tok-2");
}

/// A bare key goes to the default issuer with the issuer prefix added
#[tokio::test]
async fn unprefixed_key_uses_default_issuer() {
    // GIVEN: two issuers, "second" configured as default
    let first = MockServer::start().await;
    let second = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users/token"))
        .and(body_string_contains("password=second.bare"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "tok-3"})))
        .expect(1)
        .mount(&second)
        .await;

    let endpoints = [
        AuthServerEndpoint::new("first", &first.uri(), "", "").unwrap(),
        AuthServerEndpoint::new("second", &second.uri(), "", "").unwrap(),
    ];
    let registry = Arc::new(AuthServerRegistry::from_endpoints(endpoints, Some("second")).unwrap());

    // WHEN: exchanging a key without a prefix
    let token = exchanger(registry).exchange("app", "bare").await.unwrap();

    // THEN: only the default issuer was asked
    assert_eq!(token, "tok-3");
    assert!(first.received_requests().await.unwrap().is_empty());
}

/// A rejected exchange carries the issuer's status and body
#[tokio::test]
async fn rejection_reports_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
        .mount(&server)
        .await;

    let err = exchanger(common::registry(&[("main", &server)]))
        .exchange("app", "main.wrong")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Exchange { status: 401, ref body } if body == "invalid key"
    ));
}

/// An empty issuer prefix carries no issuer and falls back to the default
#[tokio::test]
async fn empty_prefix_uses_default_issuer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users/token"))
        .and(body_string_contains("password=main..secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "tok-4"})))
        .expect(1)
        .mount(&server)
        .await;

    let token = exchanger(common::registry(&[("main", &server)]))
        .exchange("app", ".secret")
        .await
        .unwrap();
    assert_eq!(token, "tok-4");
}
