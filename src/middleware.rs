//! axum middleware running the trust validators on inbound HTTP requests
//!
//! Request headers are read as metadata. On success the outcome is inserted
//! into the request extensions ([`PeerTrust`] or [`TrustClaims`]); on failure
//! the error is mapped to an HTTP status with a JSON body.

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::debug;

use crate::component::Component;
use crate::error::RpcCode;
use crate::metadata::Metadata;
use crate::Error;

/// Require a trusted peer component; inserts [`crate::peer::PeerTrust`]
pub async fn require_peer(
    State(component): State<Arc<Component>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let md = Metadata::from_headers(request.headers());
    match component.validate_peer(&md).await {
        Ok(trust) => {
            debug!(peer = %trust.announcement().id, path = %request.uri().path(), "Peer request accepted");
            request.extensions_mut().insert(trust);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

/// Require a valid end-user token; inserts [`crate::user::TrustClaims`]
pub async fn require_user(
    State(component): State<Arc<Component>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let md = Metadata::from_headers(request.headers());
    match component.validate_user(&md) {
        Ok(claims) => {
            debug!(sub = %claims.sub, path = %request.uri().path(), "User request accepted");
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.http_status();
        let code = self.status_code();
        // internal details stay in the logs
        let message = if code == RpcCode::Internal {
            "internal error".to_string()
        } else {
            self.to_string()
        };
        let body = Json(json!({
            "error": {
                "code": code.as_str(),
                "message": message,
            }
        }));

        if status == StatusCode::UNAUTHORIZED {
            (status, [(header::WWW_AUTHENTICATE, "Bearer")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth_server::AuthServerRegistry;
    use crate::config::IdentityConfig;
    use crate::discovery::InMemoryDiscovery;
    use crate::exchange::AppKeyExchanger;
    use crate::identity::{IdentityManager, KeyAlgorithm, generate_keypair};
    use crate::metadata;
    use crate::peer::PeerTrust;
    use crate::token_key::StaticTokenKeyProvider;
    use axum::{Extension, Router, routing::get};
    use std::time::Duration;
    use tower::ServiceExt;

    fn component(dir: &std::path::Path, discovery: Arc<InMemoryDiscovery>) -> Arc<Component> {
        generate_keypair(dir, KeyAlgorithm::Es256, false).unwrap();
        let identity = IdentityManager::init(
            &IdentityConfig {
                id: "r1".into(),
                service_name: "router".into(),
                net_address: "r1:1".into(),
            },
            dir,
            false,
        )
        .unwrap();
        let registry = Arc::new(AuthServerRegistry::default());
        Arc::new(Component::from_parts(
            identity,
            Arc::clone(&registry),
            Arc::new(StaticTokenKeyProvider::new()),
            discovery,
            AppKeyExchanger::new(registry, Duration::from_secs(1)).unwrap(),
        ))
    }

    fn peer_app(component: Arc<Component>) -> Router {
        Router::new()
            .route(
                "/",
                get(|Extension(trust): Extension<PeerTrust>| async move {
                    trust.announcement().id.clone()
                }),
            )
            .layer(axum::middleware::from_fn_with_state(component, require_peer))
    }

    #[tokio::test(start_paused = true)]
    async fn peer_request_accepted() {
        // GIVEN: a component registered in discovery
        let dir = tempfile::tempdir().unwrap();
        let discovery = Arc::new(InMemoryDiscovery::new());
        let component = component(dir.path(), discovery.clone());
        discovery.register(component.announcement());

        // WHEN: it calls itself with its outgoing metadata as headers
        let headers = component.outgoing_context(None).to_headers().unwrap();
        let mut request = Request::builder().uri("/").body(Body::empty()).unwrap();
        *request.headers_mut() = headers;
        let response = peer_app(component).oneshot(request).await.unwrap();

        // THEN: the handler sees the peer
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"r1");
    }

    #[tokio::test(start_paused = true)]
    async fn peer_request_without_metadata_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let component = component(dir.path(), Arc::new(InMemoryDiscovery::new()));

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = peer_app(component).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "INVALID_ARGUMENT");
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_peer_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let component = component(dir.path(), Arc::new(InMemoryDiscovery::new()));

        let request = Request::builder()
            .uri("/")
            .header(metadata::ID, "ghost")
            .header(metadata::SERVICE_NAME, "broker")
            .body(Body::empty())
            .unwrap();
        let response = peer_app(component).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn user_request_with_bad_token_is_forbidden() {
        let dir = tempfile::tempdir().unwrap();
        let component = component(dir.path(), Arc::new(InMemoryDiscovery::new()));
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(component, require_user));

        let request = Request::builder()
            .uri("/")
            .header(header::AUTHORIZATION, "Bearer not.a.jwt")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn internal_errors_are_opaque() {
        let response = Error::Internal("secret detail".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn unauthenticated_sets_www_authenticate() {
        let response = Error::KeyUnavailable("main".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );
    }
}
