//! Error types for component trust

use std::io;

use axum::http::StatusCode;
use thiserror::Error;

/// Result type alias for component trust operations
pub type Result<T> = std::result::Result<T, Error>;

/// Component trust errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (malformed auth server, unresolved issuer, missing key material)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing or malformed request metadata
    #[error("Invalid argument {field}: {reason}")]
    InvalidArgument {
        /// Offending field (e.g. `Metadata`)
        field: String,
        /// Human-readable reason
        reason: String,
    },

    /// End-user token rejected. The message is deliberately opaque.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Required provider or identity not configured
    #[error("Internal error: {0}")]
    Internal(String),

    /// No public key cached for an issuer
    #[error("No token key available for issuer {0}")]
    KeyUnavailable(String),

    /// Token decoding, signature or expiry failure
    #[error("Token validation failed: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    /// Discovery lookup found no announcement
    #[error("Announcement not found: {service_name}/{id}")]
    NotFound {
        /// Service name that was looked up
        service_name: String,
        /// Component id that was looked up
        id: String,
    },

    /// Discovery transport error
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// App key exchange rejected by the issuer
    #[error("Token exchange failed: HTTP {status} - {body}")]
    Exchange {
        /// HTTP status returned by the issuer
        status: u16,
        /// Response body
        body: String,
    },

    /// Issuer key endpoint returned a non-success status
    #[error("Auth server {issuer} returned HTTP {status}")]
    IssuerStatus {
        /// Issuer id
        issuer: String,
        /// HTTP status returned
        status: u16,
    },

    /// TLS credential error
    #[error("TLS error: {0}")]
    Tls(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// RPC status classification, following the usual gRPC code names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcCode {
    /// Caller sent malformed or incomplete metadata
    InvalidArgument,
    /// Caller is authenticated but not allowed
    PermissionDenied,
    /// Caller could not be authenticated
    Unauthenticated,
    /// Referenced entity does not exist
    NotFound,
    /// Collaborator unreachable
    Unavailable,
    /// Anything else
    Internal,
}

impl RpcCode {
    /// Canonical upper-case code name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::NotFound => "NOT_FOUND",
            Self::Unavailable => "UNAVAILABLE",
            Self::Internal => "INTERNAL",
        }
    }
}

impl Error {
    /// Create an invalid-argument error
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Classify into an RPC status
    #[must_use]
    pub fn status_code(&self) -> RpcCode {
        match self {
            Self::InvalidArgument { .. } => RpcCode::InvalidArgument,
            Self::PermissionDenied(_) => RpcCode::PermissionDenied,
            Self::Token(_) | Self::KeyUnavailable(_) => RpcCode::Unauthenticated,
            Self::NotFound { .. } => RpcCode::NotFound,
            Self::Discovery(_)
            | Self::Http(_)
            | Self::Exchange { .. }
            | Self::IssuerStatus { .. } => RpcCode::Unavailable,
            _ => RpcCode::Internal,
        }
    }

    /// Convert to an HTTP status code
    #[must_use]
    pub fn http_status(&self) -> StatusCode {
        match self.status_code() {
            RpcCode::InvalidArgument => StatusCode::BAD_REQUEST,
            RpcCode::PermissionDenied => StatusCode::FORBIDDEN,
            RpcCode::Unauthenticated => StatusCode::UNAUTHORIZED,
            RpcCode::NotFound => StatusCode::NOT_FOUND,
            RpcCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            RpcCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
