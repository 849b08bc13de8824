//! Component Trust Library
//!
//! Identity and trust validation for components of a peer-to-peer service
//! network. Components authenticate each other without a central session
//! authority, and validate end-user bearer tokens from external issuers
//! locally.
//!
//! # Features
//!
//! - **Identity**: component key pair, derived public key, optional TLS credential
//! - **Outgoing credentials**: 20 second signed tokens stamped on every call
//! - **Peer trust**: discovery lookup plus signature verification of the caller
//! - **End-user trust**: bearer tokens verified against cached issuer keys
//! - **App key exchange**: application access keys traded for bearer tokens

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth_server;
pub mod cli;
pub mod component;
pub mod config;
pub mod credentials;
pub mod discovery;
pub mod error;
pub mod exchange;
pub mod identity;
pub mod metadata;
pub mod middleware;
pub mod peer;
pub mod token;
pub mod token_key;
pub mod user;

pub use component::Component;
pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
