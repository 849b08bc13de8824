//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::identity::KeyAlgorithm;

/// Component identity and trust tooling
#[derive(Parser, Debug)]
#[command(name = "component-trust")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "COMPONENT_TRUST_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "COMPONENT_TRUST_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "COMPONENT_TRUST_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate the component key pair (server.key, server.pub)
    GenKeypair {
        /// Key directory (defaults to `key_dir` from config)
        #[arg(long)]
        key_dir: Option<PathBuf>,

        /// Key algorithm (es256, es384, ed25519)
        #[arg(long, default_value = "es256")]
        algorithm: KeyAlgorithm,

        /// Replace an existing key
        #[arg(long)]
        force: bool,
    },

    /// Generate a self-signed certificate (server.cert) for the existing key
    GenCert {
        /// Key directory (defaults to `key_dir` from config)
        #[arg(long)]
        key_dir: Option<PathBuf>,

        /// DNS names; the first is also the Common Name
        #[arg(long = "name", required = true)]
        names: Vec<String>,

        /// Validity period in days
        #[arg(long, default_value_t = 365)]
        days: u32,

        /// Replace an existing certificate
        #[arg(long)]
        force: bool,
    },

    /// Print this component's announcement as JSON
    Identity,

    /// Print a fresh short-lived token
    Token,

    /// Verify a short-lived token against a PEM public key
    Verify {
        /// The token
        token: String,

        /// PEM public key file
        #[arg(long)]
        public_key: PathBuf,
    },

    /// Fetch issuer token keys into the key directory cache
    RefreshKeys,

    /// Exchange an application access key for a bearer token
    Exchange {
        /// Application id
        app_id: String,

        /// Access key (`<issuer>.<secret>` or bare secret for the default issuer)
        key: String,
    },
}
