//! Component trust operator binary

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use component_trust::{
    Result,
    auth_server::AuthServerRegistry,
    cli::{Cli, Command},
    config::Config,
    credentials::CredentialBuilder,
    discovery::Announcement,
    exchange::AppKeyExchanger,
    identity::{IdentityManager, generate_certificate, generate_keypair},
    setup_tracing, token,
    token_key::{HttpTokenKeyProvider, TokenKeyCache, TokenKeyProvider},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    match run(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(code = e.status_code().as_str(), error = %e, "Command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: &Config) -> Result<()> {
    match command {
        Command::GenKeypair {
            key_dir,
            algorithm,
            force,
        } => {
            let dir = key_dir_or(key_dir, config);
            let path = generate_keypair(&dir, algorithm, force)?;
            println!("{}", path.display());
            Ok(())
        }
        Command::GenCert {
            key_dir,
            names,
            days,
            force,
        } => {
            let dir = key_dir_or(key_dir, config);
            generate_certificate(&dir, &names, days, force)?;
            println!("{}", dir.join(component_trust::identity::tls::CERT_FILE).display());
            Ok(())
        }
        Command::Identity => {
            let manager = IdentityManager::init(&config.identity, &config.key_dir, config.use_tls)?;
            let announcement = Announcement::from(&*manager.identity());
            println!("{}", serde_json::to_string_pretty(&announcement)?);
            Ok(())
        }
        Command::Token => {
            let manager = IdentityManager::init(&config.identity, &config.key_dir, false)?;
            let builder = CredentialBuilder::new(manager.identity(), Some(manager.signer()));
            println!("{}", builder.build_token()?);
            Ok(())
        }
        Command::Verify { token, public_key } => verify(&token, &public_key),
        Command::RefreshKeys => {
            let registry = registry(config)?;
            let provider = HttpTokenKeyProvider::new(
                registry,
                Some(TokenKeyCache::new(&config.key_dir)),
                config.auth.request_timeout,
            )?;
            provider.update().await?;
            for issuer in provider.issuers() {
                let key = provider.lookup(&issuer)?;
                println!("{issuer}\t{}\t{}", key.algorithm, key.fingerprint());
            }
            Ok(())
        }
        Command::Exchange { app_id, key } => {
            let exchanger = AppKeyExchanger::new(registry(config)?, config.auth.request_timeout)?;
            println!("{}", exchanger.exchange(&app_id, &key).await?);
            Ok(())
        }
    }
}

fn key_dir_or(key_dir: Option<PathBuf>, config: &Config) -> PathBuf {
    key_dir.unwrap_or_else(|| config.key_dir.clone())
}

fn registry(config: &Config) -> Result<Arc<AuthServerRegistry>> {
    Ok(Arc::new(AuthServerRegistry::from_config(
        &config.auth.servers,
        config.auth.default_server.as_deref(),
    )?))
}

fn verify(token: &str, public_key: &Path) -> Result<()> {
    let pem = std::fs::read_to_string(public_key)?;
    let claims = token::verify_peer_token(token, &pem)?;
    info!(iss = %claims.iss, exp = claims.exp, "Token verified");
    println!("{}", serde_json::to_string_pretty(&claims)?);
    Ok(())
}
