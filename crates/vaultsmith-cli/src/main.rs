//! Vaultsmith - certificate and credential lifecycle for the dev stack

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vaultsmith_adapter::default_catalog;
use vaultsmith_auth::ServiceAuthenticator;
use vaultsmith_lifecycle::{
    CertificateLifecycleManager, LifecycleConfig, RenewalPlan, Thresholds,
};
use vaultsmith_pki::{BootstrapConfig, PkiBootstrapper};
use vaultsmith_secrets::CredentialStore;
use vaultsmith_store::{RetryPolicy, SecretStoreClient, StoreConfig};

/// Vaultsmith - PKI bootstrap, credential provisioning, and certificate
/// renewal for a local multi-service environment
#[derive(Parser, Debug)]
#[command(name = "vaultsmith")]
#[command(about = "Bootstrap and maintain the dev-stack secret store", long_about = None)]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Secret store address
    #[arg(long, env = "VAULTSMITH_ADDR", default_value = "http://localhost:8200")]
    addr: String,

    /// Store token (root or operator token for bootstrap/renew)
    #[arg(long, env = "VAULTSMITH_TOKEN")]
    token: Option<String>,

    /// Read the store token from a file instead
    #[arg(long, conflicts_with = "token")]
    token_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Bring the store to the desired state: CA hierarchy, roles,
    /// credentials, policies, AppRoles. Safe to re-run.
    Bootstrap {
        /// Directory receiving the exported CA chain
        #[arg(long, default_value = "certs/ca")]
        ca_dir: PathBuf,
        /// Parent directory for per-service role-id/secret-id files
        #[arg(long, default_value = "approles")]
        approle_dir: PathBuf,
    },
    /// Renew certificates nearing expiry (and generate missing ones)
    Renew {
        /// Parent directory of per-service certificate directories
        #[arg(long, default_value = "certs")]
        cert_dir: PathBuf,
        /// Report what would be renewed without issuing anything
        #[arg(long)]
        dry_run: bool,
        /// Reissue even certificates that are still fresh
        #[arg(long)]
        force: bool,
        /// Restrict the run to one service
        #[arg(long)]
        service: Option<String>,
        /// Only print the summary line
        #[arg(long)]
        quiet: bool,
    },
    /// Report days remaining per certificate
    CheckExpiration {
        /// Parent directory of per-service certificate directories
        #[arg(long, default_value = "certs")]
        cert_dir: PathBuf,
        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
        /// Nagios plugin output and exit codes (OK/WARNING/CRITICAL)
        #[arg(long, conflicts_with = "json")]
        nagios: bool,
        /// Restrict the report to one service
        #[arg(long)]
        service: Option<String>,
        /// Days below which a certificate is WARNING
        #[arg(long, default_value = "30")]
        warning_days: i64,
        /// Days below which a certificate is CRITICAL
        #[arg(long, default_value = "7")]
        critical_days: i64,
    },
    /// Startup driver for one service: wait for the store, authenticate
    /// via AppRole, fetch credentials, validate the certificate layout,
    /// and print the runtime config as JSON
    Prepare {
        /// Service name from the catalog
        name: String,
        /// Parent directory of per-service role-id/secret-id files
        #[arg(long, default_value = "approles")]
        approle_dir: PathBuf,
        /// Parent directory of per-service certificate directories
        #[arg(long, default_value = "certs")]
        cert_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Bootstrap {
            ref ca_dir,
            ref approle_dir,
        } => {
            let client = authed_client(&cli)?;
            let config = BootstrapConfig::new(ca_dir, approle_dir);
            let report = PkiBootstrapper::new(client, config)
                .bootstrap()
                .await
                .context("bootstrap failed")?;
            for (step, outcome) in &report.steps {
                info!("{step}: {outcome:?}");
            }
            if report.is_noop() {
                println!("already bootstrapped; nothing to do");
            } else {
                println!(
                    "bootstrap complete: {} created, {} repaired",
                    report.created(),
                    report.repaired()
                );
            }
            Ok(0)
        }
        Commands::Renew {
            ref cert_dir,
            dry_run,
            force,
            ref service,
            quiet,
        } => {
            let client = authed_client(&cli)?;
            let manager =
                CertificateLifecycleManager::new(client, LifecycleConfig::new(cert_dir));
            let plan = RenewalPlan {
                dry_run,
                force,
                service: service.clone(),
            };
            let outcome = manager.run(&plan).await?;
            if !quiet {
                for decision in &outcome.decisions {
                    match decision.days_remaining {
                        Some(days) => {
                            println!("{}: {:?} ({days}d left)", decision.service_name, decision.action)
                        }
                        None => println!("{}: {:?}", decision.service_name, decision.action),
                    }
                }
            }
            for (service, reason) in &outcome.failed {
                warn!(%service, "renewal failed: {reason}");
            }
            println!(
                "renewed {} / skipped {} / failed {}{}",
                outcome.renewed.len(),
                outcome.skipped.len(),
                outcome.failed.len(),
                if dry_run { " (dry run)" } else { "" }
            );
            Ok(outcome.exit_code())
        }
        Commands::CheckExpiration {
            ref cert_dir,
            json,
            nagios,
            ref service,
            warning_days,
            critical_days,
        } => {
            // Reads only the filesystem; the client is never contacted
            let client = plain_client(&cli)?;
            let manager =
                CertificateLifecycleManager::new(client, LifecycleConfig::new(cert_dir));
            let thresholds = Thresholds {
                warning_days,
                critical_days,
            };
            let report = manager.check(thresholds, service.as_deref(), Utc::now().timestamp())?;
            if json {
                println!("{}", report.to_json());
                Ok(report.exit_code())
            } else if nagios {
                println!("{}", report.nagios_line());
                Ok(report.nagios_exit_code())
            } else {
                for entry in &report.entries {
                    match entry.days_remaining {
                        Some(days) => println!("{}: {:?} ({days}d left)", entry.service, entry.status),
                        None => println!("{}: {:?} (no certificate)", entry.service, entry.status),
                    }
                }
                Ok(report.exit_code())
            }
        }
        Commands::Prepare {
            ref name,
            ref approle_dir,
            ref cert_dir,
        } => {
            let catalog = default_catalog();
            let spec = catalog
                .iter()
                .find(|s| &s.name == name)
                .with_context(|| format!("service '{name}' is not in the catalog"))?;

            let client = plain_client(&cli)?;
            let token = ServiceAuthenticator::new(client.clone())
                .authenticate_when_ready(&approle_dir.join(name), RetryPolicy::default())
                .await
                .with_context(|| format!("approle authentication for '{name}' failed"))?;

            let secrets = CredentialStore::new(client.with_token(&token.token));
            let credential = secrets
                .fetch(name)
                .await
                .with_context(|| format!("fetching credentials for '{name}' failed"))?;

            let runtime = vaultsmith_adapter::prepare(spec, &credential, cert_dir)
                .with_context(|| format!("'{name}' is not ready to start"))?;
            println!("{}", serde_json::to_string_pretty(&runtime)?);
            Ok(0)
        }
    }
}

fn resolve_token(cli: &Cli) -> Result<Option<String>> {
    if let Some(token) = &cli.token {
        return Ok(Some(token.clone()));
    }
    if let Some(path) = &cli.token_file {
        let token = std::fs::read_to_string(path)
            .with_context(|| format!("reading token file {}", path.display()))?;
        return Ok(Some(token.trim().to_string()));
    }
    Ok(None)
}

/// Client for operator commands; requires a token.
fn authed_client(cli: &Cli) -> Result<SecretStoreClient> {
    let token = resolve_token(cli)?
        .context("this command needs a store token (--token or --token-file)")?;
    let config = StoreConfig::new(&cli.addr).with_token(token);
    SecretStoreClient::new(config).context("building store client")
}

/// Client that may run unauthenticated (health polling, AppRole login).
fn plain_client(cli: &Cli) -> Result<SecretStoreClient> {
    let mut config = StoreConfig::new(&cli.addr);
    if let Some(token) = resolve_token(cli)? {
        config = config.with_token(token);
    }
    SecretStoreClient::new(config).context("building store client")
}

// RUST_LOG takes precedence over --log-level when both are set
fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
        .with_context(|| format!("invalid log level '{log_level}'"))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
    Ok(())
}
