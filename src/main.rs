//! # Vault Reflector
//!
//! Reflects secrets from HashiCorp Vault into Kubernetes Secrets.
//!
//! ## Modes
//!
//! - **single pass** (default): authenticate, reflect every mapping, exit
//! - **daemon** (`daemon: true` or `--daemon`): refresh on `refreshInterval`
//!   until SIGINT/SIGTERM, serving `/metrics`, `/healthz` and `/readyz`
//!
//! Startup and single-pass failures exit with a phase-specific code (see
//! `--help`). In daemon mode a failing cycle only sets `vault_reflector_status`
//! to 0; the next cycle runs on schedule.

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use vault_reflector::auth::{Authenticator, GceMetadata};
use vault_reflector::cli::Cli;
use vault_reflector::cluster::KubeSecrets;
use vault_reflector::config::{self, ReflectorConfig};
use vault_reflector::constants::exit_codes;
use vault_reflector::observability::{init_logging, metrics, LogFormat};
use vault_reflector::reflector::Reflector;
use vault_reflector::runtime::{RefreshLoop, StatusGauge, SyncCycle};
use vault_reflector::server::{start_server, ServerState};
use vault_reflector::vault::{SecretStore, VaultClient};

/// A failure that ends the process with `code`
#[derive(Debug)]
struct Exit {
    code: i32,
    error: anyhow::Error,
}

impl Exit {
    fn new(code: i32, error: impl Into<anyhow::Error>) -> Self {
        Self {
            code,
            error: error.into(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Must happen before any TLS client is built
    // Ignore the result: a provider may already be installed
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                to_exit_code(exit_codes::INVALID_ARGUMENTS)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_logging(LogFormat::from_env());

    info!(
        "Starting vault-reflector {} (built {}, commit {})",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(exit) => {
            error!("{:#}", exit.error);
            to_exit_code(exit.code)
        }
    }
}

fn to_exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

async fn run(cli: Cli) -> Result<(), Exit> {
    let config = config::load(&cli.config).map_err(|e| Exit::new(e.exit_code(), e))?;
    let daemon = cli.daemon_mode(config.daemon);

    info!(
        "Loaded {} mapping(s) from {} (auth: {}, daemon: {})",
        config.mappings.len(),
        cli.config.display(),
        config.vault.auth.as_str(),
        daemon
    );

    let cycle = build_cycle(&config).await?;

    if daemon {
        run_daemon(&config, &cycle).await
    } else {
        let refresh = RefreshLoop::new(config.refresh_interval(), Arc::new(StatusGauge::default()));
        refresh
            .run_cycle(&cycle)
            .await
            .map(|_| ())
            .map_err(|e| Exit::new(e.exit_code(), e))
    }
}

/// Build the Vault and Kubernetes clients and wire them into a cycle
async fn build_cycle(config: &ReflectorConfig) -> Result<SyncCycle, Exit> {
    let vault_url = config
        .vault_url()
        .map_err(|e| Exit::new(e.exit_code(), e))?;
    let vault = Arc::new(
        VaultClient::new(
            vault_url,
            config.vault_request_timeout(),
            config.vault.tls.as_ref(),
        )
        .context("Failed to create Vault client")
        .map_err(|e| Exit::new(exit_codes::VAULT_CLIENT, e))?,
    );

    let metadata = Arc::new(
        GceMetadata::from_env()
            .context("Failed to create metadata server client")
            .map_err(|e| Exit::new(exit_codes::VAULT_CLIENT, e))?,
    );

    let kube_client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client. Ensure kubeconfig or in-cluster config is available.")
        .map_err(|e| Exit::new(exit_codes::KUBERNETES_CLIENT, e))?;

    let authenticator = Authenticator::new(config.vault.auth.clone(), metadata);
    let reflector = Reflector::new(
        Arc::clone(&vault) as Arc<dyn SecretStore>,
        Arc::new(KubeSecrets::new(kube_client)),
        config.label.clone(),
    );

    Ok(SyncCycle::new(
        authenticator,
        vault,
        reflector,
        config.resolved_mappings(),
    ))
}

async fn run_daemon(config: &ReflectorConfig, cycle: &SyncCycle) -> Result<(), Exit> {
    if let Err(e) = metrics::register_metrics() {
        warn!("Failed to register metrics: {}", e);
    }

    let listen_address: SocketAddr = config
        .listen_address
        .parse()
        .map_err(|e| Exit::new(exit_codes::CONFIG_INVALID, anyhow::anyhow!("invalid listenAddress: {e}")))?;

    let server_state = Arc::new(ServerState::default());
    let server_state_clone = server_state.clone();
    tokio::spawn(async move {
        if let Err(e) = start_server(listen_address, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Clients are built by now
    server_state.mark_ready();

    let refresh = RefreshLoop::new(config.refresh_interval(), Arc::new(StatusGauge::default()));
    let shutdown_state = server_state.clone();
    refresh
        .run_until(cycle, async move {
            shutdown_signal().await;
            info!("Received shutdown signal, finishing in-flight cycle...");
            shutdown_state.mark_not_ready();
        })
        .await;

    info!("vault-reflector stopped");
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
