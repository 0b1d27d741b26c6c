//! Proxy Informer
//!
//! Keeps a validator's proxy configuration in sync with the proxies
//! described by annotated Pods or Services:
//! - Discovery: groups enode URL annotations by node ID into proxies
//! - Reconciliation: removes stale proxies from the validator, then adds
//!   missing ones
//!
//! Passes run on resource changes and on a periodic resync timer.

mod config;
mod controller;
mod discovery;
mod enode;
mod error;
mod observer;
mod reconciler;
#[cfg(test)]
mod test_utils;

use crate::config::{Args, Config};
use crate::controller::Controller;
use crate::error::ControllerError;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();

    // kube and reqwest share rustls; pick the provider before either builds a client
    let _ = rustls::crypto::ring::default_provider().install_default();

    info!("Starting Proxy Informer v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::try_from(Args::parse())?;

    info!("Configuration:");
    info!("  Validator RPC URL: {}", config.rpc_url);
    info!("  Namespace: {}", config.namespace);
    info!("  Label selector: {}", config.label_selector);
    info!("  Resource kind: {}", config.resource_kind);
    info!("  Resync period: {:?}", config.resync_period);
    info!(
        "  Kubeconfig: {}",
        config
            .kubeconfig
            .as_ref()
            .map_or_else(|| "in-cluster / inferred".to_string(), |p| p.display().to_string())
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let controller = Controller::new(&config, shutdown_rx).await?;
    controller.run().await?;

    info!("Proxy Informer stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
