// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

mod cli;
mod config;
mod credentials;
mod error;
mod kubernetes;
mod prom;
mod provider;
mod server;
mod shutdown;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use cli::Args;
use config::ServerOptions;
use shutdown::StopHandle;

/// Install the aws-lc-rs rustls provider; later calls are no-ops
pub(crate) fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Initialize logging to stderr; RUST_LOG overrides the default filter
fn init_logging(verbose: bool) {
    let filter = if verbose {
        "prom_adapter=debug"
    } else {
        "prom_adapter=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Resolve once Ctrl-C arrives; never resolves if the listener failed
async fn interrupted<F>(ctrl_c: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = ctrl_c.await {
        warn!(error = %e, "Unable to listen for Ctrl-C");
        // Dropping the handle would count as a stop
        std::future::pending::<()>().await;
    }
}

/// Close the stop signal on SIGINT or SIGTERM
fn spawn_signal_handler(handle: StopHandle) {
    tokio::spawn(async move {
        let interrupt = interrupted(tokio::signal::ctrl_c());

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Unable to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = interrupt => {}
            _ = terminate => {}
        }

        info!("Shutdown signal received");
        handle.stop();
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    install_crypto_provider();

    let args = Args::parse();
    init_logging(args.verbose);

    let options = ServerOptions::try_from(args).context("Invalid command line options")?;

    let (handle, stop) = shutdown::channel();
    spawn_signal_handler(handle);

    server::run_adapter_server(&options, stop)
        .await
        .context("Unable to run custom metrics adapter")?;

    info!("Custom metrics adapter stopped");
    Ok(())
}
