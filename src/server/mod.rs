// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! API server and the startup sequence that feeds it
//!
//! ```text
//! ServerConfig ──complete()──▶ CompletedConfig ──new_server(provider)──▶ AdapterServer
//!                                                                          │ prepare_run()
//!                                                                          ▼
//!                                                   PreparedServer ──run(stop)──▶ ()
//! ```

mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::{ServerOptions, ServingOptions};
use crate::credentials::make_http_client;
use crate::error::{StartupError, error_chain};
use crate::kubernetes::build_cluster_clients;
use crate::prom::build_backend_client;
use crate::provider::{CustomMetricsProvider, PrometheusProvider};
use crate::shutdown::{BackgroundTasks, StopSignal};

const SERVER_NAME: &str = "prometheus-metrics-adapter";

/// Generic server configuration before completion
#[derive(Debug, Clone)]
pub struct ServerConfig {
    serving: ServingOptions,
    enable_metrics: bool,
}

impl ServerConfig {
    pub fn new(serving: ServingOptions) -> Self {
        Self {
            serving,
            enable_metrics: false,
        }
    }

    /// Fill in defaults. Internal request metrics are always enabled here.
    pub fn complete(mut self) -> CompletedConfig {
        self.enable_metrics = true;
        handlers::register_request_metrics();
        CompletedConfig { config: self }
    }
}

#[derive(Debug, Clone)]
pub struct CompletedConfig {
    config: ServerConfig,
}

impl CompletedConfig {
    /// Construct the server with its provider injected
    pub fn new_server(self, name: &str, provider: Arc<dyn CustomMetricsProvider>) -> AdapterServer {
        AdapterServer {
            name: name.to_string(),
            addr: self.config.serving.socket_addr(),
            router: handlers::router(provider, self.config.enable_metrics),
        }
    }
}

pub struct AdapterServer {
    name: String,
    addr: SocketAddr,
    router: Router,
}

impl AdapterServer {
    /// Bind the listener
    pub async fn prepare_run(self) -> Result<PreparedServer, StartupError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(StartupError::Serve)?;
        Ok(PreparedServer {
            name: self.name,
            listener,
            router: self.router,
        })
    }
}

pub struct PreparedServer {
    name: String,
    listener: TcpListener,
    router: Router,
}

impl PreparedServer {
    pub fn local_addr(&self) -> Result<SocketAddr, StartupError> {
        self.listener.local_addr().map_err(StartupError::Serve)
    }

    /// Serve until `stop` fires, then drain in-flight requests
    pub async fn run(self, stop: StopSignal) -> Result<(), StartupError> {
        let addr = self.local_addr()?;
        info!(server = %self.name, %addr, "Serving custom metrics API");

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move { stop.stopped().await })
            .await
            .map_err(StartupError::Serve)?;

        info!(server = %self.name, "Custom metrics API stopped");
        Ok(())
    }
}

/// Build every component and serve until `stop` fires
///
/// Each startup step is fatal. Background loops run on a child of `stop`, so
/// they are stopped and joined before this returns, whether serving ended
/// normally or with an error.
pub async fn run_adapter_server(
    opts: &ServerOptions,
    stop: StopSignal,
) -> Result<(), StartupError> {
    opts.validate()?;

    let config = ServerConfig::new(opts.serving).complete();

    let clients =
        build_cluster_clients(opts.remote_kubeconfig.as_deref(), opts.discovery_interval).await?;

    let (in_cluster_auth, auth_kubeconfig) = opts.prometheus_auth.as_flags();
    let transport = make_http_client(in_cluster_auth, auth_kubeconfig).await?;
    let prom = build_backend_client(&opts.prometheus_url, transport)?;

    if stop.is_stopped() {
        info!("Stop requested before serving started");
        return Ok(());
    }

    let (background_stop, background) = stop.child();
    let mut tasks = BackgroundTasks::new();
    clients.mapper.spawn_refresh(background.clone(), &mut tasks);

    let provider = PrometheusProvider::spawn(
        clients.mapper,
        clients.pool,
        prom,
        &opts.label_prefix,
        opts.metrics_relist_interval,
        opts.rate_interval,
        background,
        &mut tasks,
    );

    debug!(tasks = tasks.len(), "Background tasks started");

    let server = config.new_server(SERVER_NAME, provider);
    let result = match server.prepare_run().await {
        Ok(prepared) => prepared.run(stop).await,
        Err(e) => Err(e),
    };

    if let Err(e) = &result {
        warn!(error = %error_chain(e), "Stopping background tasks after server failure");
    }
    background_stop.stop();
    tasks.join_all().await;
    result
}
