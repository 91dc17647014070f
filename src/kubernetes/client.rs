// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::info;

use super::discovery::{DiscoveryClient, KubeDiscoveryClient};
use super::mapper::DynamicMapper;
use super::pool::ObjectClientPool;
use crate::error::StartupError;

/// Clients for the cluster whose objects the metrics describe
pub struct ClusterClients {
    /// Raw discovery client the mapper was built on
    #[allow(dead_code)]
    pub discovery: Arc<dyn DiscoveryClient>,
    pub mapper: DynamicMapper,
    pub pool: ObjectClientPool,
}

/// Resolve the lister cluster configuration
///
/// An explicit kubeconfig wins; otherwise in-cluster config is required.
/// There is no unauthenticated fallback.
pub async fn load_client_config(remote_kubeconfig: Option<&Path>) -> Result<Config, StartupError> {
    let purpose = "lister client config to initialize provider";
    match remote_kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .map_err(|e| StartupError::credential_load(purpose, e))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| StartupError::credential_load(purpose, e))
        }
        None => Config::incluster().map_err(|e| StartupError::credential_load(purpose, e)),
    }
}

/// Build discovery client, REST mapper and object client pool from a config
///
/// The mapper performs its first discovery here; its refresh loop is started
/// separately with `DynamicMapper::spawn_refresh`.
pub async fn cluster_clients_for_config(
    config: Config,
    discovery_interval: Duration,
) -> Result<ClusterClients, StartupError> {
    let cluster_url = config.cluster_url.clone();
    let client = Client::try_from(config).map_err(StartupError::DiscoveryClient)?;

    let discovery: Arc<dyn DiscoveryClient> = Arc::new(KubeDiscoveryClient::new(client.clone()));
    let mapper = DynamicMapper::new(Arc::clone(&discovery), discovery_interval).await?;
    let pool = ObjectClientPool::new(client, mapper.clone());

    info!(cluster = %cluster_url, "Connected to lister cluster");

    Ok(ClusterClients {
        discovery,
        mapper,
        pool,
    })
}

/// Cluster client factory: config resolution followed by client construction
pub async fn build_cluster_clients(
    remote_kubeconfig: Option<&Path>,
    discovery_interval: Duration,
) -> Result<ClusterClients, StartupError> {
    let config = load_client_config(remote_kubeconfig).await?;
    cluster_clients_for_config(config, discovery_interval).await
}
