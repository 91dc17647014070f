// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Adapter configuration
//!
//! `ServerOptions` is built once from the command line and passed by reference
//! into every factory. Conflicting Prometheus auth flags are rejected here, so
//! the credential resolver only ever sees a single `AuthMode`.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Args;
use crate::error::StartupError;

/// Where the Prometheus transport takes its credentials from
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthMode {
    #[default]
    NoAuth,
    InCluster,
    ExplicitConfig(PathBuf),
}

impl AuthMode {
    /// Decide the auth mode from the two mutually exclusive flags
    pub fn from_flags(in_cluster: bool, kubeconfig: Option<PathBuf>) -> Result<Self, StartupError> {
        let kubeconfig = kubeconfig.filter(|p| !p.as_os_str().is_empty());
        match (in_cluster, kubeconfig) {
            (true, Some(_)) => Err(StartupError::ConfigConflict),
            (true, None) => Ok(AuthMode::InCluster),
            (false, Some(path)) => Ok(AuthMode::ExplicitConfig(path)),
            (false, None) => Ok(AuthMode::NoAuth),
        }
    }

    /// The flag pair this mode was decided from; an empty path means unset
    pub fn as_flags(&self) -> (bool, &Path) {
        match self {
            AuthMode::NoAuth => (false, Path::new("")),
            AuthMode::InCluster => (true, Path::new("")),
            AuthMode::ExplicitConfig(path) => (false, path.as_path()),
        }
    }
}

/// Listener settings for the custom metrics API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServingOptions {
    pub bind_address: IpAddr,
    pub port: u16,
}

impl ServingOptions {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

impl Default for ServingOptions {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::from([0, 0, 0, 0]),
            port: 6443,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// kubeconfig used to list objects on the core API server; in-cluster config when unset
    pub remote_kubeconfig: Option<PathBuf>,
    /// Interval at which to relist the set of available metrics
    pub metrics_relist_interval: Duration,
    /// Period of time used to calculate rate metrics
    pub rate_interval: Duration,
    /// Interval at which discovery information is refreshed
    pub discovery_interval: Duration,
    /// Base URL of Prometheus. Query parameters are kept and sent with every request.
    pub prometheus_url: String,
    pub prometheus_auth: AuthMode,
    /// Prefix expected on labels for Kubernetes resources
    /// (e.g. with "kube_", a "kube_pod" label marks a pod metric)
    pub label_prefix: String,
    pub serving: ServingOptions,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            remote_kubeconfig: None,
            metrics_relist_interval: Duration::from_secs(10 * 60),
            rate_interval: Duration::from_secs(5 * 60),
            discovery_interval: Duration::from_secs(10 * 60),
            prometheus_url: "https://localhost".to_string(),
            prometheus_auth: AuthMode::NoAuth,
            label_prefix: String::new(),
            serving: ServingOptions::default(),
        }
    }
}

impl ServerOptions {
    fn ensure_nonzero(flag: &'static str, value: Duration) -> Result<(), StartupError> {
        if value.is_zero() {
            return Err(StartupError::InvalidOption {
                flag,
                reason: "interval must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Check the invariants that the flag parser cannot express
    pub fn validate(&self) -> Result<(), StartupError> {
        Self::ensure_nonzero("metrics-relist-interval", self.metrics_relist_interval)?;
        Self::ensure_nonzero("rate-interval", self.rate_interval)?;
        Self::ensure_nonzero("discovery-interval", self.discovery_interval)?;
        Ok(())
    }
}

impl TryFrom<Args> for ServerOptions {
    type Error = StartupError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let prometheus_auth =
            AuthMode::from_flags(args.prometheus_auth_incluster, args.prometheus_auth_config)?;

        let options = Self {
            remote_kubeconfig: args.lister_kubeconfig.filter(|p| !p.as_os_str().is_empty()),
            metrics_relist_interval: args.metrics_relist_interval,
            rate_interval: args.rate_interval,
            discovery_interval: args.discovery_interval,
            prometheus_url: args.prometheus_url,
            prometheus_auth,
            label_prefix: args.label_prefix,
            serving: ServingOptions {
                bind_address: args.bind_address,
                port: args.secure_port,
            },
        };
        options.validate()?;
        Ok(options)
    }
}
