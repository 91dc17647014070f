// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Discovery-backed REST mapper that refreshes itself periodically
//!
//! The mapping is held as an immutable snapshot and replaced as a whole on
//! each refresh. Readers observe a snapshot no older than one refresh interval.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use kube::core::GroupVersionKind;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::discovery::{DiscoveryClient, ResourceMapping, RestMapping};
use crate::error::StartupError;
use crate::shutdown::{BackgroundTasks, StopSignal};

/// Snapshot with the time it was discovered
struct CachedMapping {
    mapping: Arc<RestMapping>,
    discovered_at: Instant,
}

struct MapperInner {
    discovery: Arc<dyn DiscoveryClient>,
    refresh_interval: Duration,
    current: RwLock<CachedMapping>,
}

/// Shared handle to the dynamic REST mapper
#[derive(Clone)]
pub struct DynamicMapper {
    inner: Arc<MapperInner>,
}

impl DynamicMapper {
    /// Create a mapper and perform the first discovery
    ///
    /// Fails if the first discovery fails; there is no lazy initialization.
    pub async fn new(
        discovery: Arc<dyn DiscoveryClient>,
        refresh_interval: Duration,
    ) -> Result<Self, StartupError> {
        let mapping = Self::discover(discovery.as_ref())
            .await
            .map_err(StartupError::MapperInit)?;

        info!(
            resources = mapping.len(),
            refresh_interval = ?refresh_interval,
            "Initialized dynamic REST mapper"
        );

        Ok(Self {
            inner: Arc::new(MapperInner {
                discovery,
                refresh_interval,
                current: RwLock::new(CachedMapping {
                    mapping: Arc::new(mapping),
                    discovered_at: Instant::now(),
                }),
            }),
        })
    }

    async fn discover(discovery: &dyn DiscoveryClient) -> Result<RestMapping> {
        let resources = discovery
            .server_resources()
            .await
            .context("Failed to list server resources")?;
        Ok(RestMapping::from_resources(resources))
    }

    /// Rediscover and swap in a new snapshot. On error the old snapshot stays.
    pub async fn refresh(&self) -> Result<usize> {
        let start = Instant::now();
        let mapping = Self::discover(self.inner.discovery.as_ref()).await?;
        let count = mapping.len();
        if mapping.is_empty() {
            warn!("Discovery returned no resources");
        }

        *self.inner.current.write().await = CachedMapping {
            mapping: Arc::new(mapping),
            discovered_at: Instant::now(),
        };

        debug!(
            resources = count,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Refreshed REST mapping"
        );
        Ok(count)
    }

    /// Current mapping snapshot
    pub async fn snapshot(&self) -> Arc<RestMapping> {
        Arc::clone(&self.inner.current.read().await.mapping)
    }

    /// Time since the current snapshot was discovered
    pub async fn age(&self) -> Duration {
        self.inner.current.read().await.discovered_at.elapsed()
    }

    pub fn refresh_interval(&self) -> Duration {
        self.inner.refresh_interval
    }

    #[allow(dead_code)]
    pub async fn rest_mapping(&self, gvk: &GroupVersionKind) -> Option<ResourceMapping> {
        self.snapshot().await.get(gvk).cloned()
    }

    pub async fn resource_for(&self, name: &str) -> Option<ResourceMapping> {
        self.snapshot().await.resource_for(name).cloned()
    }

    /// Start the periodic refresh loop
    pub fn spawn_refresh(&self, stop: StopSignal, tasks: &mut BackgroundTasks) {
        let mapper = self.clone();
        tasks.spawn("discovery-refresh", async move { mapper.run_refresh(stop).await });
    }

    async fn run_refresh(self, stop: StopSignal) {
        let period = self.refresh_interval();
        // The first discovery already happened in new()
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = stop.stopped() => break,
                _ = ticker.tick() => {
                    // A hung discovery call must not hold up shutdown
                    tokio::select! {
                        biased;
                        _ = stop.stopped() => break,
                        result = self.refresh() => {
                            if let Err(e) = result {
                                let age = self.age().await;
                                warn!(
                                    error = %format!("{e:#}"),
                                    snapshot_age = ?age,
                                    "Failed to refresh discovery, keeping previous mapping"
                                );
                            }
                        }
                    }
                }
            }
        }
    }
}
