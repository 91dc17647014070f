// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Custom metrics provider backed by Prometheus
//!
//! The provider periodically relists the series Prometheus knows about and
//! turns them into the set of metrics advertised through the API. Lookups
//! resolve objects through the cluster and query Prometheus on demand.

mod registry;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub use registry::{MetricKind, SeriesEntry, SeriesRegistry};
pub use types::{CustomMetricInfo, MetricValue, MetricValueList, ObjectReference};

use crate::error::error_chain;
use crate::kubernetes::{DynamicMapper, ObjectClientPool};
use crate::prom::{BackendError, Interval, PrometheusClient, QueryResult, Timestamp};
use crate::shutdown::{BackgroundTasks, StopSignal};
use types::{format_quantity, format_timestamp};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("the server could not find the requested resource {0:?}")]
    UnknownResource(String),

    #[error("the server could not find the metric {metric} for {resource}")]
    MetricNotFound { resource: String, metric: String },

    #[error("{resource} {name:?} not found")]
    ObjectNotFound { resource: String, name: String },

    #[error("unable to fetch metrics from Prometheus")]
    Backend(#[from] BackendError),

    #[error("unable to look up objects")]
    Cluster(#[source] anyhow::Error),

    #[error("unexpected Prometheus result type for query {0}")]
    UnexpectedResult(String),
}

/// Answers custom metrics API requests
#[async_trait]
pub trait CustomMetricsProvider: Send + Sync {
    /// Every metric currently available
    async fn list_all_metrics(&self) -> Vec<CustomMetricInfo>;

    /// Value of a metric for one named object
    ///
    /// `resource` is any name the cluster knows the kind by ("pods", "pod",
    /// "deployments.apps"). `namespace` is `None` for cluster-scoped objects.
    async fn get_metric_by_name(
        &self,
        resource: &str,
        namespace: Option<&str>,
        name: &str,
        metric: &str,
    ) -> Result<MetricValue, ProviderError>;

    /// Values of a metric for every object matching a label selector
    async fn get_metric_by_selector(
        &self,
        resource: &str,
        namespace: Option<&str>,
        selector: &str,
        metric: &str,
    ) -> Result<MetricValueList, ProviderError>;
}

pub struct PrometheusProvider {
    mapper: DynamicMapper,
    pool: ObjectClientPool,
    prom: PrometheusClient,
    registry: SeriesRegistry,
    relist_interval: Duration,
    rate_interval: Duration,
}

impl PrometheusProvider {
    /// Compose the provider and start its relist loop
    ///
    /// The first relist runs right away; the loop exits when `stop` fires.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        mapper: DynamicMapper,
        pool: ObjectClientPool,
        prom: PrometheusClient,
        label_prefix: &str,
        relist_interval: Duration,
        rate_interval: Duration,
        stop: StopSignal,
        tasks: &mut BackgroundTasks,
    ) -> Arc<Self> {
        let provider = Arc::new(Self {
            mapper,
            pool,
            prom,
            registry: SeriesRegistry::new(label_prefix),
            relist_interval,
            rate_interval,
        });

        info!(
            relist_interval = ?relist_interval,
            rate_interval = ?rate_interval,
            label_prefix = %label_prefix,
            "Starting Prometheus metrics provider"
        );

        let relister = Arc::clone(&provider);
        tasks.spawn("metrics-relist", async move { relister.run_relist(stop).await });
        provider
    }

    /// Refresh the set of known metrics from Prometheus
    pub async fn relist(&self) -> Result<usize, BackendError> {
        let interval = Interval {
            start: Timestamp::now().minus(self.relist_interval),
            end: None,
        };
        let series = self.prom.series(interval, &self.registry.selectors()).await?;
        let mapping = self.mapper.snapshot().await;
        let count = self.registry.set_series(&series, &mapping).await;
        debug!(series = series.len(), metrics = count, "Relisted available metrics");
        Ok(count)
    }

    async fn run_relist(self: Arc<Self>, stop: StopSignal) {
        let mut ticker = tokio::time::interval(self.relist_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = stop.stopped() => break,
                _ = ticker.tick() => {
                    // A slow backend must not hold up shutdown
                    tokio::select! {
                        biased;
                        _ = stop.stopped() => break,
                        result = self.relist() => {
                            if let Err(e) = result {
                                warn!(
                                    error = %error_chain(&e),
                                    "Failed to relist metrics, keeping previous set"
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    async fn resolve(
        &self,
        resource: &str,
        namespaced: bool,
        metric: &str,
    ) -> Result<(CustomMetricInfo, SeriesEntry), ProviderError> {
        let mapping = self
            .mapper
            .resource_for(resource)
            .await
            .ok_or_else(|| ProviderError::UnknownResource(resource.to_string()))?;
        let info = CustomMetricInfo::new(mapping.group_resource(), namespaced, metric);
        match self.registry.lookup(&info).await {
            Some(entry) => Ok((info, entry)),
            None => Err(ProviderError::MetricNotFound {
                resource: info.group_resource,
                metric: info.metric,
            }),
        }
    }

    /// Query values for the named objects, skipping objects without a usable sample
    async fn query_values(
        &self,
        info: &CustomMetricInfo,
        entry: &SeriesEntry,
        namespace: Option<&str>,
        names: &[String],
    ) -> Result<Vec<MetricValue>, ProviderError> {
        let query = entry.query(namespace, names, self.rate_interval);
        debug!(metric = %info, query = %query, "Querying Prometheus");

        let QueryResult::Vector(samples) = self.prom.query(Timestamp::now(), &query).await? else {
            return Err(ProviderError::UnexpectedResult(query.0));
        };

        let api_resource = &entry.resource.api_resource;
        let mut values: Vec<MetricValue> = samples
            .into_iter()
            .filter_map(|sample| {
                let name = sample.metric.get(&entry.resource_label)?;
                if !names.contains(name) {
                    return None;
                }
                let value = sample.value.value().and_then(format_quantity)?;
                Some(MetricValue {
                    described_object: ObjectReference {
                        kind: api_resource.kind.clone(),
                        namespace: namespace.filter(|_| info.namespaced).map(str::to_string),
                        name: name.clone(),
                        api_version: api_resource.api_version.clone(),
                    },
                    metric_name: info.metric.clone(),
                    timestamp: format_timestamp(sample.value.0),
                    value,
                })
            })
            .collect();
        values.sort_by(|a, b| a.described_object.name.cmp(&b.described_object.name));
        Ok(values)
    }
}

#[async_trait]
impl CustomMetricsProvider for PrometheusProvider {
    async fn list_all_metrics(&self) -> Vec<CustomMetricInfo> {
        self.registry.list_all().await
    }

    async fn get_metric_by_name(
        &self,
        resource: &str,
        namespace: Option<&str>,
        name: &str,
        metric: &str,
    ) -> Result<MetricValue, ProviderError> {
        let (info, entry) = self.resolve(resource, namespace.is_some(), metric).await?;

        let object = self
            .pool
            .get(&info.group_resource, namespace, name)
            .await
            .map_err(ProviderError::Cluster)?;
        if object.is_none() {
            return Err(ProviderError::ObjectNotFound {
                resource: info.group_resource,
                name: name.to_string(),
            });
        }

        let names = [name.to_string()];
        let values = self.query_values(&info, &entry, namespace, &names).await?;
        values
            .into_iter()
            .next()
            .ok_or(ProviderError::MetricNotFound {
                resource: info.group_resource,
                metric: info.metric,
            })
    }

    async fn get_metric_by_selector(
        &self,
        resource: &str,
        namespace: Option<&str>,
        selector: &str,
        metric: &str,
    ) -> Result<MetricValueList, ProviderError> {
        let (info, entry) = self.resolve(resource, namespace.is_some(), metric).await?;

        let label_selector = Some(selector).filter(|s| !s.is_empty());
        let names: Vec<String> = self
            .pool
            .list(&info.group_resource, namespace, label_selector)
            .await
            .map_err(ProviderError::Cluster)?
            .into_iter()
            .filter_map(|object| object.metadata.name)
            .collect();
        if names.is_empty() {
            return Ok(MetricValueList::new(Vec::new()));
        }

        let items = self.query_values(&info, &entry, namespace, &names).await?;
        Ok(MetricValueList::new(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Transport;
    use crate::kubernetes::build_cluster_clients;
    use crate::prom::build_backend_client;
    use crate::shutdown::{self, StopHandle};
    use crate::testing::{FakeCluster, FakePrometheus};

    struct Fixture {
        _cluster: FakeCluster,
        prom: FakePrometheus,
        provider: Arc<PrometheusProvider>,
        stop: StopHandle,
        tasks: BackgroundTasks,
    }

    impl Fixture {
        async fn start() -> Self {
            let cluster = FakeCluster::start().await;
            let prom = FakePrometheus::start().await;
            let kubeconfig = cluster.kubeconfig();
            let clients = build_cluster_clients(Some(kubeconfig.path()), Duration::from_secs(600))
                .await
                .unwrap();
            let backend = build_backend_client(&prom.url(), Transport::unauthenticated()).unwrap();

            let (stop, signal) = shutdown::channel();
            let mut tasks = BackgroundTasks::new();
            let provider = PrometheusProvider::spawn(
                clients.mapper,
                clients.pool,
                backend,
                "",
                Duration::from_secs(600),
                Duration::from_secs(300),
                signal,
                &mut tasks,
            );
            Self {
                _cluster: cluster,
                prom,
                provider,
                stop,
                tasks,
            }
        }

        /// Wait for the first relist to land
        async fn synced(self) -> Self {
            tokio::time::timeout(Duration::from_secs(5), async {
                while self.provider.list_all_metrics().await.is_empty() {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .expect("first relist did not complete");
            self
        }

        async fn shutdown(mut self) {
            self.stop.stop();
            tokio::time::timeout(Duration::from_secs(1), self.tasks.join_all())
                .await
                .expect("relist loop did not exit");
        }
    }

    #[tokio::test]
    async fn test_relist_runs_on_start() {
        let fixture = Fixture::start().await.synced().await;
        let metrics = fixture.provider.list_all_metrics().await;
        assert!(metrics.contains(&CustomMetricInfo::new("pods", true, "http_requests")));
        assert!(metrics.contains(&CustomMetricInfo::new("pods", true, "memory_working_set_bytes")));
        assert!(metrics.contains(&CustomMetricInfo::new("namespaces", false, "http_requests")));

        let series_call = fixture
            .prom
            .requests()
            .into_iter()
            .find(|(path, _)| path == "/api/v1/series")
            .unwrap();
        assert!(series_call.1.contains("start="));
        fixture.shutdown().await;
    }

    #[tokio::test]
    async fn test_metric_by_name() {
        let fixture = Fixture::start().await.synced().await;
        let value = fixture
            .provider
            .get_metric_by_name("pod", Some("default"), "web-0", "http_requests")
            .await
            .unwrap();
        assert_eq!(value.value, "12500m");
        assert_eq!(value.described_object.kind, "Pod");
        assert_eq!(value.described_object.namespace.as_deref(), Some("default"));
        assert_eq!(value.timestamp, "2023-11-14T22:13:20Z");

        let query = fixture
            .prom
            .requests()
            .into_iter()
            .rev()
            .find(|(path, _)| path == "/api/v1/query")
            .unwrap();
        assert!(query.1.contains("rate"));
        fixture.shutdown().await;
    }

    #[tokio::test]
    async fn test_metric_by_name_errors() {
        let fixture = Fixture::start().await.synced().await;
        let provider = &fixture.provider;

        let err = provider
            .get_metric_by_name("pods", Some("default"), "missing", "http_requests")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::ObjectNotFound { .. }));

        let err = provider
            .get_metric_by_name("pods", Some("default"), "web-0", "no_such_metric")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::MetricNotFound { .. }));

        let err = provider
            .get_metric_by_name("widgets", Some("default"), "w", "http_requests")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));

        // db-0 exists but has no sample
        let err = provider
            .get_metric_by_name("pods", Some("default"), "db-0", "http_requests")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::MetricNotFound { .. }));
        fixture.shutdown().await;
    }

    #[tokio::test]
    async fn test_metric_by_selector() {
        let fixture = Fixture::start().await.synced().await;
        let list = fixture
            .provider
            .get_metric_by_selector("pods", Some("default"), "app=web", "http_requests")
            .await
            .unwrap();
        let names: Vec<_> = list
            .items
            .iter()
            .map(|v| v.described_object.name.as_str())
            .collect();
        assert_eq!(names, vec!["web-0", "web-1"]);
        assert_eq!(list.items[1].value, "3");

        let empty = fixture
            .provider
            .get_metric_by_selector("pods", Some("default"), "app=db", "http_requests")
            .await
            .unwrap();
        assert!(empty.items.is_empty());
        fixture.shutdown().await;
    }

    #[tokio::test]
    async fn test_non_finite_samples_are_skipped() {
        let fixture = Fixture::start().await.synced().await;
        fixture.prom.set_samples(serde_json::json!([
            {"metric": {"pod": "web-0"}, "value": [1700000000, "NaN"]},
            {"metric": {"pod": "web-1"}, "value": [1700000000, "+Inf"]},
        ]));
        let list = fixture
            .provider
            .get_metric_by_selector("pods", Some("default"), "", "http_requests")
            .await
            .unwrap();
        assert!(list.items.is_empty());
        fixture.shutdown().await;
    }

    #[tokio::test]
    async fn test_relist_loop_stops() {
        let mut fixture = Fixture::start().await;
        assert_eq!(fixture.tasks.len(), 1);
        fixture.stop.stop();
        tokio::time::timeout(Duration::from_secs(1), fixture.tasks.join_all())
            .await
            .expect("relist loop did not exit");
        assert_eq!(fixture.tasks.len(), 0);
    }
}
