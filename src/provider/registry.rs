// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Series to metric naming and query generation
//!
//! Each relist replaces the registry contents with the metrics derived from
//! the series currently in Prometheus:
//!
//! - `container_*` series (cAdvisor) describe pods and namespaces through the
//!   unprefixed `pod` and `namespace` labels; the prefix is dropped from the
//!   metric name
//! - other series describe every resource named by a `<prefix><resource>`
//!   label that the REST mapper knows about
//! - `_seconds_total` and `_total` suffixes mark counters and are dropped

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::trace;

use super::types::CustomMetricInfo;
use crate::kubernetes::{ResourceMapping, RestMapping};
use crate::prom::{Selector, Series};

const CONTAINER_PREFIX: &str = "container_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Counter,
}

/// Split a series name into the advertised metric name and its kind
pub fn metric_name(series_name: &str) -> (String, MetricKind) {
    let base = series_name
        .strip_prefix(CONTAINER_PREFIX)
        .unwrap_or(series_name);
    for suffix in ["_seconds_total", "_total"] {
        if let Some(stripped) = base.strip_suffix(suffix) {
            return (stripped.to_string(), MetricKind::Counter);
        }
    }
    (base.to_string(), MetricKind::Gauge)
}

/// Everything needed to query one advertised metric
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesEntry {
    pub series_name: String,
    pub kind: MetricKind,
    pub resource: ResourceMapping,
    /// Label carrying the described object's name
    pub resource_label: String,
    /// Label carrying the namespace, for namespaced metrics
    pub namespace_label: Option<String>,
    pub extra_matchers: Vec<String>,
}

impl SeriesEntry {
    /// Aggregate query returning one sample per named object, keyed by `resource_label`
    pub fn query(
        &self,
        namespace: Option<&str>,
        names: &[String],
        rate_interval: Duration,
    ) -> Selector {
        let mut matchers = self.extra_matchers.clone();
        if let (Some(label), Some(ns)) = (&self.namespace_label, namespace) {
            matchers.push(format!("{}={:?}", label, ns));
        }

        let mut names: Vec<&str> = names.iter().map(String::as_str).collect();
        names.sort_unstable();
        names.dedup();
        match names.as_slice() {
            [] => {}
            [single] => matchers.push(format!("{}={:?}", self.resource_label, single)),
            many => {
                let alternatives: Vec<String> =
                    many.iter().map(|n| n.replace('.', "\\\\.")).collect();
                matchers.push(format!("{}=~\"{}\"", self.resource_label, alternatives.join("|")));
            }
        }

        let selector = format!("{}{{{}}}", self.series_name, matchers.join(","));
        let expr = match self.kind {
            MetricKind::Gauge => format!("sum({}) by ({})", selector, self.resource_label),
            MetricKind::Counter => format!(
                "sum(rate({}[{}s])) by ({})",
                selector,
                rate_interval.as_secs(),
                self.resource_label
            ),
        };
        Selector(expr)
    }
}

/// Known metrics, replaced as a whole on each relist
pub struct SeriesRegistry {
    label_prefix: String,
    metrics: RwLock<HashMap<CustomMetricInfo, SeriesEntry>>,
}

impl SeriesRegistry {
    pub fn new(label_prefix: impl Into<String>) -> Self {
        Self {
            label_prefix: label_prefix.into(),
            metrics: RwLock::new(HashMap::new()),
        }
    }

    /// Series selectors used for relisting
    pub fn selectors(&self) -> Vec<Selector> {
        vec![
            Selector(
                r#"{__name__=~"^container_.*",container!="POD",namespace!="",pod!=""}"#.to_string(),
            ),
            Selector(format!(
                r#"{{{}namespace!="",__name__!~"^container_.*"}}"#,
                self.label_prefix
            )),
        ]
    }

    /// Replace the registry contents. Returns the number of metrics now known.
    pub async fn set_series(&self, series: &[Series], mapping: &RestMapping) -> usize {
        let mut metrics = HashMap::new();
        for s in series {
            for (info, entry) in self.classify(s, mapping) {
                // First series wins when two produce the same metric
                metrics.entry(info).or_insert(entry);
            }
        }
        let count = metrics.len();
        *self.metrics.write().await = metrics;
        count
    }

    pub async fn list_all(&self) -> Vec<CustomMetricInfo> {
        let mut infos: Vec<_> = self.metrics.read().await.keys().cloned().collect();
        infos.sort();
        infos
    }

    pub async fn lookup(&self, info: &CustomMetricInfo) -> Option<SeriesEntry> {
        self.metrics.read().await.get(info).cloned()
    }

    fn classify(
        &self,
        series: &Series,
        mapping: &RestMapping,
    ) -> Vec<(CustomMetricInfo, SeriesEntry)> {
        let (metric, kind) = metric_name(&series.name);
        let container = series.name.starts_with(CONTAINER_PREFIX);

        let (namespace_label, extra_matchers, resource_labels) = if container {
            (
                "namespace".to_string(),
                vec![r#"container!="POD""#.to_string()],
                vec!["pod".to_string(), "namespace".to_string()],
            )
        } else {
            let labels: Vec<String> = series
                .labels
                .keys()
                .filter(|k| k.starts_with(&self.label_prefix) && k.len() > self.label_prefix.len())
                .cloned()
                .collect();
            (format!("{}namespace", self.label_prefix), Vec::new(), labels)
        };
        let has_namespace = series.labels.contains_key(&namespace_label);

        let mut entries = Vec::new();
        for label in resource_labels {
            let name = if container {
                label.as_str()
            } else {
                &label[self.label_prefix.len()..]
            };
            let Some(resource) = mapping.resource_for(name) else {
                trace!(
                    series = %series.name,
                    label = %label,
                    "Label does not name a known resource"
                );
                continue;
            };

            let group_resource = resource.group_resource();
            let namespaced = group_resource != "namespaces" && resource.namespaced;
            if namespaced && !has_namespace {
                continue;
            }

            entries.push((
                CustomMetricInfo::new(group_resource, namespaced, metric.clone()),
                SeriesEntry {
                    series_name: series.name.clone(),
                    kind,
                    resource: resource.clone(),
                    resource_label: label.clone(),
                    namespace_label: namespaced.then(|| namespace_label.clone()),
                    extra_matchers: extra_matchers.clone(),
                },
            ));
        }
        entries
    }
}
