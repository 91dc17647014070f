// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! custom.metrics.k8s.io/v1beta1 payloads

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{APIResource, APIResourceList};
use serde::Serialize;

pub const GROUP_VERSION: &str = "custom.metrics.k8s.io/v1beta1";

/// A metric as advertised in the discovery document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CustomMetricInfo {
    /// Group-qualified resource ("pods", "deployments.apps")
    pub group_resource: String,
    pub namespaced: bool,
    pub metric: String,
}

impl CustomMetricInfo {
    pub fn new(
        group_resource: impl Into<String>,
        namespaced: bool,
        metric: impl Into<String>,
    ) -> Self {
        Self {
            group_resource: group_resource.into(),
            namespaced,
            metric: metric.into(),
        }
    }

    /// Name of the API resource ("pods/http_requests")
    pub fn api_resource_name(&self) -> String {
        format!("{}/{}", self.group_resource, self.metric)
    }
}

impl fmt::Display for CustomMetricInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespaced {
            write!(f, "{} (namespaced)", self.api_resource_name())
        } else {
            f.write_str(&self.api_resource_name())
        }
    }
}

/// Reference to the object a metric value describes
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    pub api_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricValue {
    pub described_object: ObjectReference,
    pub metric_name: String,
    pub timestamp: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ListMeta {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricValueList {
    pub kind: &'static str,
    pub api_version: &'static str,
    pub metadata: ListMeta,
    pub items: Vec<MetricValue>,
}

impl MetricValueList {
    pub fn new(items: Vec<MetricValue>) -> Self {
        Self {
            kind: "MetricValueList",
            api_version: GROUP_VERSION,
            metadata: ListMeta::default(),
            items,
        }
    }
}

/// Render a sample value as a decimal quantity with milli precision
///
/// Whole numbers are printed plainly ("12"), anything else in millis ("12500m").
/// Values too large for milli precision use exponent form ("1.5e16").
/// Non-finite values have no quantity representation.
pub fn format_quantity(value: f64) -> Option<String> {
    if !value.is_finite() {
        return None;
    }
    let scaled = (value * 1000.0).round();
    if scaled.abs() >= i64::MAX as f64 {
        return Some(format!("{value:e}"));
    }
    let millis = scaled as i64;
    if millis % 1000 == 0 {
        Some((millis / 1000).to_string())
    } else {
        Some(format!("{}m", millis))
    }
}

/// RFC3339 timestamp for a Prometheus sample time (seconds since epoch)
pub fn format_timestamp(seconds: f64) -> String {
    let secs = seconds.trunc() as i64;
    let nanos = (seconds.fract() * 1e9) as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Discovery document listing every known metric
pub fn resource_list(metrics: &[CustomMetricInfo]) -> APIResourceList {
    APIResourceList {
        group_version: GROUP_VERSION.to_string(),
        resources: metrics
            .iter()
            .map(|info| APIResource {
                name: info.api_resource_name(),
                namespaced: info.namespaced,
                kind: "MetricValueList".to_string(),
                verbs: vec!["get".to_string()],
                ..Default::default()
            })
            .collect(),
    }
}
