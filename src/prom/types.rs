// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Prometheus HTTP API payloads

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer};

/// A PromQL expression or series selector
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Selector(pub String);

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Selector {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Unix timestamp with sub-second precision, as Prometheus expects it
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Timestamp(pub f64);

impl Timestamp {
    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }

    pub fn minus(self, d: Duration) -> Self {
        Self(self.0 - d.as_secs_f64())
    }

    pub fn as_param(&self) -> String {
        format!("{:.3}", self.0)
    }
}

impl From<SystemTime> for Timestamp {
    fn from(t: SystemTime) -> Self {
        Self(
            t.duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64(),
        )
    }
}

/// Time window for series lookups; an unset end means "now"
#[derive(Debug, Clone, Copy)]
pub struct Interval {
    pub start: Timestamp,
    pub end: Option<Timestamp>,
}

/// Time window and resolution for range queries
#[derive(Debug, Clone, Copy)]
pub struct Range {
    pub start: Timestamp,
    pub end: Timestamp,
    pub step: Duration,
}

/// Raw response envelope of the Prometheus HTTP API
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    pub status: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// A series identified by its name and labels
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Series {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

impl<'de> Deserialize<'de> for Series {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut labels = BTreeMap::<String, String>::deserialize(deserializer)?;
        let name = labels.remove("__name__").unwrap_or_default();
        Ok(Series { name, labels })
    }
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.name)?;
        for (i, (k, v)) in self.labels.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={:?}", k, v)?;
        }
        f.write_str("}")
    }
}

/// One sample: timestamp and value as sent by Prometheus
#[derive(Debug, Clone, Deserialize)]
pub struct SamplePair(pub f64, pub String);

impl SamplePair {
    pub fn value(&self) -> Option<f64> {
        self.1.parse().ok()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Sample {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,
    pub value: SamplePair,
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct SampleStream {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,
    pub values: Vec<SamplePair>,
}

/// Result of an instant or range query
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
#[allow(dead_code)] // only vectors are consumed today
pub enum QueryResult {
    Vector(Vec<Sample>),
    Matrix(Vec<SampleStream>),
    Scalar(SamplePair),
    String(SamplePair),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_series_splits_name() {
        let series: Series = serde_json::from_value(json!({
            "__name__": "http_requests_total",
            "namespace": "default",
            "pod": "web-0"
        }))
        .unwrap();
        assert_eq!(series.name, "http_requests_total");
        assert_eq!(series.labels.len(), 2);
        assert_eq!(series.labels["pod"], "web-0");
        assert_eq!(
            series.to_string(),
            r#"http_requests_total{namespace="default",pod="web-0"}"#
        );
    }

    #[test]
    fn test_vector_result() {
        let result: QueryResult = serde_json::from_value(json!({
            "resultType": "vector",
            "result": [
                {"metric": {"pod": "web-0"}, "value": [1700000000.5, "12.5"]},
                {"metric": {"pod": "web-1"}, "value": [1700000000.5, "NaN"]}
            ]
        }))
        .unwrap();
        let QueryResult::Vector(samples) = result else {
            panic!("expected vector");
        };
        assert_eq!(samples[0].metric["pod"], "web-0");
        assert_eq!(samples[0].value.value(), Some(12.5));
        assert!(samples[1].value.value().unwrap().is_nan());
    }

    #[test]
    fn test_scalar_result() {
        let result: QueryResult = serde_json::from_value(json!({
            "resultType": "scalar",
            "result": [1700000000, "3"]
        }))
        .unwrap();
        assert!(matches!(result, QueryResult::Scalar(ref s) if s.value() == Some(3.0)));
    }

    #[test]
    fn test_timestamp_param() {
        let ts = Timestamp(1700000000.0).minus(Duration::from_millis(1500));
        assert_eq!(ts.as_param(), "1699999998.500");
    }

    #[test]
    fn test_error_envelope() {
        let resp: ApiResponse = serde_json::from_value(json!({
            "status": "error",
            "errorType": "bad_data",
            "error": "parse error"
        }))
        .unwrap();
        assert_eq!(resp.error_type.as_deref(), Some("bad_data"));
        assert!(resp.data.is_null());
    }
}
