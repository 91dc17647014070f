// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Request instrumentation for the Prometheus client

use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use prometheus::{
    HistogramVec, IntCounterVec, exponential_buckets, register_histogram_vec,
    register_int_counter_vec,
};

use super::BackendError;
use super::client::GenericApiClient;
use super::types::ApiResponse;

static QUERY_LATENCY: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "cmgateway_prometheus_query_latency_seconds",
        "Prometheus client query latency in seconds by target endpoint and target server",
        &["endpoint", "server"],
        exponential_buckets(0.005, 2.0, 12).expect("buckets")
    )
    .expect("register_histogram_vec")
});

static QUERY_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "cmgateway_prometheus_queries_total",
        "Prometheus client queries by target endpoint, target server and outcome",
        &["endpoint", "server", "outcome"]
    )
    .expect("register_int_counter_vec")
});

/// Result classification used as the `outcome` label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Request never produced an HTTP response
    TransportError,
    /// Non-2xx response or an undecodable body
    HttpError,
    /// Prometheus answered with status "error"
    ApiError,
}

impl Outcome {
    pub fn of(result: &Result<ApiResponse, BackendError>) -> Self {
        match result {
            Ok(_) => Outcome::Success,
            Err(BackendError::Http(_)) => Outcome::TransportError,
            Err(BackendError::Status { .. }) | Err(BackendError::Decode(_)) => Outcome::HttpError,
            Err(BackendError::Api { .. }) => Outcome::ApiError,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::TransportError => "transport_error",
            Outcome::HttpError => "http_error",
            Outcome::ApiError => "api_error",
        }
    }
}

/// Sink for per-request measurements
pub trait RequestObserver: Send + Sync {
    fn observe(&self, endpoint: &str, server: &str, outcome: Outcome, elapsed: Duration);
}

/// Records into the process-wide Prometheus registry
pub struct PrometheusObserver;

impl RequestObserver for PrometheusObserver {
    fn observe(&self, endpoint: &str, server: &str, outcome: Outcome, elapsed: Duration) {
        QUERY_LATENCY
            .with_label_values(&[endpoint, server])
            .observe(elapsed.as_secs_f64());
        QUERY_TOTAL
            .with_label_values(&[endpoint, server, outcome.as_str()])
            .inc();
    }
}

/// Wraps a generic client and records latency and outcome of every request
pub struct InstrumentedApiClient {
    inner: Arc<dyn GenericApiClient>,
    server_name: String,
    observer: Arc<dyn RequestObserver>,
}

impl InstrumentedApiClient {
    pub fn with_observer(
        inner: Arc<dyn GenericApiClient>,
        server_name: impl Into<String>,
        observer: Arc<dyn RequestObserver>,
    ) -> Self {
        Self {
            inner,
            server_name: server_name.into(),
            observer,
        }
    }
}

#[async_trait]
impl GenericApiClient for InstrumentedApiClient {
    async fn get(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<ApiResponse, BackendError> {
        let start = Instant::now();
        let result = self.inner.get(endpoint, query).await;
        self.observer.observe(
            endpoint,
            &self.server_name,
            Outcome::of(&result),
            start.elapsed(),
        );
        result
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Observer double that keeps every measurement
    #[derive(Default)]
    pub(crate) struct RecordingObserver {
        pub(crate) calls: Mutex<Vec<(String, String, Outcome)>>,
    }

    impl RequestObserver for RecordingObserver {
        fn observe(&self, endpoint: &str, server: &str, outcome: Outcome, _elapsed: Duration) {
            self.calls
                .lock()
                .unwrap()
                .push((endpoint.to_string(), server.to_string(), outcome));
        }
    }

    struct FixedClient(Result<(), u16>);

    #[async_trait]
    impl GenericApiClient for FixedClient {
        async fn get(
            &self,
            _endpoint: &str,
            _query: &[(&str, String)],
        ) -> Result<ApiResponse, BackendError> {
            match self.0 {
                Ok(()) => Ok(ApiResponse {
                    status: "success".to_string(),
                    data: serde_json::Value::Null,
                    error_type: None,
                    error: None,
                }),
                Err(code) => Err(BackendError::Status {
                    code,
                    body: "down".to_string(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_observes_success_and_failure() {
        let observer = Arc::new(RecordingObserver::default());
        let ok = InstrumentedApiClient::with_observer(
            Arc::new(FixedClient(Ok(()))),
            "http://prom:9090",
            observer.clone(),
        );
        let failing = InstrumentedApiClient::with_observer(
            Arc::new(FixedClient(Err(503))),
            "http://prom:9090",
            observer.clone(),
        );

        ok.get("/api/v1/query", &[]).await.unwrap();
        assert!(failing.get("/api/v1/series", &[]).await.is_err());

        let calls = observer.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                ("/api/v1/query".to_string(), "http://prom:9090".to_string(), Outcome::Success),
                ("/api/v1/series".to_string(), "http://prom:9090".to_string(), Outcome::HttpError),
            ]
        );
    }

    #[tokio::test]
    async fn test_default_observer_registers_metrics() {
        let client = InstrumentedApiClient::with_observer(
            Arc::new(FixedClient(Ok(()))),
            "http://metrics-test:9090",
            Arc::new(PrometheusObserver),
        );
        client.get("/api/v1/query", &[]).await.unwrap();
        let count = QUERY_TOTAL
            .with_label_values(&["/api/v1/query", "http://metrics-test:9090", "success"])
            .get();
        assert_eq!(count, 1);
    }
}
