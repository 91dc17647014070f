// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! HTTP handlers for the custom metrics API
//!
//! | Path (under `/apis/custom.metrics.k8s.io/v1beta1`) | Description |
//! |---|---|
//! | `/` | Discovery document of all known metrics |
//! | `/namespaces/{namespace}/metrics/{metric}` | Metric describing a namespace |
//! | `/namespaces/{namespace}/{resource}/{name}/{metric}` | Namespaced object metric |
//! | `/{resource}/{name}/{metric}` | Cluster-scoped object metric |
//!
//! A name of `*` selects objects by the `labelSelector` query parameter.

use std::sync::{Arc, LazyLock};
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{MatchedPath, Path, Query, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use prometheus::{
    Encoder, HistogramVec, IntCounterVec, TextEncoder, exponential_buckets,
    register_histogram_vec, register_int_counter_vec,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, warn};

use crate::error::error_chain;
use crate::provider::types::resource_list;
use crate::provider::{CustomMetricsProvider, MetricValueList, ProviderError};

pub const API_ROOT: &str = "/apis/custom.metrics.k8s.io/v1beta1";

static REQUEST_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "cmgateway_apiserver_requests_total",
        "Custom metrics API requests by route and response code",
        &["route", "code"]
    )
    .expect("register_int_counter_vec")
});

static REQUEST_LATENCY: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "cmgateway_apiserver_request_duration_seconds",
        "Custom metrics API request latency in seconds by route",
        &["route"],
        exponential_buckets(0.001, 2.0, 14).expect("buckets")
    )
    .expect("register_histogram_vec")
});

/// Register the request metrics with the default registry
pub fn register_request_metrics() {
    LazyLock::force(&REQUEST_TOTAL);
    LazyLock::force(&REQUEST_LATENCY);
}

#[derive(Clone)]
struct AppState {
    provider: Arc<dyn CustomMetricsProvider>,
}

/// Build the API router around a provider
pub fn router(provider: Arc<dyn CustomMetricsProvider>, enable_metrics: bool) -> Router {
    let state = AppState { provider };

    let api = Router::new()
        .route(API_ROOT, get(list_metrics))
        .route(
            &format!("{API_ROOT}/namespaces/{{namespace}}/metrics/{{metric}}"),
            get(namespace_metric),
        )
        .route(
            &format!("{API_ROOT}/namespaces/{{namespace}}/{{resource}}/{{name}}/{{metric}}"),
            get(namespaced_metric),
        )
        .route(
            &format!("{API_ROOT}/{{resource}}/{{name}}/{{metric}}"),
            get(root_scoped_metric),
        )
        .with_state(state);

    let mut router = api
        .route("/healthz", get(healthz))
        .route("/readyz", get(healthz));

    if enable_metrics {
        router = router
            .route("/metrics", get(metrics))
            .route_layer(middleware::from_fn(track_requests));
    }
    router
}

async fn track_requests(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();

    let response = next.run(request).await;

    REQUEST_LATENCY
        .with_label_values(&[route.as_str()])
        .observe(start.elapsed().as_secs_f64());
    REQUEST_TOTAL
        .with_label_values(&[route.as_str(), response.status().as_str()])
        .inc();
    response
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics() -> ([(HeaderName, String); 1], Bytes) {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buf) {
        error!(error = %e, "Failed to encode metrics");
    }
    ([(CONTENT_TYPE, encoder.format_type().to_string())], buf.into())
}

async fn list_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let metrics = state.provider.list_all_metrics().await;
    Json(resource_list(&metrics))
}

#[derive(Debug, Default, Deserialize)]
struct MetricParams {
    #[serde(rename = "labelSelector")]
    label_selector: Option<String>,
}

/// One metric request after path extraction
struct MetricRequest<'a> {
    resource: &'a str,
    namespace: Option<&'a str>,
    name: &'a str,
    metric: &'a str,
}

async fn get_metric(
    state: &AppState,
    request: MetricRequest<'_>,
    params: &MetricParams,
) -> Response {
    debug!(
        resource = %request.resource,
        namespace = ?request.namespace,
        name = %request.name,
        metric = %request.metric,
        "Custom metric request"
    );

    let provider = &state.provider;
    if request.name == "*" {
        let selector = params.label_selector.as_deref().unwrap_or_default();
        match provider
            .get_metric_by_selector(request.resource, request.namespace, selector, request.metric)
            .await
        {
            Ok(list) => Json(list).into_response(),
            Err(e) => e.into_response(),
        }
    } else {
        match provider
            .get_metric_by_name(request.resource, request.namespace, request.name, request.metric)
            .await
        {
            // Single values are returned as a one-item list
            Ok(value) => Json(MetricValueList::new(vec![value])).into_response(),
            Err(e) => e.into_response(),
        }
    }
}

async fn namespace_metric(
    State(state): State<AppState>,
    Path((namespace, metric)): Path<(String, String)>,
    Query(params): Query<MetricParams>,
) -> Response {
    let request = MetricRequest {
        resource: "namespaces",
        namespace: None,
        name: &namespace,
        metric: &metric,
    };
    get_metric(&state, request, &params).await
}

async fn namespaced_metric(
    State(state): State<AppState>,
    Path((namespace, resource, name, metric)): Path<(String, String, String, String)>,
    Query(params): Query<MetricParams>,
) -> Response {
    let request = MetricRequest {
        resource: &resource,
        namespace: Some(&namespace),
        name: &name,
        metric: &metric,
    };
    get_metric(&state, request, &params).await
}

async fn root_scoped_metric(
    State(state): State<AppState>,
    Path((resource, name, metric)): Path<(String, String, String)>,
    Query(params): Query<MetricParams>,
) -> Response {
    let request = MetricRequest {
        resource: &resource,
        namespace: None,
        name: &name,
        metric: &metric,
    };
    get_metric(&state, request, &params).await
}

impl IntoResponse for ProviderError {
    fn into_response(self) -> Response {
        let (code, reason) = match &self {
            ProviderError::UnknownResource(_)
            | ProviderError::MetricNotFound { .. }
            | ProviderError::ObjectNotFound { .. } => (StatusCode::NOT_FOUND, "NotFound"),
            ProviderError::Backend(_)
            | ProviderError::Cluster(_)
            | ProviderError::UnexpectedResult(_) => {
                warn!(error = %error_chain(&self), "Failed to serve custom metric");
                (StatusCode::INTERNAL_SERVER_ERROR, "InternalError")
            }
        };
        let status = json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": error_chain(&self),
            "reason": reason,
            "code": code.as_u16(),
        });
        (code, Json(status)).into_response()
    }
}
