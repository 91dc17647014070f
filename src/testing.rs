// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Local fake cluster API and Prometheus servers for tests

use std::io::Write;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use tempfile::NamedTempFile;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

async fn serve(router: Router) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (addr, task)
}

// ── Prometheus ───────────────────────────────────────────────────

#[derive(Default)]
struct PromState {
    requests: Mutex<Vec<(String, String)>>,
    series: Mutex<Value>,
    samples: Mutex<Value>,
}

pub struct FakePrometheus {
    addr: SocketAddr,
    state: Arc<PromState>,
    task: JoinHandle<()>,
}

impl FakePrometheus {
    /// Instant query answered with a `bad_data` error
    pub const BAD_QUERY: &'static str = "sum(";

    pub async fn start() -> Self {
        let state = Arc::new(PromState {
            requests: Mutex::new(Vec::new()),
            series: Mutex::new(json!([
                {"__name__": "http_requests_total", "namespace": "default", "pod": "web-0"},
                {"__name__": "http_requests_total", "namespace": "default", "pod": "web-1"},
                {"__name__": "container_memory_working_set_bytes", "namespace": "default",
                 "pod": "web-0", "container": "app"},
            ])),
            samples: Mutex::new(json!([
                {"metric": {"pod": "web-0"}, "value": [1700000000, "12.5"]},
                {"metric": {"pod": "web-1"}, "value": [1700000000, "3"]},
            ])),
        });

        let router = Router::new()
            .route("/api/v1/series", get(prom_series))
            .route("/api/v1/query", get(prom_query))
            .route("/api/v1/query_range", get(prom_query_range))
            .with_state(state.clone());
        let (addr, task) = serve(router).await;
        Self { addr, state, task }
    }

    /// Base URL without a trailing slash
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// (path, raw query) of every request received
    pub fn requests(&self) -> Vec<(String, String)> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn set_samples(&self, samples: Value) {
        *self.state.samples.lock().unwrap() = samples;
    }
}

impl Drop for FakePrometheus {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn record(state: &PromState, uri: &Uri) {
    state.requests.lock().unwrap().push((
        uri.path().to_string(),
        uri.query().unwrap_or_default().to_string(),
    ));
}

fn success(data: Value) -> Json<Value> {
    Json(json!({"status": "success", "data": data}))
}

async fn prom_series(State(state): State<Arc<PromState>>, uri: Uri) -> Json<Value> {
    record(&state, &uri);
    let series = state.series.lock().unwrap().clone();
    success(series)
}

#[derive(serde::Deserialize)]
struct PromQuery {
    #[serde(default)]
    query: String,
}

async fn prom_query(
    State(state): State<Arc<PromState>>,
    uri: Uri,
    Query(params): Query<PromQuery>,
) -> Response {
    record(&state, &uri);
    if params.query == FakePrometheus::BAD_QUERY {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"status": "error", "errorType": "bad_data", "error": "parse error"})),
        )
            .into_response();
    }
    let samples = state.samples.lock().unwrap().clone();
    success(json!({"resultType": "vector", "result": samples})).into_response()
}

async fn prom_query_range(State(state): State<Arc<PromState>>, uri: Uri) -> Json<Value> {
    record(&state, &uri);
    success(json!({"resultType": "matrix", "result": []}))
}

// ── Cluster API ──────────────────────────────────────────────────

struct FakeObject {
    namespace: &'static str,
    name: &'static str,
    app: &'static str,
}

const PODS: &[FakeObject] = &[
    FakeObject { namespace: "default", name: "web-0", app: "web" },
    FakeObject { namespace: "default", name: "web-1", app: "web" },
    FakeObject { namespace: "default", name: "db-0", app: "db" },
];

#[derive(Default)]
struct ClusterState {
    requests: Mutex<Vec<String>>,
}

/// Serves core/v1 (pods, namespaces, services) and apps/v1 (deployments)
pub struct FakeCluster {
    addr: SocketAddr,
    state: Arc<ClusterState>,
    task: JoinHandle<()>,
}

impl FakeCluster {
    pub async fn start() -> Self {
        crate::install_crypto_provider();
        let state = Arc::new(ClusterState::default());
        let router = Router::new()
            .route("/api", get(core_versions))
            .route("/apis", get(api_groups))
            .route("/api/v1", get(core_resources))
            .route("/apis/apps/v1", get(apps_resources))
            .route("/api/v1/namespaces/{name}", get(get_namespace))
            .route("/api/v1/namespaces/{namespace}/pods", get(list_pods))
            .route("/api/v1/namespaces/{namespace}/pods/{name}", get(get_pod))
            .layer(axum::middleware::from_fn_with_state(state.clone(), track))
            .with_state(state.clone());
        let (addr, task) = serve(router).await;
        Self { addr, state, task }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Paths of every request received
    pub fn requests(&self) -> Vec<String> {
        self.state.requests.lock().unwrap().clone()
    }

    /// Kubeconfig pointing at this server without credentials
    pub fn kubeconfig(&self) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"apiVersion: v1
kind: Config
clusters:
- name: fake
  cluster:
    server: {}
contexts:
- name: fake
  context:
    cluster: fake
    user: fake
current-context: fake
users:
- name: fake
  user: {{}}
"#,
            self.url()
        )
        .unwrap();
        file
    }

    pub fn client(&self) -> kube::Client {
        let config = kube::Config::new(self.url().parse().unwrap());
        kube::Client::try_from(config).unwrap()
    }
}

impl Drop for FakeCluster {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn track(
    State(state): State<Arc<ClusterState>>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    state
        .requests
        .lock()
        .unwrap()
        .push(request.uri().path().to_string());
    next.run(request).await
}

fn api_resource(name: &str, kind: &str, namespaced: bool) -> Value {
    json!({
        "name": name,
        "singularName": "",
        "namespaced": namespaced,
        "kind": kind,
        "verbs": ["get", "list", "watch"],
    })
}

async fn core_versions() -> Json<Value> {
    Json(json!({
        "kind": "APIVersions",
        "apiVersion": "v1",
        "versions": ["v1"],
        "serverAddressByClientCIDRs": [
            {"clientCIDR": "0.0.0.0/0", "serverAddress": "127.0.0.1:6443"}
        ],
    }))
}

async fn api_groups() -> Json<Value> {
    Json(json!({
        "kind": "APIGroupList",
        "apiVersion": "v1",
        "groups": [{
            "name": "apps",
            "versions": [{"groupVersion": "apps/v1", "version": "v1"}],
            "preferredVersion": {"groupVersion": "apps/v1", "version": "v1"},
        }],
    }))
}

async fn core_resources() -> Json<Value> {
    Json(json!({
        "kind": "APIResourceList",
        "apiVersion": "v1",
        "groupVersion": "v1",
        "resources": [
            api_resource("pods", "Pod", true),
            api_resource("pods/log", "Pod", true),
            api_resource("namespaces", "Namespace", false),
            api_resource("services", "Service", true),
        ],
    }))
}

async fn apps_resources() -> Json<Value> {
    Json(json!({
        "kind": "APIResourceList",
        "apiVersion": "v1",
        "groupVersion": "apps/v1",
        "resources": [api_resource("deployments", "Deployment", true)],
    }))
}

fn pod_json(pod: &FakeObject) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": pod.name,
            "namespace": pod.namespace,
            "labels": {"app": pod.app},
        },
    })
}

fn not_found(what: &str, name: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": format!("{} \"{}\" not found", what, name),
            "reason": "NotFound",
            "code": 404,
        })),
    )
        .into_response()
}

async fn get_namespace(Path(name): Path<String>) -> Response {
    if PODS.iter().any(|p| p.namespace == name) {
        Json(json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {"name": name},
        }))
        .into_response()
    } else {
        not_found("namespaces", &name)
    }
}

async fn get_pod(Path((namespace, name)): Path<(String, String)>) -> Response {
    match PODS
        .iter()
        .find(|p| p.namespace == namespace && p.name == name)
    {
        Some(pod) => Json(pod_json(pod)).into_response(),
        None => not_found("pods", &name),
    }
}

#[derive(serde::Deserialize)]
struct ListQuery {
    #[serde(rename = "labelSelector")]
    label_selector: Option<String>,
}

async fn list_pods(Path(namespace): Path<String>, Query(query): Query<ListQuery>) -> Json<Value> {
    // Only "app=<value>" selectors are understood
    let app = query
        .label_selector
        .as_deref()
        .and_then(|s| s.strip_prefix("app="));
    let items: Vec<Value> = PODS
        .iter()
        .filter(|p| p.namespace == namespace)
        .filter(|p| app.is_none_or(|a| p.app == a))
        .map(pod_json)
        .collect();
    Json(json!({
        "apiVersion": "v1",
        "kind": "PodList",
        "metadata": {"resourceVersion": "1"},
        "items": items,
    }))
}
