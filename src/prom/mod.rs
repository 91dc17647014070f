// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Prometheus backend client
//!
//! ```text
//! PrometheusClient            typed series / query / query_range
//!   └── InstrumentedApiClient latency + outcome metrics, labelled by base URL
//!         └── HttpApiClient   GET + response envelope over the resolved Transport
//! ```
//!
//! There is no retry at this layer; errors reach the provider as-is.

mod client;
pub mod metrics;
pub mod types;

use std::sync::Arc;

use reqwest::Url;
use thiserror::Error;
use tracing::info;

pub use client::{GenericApiClient, HttpApiClient, PrometheusClient};
pub use metrics::{InstrumentedApiClient, RequestObserver};
pub use types::{Interval, QueryResult, Selector, Series, Timestamp};

use crate::credentials::Transport;
use crate::error::StartupError;

/// Failure of a single Prometheus request
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request to Prometheus failed")]
    Http(#[from] reqwest::Error),

    #[error("Prometheus returned HTTP {code}: {body}")]
    Status { code: u16, body: String },

    #[error("Prometheus query failed ({error_type}): {message}")]
    Api { error_type: String, message: String },

    #[error("unable to decode Prometheus response")]
    Decode(#[source] serde_json::Error),
}

/// Backend client factory with the default Prometheus instrumentation
pub fn build_backend_client(
    base_url: &str,
    transport: Transport,
) -> Result<PrometheusClient, StartupError> {
    build_backend_client_with_observer(base_url, transport, Arc::new(metrics::PrometheusObserver))
}

/// Backend client factory with a caller-supplied request observer
pub fn build_backend_client_with_observer(
    base_url: &str,
    transport: Transport,
    observer: Arc<dyn RequestObserver>,
) -> Result<PrometheusClient, StartupError> {
    let parsed = Url::parse(base_url).map_err(|source| StartupError::InvalidUrl {
        url: base_url.to_string(),
        source: source.into(),
    })?;

    let generic = Arc::new(HttpApiClient::new(transport, parsed));
    let instrumented = InstrumentedApiClient::with_observer(generic, base_url, observer);

    info!(url = %base_url, "Configured Prometheus client");
    Ok(PrometheusClient::new_for_api(Arc::new(instrumented)))
}
