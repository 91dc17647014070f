// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use tracing::trace;

use super::BackendError;
use super::types::{ApiResponse, Interval, QueryResult, Range, Selector, Series, Timestamp};
use crate::credentials::Transport;

/// Low-level access to the Prometheus HTTP API
#[async_trait]
pub trait GenericApiClient: Send + Sync {
    /// GET an API endpoint (e.g. "/api/v1/query") and decode the response envelope
    async fn get(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<ApiResponse, BackendError>;
}

/// Generic client over an HTTP transport
pub struct HttpApiClient {
    transport: Transport,
    base_url: Url,
}

impl HttpApiClient {
    pub fn new(transport: Transport, base_url: Url) -> Self {
        Self {
            transport,
            base_url,
        }
    }

    /// Join the endpoint onto the base path. Query parameters already present
    /// on the base URL are kept and the request parameters appended.
    pub fn endpoint_url(&self, endpoint: &str, query: &[(&str, String)]) -> Url {
        let mut url = self.base_url.clone();
        let path = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        );
        url.set_path(&path);
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        url
    }
}

#[async_trait]
impl GenericApiClient for HttpApiClient {
    async fn get(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<ApiResponse, BackendError> {
        let url = self.endpoint_url(endpoint, query);
        trace!(url = %url, "Prometheus request");

        let response = self.transport.http_client().get(url).send().await?;
        let code = response.status();
        let body = response.bytes().await?;

        // Prometheus returns the JSON envelope for most error codes too
        match serde_json::from_slice::<ApiResponse>(&body) {
            Ok(envelope) if envelope.status == "error" => Err(BackendError::Api {
                error_type: envelope.error_type.unwrap_or_default(),
                message: envelope.error.unwrap_or_default(),
            }),
            Ok(envelope) if code.is_success() => Ok(envelope),
            Ok(_) => Err(BackendError::Status {
                code: code.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            }),
            Err(e) if code.is_success() => Err(BackendError::Decode(e)),
            Err(_) => Err(BackendError::Status {
                code: code.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            }),
        }
    }
}

/// Typed Prometheus query client
#[derive(Clone)]
pub struct PrometheusClient {
    api: Arc<dyn GenericApiClient>,
}

fn decode<T: DeserializeOwned>(response: ApiResponse) -> Result<T, BackendError> {
    serde_json::from_value(response.data).map_err(BackendError::Decode)
}

impl PrometheusClient {
    pub fn new_for_api(api: Arc<dyn GenericApiClient>) -> Self {
        Self { api }
    }

    /// Find series matching any of the selectors within the interval
    pub async fn series(
        &self,
        interval: Interval,
        selectors: &[Selector],
    ) -> Result<Vec<Series>, BackendError> {
        let mut query: Vec<(&str, String)> = Vec::with_capacity(selectors.len() + 2);
        query.push(("start", interval.start.as_param()));
        if let Some(end) = interval.end {
            query.push(("end", end.as_param()));
        }
        for selector in selectors {
            query.push(("match[]", selector.0.clone()));
        }
        decode(self.api.get("/api/v1/series", &query).await?)
    }

    /// Evaluate an instant query
    pub async fn query(
        &self,
        time: Timestamp,
        query: &Selector,
    ) -> Result<QueryResult, BackendError> {
        let params = [("query", query.0.clone()), ("time", time.as_param())];
        decode(self.api.get("/api/v1/query", &params).await?)
    }

    /// Evaluate a range query
    #[allow(dead_code)]
    pub async fn query_range(
        &self,
        range: Range,
        query: &Selector,
    ) -> Result<QueryResult, BackendError> {
        let params = [
            ("query", query.0.clone()),
            ("start", range.start.as_param()),
            ("end", range.end.as_param()),
            ("step", format!("{}", range.step.as_secs_f64())),
        ];
        decode(self.api.get("/api/v1/query_range", &params).await?)
    }
}
