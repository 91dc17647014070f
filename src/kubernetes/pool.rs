// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use anyhow::{Result, anyhow};
use kube::api::{DynamicObject, ListParams, ObjectList};
use kube::{Api, Client};
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::discovery::ResourceMapping;
use super::mapper::DynamicMapper;

/// Maximum retry attempts for transient failures
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (doubles each retry)
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Page size for paginated list requests
const PAGE_SIZE: u32 = 500;

/// Generic object client for any discovered resource kind
///
/// Endpoints are resolved per request from the mapper's current snapshot,
/// so newly discovered kinds become usable after the next refresh.
#[derive(Clone)]
pub struct ObjectClientPool {
    client: Client,
    mapper: DynamicMapper,
}

impl ObjectClientPool {
    pub fn new(client: Client, mapper: DynamicMapper) -> Self {
        Self { client, mapper }
    }

    /// Build an API handle for a mapping, scoped to a namespace if it is namespaced
    fn api_for_mapping(
        &self,
        mapping: &ResourceMapping,
        namespace: Option<&str>,
    ) -> Api<DynamicObject> {
        let ar = &mapping.api_resource;
        match (mapping.namespaced, namespace) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, ar),
            _ => Api::all_with(self.client.clone(), ar),
        }
    }

    /// API handle for a resource name ("pods", "pod", "deployments.apps")
    pub async fn api_for_resource(
        &self,
        resource: &str,
        namespace: Option<&str>,
    ) -> Result<(Api<DynamicObject>, ResourceMapping)> {
        let mapping = self
            .mapper
            .resource_for(resource)
            .await
            .ok_or_else(|| anyhow!("the server doesn't have a resource type \"{}\"", resource))?;
        Ok((self.api_for_mapping(&mapping, namespace), mapping))
    }

    /// Get a single object by name; `None` if it does not exist
    pub async fn get(
        &self,
        resource: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        let (api, _) = self.api_for_resource(resource, namespace).await?;
        api.get_opt(name)
            .await
            .map_err(|e| anyhow!("unable to get {} {:?}: {}", resource, name, e))
    }

    /// List objects matching a label selector, following continue tokens
    pub async fn list(
        &self,
        resource: &str,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let (api, mapping) = self.api_for_resource(resource, namespace).await?;

        debug!(
            resource = %resource,
            namespace = ?namespace,
            group = %mapping.api_resource.group,
            version = %mapping.api_resource.version,
            kind = %mapping.api_resource.kind,
            "Listing objects"
        );

        let mut base_params = ListParams::default();
        if let Some(selector) = label_selector {
            base_params = base_params.labels(selector);
        }
        trace!(label_selector = ?label_selector, "Built ListParams");

        let mut items = Vec::new();
        let mut continue_token: Option<String> = None;
        loop {
            let mut params = base_params.clone().limit(PAGE_SIZE);
            if let Some(ref token) = continue_token {
                params = params.continue_token(token);
            }

            let page = self.list_page_with_retry(&api, &params, resource).await?;
            items.extend(page.items);

            match page.metadata.continue_ {
                Some(token) if !token.is_empty() => continue_token = Some(token),
                _ => break,
            }
        }

        Ok(items)
    }

    async fn list_page_with_retry(
        &self,
        api: &Api<DynamicObject>,
        params: &ListParams,
        resource: &str,
    ) -> Result<ObjectList<DynamicObject>> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match api.list(params).await {
                Ok(list) => return Ok(list),
                Err(e) if is_retryable_error(&e) => {
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                    warn!(
                        resource = %resource,
                        attempt = attempt + 1,
                        max_attempts = MAX_RETRIES,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retryable error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(anyhow!("K8s API error: {}", e)),
            }
        }

        Err(anyhow!(
            "Failed after {} retries: {}",
            MAX_RETRIES,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        ))
    }
}

/// Check if an error is retryable (transient failures)
fn is_retryable_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::HyperError(_) => true,
        // 429 (rate limit), 503 (unavailable), 504 (timeout)
        kube::Error::Api(api_err) => matches!(api_err.code, 429 | 503 | 504),
        _ => false,
    }
}
