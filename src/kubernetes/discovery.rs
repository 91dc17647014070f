// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Resource discovery for the lister cluster.
//!
//! Discovers all served resources (including CRDs) through the Kubernetes
//! discovery API and indexes them for GVK and resource-name lookups.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use kube::Client;
use kube::core::GroupVersionKind;
use kube::discovery::{ApiResource, Discovery, Scope};
use tracing::debug;

/// A single resource reported by discovery
#[derive(Debug, Clone)]
pub struct DiscoveredResource {
    pub api_resource: ApiResource,
    pub namespaced: bool,
    /// Whether this is the group's preferred version
    pub preferred: bool,
}

/// Lists the resource kinds served by a cluster
#[async_trait]
pub trait DiscoveryClient: Send + Sync {
    async fn server_resources(&self) -> Result<Vec<DiscoveredResource>>;
}

/// Discovery client backed by the cluster API server
#[derive(Clone)]
pub struct KubeDiscoveryClient {
    client: Client,
}

impl KubeDiscoveryClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DiscoveryClient for KubeDiscoveryClient {
    async fn server_resources(&self) -> Result<Vec<DiscoveredResource>> {
        let discovery = Discovery::new(self.client.clone()).run().await?;

        let mut resources = Vec::new();
        for group in discovery.groups() {
            let preferred = group.preferred_version_or_latest().to_string();
            for version in group.versions() {
                for (ar, caps) in group.versioned_resources(version) {
                    // Skip subresources (e.g., pods/log, pods/exec)
                    if ar.plural.contains('/') {
                        continue;
                    }
                    resources.push(DiscoveredResource {
                        api_resource: ar,
                        namespaced: caps.scope == Scope::Namespaced,
                        preferred: version == preferred,
                    });
                }
            }
        }

        debug!(
            groups = discovery.groups().count(),
            resources = resources.len(),
            "Discovery complete"
        );
        Ok(resources)
    }
}

/// REST metadata for one resource kind
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceMapping {
    pub api_resource: ApiResource,
    pub namespaced: bool,
}

impl ResourceMapping {
    /// Resource name qualified by its group ("pods", "deployments.apps")
    pub fn group_resource(&self) -> String {
        if self.api_resource.group.is_empty() {
            self.api_resource.plural.clone()
        } else {
            format!("{}.{}", self.api_resource.plural, self.api_resource.group)
        }
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(
            &self.api_resource.group,
            &self.api_resource.version,
            &self.api_resource.kind,
        )
    }
}

/// Immutable index of discovered resources
#[derive(Debug, Clone, Default)]
pub struct RestMapping {
    /// Mappings indexed by group/version/kind
    by_gvk: HashMap<GroupVersionKind, ResourceMapping>,
    /// Lowercase resource names (plural, kind, group-qualified plural) to GVK
    by_name: HashMap<String, GroupVersionKind>,
}

impl RestMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from discovery results
    ///
    /// Preferred versions are indexed first, so name lookups resolve to them.
    /// Core group resources win name conflicts against other groups.
    pub fn from_resources(mut resources: Vec<DiscoveredResource>) -> Self {
        resources.sort_by_key(|r| (!r.preferred, !r.api_resource.group.is_empty()));

        let mut mapping = Self::new();
        for resource in resources {
            mapping.add(ResourceMapping {
                api_resource: resource.api_resource,
                namespaced: resource.namespaced,
            });
        }
        mapping
    }

    /// Add a mapping. Existing name aliases are never overwritten.
    pub fn add(&mut self, mapping: ResourceMapping) {
        let gvk = mapping.gvk();
        let ar = &mapping.api_resource;

        for alias in [
            ar.plural.to_lowercase(),
            ar.kind.to_lowercase(),
            mapping.group_resource().to_lowercase(),
        ] {
            self.by_name.entry(alias).or_insert_with(|| gvk.clone());
        }
        self.by_gvk.entry(gvk).or_insert(mapping);
    }

    pub fn get(&self, gvk: &GroupVersionKind) -> Option<&ResourceMapping> {
        self.by_gvk.get(gvk)
    }

    /// Look up a resource by plural, singular/kind, or "plural.group"
    pub fn resource_for(&self, name: &str) -> Option<&ResourceMapping> {
        let gvk = self.by_name.get(&name.to_lowercase())?;
        self.by_gvk.get(gvk)
    }

    pub fn len(&self) -> usize {
        self.by_gvk.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_gvk.is_empty()
    }
}
