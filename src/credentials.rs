// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! HTTP transport for talking to Prometheus.
//!
//! Credentials come from one of three places, decided by `AuthMode`:
//! nothing (plain client), the in-cluster service account, or an explicit
//! kubeconfig. In the latter two cases the cluster's CA bundle, client
//! certificate and token are reused for the Prometheus connection.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use kube::Config;
use kube::config::{KubeConfigOptions, Kubeconfig};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use tracing::{debug, info};

use crate::config::AuthMode;
use crate::error::StartupError;

/// Credential material extracted from a resolved cluster configuration
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// API server the credentials were issued for (informational)
    pub server: String,
    pub bearer_token: Option<String>,
    pub basic_auth: Option<(String, String)>,
    /// DER encoded CA certificates
    pub root_certs: Vec<Vec<u8>>,
    /// PEM encoded client certificate followed by its private key
    pub identity_pem: Option<Vec<u8>>,
    pub insecure_skip_verify: bool,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("server", &self.server)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .field("basic_auth", &self.basic_auth.as_ref().map(|(user, _)| user))
            .field("root_certs", &self.root_certs.len())
            .field("identity_pem", &self.identity_pem.is_some())
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .finish()
    }
}

fn read_file(path: &str, what: &str) -> Result<Vec<u8>, StartupError> {
    std::fs::read(path)
        .map_err(|e| StartupError::transport_with(format!("unable to read {} {:?}", what, path), e))
}

fn decode_data(data: &str, what: &str) -> Result<Vec<u8>, StartupError> {
    STANDARD
        .decode(data.trim())
        .map_err(|e| StartupError::transport_with(format!("invalid base64 in {}", what), e))
}

impl Credentials {
    /// Extract credentials from a kube client configuration
    ///
    /// Exec and auth-provider plugins produce tokens lazily inside kube's own
    /// HTTP stack and cannot be carried over to a plain HTTP client.
    pub fn from_kube_config(config: &Config) -> Result<Self, StartupError> {
        let auth = &config.auth_info;

        if auth.exec.is_some() {
            return Err(StartupError::transport(
                "exec credential plugins are not supported for Prometheus auth",
            ));
        }
        if auth.auth_provider.is_some() {
            return Err(StartupError::transport(
                "auth-provider plugins are not supported for Prometheus auth",
            ));
        }

        let bearer_token = match (&auth.token, &auth.token_file) {
            (Some(token), _) => Some(token.expose_secret().to_string()),
            (None, Some(path)) => {
                let raw = read_file(path, "token file")?;
                Some(String::from_utf8_lossy(&raw).trim().to_string())
            }
            (None, None) => None,
        };

        let basic_auth = match (&auth.username, &auth.password) {
            (Some(user), Some(password)) => {
                Some((user.clone(), password.expose_secret().to_string()))
            }
            _ => None,
        };

        let cert = match (&auth.client_certificate_data, &auth.client_certificate) {
            (Some(data), _) => Some(decode_data(data, "client-certificate-data")?),
            (None, Some(path)) => Some(read_file(path, "client certificate")?),
            (None, None) => None,
        };
        let key = match (&auth.client_key_data, &auth.client_key) {
            (Some(data), _) => Some(decode_data(data.expose_secret(), "client-key-data")?),
            (None, Some(path)) => Some(read_file(path, "client key")?),
            (None, None) => None,
        };
        let identity_pem = match (cert, key) {
            (Some(mut cert), Some(key)) => {
                if !cert.ends_with(b"\n") {
                    cert.push(b'\n');
                }
                cert.extend_from_slice(&key);
                Some(cert)
            }
            (None, None) => None,
            _ => {
                return Err(StartupError::transport(
                    "client certificate and client key must be configured together",
                ));
            }
        };

        Ok(Self {
            server: config.cluster_url.to_string(),
            bearer_token,
            basic_auth,
            root_certs: config.root_cert.clone().unwrap_or_default(),
            identity_pem,
            insecure_skip_verify: config.accept_invalid_certs,
        })
    }
}

/// HTTP client used for every Prometheus request
#[derive(Clone, Debug)]
pub struct Transport {
    client: reqwest::Client,
    credentials: Option<Arc<Credentials>>,
}

impl Transport {
    /// Plain client without any credentials
    pub fn unauthenticated() -> Self {
        Self {
            client: reqwest::Client::new(),
            credentials: None,
        }
    }

    /// Build a client that presents the given credentials on every request
    pub fn from_credentials(credentials: Credentials) -> Result<Self, StartupError> {
        let mut builder = reqwest::Client::builder();

        for der in &credentials.root_certs {
            let cert = reqwest::Certificate::from_der(der)
                .map_err(|e| StartupError::transport_with("invalid CA certificate", e))?;
            builder = builder.add_root_certificate(cert);
        }

        if credentials.insecure_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(pem) = &credentials.identity_pem {
            let identity = reqwest::Identity::from_pem(pem)
                .map_err(|e| StartupError::transport_with("invalid client certificate", e))?;
            builder = builder.identity(identity);
        }

        let mut headers = HeaderMap::new();
        let authorization = match (&credentials.bearer_token, &credentials.basic_auth) {
            (Some(token), _) => Some(format!("Bearer {}", token)),
            (None, Some((user, password))) => Some(format!(
                "Basic {}",
                STANDARD.encode(format!("{}:{}", user, password))
            )),
            (None, None) => None,
        };
        if let Some(value) = authorization {
            let mut value = HeaderValue::from_str(&value)
                .map_err(|e| StartupError::transport_with("invalid authorization header", e))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = builder
            .default_headers(headers)
            .build()
            .map_err(|e| StartupError::transport_with("unable to build HTTP client", e))?;

        Ok(Self {
            client,
            credentials: Some(Arc::new(credentials)),
        })
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Credentials this transport was built from; `None` for the plain client
    #[allow(dead_code)]
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_deref()
    }
}

async fn load_kubeconfig(path: &Path) -> Result<Config, kube::config::KubeconfigError> {
    let kubeconfig = Kubeconfig::read_from(path)?;
    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await
}

/// Resolve the transport for the given auth mode
pub async fn resolve_transport(mode: &AuthMode) -> Result<Transport, StartupError> {
    let config = match mode {
        AuthMode::NoAuth => {
            debug!("Using unauthenticated transport for Prometheus");
            return Ok(Transport::unauthenticated());
        }
        AuthMode::ExplicitConfig(path) => load_kubeconfig(path).await.map_err(|e| {
            StartupError::credential_load(
                format!("auth configuration from {:?} for connecting to Prometheus", path),
                e,
            )
        })?,
        AuthMode::InCluster => Config::incluster().map_err(|e| {
            StartupError::credential_load("in-cluster auth for connecting to Prometheus", e)
        })?,
    };

    let credentials = Credentials::from_kube_config(&config)?;
    info!(
        source = %config.cluster_url,
        token = credentials.bearer_token.is_some(),
        client_cert = credentials.identity_pem.is_some(),
        "Resolved Prometheus credentials"
    );
    Transport::from_credentials(credentials)
}

/// Construct an HTTP client for the given auth flags
///
/// An empty `kubeconfig_path` means no explicit kubeconfig. Setting both flags
/// fails with `ConfigConflict` before any I/O.
pub async fn make_http_client(
    in_cluster_auth: bool,
    kubeconfig_path: impl AsRef<Path>,
) -> Result<Transport, StartupError> {
    let path = kubeconfig_path.as_ref();
    let path = (!path.as_os_str().is_empty()).then(|| path.to_path_buf());
    let mode = AuthMode::from_flags(in_cluster_auth, path)?;
    resolve_transport(&mode).await
}
