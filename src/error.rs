// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Startup error taxonomy.
//!
//! Every variant is fatal: the runner stops at the first one and the process
//! exits non-zero. Errors after startup live in the modules that raise them
//! (`prom::BackendError`, `provider::ProviderError`).

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum StartupError {
    /// In-cluster auth and an explicit kubeconfig were both requested for Prometheus
    #[error("may not use both in-cluster auth and an explicit kubeconfig at the same time")]
    ConfigConflict,

    /// A flag value that parses but cannot be used (e.g. a zero interval)
    #[error("invalid option --{flag}: {reason}")]
    InvalidOption { flag: &'static str, reason: String },

    /// Cluster or backend credentials could not be resolved
    #[error("unable to construct {purpose} configuration")]
    CredentialLoad {
        purpose: String,
        #[source]
        source: BoxError,
    },

    #[error("unable to construct discovery client for dynamic client")]
    DiscoveryClient(#[source] kube::Error),

    #[error("unable to construct dynamic discovery mapper")]
    MapperInit(#[source] anyhow::Error),

    #[error("unable to construct client transport for connecting to Prometheus: {reason}")]
    Transport {
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("invalid Prometheus URL {url:?}")]
    InvalidUrl {
        url: String,
        #[source]
        source: BoxError,
    },

    /// The listener could not be bound or failed while serving
    #[error("unable to serve custom metrics API")]
    Serve(#[source] std::io::Error),
}

/// Render an error followed by each of its causes, separated by ": "
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    std::iter::successors(Some(err), |e| e.source())
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(": ")
}

impl StartupError {
    pub fn credential_load(purpose: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::CredentialLoad {
            purpose: purpose.into(),
            source: source.into(),
        }
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
            source: None,
        }
    }

    pub fn transport_with(reason: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Transport {
            reason: reason.into(),
            source: Some(source.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_load_keeps_cause() {
        let err = StartupError::credential_load(
            "Prometheus auth",
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        );
        assert_eq!(err.to_string(), "unable to construct Prometheus auth configuration");
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(
            error_chain(&err),
            "unable to construct Prometheus auth configuration: no such file"
        );
    }

    #[test]
    fn test_invalid_url_message_names_url() {
        let source = reqwest::Url::parse("not a url").unwrap_err();
        let err = StartupError::InvalidUrl {
            url: "not a url".to_string(),
            source: source.into(),
        };
        assert_eq!(err.to_string(), "invalid Prometheus URL \"not a url\"");
        // The parse error appears once, after the message
        let chain = error_chain(&err);
        assert_eq!(chain.matches("relative URL").count(), 1);
    }
}
