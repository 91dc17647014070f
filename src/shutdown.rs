// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Stop signalling and background task ownership
//!
//! The host process creates one `StopHandle`/`StopSignal` pair and passes the
//! signal into the runner. Background loops take a `child()` of it so the
//! runner can also stop them on its own (e.g. when serving fails).

use std::future::Future;

use futures::future::select_all;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Create a new stop channel
pub fn channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (
        StopHandle { tx },
        StopSignal {
            receivers: vec![rx],
        },
    )
}

/// Sending half of a stop channel
#[derive(Debug)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    /// Close the signal. Returns true only for the call that actually closed it.
    pub fn stop(&self) -> bool {
        self.tx.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        })
    }
}

/// Receive-only stop notification
///
/// Fires when its own handle stops, when any ancestor's handle stops, or when
/// a handle is dropped without stopping.
#[derive(Debug, Clone)]
pub struct StopSignal {
    receivers: Vec<watch::Receiver<bool>>,
}

impl StopSignal {
    /// Derive a signal that fires with this one or with the returned handle
    pub fn child(&self) -> (StopHandle, StopSignal) {
        let (tx, rx) = watch::channel(false);
        let mut receivers = self.receivers.clone();
        receivers.push(rx);
        (StopHandle { tx }, StopSignal { receivers })
    }

    pub fn is_stopped(&self) -> bool {
        self.receivers
            .iter()
            .any(|rx| *rx.borrow() || rx.has_changed().is_err())
    }

    /// Wait until the signal fires
    pub async fn stopped(&self) {
        let waits = self.receivers.iter().cloned().map(|mut rx| {
            Box::pin(async move {
                // Err means the handle was dropped, which counts as stopped
                let _ = rx.wait_for(|stopped| *stopped).await;
            })
        });
        select_all(waits).await;
    }
}

/// Owner of the long-running tasks started during startup
#[derive(Default)]
pub struct BackgroundTasks {
    set: JoinSet<()>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!(task = name, "Starting background task");
        self.set.spawn(async move {
            task.await;
            debug!(task = name, "Background task exited");
        });
    }

    /// Number of tasks that have not been joined yet
    pub fn len(&self) -> usize {
        self.set.len()
    }

    /// Wait for every task to exit. Tasks are expected to observe their stop
    /// signal; this does not abort them.
    pub async fn join_all(&mut self) {
        while let Some(result) = self.set.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Background task failed");
            }
        }
    }
}
