// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "prom-adapter")]
#[command(
    author,
    version,
    about = "Launch the custom metrics API adapter server",
    long_about = "Launch the custom metrics API adapter server"
)]
pub struct Args {
    /// kubeconfig file pointing at the 'core' kubernetes server with enough rights to list
    /// any described objects
    #[arg(long, value_name = "PATH")]
    pub lister_kubeconfig: Option<PathBuf>,

    /// Interval at which to re-list the set of all available metrics from Prometheus
    #[arg(long, value_parser = parse_duration, default_value = "10m")]
    pub metrics_relist_interval: Duration,

    /// Period of time used to calculate rate metrics from cumulative metrics
    #[arg(long, value_parser = parse_duration, default_value = "5m")]
    pub rate_interval: Duration,

    /// Interval at which to refresh API discovery information
    #[arg(long, value_parser = parse_duration, default_value = "10m")]
    pub discovery_interval: Duration,

    /// URL for connecting to Prometheus. Query parameters are used to configure the connection
    #[arg(long, default_value = "https://localhost")]
    pub prometheus_url: String,

    /// Use auth details from the in-cluster kubeconfig when connecting to Prometheus
    #[arg(long)]
    pub prometheus_auth_incluster: bool,

    /// kubeconfig file used to configure auth when connecting to Prometheus
    #[arg(long, value_name = "PATH")]
    pub prometheus_auth_config: Option<PathBuf>,

    /// Prefix to expect on labels referring to pod resources. For example, if the prefix is
    /// 'kube_', any series with the 'kube_pod' label would be considered a pod metric
    #[arg(long, default_value = "")]
    pub label_prefix: String,

    /// Address to serve the custom metrics API on
    #[arg(long, default_value = "0.0.0.0")]
    pub bind_address: IpAddr,

    /// Port to serve the custom metrics API on
    #[arg(long, default_value = "6443")]
    pub secure_port: u16,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Parse a duration such as `90s`, `10m` or `1h30m`
///
/// Units are `ms`, `s`, `m` and `h`; a bare `0` is accepted so that it can be
/// rejected later with a clearer message.
fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    if value == "0" {
        return Ok(Duration::ZERO);
    }
    if value.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total = Duration::ZERO;
    let mut rest = value;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(format!("invalid duration {value:?}: expected a number"));
        }
        let amount: u64 = rest[..digits]
            .parse()
            .map_err(|e| format!("invalid duration {value:?}: {e}"))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "ms" => Duration::from_millis(amount),
            "s" => Duration::from_secs(amount),
            "m" => Duration::from_secs(amount.saturating_mul(60)),
            "h" => Duration::from_secs(amount.saturating_mul(3600)),
            "" => return Err(format!("invalid duration {value:?}: missing unit")),
            unit => return Err(format!("invalid duration {value:?}: unknown unit {unit:?}")),
        };
        total = total.saturating_add(part);
        rest = &rest[unit_len..];
    }
    Ok(total)
}
