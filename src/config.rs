//! Connect payload translation
//!
//! The host hands us the connection settings as a JSON string. This module
//! validates the required fields, fills in defaults and turns the string
//! durations into [`Duration`]s.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_MTU: u16 = 1420;
pub const DEFAULT_DNS: &str = "9.9.9.9";
pub const DEFAULT_UPSTREAM_DNS: &str = "8.8.8.8:53";
pub const DEFAULT_PING_INTERVAL: &str = "3s";
pub const DEFAULT_PING_TIMEOUT: &str = "5s";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Unsupported duration: {0}")]
    UnsupportedDuration(String),
}

/// Connect payload as it arrives on the wire.
///
/// Every field is optional here; [`ConnectionConfig::from_request`] decides
/// what is required and what gets a default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectRequest {
    pub endpoint: String,
    pub id: String,
    pub secret: String,
    pub user_token: String,
    pub org_id: String,
    pub mtu: u16,
    pub dns: String,
    #[serde(rename = "upstreamDNS")]
    pub upstream_dns: Vec<String>,
    pub holepunch: bool,
    #[serde(rename = "tunnelDNS")]
    pub tunnel_dns: bool,
    #[serde(rename = "overrideDNS")]
    pub override_dns: bool,
    pub ping_interval: String,
    pub ping_timeout: String,
}

/// Validated connection settings for one connection attempt
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub endpoint: String,
    pub id: String,
    pub secret: String,
    pub user_token: String,
    pub org_id: String,
    pub mtu: u16,
    pub dns: String,
    pub upstream_dns: Vec<String>,
    pub holepunch: bool,
    pub tunnel_dns: bool,
    pub override_dns: bool,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
}

impl ConnectionConfig {
    /// Parse and validate a JSON connect payload
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let request: ConnectRequest = serde_json::from_str(raw)?;
        Self::from_request(request)
    }

    pub fn from_request(request: ConnectRequest) -> Result<Self, ConfigError> {
        if request.endpoint.is_empty() {
            return Err(ConfigError::MissingField("endpoint"));
        }
        if request.id.is_empty() {
            return Err(ConfigError::MissingField("id"));
        }
        if request.secret.is_empty() {
            return Err(ConfigError::MissingField("secret"));
        }

        let ping_interval =
            duration_or_default("ping interval", &request.ping_interval, DEFAULT_PING_INTERVAL);
        let ping_timeout =
            duration_or_default("ping timeout", &request.ping_timeout, DEFAULT_PING_TIMEOUT);

        Ok(Self {
            endpoint: request.endpoint,
            id: request.id,
            secret: request.secret,
            user_token: request.user_token,
            org_id: request.org_id,
            mtu: if request.mtu == 0 {
                DEFAULT_MTU
            } else {
                request.mtu
            },
            dns: if request.dns.is_empty() {
                DEFAULT_DNS.to_string()
            } else {
                request.dns
            },
            upstream_dns: if request.upstream_dns.is_empty() {
                vec![DEFAULT_UPSTREAM_DNS.to_string()]
            } else {
                request.upstream_dns
            },
            holepunch: request.holepunch,
            tunnel_dns: request.tunnel_dns,
            override_dns: request.override_dns,
            ping_interval,
            ping_timeout,
        })
    }
}

/// Parse one of the supported keepalive durations
///
/// Only "1s", "3s", "5s" and "10s" are accepted.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    match s {
        "1s" => Ok(Duration::from_secs(1)),
        "3s" => Ok(Duration::from_secs(3)),
        "5s" => Ok(Duration::from_secs(5)),
        "10s" => Ok(Duration::from_secs(10)),
        _ => Err(ConfigError::UnsupportedDuration(s.to_string())),
    }
}

fn duration_or_default(field: &str, value: &str, default: &str) -> Duration {
    let value = if value.is_empty() { default } else { value };
    match parse_duration(value) {
        Ok(d) => d,
        Err(e) => {
            warn!("Invalid {}: {}, using default {}", field, e, default);
            parse_duration(default).unwrap_or(Duration::from_secs(3))
        }
    }
}
