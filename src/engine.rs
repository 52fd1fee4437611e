//! Tunnel engine boundary
//!
//! The engine does the actual VPN work (registration, holepunching, packet
//! forwarding). We only drive its lifecycle and read its status. Engine
//! callbacks come back to us as [`EngineEvent`]s through an [`EventSink`],
//! and requests for the interface go through a [`HostHandle`].

use crate::config::ConnectionConfig;
use crate::session::HostHandle;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

pub const INTERFACE_NAME: &str = "olm0";
pub const AGENT: &str = "olm-bridge";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Tunnel is not running")]
    NotRunning,
    #[error("Unknown organization: {0}")]
    UnknownOrg(String),
    #[error("{0}")]
    Failed(String),
}

/// Callback events raised by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Registered,
    Connected,
    Terminated,
    AuthError { status_code: i32, message: String },
}

/// Handle the engine uses to report lifecycle events
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self { tx }
    }

    pub fn registered(&self) {
        self.emit(EngineEvent::Registered);
    }

    pub fn connected(&self) {
        self.emit(EngineEvent::Connected);
    }

    pub fn terminated(&self) {
        self.emit(EngineEvent::Terminated);
    }

    pub fn auth_error(&self, status_code: i32, message: &str) {
        self.emit(EngineEvent::AuthError {
            status_code,
            message: message.to_string(),
        });
    }

    fn emit(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            debug!("Event dropped, session manager is gone");
        }
    }
}

/// Process-wide engine settings, passed once to [`TunnelEngine::init`]
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    pub log_level: String,
    /// The engine's own HTTP API; we drive it directly instead
    pub enable_api: bool,
    pub version: String,
    pub agent: String,
    pub events: EventSink,
    /// Interface establishment and socket protection
    pub host: HostHandle,
}

/// Per-connection settings handed to [`TunnelEngine::start_tunnel`]
#[derive(Debug, Clone, PartialEq)]
pub struct TunnelConfig {
    pub endpoint: String,
    pub id: String,
    pub secret: String,
    pub user_token: String,
    pub org_id: String,
    pub mtu: u16,
    pub dns: String,
    pub upstream_dns: Vec<String>,
    pub interface_name: String,
    pub holepunch: bool,
    pub override_dns: bool,
    pub tunnel_dns: bool,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub disable_relay: bool,
    pub enable_uapi: bool,
}

impl From<&ConnectionConfig> for TunnelConfig {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            id: config.id.clone(),
            secret: config.secret.clone(),
            user_token: config.user_token.clone(),
            org_id: config.org_id.clone(),
            mtu: config.mtu,
            dns: config.dns.clone(),
            upstream_dns: config.upstream_dns.clone(),
            interface_name: INTERFACE_NAME.to_string(),
            holepunch: config.holepunch,
            override_dns: config.override_dns,
            tunnel_dns: config.tunnel_dns,
            ping_interval: config.ping_interval,
            ping_timeout: config.ping_timeout,
            disable_relay: false,
            enable_uapi: false,
        }
    }
}

/// Status snapshot reported by the engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub connected: bool,
    pub registered: bool,
    pub terminated: bool,
    pub version: String,
    pub agent: String,
    pub org_id: String,
    pub peers: Vec<PeerStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerStatus {
    pub site_id: i32,
    pub name: String,
    pub connected: bool,
    /// Round-trip time in nanoseconds
    pub rtt: u64,
    pub endpoint: String,
    pub is_relay: bool,
}

#[async_trait]
pub trait TunnelEngine: Send + Sync {
    /// One-time setup for the lifetime of the process
    fn init(&self, config: GlobalConfig);

    /// Run the tunnel. May not return until the tunnel is stopped.
    async fn start_tunnel(&self, config: TunnelConfig);

    async fn stop_tunnel(&self) -> Result<(), EngineError>;

    async fn switch_org(&self, org_id: &str) -> Result<(), EngineError>;

    fn status(&self) -> StatusResponse;
}
