//! Session lifecycle
//!
//! [`SessionManager`] is what the host talks to. It owns the handoff
//! channels, serializes connect/disconnect/switch-org/settings calls behind
//! one lifecycle lock and forwards them to the tunnel engine. The engine in
//! turn calls back through the [`HostHandle`] it receives at init
//! (`establish_vpn` and `protect_socket`), which only need the current VPN
//! service and never wait on the lifecycle lock.
//!
//! # Usage
//!
//! ```rust,ignore
//! let session = SessionManager::start(engine, SessionOptions::default());
//! session.handoff().grant(service).await?;
//! session.connect(r#"{"endpoint":"...","id":"...","secret":"..."}"#).await?;
//! ```

mod host;
pub(crate) mod state;

pub use host::HostHandle;

use crate::config::{ConfigError, ConnectionConfig};
use crate::engine::{EngineError, EngineEvent, EventSink, GlobalConfig, TunnelConfig, TunnelEngine};
use crate::engine::{AGENT, VERSION};
use crate::handoff::{self, HandoffSender};
use crate::logging::{level_name, parse_log_level, LogControl};
use crate::status::{extract_peers, ConnectionState, Peer};
use crate::vpn::{EstablishError, VpnConfig};
use state::{SharedState, TunnelTask};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid config: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("Failed to stop tunnel: {0}")]
    StopTunnel(#[source] EngineError),
    #[error("Failed to switch org: {0}")]
    SwitchOrg(#[source] EngineError),
    #[error("Failed to parse settings JSON: {0}")]
    InvalidSettings(#[source] serde_json::Error),
}

/// Receives engine lifecycle events on behalf of the host
pub trait StatusCallback: Send + Sync {
    fn on_registered(&self) {}
    fn on_connected(&self) {}
    fn on_terminated(&self) {}
    fn on_auth_error(&self, _status_code: i32, _message: &str) {}
}

#[derive(Default)]
pub struct SessionOptions {
    pub callback: Option<Arc<dyn StatusCallback>>,
    pub log: LogControl,
}

pub struct SessionManager {
    engine: Arc<dyn TunnelEngine>,
    lifecycle: Mutex<()>,
    state: Arc<SharedState>,
    handoff: HandoffSender,
    connection: watch::Receiver<ConnectionState>,
    log: LogControl,
    shutdown: CancellationToken,
}

impl SessionManager {
    /// Initialize the engine and start the background tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(engine: Arc<dyn TunnelEngine>, options: SessionOptions) -> Self {
        let shutdown = CancellationToken::new();
        let state = Arc::new(SharedState::default());

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (connection_tx, connection_rx) = watch::channel(ConnectionState::default());

        engine.init(GlobalConfig {
            log_level: level_name(options.log.level()).to_string(),
            enable_api: false,
            version: VERSION.to_string(),
            agent: AGENT.to_string(),
            events: EventSink::new(events_tx),
            host: HostHandle::new(state.clone()),
        });

        let (handoff_tx, handoff_rx) = handoff::channel();
        tokio::spawn(handoff::listen(handoff_rx, state.clone(), shutdown.clone()));
        tokio::spawn(dispatch_events(
            events_rx,
            connection_tx,
            options.callback,
            shutdown.clone(),
        ));

        info!("Session manager initialized ({} {})", AGENT, VERSION);

        Self {
            engine,
            lifecycle: Mutex::new(()),
            state,
            handoff: handoff_tx,
            connection: connection_rx,
            log: options.log,
            shutdown,
        }
    }

    /// Sender the host uses to grant and revoke VPN services
    pub fn handoff(&self) -> HandoffSender {
        self.handoff.clone()
    }

    /// Watch the connection state reported by the engine
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    pub fn current_service_id(&self) -> Option<String> {
        self.state.current_service().map(|s| s.id().to_string())
    }

    pub fn current_config(&self) -> Option<ConnectionConfig> {
        self.state.current_config()
    }

    /// Validate the config and start the tunnel in the background.
    ///
    /// Returns once the start has been issued; readiness is reported through
    /// the connected event.
    pub async fn connect(&self, config_json: &str) -> Result<(), SessionError> {
        let _guard = self.lifecycle.lock().await;
        info!("Connect request received");

        let config = ConnectionConfig::from_json(config_json)?;
        let tunnel_config = TunnelConfig::from(&config);

        let token = self.shutdown.child_token();
        let engine = self.engine.clone();
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = task_token.cancelled() => debug!("Tunnel task cancelled"),
                _ = engine.start_tunnel(tunnel_config) => debug!("Tunnel task finished"),
            }
        });

        let mut state = self.state.lock();
        state.tunnels.retain(|t| !t.handle.is_finished());
        if !state.tunnels.is_empty() {
            debug!("{} previous tunnel task(s) still running", state.tunnels.len());
        }
        state.config = Some(config);
        state.tunnels.push(TunnelTask { token, handle });

        info!("VPN connection initiated");
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), SessionError> {
        let _guard = self.lifecycle.lock().await;
        info!("Disconnect request received");

        self.engine
            .stop_tunnel()
            .await
            .map_err(SessionError::StopTunnel)?;

        let tunnels = {
            let mut state = self.state.lock();
            state.config = None;
            std::mem::take(&mut state.tunnels)
        };
        for tunnel in tunnels {
            tunnel.token.cancel();
        }

        info!("VPN disconnected");
        Ok(())
    }

    /// Switch the engine to another organization without reconnecting
    pub async fn switch_org(&self, org_id: &str) -> Result<(), SessionError> {
        let _guard = self.lifecycle.lock().await;
        info!("Switching to organization: {}", org_id);

        self.engine
            .switch_org(org_id)
            .await
            .map_err(SessionError::SwitchOrg)?;

        info!("Organization switched successfully");
        Ok(())
    }

    /// Engine status as JSON, `{}` if it cannot be encoded
    pub fn status_json(&self) -> String {
        let status = self.engine.status();
        serde_json::to_string(&status).unwrap_or_else(|e| {
            error!("Failed to marshal status: {}", e);
            "{}".to_string()
        })
    }

    pub fn peers(&self) -> Vec<Peer> {
        extract_peers(&self.engine.status())
    }

    /// Peer list as JSON, `[]` if it cannot be encoded
    pub fn peers_json(&self) -> String {
        serde_json::to_string(&self.peers()).unwrap_or_else(|e| {
            error!("Failed to marshal peers: {}", e);
            "[]".to_string()
        })
    }

    /// Apply runtime settings. Only `logLevel` is recognized.
    pub async fn update_settings(&self, settings_json: &str) -> Result<(), SessionError> {
        let _guard = self.lifecycle.lock().await;
        info!("Update settings request received");

        let settings: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(settings_json).map_err(SessionError::InvalidSettings)?;

        if let Some(level) = settings.get("logLevel").and_then(|v| v.as_str()) {
            match self.log.set_level(parse_log_level(level)) {
                Ok(()) => info!("Log level updated to: {}", level),
                Err(e) => warn!("Failed to update log level: {}", e),
            }
        }

        Ok(())
    }

    /// Build the tunnel interface through the current VPN service
    pub fn establish_vpn(&self, config: &VpnConfig) -> Result<i32, EstablishError> {
        self.host().establish_vpn(config)
    }

    /// Keep a socket out of the tunnel. Returns whether it was protected.
    pub fn protect_socket(&self, fd: i32) -> bool {
        self.host().protect_socket(fd)
    }

    /// Handle for code that needs establishment or protection without the
    /// manager itself
    pub fn host(&self) -> HostHandle {
        HostHandle::new(self.state.clone())
    }

    /// Stop the background tasks and any running tunnel tasks
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!("Session manager shutting down");
            self.shutdown.cancel();
        }
        let mut state = self.state.lock();
        state.config = None;
        state.tunnels.clear();
        state.service = None;
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn dispatch_events(
    mut events: mpsc::UnboundedReceiver<EngineEvent>,
    connection: watch::Sender<ConnectionState>,
    callback: Option<Arc<dyn StatusCallback>>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => return,
            event = events.recv() => match event {
                Some(event) => event,
                None => return,
            },
        };

        let next = match &event {
            EngineEvent::Registered => {
                info!("Registered with server");
                ConnectionState::Registered
            }
            EngineEvent::Connected => {
                info!("VPN connected");
                ConnectionState::Connected
            }
            EngineEvent::Terminated => {
                info!("Connection terminated by server");
                ConnectionState::Terminated
            }
            EngineEvent::AuthError {
                status_code,
                message,
            } => {
                warn!("Auth error: {} - {}", status_code, message);
                ConnectionState::AuthError {
                    code: *status_code,
                    message: message.clone(),
                }
            }
        };
        connection.send_replace(next);

        if let Some(callback) = &callback {
            match event {
                EngineEvent::Registered => callback.on_registered(),
                EngineEvent::Connected => callback.on_connected(),
                EngineEvent::Terminated => callback.on_terminated(),
                EngineEvent::AuthError {
                    status_code,
                    message,
                } => callback.on_auth_error(status_code, &message),
            }
        }
    }
}
