//! olm-bridge - binds the olm tunnel engine to the host that owns the interface
//!
//! The tunnel engine needs a TUN interface, routes and DNS on it, and
//! control sockets that bypass it, but only the host may create interfaces.
//! This crate sits in between: the host hands VPN services over, the engine
//! asks for an interface and for socket protection, and connection
//! lifecycle calls are serialized against both.
//!
//! # Architecture
//!
//! - `config`: Connect payload validation and defaults
//! - `handoff`: Host-to-orchestrator VPN service handoff
//! - `vpn`: Interface establishment and socket protection
//! - `session`: Connection lifecycle and engine events
//! - `engine`: Tunnel engine boundary
//! - `platform`: Host capabilities (Linux implementation, preference store)
//! - `settings`: Saved settings (TOML file, preference store)
//! - `status`: Peer and connection state shapes for the host UI
//! - `logging`: Subscriber setup with a runtime-adjustable level

pub mod config;
pub mod engine;
pub mod handoff;
pub mod logging;
pub mod platform;
pub mod session;
pub mod settings;
pub mod status;
pub mod vpn;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, ConnectionConfig};
pub use engine::{EngineError, EventSink, TunnelEngine};
pub use handoff::{HandoffError, HandoffSender};
pub use session::{HostHandle, SessionError, SessionManager, SessionOptions, StatusCallback};
pub use settings::Settings;
pub use vpn::{EstablishError, VpnConfig};
