//! Status shapes exposed to the host UI

use crate::engine::StatusResponse;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Peer as presented to the host.
///
/// Fields the engine does not report yet are still serialized, as empty
/// values, so the host always sees the same keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    pub site_id: i32,
    pub name: String,
    pub connected: bool,
    pub rtt: u64,
    pub endpoint: String,
    pub public_key: String,
    pub is_relay: bool,
    pub holepunch_connected: bool,
    pub remote_subnets: Vec<String>,
    pub aliases: Vec<Alias>,
}

/// DNS alias for a peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alias {
    pub alias: String,
    pub ip: String,
}

pub fn extract_peers(status: &StatusResponse) -> Vec<Peer> {
    status
        .peers
        .iter()
        .map(|peer| Peer {
            site_id: peer.site_id,
            name: peer.name.clone(),
            connected: peer.connected,
            rtt: peer.rtt,
            endpoint: peer.endpoint.clone(),
            public_key: String::new(),
            is_relay: peer.is_relay,
            holepunch_connected: !peer.is_relay,
            remote_subnets: Vec::new(),
            aliases: Vec::new(),
        })
        .collect()
}

/// Connection state as seen through engine callbacks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Registered,
    Connected,
    Terminated,
    AuthError {
        code: i32,
        message: String,
    },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Registered => write!(f, "Registered"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Terminated => write!(f, "Terminated"),
            ConnectionState::AuthError { message, .. } => write!(f, "Auth Error: {}", message),
        }
    }
}
