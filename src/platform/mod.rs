//! Host capabilities
//!
//! The host owns the network interface. These traits are the narrow surface
//! the orchestrator needs from it: an ownership object that can protect
//! sockets and hand out builders, a single-use builder, and the descriptor it
//! produces. `linux` provides a real implementation; mobile hosts implement
//! the same traits at their binding layer.

#[cfg(target_os = "linux")]
pub mod linux;

pub mod keychain;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("Host rejected {operation}: {message}")]
    Rejected {
        operation: &'static str,
        message: String,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TUN device error: {0}")]
    Tun(String),
    #[error("Preference store error: {0}")]
    Store(String),
    #[error("Unsupported platform")]
    UnsupportedPlatform,
}

/// A live VPN service handed to us by the host.
///
/// Every new service instance carries a fresh [`id`](Self::id); the
/// orchestrator only ever compares services by that id.
pub trait InterfaceOwnership: Send + Sync {
    fn id(&self) -> &str;

    /// Exclude the socket from tunnel routing. Returns whether it worked.
    fn protect(&self, fd: i32) -> bool;

    fn new_builder(&self) -> Box<dyn InterfaceBuilder>;

    fn close(&self);
}

/// Accumulates interface configuration until [`establish`](Self::establish)
/// consumes it.
pub trait InterfaceBuilder: Send {
    fn set_mtu(&mut self, mtu: u16) -> Result<(), HostError>;
    fn add_address(&mut self, addr: &str, prefix_len: u8) -> Result<(), HostError>;
    fn add_route(&mut self, route: &str, prefix_len: u8) -> Result<(), HostError>;
    fn add_dns_server(&mut self, dns: &str) -> Result<(), HostError>;
    fn establish(self: Box<Self>) -> Result<Box<dyn TunDescriptor>, HostError>;
}

/// Wrapper around the established interface's file descriptor
pub trait TunDescriptor: Send {
    /// Take ownership of the raw descriptor away from the wrapper
    fn detach(self: Box<Self>) -> Result<i32, HostError>;
}

/// Encrypted key/value preferences owned by the host
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, HostError>;
    fn put(&self, key: &str, value: &str) -> Result<(), HostError>;
}

/// Get the VPN service implementation for the current platform
pub fn new_vpn_service() -> Result<std::sync::Arc<dyn InterfaceOwnership>, HostError> {
    #[cfg(target_os = "linux")]
    {
        Ok(std::sync::Arc::new(linux::LinuxVpnService::new()))
    }

    #[cfg(not(target_os = "linux"))]
    {
        Err(HostError::UnsupportedPlatform)
    }
}
