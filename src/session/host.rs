//! Engine-facing view of the current VPN service

use super::state::SharedState;
use crate::vpn::{self, EstablishError, VpnConfig};
use std::fmt;
use std::sync::Arc;

/// What the engine calls when it needs the host: build the interface or
/// keep a control socket out of it.
///
/// Handed to the engine in [`GlobalConfig`](crate::engine::GlobalConfig).
/// Both calls read the service the host granted most recently and never
/// wait on a lifecycle operation, so they are safe to make from inside
/// `start_tunnel` or `stop_tunnel`.
#[derive(Clone)]
pub struct HostHandle {
    state: Arc<SharedState>,
}

impl HostHandle {
    pub(crate) fn new(state: Arc<SharedState>) -> Self {
        Self { state }
    }

    /// Build the tunnel interface through the current VPN service
    pub fn establish_vpn(&self, config: &VpnConfig) -> Result<i32, EstablishError> {
        let service = self.state.current_service().ok_or(EstablishError::NoService)?;
        vpn::establish(service.new_builder(), config)
    }

    /// Keep a socket out of the tunnel. Returns whether it was protected.
    pub fn protect_socket(&self, fd: i32) -> bool {
        let service = self.state.current_service();
        vpn::protect_socket(service.as_deref(), fd)
    }

    pub fn current_service_id(&self) -> Option<String> {
        self.state.current_service().map(|s| s.id().to_string())
    }
}

impl fmt::Debug for HostHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostHandle")
            .field("service", &self.current_service_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBuilder, FakeService};

    #[test]
    fn test_handle_follows_state() {
        let state = Arc::new(SharedState::default());
        let handle = HostHandle::new(state.clone());

        assert!(!handle.protect_socket(5));
        assert!(matches!(
            handle.establish_vpn(&VpnConfig::default()),
            Err(EstablishError::NoService)
        ));

        let (builder, _) = FakeBuilder::new(21);
        state.install(Arc::new(FakeService::new("svc-1").with_builder(builder)));

        let clone = handle.clone();
        assert!(clone.protect_socket(5));
        assert_eq!(handle.establish_vpn(&VpnConfig::default()).unwrap(), 21);
        assert_eq!(format!("{:?}", handle), r#"HostHandle { service: Some("svc-1") }"#);
    }
}
