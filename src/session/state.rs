//! Shared session state
//!
//! Critical sections here are short and never span an `.await`, so the
//! engine can look up the current service from any thread without waiting
//! on a lifecycle operation.

use crate::config::ConnectionConfig;
use crate::platform::InterfaceOwnership;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Background task running the engine's start call
pub(crate) struct TunnelTask {
    pub token: CancellationToken,
    pub handle: JoinHandle<()>,
}

#[derive(Default)]
pub(crate) struct SessionState {
    pub service: Option<Arc<dyn InterfaceOwnership>>,
    pub config: Option<ConnectionConfig>,
    /// Start calls still running; a new connect does not cancel older ones
    pub tunnels: Vec<TunnelTask>,
}

#[derive(Default)]
pub(crate) struct SharedState {
    inner: Mutex<SessionState>,
}

impl SharedState {
    pub fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `service` current, returning the id of the one it replaced
    pub fn install(&self, service: Arc<dyn InterfaceOwnership>) -> Option<String> {
        let mut state = self.lock();
        let previous = state.service.as_ref().map(|s| s.id().to_string());
        state.service = Some(service);
        previous
    }

    /// Clear the current service if its id matches. Returns whether it did.
    pub fn revoke(&self, id: &str) -> bool {
        let mut state = self.lock();
        match &state.service {
            Some(current) if current.id() == id => {
                state.service = None;
                true
            }
            _ => false,
        }
    }

    pub fn current_service(&self) -> Option<Arc<dyn InterfaceOwnership>> {
        self.lock().service.clone()
    }

    pub fn current_config(&self) -> Option<ConnectionConfig> {
        self.lock().config.clone()
    }
}
