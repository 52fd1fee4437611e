//! VPN service handoff
//!
//! The host creates VPN services and tells us about them asynchronously: a
//! grant when a service is ready, a revoke when it is being destroyed. Both
//! travel over single-slot channels to one listener task, which is the only
//! place a service enters or leaves session state.

use crate::platform::InterfaceOwnership;
use crate::session::state::SharedState;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum HandoffError {
    #[error("Session manager has shut down")]
    Closed,
}

type ServiceRef = Arc<dyn InterfaceOwnership>;

/// Host-side end of the handoff channels
#[derive(Clone)]
pub struct HandoffSender {
    granted: mpsc::Sender<ServiceRef>,
    revoked: mpsc::Sender<ServiceRef>,
}

impl HandoffSender {
    /// The service is ready to be used
    pub async fn grant(&self, service: ServiceRef) -> Result<(), HandoffError> {
        self.granted
            .send(service)
            .await
            .map_err(|_| HandoffError::Closed)
    }

    /// The service is being destroyed
    pub async fn revoke(&self, service: ServiceRef) -> Result<(), HandoffError> {
        self.revoked
            .send(service)
            .await
            .map_err(|_| HandoffError::Closed)
    }

    /// Like [`grant`](Self::grant), for host threads outside the runtime.
    ///
    /// Panics if called from within an async context.
    pub fn blocking_grant(&self, service: ServiceRef) -> Result<(), HandoffError> {
        self.granted
            .blocking_send(service)
            .map_err(|_| HandoffError::Closed)
    }

    /// Like [`revoke`](Self::revoke), for host threads outside the runtime.
    ///
    /// Panics if called from within an async context.
    pub fn blocking_revoke(&self, service: ServiceRef) -> Result<(), HandoffError> {
        self.revoked
            .blocking_send(service)
            .map_err(|_| HandoffError::Closed)
    }
}

pub(crate) struct HandoffReceiver {
    granted: mpsc::Receiver<ServiceRef>,
    revoked: mpsc::Receiver<ServiceRef>,
}

pub(crate) fn channel() -> (HandoffSender, HandoffReceiver) {
    let (granted_tx, granted_rx) = mpsc::channel(1);
    let (revoked_tx, revoked_rx) = mpsc::channel(1);
    (
        HandoffSender {
            granted: granted_tx,
            revoked: revoked_tx,
        },
        HandoffReceiver {
            granted: granted_rx,
            revoked: revoked_rx,
        },
    )
}

/// Apply grants and revokes to `state` until shutdown
pub(crate) async fn listen(
    mut rx: HandoffReceiver,
    state: Arc<SharedState>,
    shutdown: CancellationToken,
) {
    loop {
        // Grants are drained before revokes so a grant and revoke of the same
        // service queued together end with the service cleared.
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                debug!("Handoff listener shutting down");
                return;
            }
            Some(service) = rx.granted.recv() => {
                let id = service.id().to_string();
                match state.install(service) {
                    Some(previous) if previous != id => {
                        info!("VPN service ready: {} (replaces {})", id, previous);
                    }
                    _ => info!("VPN service ready: {}", id),
                }
            }
            Some(service) = rx.revoked.recv() => {
                info!("VPN service disconnecting: {}", service.id());
                if !state.revoke(service.id()) {
                    debug!("Ignoring revoke for non-current service {}", service.id());
                }
            }
            else => return,
        }
    }
}
