//! Socket protection
//!
//! Control-plane sockets must not be routed through the tunnel they set up.
//! Protection is delegated to whichever VPN service is current; when there is
//! none the socket simply stays unprotected.

use crate::platform::InterfaceOwnership;
use tracing::{debug, warn};

/// Ask the current service to exclude `fd` from tunnel routing
pub fn protect_socket(service: Option<&dyn InterfaceOwnership>, fd: i32) -> bool {
    let Some(service) = service else {
        warn!("No VPN service available to protect socket fd={}", fd);
        return false;
    };

    let protected = service.protect(fd);
    if protected {
        debug!("Socket fd={} protected from VPN", fd);
    } else {
        warn!("Failed to protect socket fd={}", fd);
    }

    protected
}
