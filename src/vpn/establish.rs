//! Interface establishment
//!
//! Drives a host builder through a fixed sequence of steps. Steps without
//! which the tunnel cannot work abort the whole procedure; convenience steps
//! only log a warning and the procedure carries on.

use crate::platform::{HostError, InterfaceBuilder};
use thiserror::Error;
use tracing::{info, warn};

const DEFAULT_IPV4_PREFIX: u8 = 32;
const DEFAULT_IPV6_PREFIX: u8 = 128;

#[derive(Error, Debug)]
pub enum EstablishError {
    #[error("No VPN service available")]
    NoService,
    #[error("Failed to set MTU: {0}")]
    SetMtu(#[source] HostError),
    #[error("Failed to add address: {0}")]
    AddAddress(#[source] HostError),
    #[error("Failed to add default route: {0}")]
    DefaultRoute(#[source] HostError),
    #[error("Failed to establish VPN: {0}")]
    Establish(#[source] HostError),
    #[error("Failed to detach file descriptor: {0}")]
    Detach(#[source] HostError),
}

/// Interface parameters for one establishment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VpnConfig {
    /// Tunnel address, `addr/prefix`
    pub tunnel_ip: String,
    pub mtu: u16,
    pub dns: String,
    /// Extra routes, `addr/prefix`, applied in order
    pub routes: Vec<String>,
    /// Subnet used for the DNS proxy and similar helpers
    pub utility_subnet: Option<String>,
}

/// Configure the builder and return the raw descriptor of the new interface
pub fn establish(
    mut builder: Box<dyn InterfaceBuilder>,
    config: &VpnConfig,
) -> Result<i32, EstablishError> {
    info!("Establishing VPN with config: {:?}", config);

    builder.set_mtu(config.mtu).map_err(EstablishError::SetMtu)?;

    let (addr, prefix_len) = parse_ip_with_prefix(&config.tunnel_ip);
    builder
        .add_address(&addr, prefix_len)
        .map_err(EstablishError::AddAddress)?;

    if let Some(subnet) = config.utility_subnet.as_deref().filter(|s| !s.is_empty()) {
        let (util_addr, util_prefix) = parse_ip_with_prefix(subnet);
        if let Err(e) = builder.add_route(&util_addr, util_prefix) {
            warn!("Failed to add utility subnet route {}: {}", subnet, e);
        }
    }

    builder
        .add_route("0.0.0.0", 0)
        .map_err(EstablishError::DefaultRoute)?;

    for route in &config.routes {
        let (route_addr, route_prefix) = parse_ip_with_prefix(route);
        if let Err(e) = builder.add_route(&route_addr, route_prefix) {
            warn!("Failed to add route {}: {}", route, e);
        }
    }

    if !config.dns.is_empty() {
        if let Err(e) = builder.add_dns_server(&config.dns) {
            warn!("Failed to add DNS server {}: {}", config.dns, e);
        }
    }

    let descriptor = builder.establish().map_err(EstablishError::Establish)?;
    let fd = descriptor.detach().map_err(EstablishError::Detach)?;

    info!("VPN established successfully, fd={}", fd);
    Ok(fd)
}

/// Split `addr/prefix` into its parts.
///
/// Without a prefix, IPv4-looking addresses get /32 and anything containing
/// a colon gets /128. Only the leading digits of the prefix count, so
/// `10.0.0.1/24/x` is /24. A prefix with no leading digits, or one that does
/// not fit in a `u8`, falls back to the family default rather than /0, which
/// would turn the address into a default route.
pub fn parse_ip_with_prefix(ip_with_prefix: &str) -> (String, u8) {
    let (addr, prefix) = match ip_with_prefix.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix)),
        None => (ip_with_prefix, None),
    };

    let default_prefix = if addr.contains(':') {
        DEFAULT_IPV6_PREFIX
    } else {
        DEFAULT_IPV4_PREFIX
    };

    let prefix_len = match prefix {
        None => default_prefix,
        Some(p) => {
            let p = p.trim_start();
            let digits = p.find(|c: char| !c.is_ascii_digit()).unwrap_or(p.len());
            p[..digits].parse().unwrap_or_else(|_| {
                warn!("Invalid prefix length in {}, using /{}", ip_with_prefix, default_prefix);
                default_prefix
            })
        }
    };

    (addr.to_string(), prefix_len)
}
