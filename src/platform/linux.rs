//! Linux host implementation
//!
//! Sockets are protected by tagging them with a firewall mark. Tunnel routes
//! live in a dedicated table that is only consulted for unmarked traffic, so
//! a protected control socket keeps using the main table.

use super::{HostError, InterfaceBuilder, InterfaceOwnership, TunDescriptor};
use nix::sys::socket::{setsockopt, sockopt};
use std::net::IpAddr;
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

pub const INTERFACE_NAME: &str = "olm0";
pub const FWMARK: u32 = 0x006f_6c6d;
pub const ROUTE_TABLE: u32 = 28_525;

static NEXT_SERVICE: AtomicU64 = AtomicU64::new(1);

pub struct LinuxVpnService {
    id: String,
    interface: String,
    fwmark: u32,
    table: u32,
}

impl LinuxVpnService {
    pub fn new() -> Self {
        Self::with_interface(INTERFACE_NAME)
    }

    pub fn with_interface(interface: &str) -> Self {
        let n = NEXT_SERVICE.fetch_add(1, Ordering::Relaxed);
        Self {
            id: format!("linux-{}-{}", std::process::id(), n),
            interface: interface.to_string(),
            fwmark: FWMARK,
            table: ROUTE_TABLE,
        }
    }
}

impl Default for LinuxVpnService {
    fn default() -> Self {
        Self::new()
    }
}

impl InterfaceOwnership for LinuxVpnService {
    fn id(&self) -> &str {
        &self.id
    }

    fn protect(&self, fd: i32) -> bool {
        if fd < 0 {
            return false;
        }
        // SAFETY: the caller keeps `fd` open for the duration of this call.
        let socket = unsafe { BorrowedFd::borrow_raw(fd) };
        match setsockopt(&socket, sockopt::Mark, &self.fwmark) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to set fwmark on fd={}: {}", fd, e);
                false
            }
        }
    }

    fn new_builder(&self) -> Box<dyn InterfaceBuilder> {
        debug!("Creating new builder for {}", self.interface);
        Box::new(LinuxBuilder {
            interface: self.interface.clone(),
            fwmark: self.fwmark,
            table: self.table,
            mtu: None,
            addresses: Vec::new(),
            routes: Vec::new(),
            dns_servers: Vec::new(),
        })
    }

    fn close(&self) {
        info!("Closing VPN service {}", self.id);
        for family in ["-4", "-6"] {
            if let Err(e) = run("ip", &rule_args(family, "del", self.fwmark, self.table)) {
                debug!("No {} rule to remove: {}", family, e);
            }
        }
        if let Err(e) = run("ip", &flush_args(self.table)) {
            warn!("Failed to flush route table {}: {}", self.table, e);
        }
    }
}

struct LinuxBuilder {
    interface: String,
    fwmark: u32,
    table: u32,
    mtu: Option<u16>,
    addresses: Vec<String>,
    routes: Vec<(IpAddr, String)>,
    dns_servers: Vec<String>,
}

impl InterfaceBuilder for LinuxBuilder {
    fn set_mtu(&mut self, mtu: u16) -> Result<(), HostError> {
        if mtu < 576 {
            return Err(HostError::Rejected {
                operation: "set MTU",
                message: format!("{} is below the IPv4 minimum", mtu),
            });
        }
        self.mtu = Some(mtu);
        Ok(())
    }

    fn add_address(&mut self, addr: &str, prefix_len: u8) -> Result<(), HostError> {
        let ip = parse_ip(addr, prefix_len, "add address")?;
        self.addresses.push(format!("{}/{}", ip, prefix_len));
        Ok(())
    }

    fn add_route(&mut self, route: &str, prefix_len: u8) -> Result<(), HostError> {
        let ip = parse_ip(route, prefix_len, "add route")?;
        self.routes.push((ip, format!("{}/{}", ip, prefix_len)));
        Ok(())
    }

    fn add_dns_server(&mut self, dns: &str) -> Result<(), HostError> {
        let ip: IpAddr = dns.parse().map_err(|_| HostError::Rejected {
            operation: "add DNS server",
            message: format!("invalid address {}", dns),
        })?;
        self.dns_servers.push(ip.to_string());
        Ok(())
    }

    fn establish(self: Box<Self>) -> Result<Box<dyn TunDescriptor>, HostError> {
        let mut config = tun::Configuration::default();
        config.tun_name(&self.interface).up();
        if let Some(mtu) = self.mtu {
            config.mtu(mtu);
        }

        let device = tun::create(&config).map_err(|e| HostError::Tun(e.to_string()))?;
        // The interface lives as long as any descriptor to it is open.
        let fd = nix::unistd::dup(device.as_raw_fd()).map_err(std::io::Error::from)?;
        drop(device);
        let descriptor = LinuxDescriptor { fd: Some(fd) };
        info!("TUN device created: {}", self.interface);

        for cidr in &self.addresses {
            run("ip", &address_args(&self.interface, cidr))?;
        }

        let mut run_ip = |args: &[String]| run("ip", args);
        let added = add_routes(&self.interface, &self.routes, self.table, &mut run_ip)?;
        if let Err(e) = add_rules(&route_families(&added), self.fwmark, self.table, &mut run_ip) {
            if let Err(flush) = run_ip(&flush_args(self.table)) {
                warn!("Failed to flush route table {}: {}", self.table, flush);
            }
            return Err(e);
        }

        if !self.dns_servers.is_empty() {
            if let Err(e) = run("resolvectl", &dns_args(&self.interface, &self.dns_servers)) {
                warn!("Failed to set interface DNS: {}", e);
            }
        }

        Ok(Box::new(descriptor))
    }
}

struct LinuxDescriptor {
    fd: Option<RawFd>,
}

impl TunDescriptor for LinuxDescriptor {
    fn detach(mut self: Box<Self>) -> Result<i32, HostError> {
        self.fd.take().ok_or(HostError::Rejected {
            operation: "detach",
            message: "descriptor already detached".to_string(),
        })
    }
}

impl Drop for LinuxDescriptor {
    fn drop(&mut self) {
        if let Some(fd) = self.fd.take() {
            let _ = nix::unistd::close(fd);
        }
    }
}

fn parse_ip(addr: &str, prefix_len: u8, operation: &'static str) -> Result<IpAddr, HostError> {
    let ip: IpAddr = addr.parse().map_err(|_| HostError::Rejected {
        operation,
        message: format!("invalid address {}", addr),
    })?;
    let max = if ip.is_ipv4() { 32 } else { 128 };
    if prefix_len > max {
        return Err(HostError::Rejected {
            operation,
            message: format!("prefix /{} out of range for {}", prefix_len, ip),
        });
    }
    Ok(ip)
}

fn is_default_route(ip: &IpAddr, cidr: &str) -> bool {
    ip.is_unspecified() && cidr.ends_with("/0")
}

/// Add routes to the tunnel table. Only a failing default route is an
/// error; any other route is logged and skipped. Returns the routes that
/// were added.
fn add_routes<'a, F>(
    interface: &str,
    routes: &'a [(IpAddr, String)],
    table: u32,
    run_ip: &mut F,
) -> Result<Vec<&'a (IpAddr, String)>, HostError>
where
    F: FnMut(&[String]) -> Result<(), HostError>,
{
    let mut added = Vec::new();
    for route in routes {
        let (ip, cidr) = route;
        match run_ip(&route_args(interface, cidr, table)) {
            Ok(()) => added.push(route),
            Err(e) if is_default_route(ip, cidr) => {
                if !added.is_empty() {
                    if let Err(flush) = run_ip(&flush_args(table)) {
                        warn!("Failed to flush route table {}: {}", table, flush);
                    }
                }
                return Err(e);
            }
            Err(e) => warn!("Skipping route {}: {}", cidr, e),
        }
    }
    Ok(added)
}

/// Add one policy rule per family. On failure the rules already added are
/// removed again.
fn add_rules<F>(
    families: &[&'static str],
    fwmark: u32,
    table: u32,
    run_ip: &mut F,
) -> Result<(), HostError>
where
    F: FnMut(&[String]) -> Result<(), HostError>,
{
    for (i, family) in families.iter().enumerate() {
        if let Err(e) = run_ip(&rule_args(family, "add", fwmark, table)) {
            for added in &families[..i] {
                if let Err(del) = run_ip(&rule_args(added, "del", fwmark, table)) {
                    warn!("Failed to remove {} rule: {}", added, del);
                }
            }
            return Err(e);
        }
    }
    Ok(())
}

fn route_families(routes: &[&(IpAddr, String)]) -> Vec<&'static str> {
    let mut families = Vec::new();
    if routes.iter().any(|(ip, _)| ip.is_ipv4()) {
        families.push("-4");
    }
    if routes.iter().any(|(ip, _)| ip.is_ipv6()) {
        families.push("-6");
    }
    families
}

fn address_args(interface: &str, cidr: &str) -> Vec<String> {
    ["addr", "add", cidr, "dev", interface]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn route_args(interface: &str, cidr: &str, table: u32) -> Vec<String> {
    vec![
        "route".to_string(),
        "add".to_string(),
        cidr.to_string(),
        "dev".to_string(),
        interface.to_string(),
        "table".to_string(),
        table.to_string(),
    ]
}

fn rule_args(family: &str, action: &str, fwmark: u32, table: u32) -> Vec<String> {
    vec![
        family.to_string(),
        "rule".to_string(),
        action.to_string(),
        "not".to_string(),
        "fwmark".to_string(),
        format!("{:#x}", fwmark),
        "table".to_string(),
        table.to_string(),
    ]
}

fn flush_args(table: u32) -> Vec<String> {
    vec![
        "route".to_string(),
        "flush".to_string(),
        "table".to_string(),
        table.to_string(),
    ]
}

fn dns_args(interface: &str, servers: &[String]) -> Vec<String> {
    let mut args = vec!["dns".to_string(), interface.to_string()];
    args.extend(servers.iter().cloned());
    args
}

fn run(program: &str, args: &[String]) -> Result<(), HostError> {
    debug!("Running: {} {}", program, args.join(" "));
    let output = Command::new(program).args(args).output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(HostError::Rejected {
            operation: "configure interface",
            message: format!("{} {}: {}", program, args.join(" "), stderr.trim()),
        });
    }

    Ok(())
}
