//! Interface establishment and socket protection

pub mod establish;
pub mod protect;

pub use establish::{establish, parse_ip_with_prefix, EstablishError, VpnConfig};
pub use protect::protect_socket;
