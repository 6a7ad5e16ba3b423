//! xgbe-stack - streaming Ethernet endpoint
//!
//! A userspace Ethernet/ARP/IPv4/ICMP/UDP/DHCP endpoint built as a
//! pipeline of tasks passing frames word by word over bounded links, the
//! way a 10G MAC's receive and transmit paths are laid out in hardware.
//! Client applications get UDP-payload streams routed by a port table.

pub mod capture;
pub mod config;
pub mod dataplane;
pub mod error;
pub mod protocol;
pub mod stream;
pub mod telemetry;

pub use error::{Error, Result};
