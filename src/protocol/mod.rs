//! Wire formats of the protocols the stack terminates
//!
//! Header parsing and construction only; the dataplane stages decide
//! what to do with the frames.

pub mod arp;
pub mod checksum;
pub mod dhcp;
pub mod ethernet;
pub mod icmp;
pub mod ipv4;
pub mod types;
pub mod udp;

pub use types::*;
