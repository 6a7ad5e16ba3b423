//! Side-band metadata carried next to the frame data between stages

use crate::protocol::{EtherType, MacAddr};
use std::net::Ipv4Addr;

/// Index of a client interface, also its slot in the Port-I/O table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub usize);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client{}", self.0)
    }
}

// Ingress

/// Ethernet header stripped, payload follows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthRxMeta {
    pub src_mac: MacAddr,
    pub dst_mac: MacAddr,
    pub ethertype: EtherType,
}

/// IPv4 header stripped, payload follows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRxMeta {
    pub src_mac: MacAddr,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub protocol: u8,
    /// Payload length announced by the IPv4 total length
    pub payload_len: u16,
}

/// UDP header stripped, datagram payload follows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpRxMeta {
    pub src_mac: MacAddr,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub payload_len: u16,
}

/// What a client interface learns about a received datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientRxMeta {
    pub src_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
}

// Egress

/// Source address the IP header stage should write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceAddr {
    /// The host address, subject to the unbound policy
    Host,
    /// Always 0.0.0.0 (DHCP exchanges)
    Unspecified,
}

/// IP payload (ICMP message or full UDP datagram) follows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpTxMeta {
    pub dst_ip: Ipv4Addr,
    pub protocol: u8,
    pub payload_len: u16,
    pub source: SourceAddr,
    /// Source address a pseudo-header checksum in the payload was computed
    /// with. The packet is dropped if the IP stage would write another one.
    pub checksum_src: Option<Ipv4Addr>,
    /// Known link destination; skips ARP resolution
    pub dst_mac: Option<MacAddr>,
}

/// Complete IPv4 packet follows, waiting for a link destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteMeta {
    pub next_hop: Ipv4Addr,
    pub dst_mac: Option<MacAddr>,
}

/// Ethernet payload follows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthTxMeta {
    pub dst_mac: MacAddr,
    pub ethertype: EtherType,
}
