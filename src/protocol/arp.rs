//! ARP (Address Resolution Protocol) - RFC 826, Ethernet/IPv4 only

use super::MacAddr;
use crate::{Error, Result};
use std::net::Ipv4Addr;

/// ARP packet size (for Ethernet/IPv4)
pub const ARP_PACKET_SIZE: usize = 28;

/// Fixed preamble: htype 1, ptype 0x0800, hlen 6, plen 4
const ETHERNET_IPV4_PREAMBLE: [u8; 6] = [0x00, 0x01, 0x08, 0x00, 6, 4];

/// ARP operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ArpOp {
    Request = 1,
    Reply = 2,
}

impl ArpOp {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(ArpOp::Request),
            2 => Some(ArpOp::Reply),
            _ => None,
        }
    }
}

/// ARP packet (Ethernet/IPv4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpPacket {
    pub operation: ArpOp,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

fn ip_at(buffer: &[u8], at: usize) -> Ipv4Addr {
    Ipv4Addr::new(buffer[at], buffer[at + 1], buffer[at + 2], buffer[at + 3])
}

impl ArpPacket {
    /// Parse an ARP packet; trailing bytes (Ethernet padding) are ignored.
    pub fn parse(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < ARP_PACKET_SIZE {
            return Err(Error::Parse("ARP packet too short".into()));
        }
        if buffer[..6] != ETHERNET_IPV4_PREAMBLE {
            return Err(Error::Parse("ARP packet is not Ethernet/IPv4".into()));
        }

        let operation = ArpOp::from_u16(u16::from_be_bytes([buffer[6], buffer[7]]))
            .ok_or_else(|| Error::Parse("invalid ARP operation".into()))?;
        let mac_at = |at: usize| {
            MacAddr::from_slice(&buffer[at..at + 6])
                .ok_or_else(|| Error::Parse("ARP hardware address truncated".into()))
        };

        Ok(Self {
            operation,
            sender_mac: mac_at(8)?,
            sender_ip: ip_at(buffer, 14),
            target_mac: mac_at(18)?,
            target_ip: ip_at(buffer, 24),
        })
    }

    pub fn to_bytes(&self) -> [u8; ARP_PACKET_SIZE] {
        let mut buf = [0u8; ARP_PACKET_SIZE];
        buf[..6].copy_from_slice(&ETHERNET_IPV4_PREAMBLE);
        buf[6..8].copy_from_slice(&(self.operation as u16).to_be_bytes());
        buf[8..14].copy_from_slice(&self.sender_mac.0);
        buf[14..18].copy_from_slice(&self.sender_ip.octets());
        buf[18..24].copy_from_slice(&self.target_mac.0);
        buf[24..28].copy_from_slice(&self.target_ip.octets());
        buf
    }

    /// Create an ARP request
    pub fn request(sender_mac: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        Self {
            operation: ArpOp::Request,
            sender_mac,
            sender_ip,
            target_mac: MacAddr::ZERO,
            target_ip,
        }
    }

    /// Reply to `request` on behalf of `our_mac`: sender and target swap.
    pub fn reply_to(request: &ArpPacket, our_mac: MacAddr) -> Self {
        Self {
            operation: ArpOp::Reply,
            sender_mac: our_mac,
            sender_ip: request.target_ip,
            target_mac: request.sender_mac,
            target_ip: request.sender_ip,
        }
    }

    /// Gratuitous ARP announcing our own binding
    pub fn gratuitous(mac: MacAddr, ip: Ipv4Addr) -> Self {
        Self {
            operation: ArpOp::Request,
            sender_mac: mac,
            sender_ip: ip,
            target_mac: MacAddr::ZERO,
            target_ip: ip,
        }
    }

    pub fn is_gratuitous(&self) -> bool {
        self.sender_ip == self.target_ip
    }
}
