//! UDP protocol - RFC 768

use super::checksum::Checksum;
use crate::{Error, Result};
use std::net::Ipv4Addr;

/// UDP header size (fixed)
pub const HEADER_SIZE: usize = 8;

/// UDP protocol number for pseudo-header
pub const PROTOCOL_NUMBER: u8 = 17;

/// Largest payload that fits a 1500-byte IP MTU without fragmentation
pub const MAX_PAYLOAD: usize = 1500 - 20 - HEADER_SIZE;

/// Parsed UDP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    /// Length of header plus data
    pub length: u16,
    /// 0 means no checksum was computed
    pub checksum: u16,
}

impl UdpHeader {
    pub fn parse(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(Error::Parse("UDP header too short".into()));
        }
        let hdr = Self {
            src_port: u16::from_be_bytes([buffer[0], buffer[1]]),
            dst_port: u16::from_be_bytes([buffer[2], buffer[3]]),
            length: u16::from_be_bytes([buffer[4], buffer[5]]),
            checksum: u16::from_be_bytes([buffer[6], buffer[7]]),
        };
        if (hdr.length as usize) < HEADER_SIZE {
            return Err(Error::Parse("UDP length below header size".into()));
        }
        Ok(hdr)
    }

    pub fn payload_len(&self) -> usize {
        self.length as usize - HEADER_SIZE
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        buf[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        buf[4..6].copy_from_slice(&self.length.to_be_bytes());
        buf[6..8].copy_from_slice(&self.checksum.to_be_bytes());
        buf
    }
}

/// UDP datagram builder
#[derive(Debug, Clone, Default)]
pub struct UdpBuilder {
    src_port: u16,
    dst_port: u16,
    payload: Vec<u8>,
}

impl UdpBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn src_port(mut self, port: u16) -> Self {
        self.src_port = port;
        self
    }

    pub fn dst_port(mut self, port: u16) -> Self {
        self.dst_port = port;
        self
    }

    pub fn payload(mut self, data: &[u8]) -> Self {
        self.payload = data.to_vec();
        self
    }

    /// Build the datagram with its pseudo-header checksum.
    pub fn build(self, src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> Vec<u8> {
        let mut hdr = UdpHeader {
            src_port: self.src_port,
            dst_port: self.dst_port,
            length: (HEADER_SIZE + self.payload.len()) as u16,
            checksum: 0,
        };

        let mut c = Checksum::new();
        c.add_pseudo_header(src_ip, dst_ip, PROTOCOL_NUMBER, hdr.length);
        c.add_bytes(&hdr.to_bytes());
        c.add_bytes(&self.payload);
        // A computed 0 is sent as all ones (0 means "no checksum").
        hdr.checksum = match c.finish() {
            0 => 0xFFFF,
            sum => sum,
        };

        let mut buffer = Vec::with_capacity(hdr.length as usize);
        buffer.extend_from_slice(&hdr.to_bytes());
        buffer.extend_from_slice(&self.payload);
        buffer
    }
}

/// Check a full datagram against its pseudo-header. A zero checksum field
/// means the sender did not compute one and is accepted.
pub fn validate_checksum(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, datagram: &[u8]) -> bool {
    if datagram.len() < HEADER_SIZE {
        return false;
    }
    if datagram[6..8] == [0, 0] {
        return true;
    }
    let mut c = Checksum::new();
    c.add_pseudo_header(src_ip, dst_ip, PROTOCOL_NUMBER, datagram.len() as u16);
    c.add_bytes(datagram);
    c.verifies()
}
