//! IPv4 protocol - RFC 791
//!
//! Only the header is handled here; payloads flow through the pipeline as
//! streams and never sit behind a parsed header.

use super::checksum::{self, Checksum};
use crate::{Error, Result};
use std::net::Ipv4Addr;

/// Minimum IPv4 header size (without options)
pub const MIN_HEADER_SIZE: usize = 20;
/// Maximum IPv4 header size (IHL = 15)
pub const MAX_HEADER_SIZE: usize = 60;
/// TTL used for every header the stack originates
pub const DEFAULT_TTL: u8 = 64;

/// IPv4 protocol numbers handled by the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Protocol {
    Icmp = 1,
    Udp = 17,
}

impl Protocol {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Protocol::Icmp),
            17 => Some(Protocol::Udp),
            _ => None,
        }
    }
}

/// Fragment flags
pub mod flags {
    /// Don't Fragment
    pub const DF: u8 = 0b010;
    /// More Fragments
    pub const MF: u8 = 0b001;
}

/// Header length announced by the first header byte, after checking the
/// version nibble and IHL.
pub fn header_len_from_first_byte(b: u8) -> Result<usize> {
    if b >> 4 != 4 {
        return Err(Error::Parse("not an IPv4 packet".into()));
    }
    let ihl = (b & 0x0F) as usize;
    if ihl < 5 {
        return Err(Error::Parse("IPv4 IHL below 5".into()));
    }
    Ok(ihl * 4)
}

/// Parsed IPv4 header (zero-copy reference over the header bytes)
#[derive(Debug)]
pub struct Ipv4Header<'a> {
    buffer: &'a [u8],
    header_len: usize,
}

impl<'a> Ipv4Header<'a> {
    /// Parse and sanity-check a header. `buffer` must hold at least the
    /// full header including options; bytes past it are ignored.
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < MIN_HEADER_SIZE {
            return Err(Error::Parse("IPv4 header too short".into()));
        }
        let header_len = header_len_from_first_byte(buffer[0])?;
        if buffer.len() < header_len {
            return Err(Error::Parse("IPv4 header truncated".into()));
        }
        let hdr = Self { buffer, header_len };
        if (hdr.total_length() as usize) < header_len {
            return Err(Error::Parse("IPv4 total length below header length".into()));
        }
        Ok(hdr)
    }

    pub fn ihl(&self) -> u8 {
        self.buffer[0] & 0x0F
    }

    pub fn total_length(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    pub fn identification(&self) -> u16 {
        u16::from_be_bytes([self.buffer[4], self.buffer[5]])
    }

    pub fn flags(&self) -> u8 {
        self.buffer[6] >> 5
    }

    pub fn fragment_offset(&self) -> u16 {
        u16::from_be_bytes([self.buffer[6] & 0x1F, self.buffer[7]])
    }

    pub fn ttl(&self) -> u8 {
        self.buffer[8]
    }

    pub fn protocol(&self) -> u8 {
        self.buffer[9]
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.buffer[10], self.buffer[11]])
    }

    pub fn src_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.buffer[12],
            self.buffer[13],
            self.buffer[14],
            self.buffer[15],
        )
    }

    pub fn dst_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.buffer[16],
            self.buffer[17],
            self.buffer[18],
            self.buffer[19],
        )
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// Bytes following the header according to total length
    pub fn payload_len(&self) -> usize {
        self.total_length() as usize - self.header_len
    }

    pub fn dont_fragment(&self) -> bool {
        (self.flags() & flags::DF) != 0
    }

    /// MF set or non-zero offset
    pub fn is_fragment(&self) -> bool {
        (self.flags() & flags::MF) != 0 || self.fragment_offset() > 0
    }

    /// Header checksum over the full header, options included
    pub fn validate_checksum(&self) -> bool {
        let mut c = Checksum::new();
        c.add_bytes(&self.buffer[..self.header_len]);
        c.verifies()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[..self.header_len]
    }
}

/// Builder for the 20-byte header the stack prepends on egress
#[derive(Debug, Clone)]
pub struct Ipv4Builder {
    identification: u16,
    dont_fragment: bool,
    ttl: u8,
    protocol: u8,
    src_addr: Ipv4Addr,
    dst_addr: Ipv4Addr,
    payload_len: usize,
}

impl Ipv4Builder {
    pub fn new() -> Self {
        Self {
            identification: 0,
            dont_fragment: true,
            ttl: DEFAULT_TTL,
            protocol: 0,
            src_addr: Ipv4Addr::UNSPECIFIED,
            dst_addr: Ipv4Addr::UNSPECIFIED,
            payload_len: 0,
        }
    }

    pub fn identification(mut self, id: u16) -> Self {
        self.identification = id;
        self
    }

    pub fn dont_fragment(mut self, df: bool) -> Self {
        self.dont_fragment = df;
        self
    }

    pub fn ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn protocol(mut self, protocol: u8) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn src_addr(mut self, addr: Ipv4Addr) -> Self {
        self.src_addr = addr;
        self
    }

    pub fn dst_addr(mut self, addr: Ipv4Addr) -> Self {
        self.dst_addr = addr;
        self
    }

    /// Length of the payload that will follow the header
    pub fn payload_len(mut self, len: usize) -> Self {
        self.payload_len = len;
        self
    }

    /// Header bytes with a fresh checksum
    pub fn build(self) -> [u8; MIN_HEADER_SIZE] {
        let total_length = (MIN_HEADER_SIZE + self.payload_len) as u16;
        let mut buffer = [0u8; MIN_HEADER_SIZE];

        // Version 4, IHL 5
        buffer[0] = 0x45;
        buffer[2..4].copy_from_slice(&total_length.to_be_bytes());
        buffer[4..6].copy_from_slice(&self.identification.to_be_bytes());
        if self.dont_fragment {
            buffer[6] = flags::DF << 5;
        }
        buffer[8] = self.ttl;
        buffer[9] = self.protocol;
        buffer[12..16].copy_from_slice(&self.src_addr.octets());
        buffer[16..20].copy_from_slice(&self.dst_addr.octets());

        let sum = checksum::checksum(&buffer);
        buffer[10..12].copy_from_slice(&sum.to_be_bytes());
        buffer
    }
}

impl Default for Ipv4Builder {
    fn default() -> Self {
        Self::new()
    }
}
