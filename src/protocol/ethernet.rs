//! Ethernet II header parsing and construction

use super::{EtherType, MacAddr};
use crate::{Error, Result};

/// Ethernet header size (dst, src, EtherType)
pub const HEADER_LEN: usize = 14;
/// Minimum frame size on the wire, without FCS
pub const MIN_FRAME_LEN: usize = 60;
/// Maximum untagged frame size, without FCS
pub const MAX_FRAME_LEN: usize = 1514;

/// Ethernet II header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dst_mac: MacAddr,
    pub src_mac: MacAddr,
    /// Raw EtherType; unknown values are kept so they can be counted
    pub ethertype: u16,
}

impl EthernetHeader {
    pub fn parse(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < HEADER_LEN {
            return Err(Error::Parse("Ethernet header too short".into()));
        }
        let dst_mac = MacAddr::from_slice(&buffer[0..6])
            .ok_or_else(|| Error::Parse("bad destination MAC".into()))?;
        let src_mac = MacAddr::from_slice(&buffer[6..12])
            .ok_or_else(|| Error::Parse("bad source MAC".into()))?;
        Ok(Self {
            dst_mac,
            src_mac,
            ethertype: u16::from_be_bytes([buffer[12], buffer[13]]),
        })
    }

    pub fn new(dst_mac: MacAddr, src_mac: MacAddr, ethertype: EtherType) -> Self {
        Self {
            dst_mac,
            src_mac,
            ethertype: ethertype as u16,
        }
    }

    pub fn known_ethertype(&self) -> Option<EtherType> {
        EtherType::from_u16(self.ethertype)
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..6].copy_from_slice(&self.dst_mac.0);
        buf[6..12].copy_from_slice(&self.src_mac.0);
        buf[12..14].copy_from_slice(&self.ethertype.to_be_bytes());
        buf
    }
}

/// Builder for complete Ethernet frames (used by the ARP module and tests)
#[derive(Debug, Default)]
pub struct FrameBuilder {
    dst_mac: MacAddr,
    src_mac: MacAddr,
    ethertype: u16,
    payload: Vec<u8>,
    pad: bool,
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dst_mac(mut self, mac: MacAddr) -> Self {
        self.dst_mac = mac;
        self
    }

    pub fn src_mac(mut self, mac: MacAddr) -> Self {
        self.src_mac = mac;
        self
    }

    pub fn ethertype(mut self, ethertype: u16) -> Self {
        self.ethertype = ethertype;
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    /// Zero-pad the frame to the wire minimum.
    pub fn pad(mut self) -> Self {
        self.pad = true;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let header = EthernetHeader {
            dst_mac: self.dst_mac,
            src_mac: self.src_mac,
            ethertype: self.ethertype,
        };
        let mut frame = Vec::with_capacity(HEADER_LEN + self.payload.len().max(46));
        frame.extend_from_slice(&header.to_bytes());
        frame.extend_from_slice(&self.payload);
        if self.pad && frame.len() < MIN_FRAME_LEN {
            frame.resize(MIN_FRAME_LEN, 0);
        }
        frame
    }
}
