//! ICMP (Internet Control Message Protocol) - RFC 792
//!
//! The stack only answers echo requests, so this covers the 8-byte echo
//! header and the checksum arithmetic around it.

use super::checksum::{self, incremental_update};
use crate::{Error, Result};

/// ICMP header size (minimum)
pub const ICMP_HEADER_SIZE: usize = 8;

/// ICMP message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IcmpType {
    EchoReply = 0,
    DestinationUnreachable = 3,
    EchoRequest = 8,
    TimeExceeded = 11,
}

impl IcmpType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(IcmpType::EchoReply),
            3 => Some(IcmpType::DestinationUnreachable),
            8 => Some(IcmpType::EchoRequest),
            11 => Some(IcmpType::TimeExceeded),
            _ => None,
        }
    }
}

/// Echo request/reply header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoHeader {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
    pub identifier: u16,
    pub sequence: u16,
}

impl EchoHeader {
    pub fn parse(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < ICMP_HEADER_SIZE {
            return Err(Error::Parse("ICMP packet too short".into()));
        }
        Ok(Self {
            icmp_type: buffer[0],
            code: buffer[1],
            checksum: u16::from_be_bytes([buffer[2], buffer[3]]),
            identifier: u16::from_be_bytes([buffer[4], buffer[5]]),
            sequence: u16::from_be_bytes([buffer[6], buffer[7]]),
        })
    }

    pub fn message_type(&self) -> Option<IcmpType> {
        IcmpType::from_u8(self.icmp_type)
    }

    pub fn is_echo_request(&self) -> bool {
        self.icmp_type == IcmpType::EchoRequest as u8 && self.code == 0
    }

    /// Header of the matching echo reply. Only the type changes, so the
    /// checksum is patched in place instead of being recomputed over the
    /// payload.
    pub fn to_reply(&self) -> Self {
        let old = u16::from_be_bytes([self.icmp_type, self.code]);
        let new = u16::from_be_bytes([IcmpType::EchoReply as u8, self.code]);
        Self {
            icmp_type: IcmpType::EchoReply as u8,
            checksum: incremental_update(self.checksum, old, new),
            ..*self
        }
    }

    pub fn to_bytes(&self) -> [u8; ICMP_HEADER_SIZE] {
        let mut buf = [0u8; ICMP_HEADER_SIZE];
        buf[0] = self.icmp_type;
        buf[1] = self.code;
        buf[2..4].copy_from_slice(&self.checksum.to_be_bytes());
        buf[4..6].copy_from_slice(&self.identifier.to_be_bytes());
        buf[6..8].copy_from_slice(&self.sequence.to_be_bytes());
        buf
    }
}

/// Build a complete echo message with a fresh checksum.
pub fn build_echo(icmp_type: IcmpType, identifier: u16, sequence: u16, payload: &[u8]) -> Vec<u8> {
    let hdr = EchoHeader {
        icmp_type: icmp_type as u8,
        code: 0,
        checksum: 0,
        identifier,
        sequence,
    };
    let mut msg = hdr.to_bytes().to_vec();
    msg.extend_from_slice(payload);
    let sum = checksum::checksum(&msg);
    msg[2..4].copy_from_slice(&sum.to_be_bytes());
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_echo_request() {
        let msg = build_echo(IcmpType::EchoRequest, 0x1234, 1, &[0xaa, 0xbb]);
        let hdr = EchoHeader::parse(&msg).unwrap();
        assert!(hdr.is_echo_request());
        assert_eq!(hdr.message_type(), Some(IcmpType::EchoRequest));
        assert_eq!(hdr.identifier, 0x1234);
        assert_eq!(hdr.sequence, 1);
        assert_eq!(checksum::checksum(&msg), 0);
    }

    #[test]
    fn test_reply_checksum_matches_full_recompute() {
        let payload = [0xaa, 0xbb, 0x01, 0x02, 0x03];
        let request = build_echo(IcmpType::EchoRequest, 0x1234, 1, &payload);
        let expected = build_echo(IcmpType::EchoReply, 0x1234, 1, &payload);

        let reply = EchoHeader::parse(&request).unwrap().to_reply();
        assert_eq!(&reply.to_bytes()[..], &expected[..ICMP_HEADER_SIZE]);
    }

    #[test]
    fn test_too_short() {
        assert!(EchoHeader::parse(&[8, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_non_echo_type() {
        let mut msg = build_echo(IcmpType::EchoRequest, 1, 1, &[]);
        msg[0] = IcmpType::TimeExceeded as u8;
        let hdr = EchoHeader::parse(&msg).unwrap();
        assert!(!hdr.is_echo_request());
        assert_eq!(hdr.message_type(), Some(IcmpType::TimeExceeded));
    }
}
