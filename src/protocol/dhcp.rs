//! DHCP protocol - RFC 2131, 2132
//!
//! DHCPv4 message parsing and building for the client side of the stack.
//! Server-side builder methods exist so OFFER/ACK/NAK messages can be
//! produced in tests.

use super::MacAddr;
use crate::{Error, Result};
use std::net::Ipv4Addr;

/// DHCP server port (bootps)
pub const DHCP_SERVER_PORT: u16 = 67;

/// DHCP client port (bootpc)
pub const DHCP_CLIENT_PORT: u16 = 68;

/// Fixed header size (before options)
pub const DHCP_HEADER_SIZE: usize = 236;

/// Magic cookie marking start of options
pub const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

/// Minimum packet size (header + magic cookie + end option)
pub const MIN_PACKET_SIZE: usize = DHCP_HEADER_SIZE + 4 + 1;

/// Broadcast bit of the flags field
pub const FLAG_BROADCAST: u16 = 0x8000;

/// BOOTP operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BootpOp {
    Request = 1,
    Reply = 2,
}

impl BootpOp {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(BootpOp::Request),
            2 => Some(BootpOp::Reply),
            _ => None,
        }
    }
}

/// DHCP message types (Option 53)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DhcpMessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl DhcpMessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(DhcpMessageType::Discover),
            2 => Some(DhcpMessageType::Offer),
            3 => Some(DhcpMessageType::Request),
            4 => Some(DhcpMessageType::Decline),
            5 => Some(DhcpMessageType::Ack),
            6 => Some(DhcpMessageType::Nak),
            7 => Some(DhcpMessageType::Release),
            8 => Some(DhcpMessageType::Inform),
            _ => None,
        }
    }
}

/// DHCP option codes
pub mod options {
    pub const PAD: u8 = 0;
    pub const SUBNET_MASK: u8 = 1;
    pub const ROUTER: u8 = 3;
    pub const REQUESTED_IP: u8 = 50;
    pub const LEASE_TIME: u8 = 51;
    pub const MESSAGE_TYPE: u8 = 53;
    pub const SERVER_ID: u8 = 54;
    pub const PARAMETER_REQUEST: u8 = 55;
    pub const RENEWAL_TIME: u8 = 58;
    pub const REBINDING_TIME: u8 = 59;
    pub const END: u8 = 255;
}

fn ip_at(buffer: &[u8], at: usize) -> Ipv4Addr {
    Ipv4Addr::new(buffer[at], buffer[at + 1], buffer[at + 2], buffer[at + 3])
}

/// Parsed DHCP message (zero-copy reference)
#[derive(Debug)]
pub struct DhcpHeader<'a> {
    buffer: &'a [u8],
}

impl<'a> DhcpHeader<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < MIN_PACKET_SIZE {
            return Err(Error::Parse("DHCP message too short".into()));
        }
        if buffer[236..240] != MAGIC_COOKIE {
            return Err(Error::Parse("Invalid DHCP magic cookie".into()));
        }
        Ok(Self { buffer })
    }

    /// Operation code (1=request, 2=reply)
    pub fn op(&self) -> u8 {
        self.buffer[0]
    }

    /// Transaction ID
    pub fn xid(&self) -> u32 {
        u32::from_be_bytes([
            self.buffer[4],
            self.buffer[5],
            self.buffer[6],
            self.buffer[7],
        ])
    }

    /// Flags (bit 15 = broadcast)
    pub fn flags(&self) -> u16 {
        u16::from_be_bytes([self.buffer[10], self.buffer[11]])
    }

    pub fn is_broadcast(&self) -> bool {
        self.flags() & FLAG_BROADCAST != 0
    }

    /// Client IP address (ciaddr)
    pub fn ciaddr(&self) -> Ipv4Addr {
        ip_at(self.buffer, 12)
    }

    /// Your IP address (yiaddr) - assigned to client
    pub fn yiaddr(&self) -> Ipv4Addr {
        ip_at(self.buffer, 16)
    }

    /// Server IP address (siaddr)
    pub fn siaddr(&self) -> Ipv4Addr {
        ip_at(self.buffer, 20)
    }

    /// Client MAC address (first 6 bytes of chaddr)
    pub fn client_mac(&self) -> MacAddr {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.buffer[28..34]);
        MacAddr(mac)
    }

    /// Options section (after magic cookie)
    pub fn options_raw(&self) -> &'a [u8] {
        &self.buffer[240..]
    }

    pub fn message_type(&self) -> Option<DhcpMessageType> {
        self.find_option(options::MESSAGE_TYPE)
            .and_then(|data| data.first().copied())
            .and_then(DhcpMessageType::from_u8)
    }

    /// Server identifier (Option 54)
    pub fn server_id(&self) -> Option<Ipv4Addr> {
        self.find_option_ip(options::SERVER_ID)
    }

    /// First address of an address-valued option
    pub fn find_option_ip(&self, code: u8) -> Option<Ipv4Addr> {
        self.find_option_ip_list(code).into_iter().next()
    }

    /// All addresses of an address-list option (e.g. Router)
    pub fn find_option_ip_list(&self, code: u8) -> Vec<Ipv4Addr> {
        self.find_option(code)
            .map(|data| {
                data.chunks_exact(4)
                    .map(|c| Ipv4Addr::new(c[0], c[1], c[2], c[3]))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 32-bit option value (lease, T1, T2)
    pub fn find_option_u32(&self, code: u8) -> Option<u32> {
        let data = self.find_option(code)?;
        let bytes: [u8; 4] = data.get(..4)?.try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }

    /// Option data by code (without code and length)
    pub fn find_option(&self, code: u8) -> Option<&'a [u8]> {
        self.iter_options()
            .find(|opt| opt.code == code)
            .map(|opt| opt.data)
    }

    pub fn iter_options(&self) -> DhcpOptionIterator<'a> {
        DhcpOptionIterator {
            data: self.options_raw(),
            pos: 0,
        }
    }
}

/// A single DHCP option
#[derive(Debug, Clone)]
pub struct DhcpOption<'a> {
    pub code: u8,
    pub data: &'a [u8],
}

/// Iterator over DHCP options; stops at END or at a truncated option
pub struct DhcpOptionIterator<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for DhcpOptionIterator<'a> {
    type Item = DhcpOption<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let code = *self.data.get(self.pos)?;
            match code {
                options::PAD => self.pos += 1,
                options::END => return None,
                _ => {
                    let len = *self.data.get(self.pos + 1)? as usize;
                    let start = self.pos + 2;
                    let data = self.data.get(start..start + len)?;
                    self.pos = start + len;
                    return Some(DhcpOption { code, data });
                }
            }
        }
    }
}

/// DHCP message builder
#[derive(Debug, Clone)]
pub struct DhcpBuilder {
    op: u8,
    xid: u32,
    flags: u16,
    ciaddr: Ipv4Addr,
    yiaddr: Ipv4Addr,
    siaddr: Ipv4Addr,
    chaddr: [u8; 16],
    options: Vec<u8>,
}

impl DhcpBuilder {
    pub fn new() -> Self {
        Self {
            op: BootpOp::Request as u8,
            xid: 0,
            flags: 0,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: [0u8; 16],
            options: Vec::new(),
        }
    }

    pub fn op(mut self, op: BootpOp) -> Self {
        self.op = op as u8;
        self
    }

    pub fn xid(mut self, xid: u32) -> Self {
        self.xid = xid;
        self
    }

    pub fn flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    pub fn chaddr(mut self, mac: MacAddr) -> Self {
        self.chaddr = [0u8; 16];
        self.chaddr[..6].copy_from_slice(&mac.0);
        self
    }

    /// Client IP address (set while renewing/rebinding)
    pub fn ciaddr(mut self, ip: Ipv4Addr) -> Self {
        self.ciaddr = ip;
        self
    }

    /// Assigned IP address (yiaddr)
    pub fn yiaddr(mut self, ip: Ipv4Addr) -> Self {
        self.yiaddr = ip;
        self
    }

    pub fn siaddr(mut self, ip: Ipv4Addr) -> Self {
        self.siaddr = ip;
        self
    }

    pub fn message_type(mut self, msg_type: DhcpMessageType) -> Self {
        self.add_option(options::MESSAGE_TYPE, &[msg_type as u8]);
        self
    }

    /// Requested IP address (Option 50)
    pub fn requested_ip(mut self, ip: Ipv4Addr) -> Self {
        self.add_option(options::REQUESTED_IP, &ip.octets());
        self
    }

    /// Server identifier (Option 54)
    pub fn server_id(mut self, ip: Ipv4Addr) -> Self {
        self.add_option(options::SERVER_ID, &ip.octets());
        self
    }

    /// Parameter request list (Option 55)
    pub fn parameter_request_list(mut self, codes: &[u8]) -> Self {
        self.add_option(options::PARAMETER_REQUEST, codes);
        self
    }

    /// Subnet mask (Option 1)
    pub fn subnet_mask(mut self, mask: Ipv4Addr) -> Self {
        self.add_option(options::SUBNET_MASK, &mask.octets());
        self
    }

    /// Router/gateway list (Option 3)
    pub fn router(mut self, routers: &[Ipv4Addr]) -> Self {
        let data: Vec<u8> = routers.iter().flat_map(|r| r.octets()).collect();
        self.add_option(options::ROUTER, &data);
        self
    }

    /// Lease time in seconds (Option 51)
    pub fn lease_time(mut self, seconds: u32) -> Self {
        self.add_option(options::LEASE_TIME, &seconds.to_be_bytes());
        self
    }

    /// Renewal time T1 in seconds (Option 58)
    pub fn renewal_time(mut self, seconds: u32) -> Self {
        self.add_option(options::RENEWAL_TIME, &seconds.to_be_bytes());
        self
    }

    /// Rebinding time T2 in seconds (Option 59)
    pub fn rebinding_time(mut self, seconds: u32) -> Self {
        self.add_option(options::REBINDING_TIME, &seconds.to_be_bytes());
        self
    }

    fn add_option(&mut self, code: u8, data: &[u8]) {
        self.options.push(code);
        self.options.push(data.len() as u8);
        self.options.extend_from_slice(data);
    }

    /// Build the message, padded to the 300-byte BOOTP minimum.
    pub fn build(mut self) -> Vec<u8> {
        self.options.push(options::END);

        let options_len = self.options.len();
        let total_len = (DHCP_HEADER_SIZE + 4 + options_len).max(300);
        let mut buffer = vec![0u8; total_len];

        buffer[0] = self.op;
        // Ethernet, 6-byte hardware address, no hops
        buffer[1] = 1;
        buffer[2] = 6;
        buffer[4..8].copy_from_slice(&self.xid.to_be_bytes());
        buffer[10..12].copy_from_slice(&self.flags.to_be_bytes());
        buffer[12..16].copy_from_slice(&self.ciaddr.octets());
        buffer[16..20].copy_from_slice(&self.yiaddr.octets());
        buffer[20..24].copy_from_slice(&self.siaddr.octets());
        buffer[28..44].copy_from_slice(&self.chaddr);
        buffer[236..240].copy_from_slice(&MAGIC_COOKIE);
        buffer[240..240 + options_len].copy_from_slice(&self.options);

        buffer
    }
}

impl Default for DhcpBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIENT_MAC: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);

    fn make_discover() -> Vec<u8> {
        DhcpBuilder::new()
            .xid(0x12345678)
            .flags(FLAG_BROADCAST)
            .chaddr(CLIENT_MAC)
            .message_type(DhcpMessageType::Discover)
            .parameter_request_list(&[options::SUBNET_MASK, options::ROUTER])
            .build()
    }

    fn make_ack() -> Vec<u8> {
        let server = Ipv4Addr::new(192, 168, 1, 1);
        DhcpBuilder::new()
            .op(BootpOp::Reply)
            .xid(0xabcdef00)
            .chaddr(CLIENT_MAC)
            .yiaddr(Ipv4Addr::new(192, 168, 1, 100))
            .siaddr(server)
            .message_type(DhcpMessageType::Ack)
            .server_id(server)
            .subnet_mask(Ipv4Addr::new(255, 255, 255, 0))
            .router(&[server, Ipv4Addr::new(192, 168, 1, 254)])
            .lease_time(86400)
            .renewal_time(43200)
            .rebinding_time(75600)
            .build()
    }

    #[test]
    fn test_parse_discover() {
        let packet = make_discover();
        assert_eq!(packet.len(), 300);
        let header = DhcpHeader::parse(&packet).unwrap();

        assert_eq!(BootpOp::from_u8(header.op()), Some(BootpOp::Request));
        assert_eq!(header.xid(), 0x12345678);
        assert!(header.is_broadcast());
        assert_eq!(header.client_mac(), CLIENT_MAC);
        assert_eq!(header.ciaddr(), Ipv4Addr::UNSPECIFIED);
        assert_eq!(header.message_type(), Some(DhcpMessageType::Discover));
        assert_eq!(
            header.find_option(options::PARAMETER_REQUEST),
            Some(&[1u8, 3][..])
        );
    }

    #[test]
    fn test_parse_ack_options() {
        let packet = make_ack();
        let header = DhcpHeader::parse(&packet).unwrap();

        assert_eq!(header.message_type(), Some(DhcpMessageType::Ack));
        assert_eq!(header.yiaddr(), Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(header.siaddr(), Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(header.server_id(), Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(
            header.find_option_ip(options::SUBNET_MASK),
            Some(Ipv4Addr::new(255, 255, 255, 0))
        );
        assert_eq!(header.find_option_ip_list(options::ROUTER).len(), 2);
        assert_eq!(header.find_option_u32(options::LEASE_TIME), Some(86400));
        assert_eq!(header.find_option_u32(options::RENEWAL_TIME), Some(43200));
        assert_eq!(header.find_option_u32(options::REBINDING_TIME), Some(75600));
        assert_eq!(header.find_option_u32(options::REQUESTED_IP), None);
    }

    #[test]
    fn test_parse_too_short() {
        assert!(DhcpHeader::parse(&[0u8; 100]).is_err());
    }

    #[test]
    fn test_parse_invalid_magic() {
        let mut packet = make_discover();
        packet[236] = 0;
        assert!(DhcpHeader::parse(&packet).is_err());
    }

    #[test]
    fn test_option_iterator_skips_pad_and_stops_on_truncation() {
        let mut packet = make_discover();
        // Rewrite options: PAD, type=DISCOVER, then a truncated option.
        let opts = [0u8, 53, 1, 1, 51, 4, 0, 0];
        packet[240..240 + opts.len()].copy_from_slice(&opts);
        packet.truncate(240 + opts.len());
        packet.push(0);
        let header = DhcpHeader::parse(&packet).unwrap();

        let found: Vec<u8> = header.iter_options().map(|o| o.code).collect();
        assert_eq!(found, vec![53]);
        assert_eq!(header.find_option_u32(options::LEASE_TIME), None);
    }

    #[test]
    fn test_renewal_request_fields() {
        let packet = DhcpBuilder::new()
            .xid(7)
            .chaddr(CLIENT_MAC)
            .ciaddr(Ipv4Addr::new(192, 168, 1, 100))
            .message_type(DhcpMessageType::Request)
            .build();
        let header = DhcpHeader::parse(&packet).unwrap();
        assert_eq!(header.ciaddr(), Ipv4Addr::new(192, 168, 1, 100));
        assert!(!header.is_broadcast());
        assert_eq!(header.find_option_ip(options::REQUESTED_IP), None);
    }
}
