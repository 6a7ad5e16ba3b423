//! DHCPv4 client implementation
//!
//! RFC 2131 client state machine. It is driven by the DHCP module with an
//! explicit `now`, so every timer runs on the tokio clock.

use super::host::{HostAddress, LeaseInfo};
use super::meta::SourceAddr;
use crate::protocol::dhcp::{
    options, BootpOp, DhcpBuilder, DhcpHeader, DhcpMessageType, FLAG_BROADCAST,
};
use crate::protocol::MacAddr;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Lease time assumed when the server omits option 51
const DEFAULT_LEASE_SECS: u32 = 86400;

const REQUESTED_OPTIONS: &[u8] = &[
    options::SUBNET_MASK,
    options::ROUTER,
    options::LEASE_TIME,
    options::RENEWAL_TIME,
    options::REBINDING_TIME,
];

/// DHCP client state per RFC 2131
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpClientState {
    /// No lease, nothing outstanding
    Init,
    /// DISCOVER sent, waiting for OFFER
    Selecting,
    /// REQUEST sent, waiting for ACK
    Requesting,
    /// Lease acquired and valid
    Bound,
    /// T1 expired, renewing unicast
    Renewing,
    /// T2 expired, rebinding broadcast
    Rebinding,
}

/// Timer settings of the client
#[derive(Debug, Clone, Copy)]
pub struct DhcpTimers {
    /// T1 as a fraction of the lease when the server gives none
    pub renewal_fraction: f64,
    /// T2 as a fraction of the lease when the server gives none
    pub rebinding_fraction: f64,
    /// First retransmission timeout, doubled per retry
    pub retransmit_base: Duration,
    pub retransmit_max: Duration,
    /// Retransmissions before discovery starts over
    pub max_retries: u8,
}

impl Default for DhcpTimers {
    fn default() -> Self {
        Self {
            renewal_fraction: 0.5,
            rebinding_fraction: 0.875,
            retransmit_base: Duration::from_secs(4),
            retransmit_max: Duration::from_secs(64),
            max_retries: 10,
        }
    }
}

/// Information acquired from DHCP server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DhcpLease {
    pub ip_addr: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub gateway: Option<Ipv4Addr>,
    /// DHCP server that granted the lease
    pub server_id: Ipv4Addr,
    pub lease_time: Duration,
    /// T1
    pub renewal_time: Duration,
    /// T2
    pub rebinding_time: Duration,
    pub obtained_at: Instant,
}

impl DhcpLease {
    pub fn is_renewal_due(&self, now: Instant) -> bool {
        now >= self.obtained_at + self.renewal_time
    }

    pub fn is_rebinding_due(&self, now: Instant) -> bool {
        now >= self.obtained_at + self.rebinding_time
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.obtained_at + self.lease_time
    }

    pub fn address(&self) -> HostAddress {
        HostAddress {
            ip: self.ip_addr,
            netmask: self.subnet_mask,
            gateway: self.gateway,
        }
    }

    pub fn info(&self) -> LeaseInfo {
        LeaseInfo {
            server_id: self.server_id,
            lease_time: self.lease_time,
            renewal_time: self.renewal_time,
            rebinding_time: self.rebinding_time,
        }
    }
}

/// What the DHCP module has to do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhcpClientAction {
    /// Send a DHCP message from port 68 to port 67
    SendPacket {
        packet: Vec<u8>,
        dst_ip: Ipv4Addr,
        /// `None` lets ARP resolve the server (unicast renewal)
        dst_mac: Option<MacAddr>,
        source: SourceAddr,
    },
    /// New address bound
    LeaseAcquired(DhcpLease),
    /// Same binding, timers restarted
    LeaseRenewed(DhcpLease),
    /// Address must no longer be used
    LeaseLost,
    None,
}

/// DHCPv4 client for the single host interface
#[derive(Debug)]
pub struct DhcpClient {
    mac_addr: MacAddr,
    timers: DhcpTimers,
    state: DhcpClientState,
    /// Transaction ID of the current exchange
    xid: u32,
    lease: Option<DhcpLease>,
    /// Last DISCOVER/REQUEST sent (for retransmission)
    last_sent: Option<Instant>,
    retries: u8,
    /// Server and address from the OFFER being requested
    offered_server: Option<Ipv4Addr>,
    offered_ip: Option<Ipv4Addr>,
}

impl DhcpClient {
    pub fn new(mac_addr: MacAddr, timers: DhcpTimers) -> Self {
        Self {
            mac_addr,
            timers,
            state: DhcpClientState::Init,
            xid: rand::random(),
            lease: None,
            last_sent: None,
            retries: 0,
            offered_server: None,
            offered_ip: None,
        }
    }

    pub fn state(&self) -> DhcpClientState {
        self.state
    }

    pub fn lease(&self) -> Option<&DhcpLease> {
        self.lease.as_ref()
    }

    pub fn xid(&self) -> u32 {
        self.xid
    }

    /// Start or restart discovery.
    pub fn start(&mut self, now: Instant) -> DhcpClientAction {
        info!("DHCP: Starting discovery on {}", self.mac_addr);
        self.xid = rand::random();
        self.retries = 0;
        self.offered_server = None;
        self.offered_ip = None;
        self.state = DhcpClientState::Selecting;
        self.last_sent = Some(now);
        debug!("DHCP: Sending DISCOVER (xid=0x{:08x})", self.xid);
        self.broadcast(self.build_discover(), SourceAddr::Unspecified)
    }

    fn broadcast(&self, packet: Vec<u8>, source: SourceAddr) -> DhcpClientAction {
        DhcpClientAction::SendPacket {
            packet,
            dst_ip: Ipv4Addr::BROADCAST,
            dst_mac: Some(MacAddr::BROADCAST),
            source,
        }
    }

    fn build_discover(&self) -> Vec<u8> {
        DhcpBuilder::new()
            .op(BootpOp::Request)
            .xid(self.xid)
            .flags(FLAG_BROADCAST)
            .chaddr(self.mac_addr)
            .message_type(DhcpMessageType::Discover)
            .parameter_request_list(REQUESTED_OPTIONS)
            .build()
    }

    /// REQUEST answering an OFFER (SELECTING flavor of RFC 2131 4.3.2)
    fn build_request(&self) -> Vec<u8> {
        let mut builder = DhcpBuilder::new()
            .op(BootpOp::Request)
            .xid(self.xid)
            .flags(FLAG_BROADCAST)
            .chaddr(self.mac_addr)
            .message_type(DhcpMessageType::Request);
        if let Some(ip) = self.offered_ip {
            builder = builder.requested_ip(ip);
        }
        if let Some(server) = self.offered_server {
            builder = builder.server_id(server);
        }
        builder.parameter_request_list(REQUESTED_OPTIONS).build()
    }

    /// REQUEST extending a lease: ciaddr set, no server id
    fn build_extend(&self, ip: Ipv4Addr) -> Vec<u8> {
        DhcpBuilder::new()
            .op(BootpOp::Request)
            .xid(self.xid)
            .ciaddr(ip)
            .chaddr(self.mac_addr)
            .message_type(DhcpMessageType::Request)
            .parameter_request_list(REQUESTED_OPTIONS)
            .build()
    }

    /// Process a received DHCP message (UDP payload).
    pub fn process_response(&mut self, dhcp_payload: &[u8], now: Instant) -> DhcpClientAction {
        let msg = match DhcpHeader::parse(dhcp_payload) {
            Ok(m) => m,
            Err(e) => {
                debug!("DHCP: Failed to parse response: {}", e);
                return DhcpClientAction::None;
            }
        };

        if msg.op() != BootpOp::Reply as u8 {
            return DhcpClientAction::None;
        }
        if msg.xid() != self.xid {
            debug!(
                "DHCP: Ignoring response with wrong xid (got 0x{:08x}, expected 0x{:08x})",
                msg.xid(),
                self.xid
            );
            return DhcpClientAction::None;
        }
        if msg.client_mac() != self.mac_addr {
            debug!("DHCP: Ignoring response for {}", msg.client_mac());
            return DhcpClientAction::None;
        }
        let Some(msg_type) = msg.message_type() else {
            debug!("DHCP: Response missing message type");
            return DhcpClientAction::None;
        };

        debug!("DHCP: Received {:?} in state {:?}", msg_type, self.state);

        match (self.state, msg_type) {
            (DhcpClientState::Selecting, DhcpMessageType::Offer) => self.handle_offer(&msg, now),
            (DhcpClientState::Requesting, DhcpMessageType::Ack) => self.handle_ack(&msg, now),
            (
                DhcpClientState::Renewing | DhcpClientState::Rebinding,
                DhcpMessageType::Ack,
            ) => self.handle_renew_ack(&msg, now),
            (
                DhcpClientState::Requesting
                | DhcpClientState::Renewing
                | DhcpClientState::Rebinding,
                DhcpMessageType::Nak,
            ) => self.handle_nak(),
            _ => {
                debug!("DHCP: Unexpected {:?} in state {:?}", msg_type, self.state);
                DhcpClientAction::None
            }
        }
    }

    fn handle_offer(&mut self, msg: &DhcpHeader, now: Instant) -> DhcpClientAction {
        let offered_ip = msg.yiaddr();
        if offered_ip.is_unspecified() {
            debug!("DHCP: OFFER without an address");
            return DhcpClientAction::None;
        }
        let server_id = msg.server_id();
        info!("DHCP: Received OFFER for {} from {:?}", offered_ip, server_id);

        self.offered_ip = Some(offered_ip);
        self.offered_server = server_id;
        self.state = DhcpClientState::Requesting;
        self.retries = 0;
        self.last_sent = Some(now);
        debug!("DHCP: Sending REQUEST for {}", offered_ip);
        self.broadcast(self.build_request(), SourceAddr::Unspecified)
    }

    fn handle_ack(&mut self, msg: &DhcpHeader, now: Instant) -> DhcpClientAction {
        let Some(lease) = self.parse_lease(msg, now) else {
            return DhcpClientAction::None;
        };
        info!(
            "DHCP: Lease acquired: {} (lease_time={}s, T1={}s, T2={}s)",
            lease.ip_addr,
            lease.lease_time.as_secs(),
            lease.renewal_time.as_secs(),
            lease.rebinding_time.as_secs()
        );
        self.state = DhcpClientState::Bound;
        self.retries = 0;
        self.lease = Some(lease);
        DhcpClientAction::LeaseAcquired(lease)
    }

    fn handle_renew_ack(&mut self, msg: &DhcpHeader, now: Instant) -> DhcpClientAction {
        let Some(lease) = self.parse_lease(msg, now) else {
            return DhcpClientAction::None;
        };
        let changed = self.lease.map(|l| l.address()) != Some(lease.address());
        info!(
            "DHCP: Lease renewed: {} (lease_time={}s)",
            lease.ip_addr,
            lease.lease_time.as_secs()
        );
        self.state = DhcpClientState::Bound;
        self.retries = 0;
        self.lease = Some(lease);
        if changed {
            DhcpClientAction::LeaseAcquired(lease)
        } else {
            DhcpClientAction::LeaseRenewed(lease)
        }
    }

    fn parse_lease(&self, msg: &DhcpHeader, now: Instant) -> Option<DhcpLease> {
        let ip_addr = msg.yiaddr();
        if ip_addr.is_unspecified() {
            debug!("DHCP: ACK without an address");
            return None;
        }

        let subnet_mask = msg
            .find_option_ip(options::SUBNET_MASK)
            .unwrap_or(Ipv4Addr::new(255, 255, 255, 0));
        let gateway = msg.find_option_ip_list(options::ROUTER).first().copied();
        let server_id = msg
            .server_id()
            .or(self.offered_server)
            .or(self.lease.map(|l| l.server_id))
            .unwrap_or(Ipv4Addr::UNSPECIFIED);

        let lease_secs = msg
            .find_option_u32(options::LEASE_TIME)
            .unwrap_or(DEFAULT_LEASE_SECS);
        let lease_time = Duration::from_secs(lease_secs as u64);
        let rebinding_time = msg
            .find_option_u32(options::REBINDING_TIME)
            .map(|s| Duration::from_secs(s as u64))
            .unwrap_or_else(|| lease_time.mul_f64(self.timers.rebinding_fraction))
            .min(lease_time);
        let renewal_time = msg
            .find_option_u32(options::RENEWAL_TIME)
            .map(|s| Duration::from_secs(s as u64))
            .unwrap_or_else(|| lease_time.mul_f64(self.timers.renewal_fraction))
            .min(rebinding_time);

        Some(DhcpLease {
            ip_addr,
            subnet_mask,
            gateway,
            server_id,
            lease_time,
            renewal_time,
            rebinding_time,
            obtained_at: now,
        })
    }

    /// Back to INIT; the next tick restarts discovery.
    fn handle_nak(&mut self) -> DhcpClientAction {
        warn!("DHCP: Received NAK in state {:?}, back to INIT", self.state);
        self.state = DhcpClientState::Init;
        self.last_sent = None;
        match self.lease.take() {
            Some(_) => DhcpClientAction::LeaseLost,
            None => DhcpClientAction::None,
        }
    }

    /// Check timers and retransmit. Called periodically and after every
    /// processed response.
    pub fn tick(&mut self, now: Instant) -> DhcpClientAction {
        match self.state {
            DhcpClientState::Init => self.start(now),

            DhcpClientState::Selecting | DhcpClientState::Requesting => {
                if !self.retransmit_due(now) {
                    return DhcpClientAction::None;
                }
                self.retries += 1;
                if self.retries > self.timers.max_retries {
                    warn!("DHCP: Max retries exceeded, restarting discovery");
                    return self.start(now);
                }
                self.last_sent = Some(now);
                if self.state == DhcpClientState::Selecting {
                    debug!("DHCP: Resending DISCOVER (retry {})", self.retries);
                    self.broadcast(self.build_discover(), SourceAddr::Unspecified)
                } else {
                    debug!("DHCP: Resending REQUEST (retry {})", self.retries);
                    self.broadcast(self.build_request(), SourceAddr::Unspecified)
                }
            }

            DhcpClientState::Bound | DhcpClientState::Renewing | DhcpClientState::Rebinding => {
                let Some(lease) = self.lease else {
                    self.state = DhcpClientState::Init;
                    return DhcpClientAction::None;
                };
                if lease.is_expired(now) {
                    warn!("DHCP: Lease on {} expired", lease.ip_addr);
                    self.lease = None;
                    self.state = DhcpClientState::Init;
                    self.last_sent = None;
                    return DhcpClientAction::LeaseLost;
                }
                match self.state {
                    DhcpClientState::Bound if lease.is_renewal_due(now) => {
                        self.start_extend(DhcpClientState::Renewing, lease, now)
                    }
                    DhcpClientState::Renewing if lease.is_rebinding_due(now) => {
                        self.start_extend(DhcpClientState::Rebinding, lease, now)
                    }
                    DhcpClientState::Renewing | DhcpClientState::Rebinding
                        if self.retransmit_due(now) =>
                    {
                        self.retries = self.retries.saturating_add(1);
                        self.last_sent = Some(now);
                        debug!(
                            "DHCP: Resending {:?} REQUEST (retry {})",
                            self.state, self.retries
                        );
                        self.extend_request(lease)
                    }
                    _ => DhcpClientAction::None,
                }
            }
        }
    }

    fn start_extend(
        &mut self,
        state: DhcpClientState,
        lease: DhcpLease,
        now: Instant,
    ) -> DhcpClientAction {
        info!("DHCP: Entering {:?} for {}", state, lease.ip_addr);
        self.state = state;
        self.xid = rand::random();
        self.retries = 0;
        self.last_sent = Some(now);
        self.extend_request(lease)
    }

    /// Renewal goes unicast to the server, rebinding is broadcast.
    fn extend_request(&self, lease: DhcpLease) -> DhcpClientAction {
        let packet = self.build_extend(lease.ip_addr);
        if self.state == DhcpClientState::Renewing && !lease.server_id.is_unspecified() {
            DhcpClientAction::SendPacket {
                packet,
                dst_ip: lease.server_id,
                dst_mac: None,
                source: SourceAddr::Host,
            }
        } else {
            self.broadcast(packet, SourceAddr::Host)
        }
    }

    fn retransmit_due(&self, now: Instant) -> bool {
        self.last_sent
            .map_or(true, |last| now.duration_since(last) >= self.retransmit_timeout())
    }

    /// Exponential backoff: base, 2x base, 4x base... up to the cap.
    fn retransmit_timeout(&self) -> Duration {
        let multiplier = 1u32 << self.retries.min(6);
        (self.timers.retransmit_base * multiplier).min(self.timers.retransmit_max)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const CLIENT_MAC: MacAddr = MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    pub(crate) const OFFERED_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 100);
    pub(crate) const SERVER_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);

    fn make_client() -> DhcpClient {
        DhcpClient::new(CLIENT_MAC, DhcpTimers::default())
    }

    pub(crate) fn make_reply(xid: u32, msg_type: DhcpMessageType) -> DhcpBuilder {
        DhcpBuilder::new()
            .op(BootpOp::Reply)
            .xid(xid)
            .chaddr(CLIENT_MAC)
            .message_type(msg_type)
            .server_id(SERVER_IP)
    }

    pub(crate) fn make_offer(xid: u32) -> Vec<u8> {
        make_reply(xid, DhcpMessageType::Offer)
            .yiaddr(OFFERED_IP)
            .build()
    }

    pub(crate) fn make_ack(xid: u32, lease_time: u32) -> Vec<u8> {
        make_reply(xid, DhcpMessageType::Ack)
            .yiaddr(OFFERED_IP)
            .subnet_mask(Ipv4Addr::new(255, 255, 255, 0))
            .router(&[SERVER_IP])
            .lease_time(lease_time)
            .build()
    }

    fn sent_type(action: &DhcpClientAction) -> Option<DhcpMessageType> {
        match action {
            DhcpClientAction::SendPacket { packet, .. } => {
                DhcpHeader::parse(packet).ok()?.message_type()
            }
            _ => None,
        }
    }

    fn bind(client: &mut DhcpClient, now: Instant, lease_time: u32) {
        client.start(now);
        client.process_response(&make_offer(client.xid()), now);
        let action = client.process_response(&make_ack(client.xid(), lease_time), now);
        assert!(matches!(action, DhcpClientAction::LeaseAcquired(_)));
    }

    #[test]
    fn test_client_initial_state() {
        let client = make_client();
        assert_eq!(client.state(), DhcpClientState::Init);
        assert!(client.lease().is_none());
    }

    #[test]
    fn test_start_sends_discover() {
        let mut client = make_client();
        let action = client.start(Instant::now());

        match &action {
            DhcpClientAction::SendPacket {
                dst_ip,
                dst_mac,
                source,
                packet,
            } => {
                assert_eq!(*dst_ip, Ipv4Addr::BROADCAST);
                assert_eq!(*dst_mac, Some(MacAddr::BROADCAST));
                assert_eq!(*source, SourceAddr::Unspecified);
                let dhcp = DhcpHeader::parse(packet).unwrap();
                assert!(dhcp.is_broadcast());
                assert_eq!(dhcp.client_mac(), CLIENT_MAC);
            }
            _ => panic!("Expected SendPacket action"),
        }
        assert_eq!(sent_type(&action), Some(DhcpMessageType::Discover));
        assert_eq!(client.state(), DhcpClientState::Selecting);
    }

    #[test]
    fn test_offer_transitions_to_requesting() {
        let mut client = make_client();
        let now = Instant::now();
        client.start(now);

        let action = client.process_response(&make_offer(client.xid()), now);
        assert_eq!(sent_type(&action), Some(DhcpMessageType::Request));
        if let DhcpClientAction::SendPacket { packet, .. } = &action {
            let dhcp = DhcpHeader::parse(packet).unwrap();
            assert_eq!(dhcp.find_option_ip(options::REQUESTED_IP), Some(OFFERED_IP));
            assert_eq!(dhcp.server_id(), Some(SERVER_IP));
        }
        assert_eq!(client.state(), DhcpClientState::Requesting);
    }

    #[test]
    fn test_ack_transitions_to_bound() {
        let mut client = make_client();
        let now = Instant::now();
        client.start(now);
        client.process_response(&make_offer(client.xid()), now);

        let action = client.process_response(&make_ack(client.xid(), 3600), now);
        match action {
            DhcpClientAction::LeaseAcquired(lease) => {
                assert_eq!(lease.ip_addr, OFFERED_IP);
                assert_eq!(lease.address().prefix_len(), 24);
                assert_eq!(lease.gateway, Some(SERVER_IP));
                assert_eq!(lease.renewal_time, Duration::from_secs(1800));
                assert_eq!(lease.rebinding_time, Duration::from_secs(3150));
            }
            _ => panic!("Expected LeaseAcquired action"),
        }
        assert_eq!(client.state(), DhcpClientState::Bound);
        assert!(client.lease().is_some());
    }

    #[test]
    fn test_server_timers_take_precedence() {
        let mut client = make_client();
        let now = Instant::now();
        client.start(now);
        client.process_response(&make_offer(client.xid()), now);
        let ack = make_reply(client.xid(), DhcpMessageType::Ack)
            .yiaddr(OFFERED_IP)
            .lease_time(1000)
            .renewal_time(100)
            .rebinding_time(200)
            .build();
        client.process_response(&ack, now);
        let lease = client.lease().unwrap();
        assert_eq!(lease.renewal_time, Duration::from_secs(100));
        assert_eq!(lease.rebinding_time, Duration::from_secs(200));
    }

    #[test]
    fn test_nak_returns_to_init() {
        let mut client = make_client();
        let now = Instant::now();
        client.start(now);
        client.process_response(&make_offer(client.xid()), now);

        let nak = make_reply(client.xid(), DhcpMessageType::Nak).build();
        assert_eq!(client.process_response(&nak, now), DhcpClientAction::None);
        assert_eq!(client.state(), DhcpClientState::Init);

        // Discovery restarts on the next tick.
        let action = client.tick(now);
        assert_eq!(sent_type(&action), Some(DhcpMessageType::Discover));
        assert_eq!(client.state(), DhcpClientState::Selecting);
    }

    #[test]
    fn test_wrong_xid_ignored() {
        let mut client = make_client();
        let now = Instant::now();
        client.start(now);

        let action = client.process_response(&make_offer(client.xid().wrapping_add(1)), now);
        assert_eq!(action, DhcpClientAction::None);
        assert_eq!(client.state(), DhcpClientState::Selecting);
    }

    #[test]
    fn test_retransmit_backoff() {
        let mut client = make_client();
        let start = Instant::now();
        client.start(start);

        assert_eq!(client.tick(start + Duration::from_secs(3)), DhcpClientAction::None);
        let action = client.tick(start + Duration::from_secs(4));
        assert_eq!(sent_type(&action), Some(DhcpMessageType::Discover));
        // Second retry waits 8 s.
        assert_eq!(client.tick(start + Duration::from_secs(11)), DhcpClientAction::None);
        let action = client.tick(start + Duration::from_secs(12));
        assert_eq!(sent_type(&action), Some(DhcpMessageType::Discover));
    }

    #[test]
    fn test_renew_rebind_expire() {
        let mut client = make_client();
        let start = Instant::now();
        bind(&mut client, start, 1000);

        assert_eq!(client.tick(start + Duration::from_secs(499)), DhcpClientAction::None);

        // T1: unicast renewal to the server
        let action = client.tick(start + Duration::from_secs(500));
        match &action {
            DhcpClientAction::SendPacket {
                dst_ip,
                dst_mac,
                source,
                packet,
            } => {
                assert_eq!(*dst_ip, SERVER_IP);
                assert_eq!(*dst_mac, None);
                assert_eq!(*source, SourceAddr::Host);
                let dhcp = DhcpHeader::parse(packet).unwrap();
                assert_eq!(dhcp.ciaddr(), OFFERED_IP);
            }
            _ => panic!("Expected unicast REQUEST"),
        }
        assert_eq!(client.state(), DhcpClientState::Renewing);

        // T2: broadcast rebinding
        let action = client.tick(start + Duration::from_secs(875));
        match &action {
            DhcpClientAction::SendPacket { dst_ip, .. } => {
                assert_eq!(*dst_ip, Ipv4Addr::BROADCAST)
            }
            _ => panic!("Expected broadcast REQUEST"),
        }
        assert_eq!(client.state(), DhcpClientState::Rebinding);

        let action = client.tick(start + Duration::from_secs(1000));
        assert_eq!(action, DhcpClientAction::LeaseLost);
        assert_eq!(client.state(), DhcpClientState::Init);
        assert!(client.lease().is_none());
    }

    #[test]
    fn test_renew_ack_keeps_binding() {
        let mut client = make_client();
        let start = Instant::now();
        bind(&mut client, start, 1000);
        let later = start + Duration::from_secs(500);
        client.tick(later);

        let action = client.process_response(&make_ack(client.xid(), 1000), later);
        assert!(matches!(action, DhcpClientAction::LeaseRenewed(_)));
        assert_eq!(client.state(), DhcpClientState::Bound);
        assert_eq!(client.lease().unwrap().obtained_at, later);
    }

    #[test]
    fn test_nak_while_renewing_loses_lease() {
        let mut client = make_client();
        let start = Instant::now();
        bind(&mut client, start, 1000);
        client.tick(start + Duration::from_secs(500));

        let nak = make_reply(client.xid(), DhcpMessageType::Nak).build();
        let action = client.process_response(&nak, start + Duration::from_secs(501));
        assert_eq!(action, DhcpClientAction::LeaseLost);
        assert_eq!(client.state(), DhcpClientState::Init);
    }
}
