//! Host addressing state
//!
//! The DHCP module (or the static configuration) is the only writer. Every
//! other stage holds a `watch::Receiver<HostState>` and reads a consistent
//! snapshot per frame.

use super::dhcp_client::DhcpClientState;
use crate::protocol::MacAddr;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::sync::watch;

/// Bound IPv4 address of the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostAddress {
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Option<Ipv4Addr>,
}

impl HostAddress {
    pub fn prefix_len(&self) -> u8 {
        u32::from(self.netmask).count_ones() as u8
    }

    /// Destination lies in our subnet
    pub fn is_local(&self, dst: Ipv4Addr) -> bool {
        let mask = u32::from(self.netmask);
        u32::from(dst) & mask == u32::from(self.ip) & mask
    }

    pub fn subnet_broadcast(&self) -> Ipv4Addr {
        let mask = u32::from(self.netmask);
        Ipv4Addr::from(u32::from(self.ip) | !mask)
    }
}

/// Lease timing as granted by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseInfo {
    pub server_id: Ipv4Addr,
    pub lease_time: Duration,
    pub renewal_time: Duration,
    pub rebinding_time: Duration,
}

/// Where the link-layer destination of an outgoing packet comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextHop {
    /// Broadcast MAC, no resolution
    Broadcast,
    /// Resolve this address through ARP
    Resolve(Ipv4Addr),
    /// Off-link destination and no gateway
    Unreachable,
}

/// Snapshot published to all stages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostState {
    pub mac: MacAddr,
    pub address: Option<HostAddress>,
    /// `None` when addressing is static
    pub dhcp_state: Option<DhcpClientState>,
    pub lease: Option<LeaseInfo>,
}

impl HostState {
    pub fn new(mac: MacAddr) -> Self {
        Self {
            mac,
            address: None,
            dhcp_state: None,
            lease: None,
        }
    }

    pub fn ip(&self) -> Option<Ipv4Addr> {
        self.address.map(|a| a.ip)
    }

    pub fn is_bound(&self) -> bool {
        self.address.is_some()
    }

    /// Limited broadcast, or the subnet broadcast once bound
    pub fn is_broadcast(&self, dst: Ipv4Addr) -> bool {
        dst == Ipv4Addr::BROADCAST
            || self
                .address
                .is_some_and(|a| a.prefix_len() < 31 && dst == a.subnet_broadcast())
    }

    pub fn next_hop(&self, dst: Ipv4Addr) -> NextHop {
        if self.is_broadcast(dst) {
            return NextHop::Broadcast;
        }
        match self.address {
            Some(a) if a.is_local(dst) => NextHop::Resolve(dst),
            Some(a) => a
                .gateway
                .map(NextHop::Resolve)
                .unwrap_or(NextHop::Unreachable),
            // Nothing is known about the link yet; try the destination.
            None => NextHop::Resolve(dst),
        }
    }
}

/// Create the host state channel.
pub fn host_channel(initial: HostState) -> (watch::Sender<HostState>, watch::Receiver<HostState>) {
    watch::channel(initial)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bound() -> HostState {
        let mut host = HostState::new(MacAddr([2, 0, 0, 0, 0, 1]));
        host.address = Some(HostAddress {
            ip: Ipv4Addr::new(192, 168, 1, 100),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: Some(Ipv4Addr::new(192, 168, 1, 1)),
        });
        host
    }

    #[test]
    fn test_subnet_helpers() {
        let host = make_bound();
        let addr = host.address.unwrap();
        assert_eq!(addr.prefix_len(), 24);
        assert_eq!(addr.subnet_broadcast(), Ipv4Addr::new(192, 168, 1, 255));
        assert!(addr.is_local(Ipv4Addr::new(192, 168, 1, 7)));
        assert!(!addr.is_local(Ipv4Addr::new(192, 168, 2, 7)));
    }

    #[test]
    fn test_next_hop() {
        let host = make_bound();
        assert_eq!(
            host.next_hop(Ipv4Addr::new(192, 168, 1, 7)),
            NextHop::Resolve(Ipv4Addr::new(192, 168, 1, 7))
        );
        assert_eq!(
            host.next_hop(Ipv4Addr::new(8, 8, 8, 8)),
            NextHop::Resolve(Ipv4Addr::new(192, 168, 1, 1))
        );
        assert_eq!(host.next_hop(Ipv4Addr::BROADCAST), NextHop::Broadcast);
        assert_eq!(
            host.next_hop(Ipv4Addr::new(192, 168, 1, 255)),
            NextHop::Broadcast
        );
    }

    #[test]
    fn test_next_hop_without_gateway() {
        let mut host = make_bound();
        if let Some(a) = host.address.as_mut() {
            a.gateway = None;
        }
        assert_eq!(host.next_hop(Ipv4Addr::new(8, 8, 8, 8)), NextHop::Unreachable);
    }

    #[test]
    fn test_unbound_host() {
        let host = HostState::new(MacAddr::ZERO);
        assert!(!host.is_bound());
        assert_eq!(host.ip(), None);
        assert!(host.is_broadcast(Ipv4Addr::BROADCAST));
        assert!(!host.is_broadcast(Ipv4Addr::new(192, 168, 1, 255)));
        assert_eq!(
            host.next_hop(Ipv4Addr::new(10, 0, 0, 1)),
            NextHop::Resolve(Ipv4Addr::new(10, 0, 0, 1))
        );
    }
}
