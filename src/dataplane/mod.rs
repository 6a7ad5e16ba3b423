//! Data plane components
//!
//! Every stage of the stack runs as its own task on stream links: header
//! parsing and building, ARP resolution, the DHCP client, the ICMP echo
//! responder and the Port-I/O routing of client datagrams.

mod arp_module;
mod arp_processor;
mod arp_table;
mod client;
mod dhcp_client;
mod dhcp_module;
mod ethernet_header;
mod host;
mod icmp_module;
mod ip_dispatch;
mod ip_header;
mod meta;
mod port_table;
mod resolver;
mod stack;
mod trailer;

pub use arp_module::ArpModule;
pub use arp_processor::{process_arp, ArpAction, ArpPendingQueue};
pub use arp_table::{ArpCache, ArpCacheReader, ArpState, ArpTable, Resolution};
pub use client::{port_splitter, ClientInterface, ClientReceiver, ClientSender, Datagram, UdpEgress};
pub use dhcp_client::{DhcpClient, DhcpClientAction, DhcpClientState, DhcpLease, DhcpTimers};
pub use dhcp_module::DhcpModule;
pub use ethernet_header::{EthernetEgress, EthernetIngress};
pub use host::{host_channel, HostAddress, HostState, LeaseInfo, NextHop};
pub use icmp_module::IcmpModule;
pub use ip_dispatch::IpDispatch;
pub use ip_header::{IpEgress, IpIngress};
pub use meta::{
    ClientId, ClientRxMeta, EthRxMeta, EthTxMeta, IpRxMeta, IpTxMeta, RouteMeta, SourceAddr,
    UdpRxMeta,
};
pub use port_table::{PortTable, SharedPortTable};
pub use resolver::Resolver;
pub use stack::{PhysicalPort, Stack, StackConfig, StackHandle, PHY_INTERFACE};
pub use trailer::{TrailerPad, TrailerStrip};
