//! Stack assembly
//!
//! Builds every stage, connects them with bounded stream links and spawns
//! one task per stage:
//!
//! ```text
//! phy -> RX FIFO -> Ethernet -> ARP module
//!                            -> IPv4 -> trailer strip -> dispatch -> ICMP
//!                                                                -> DHCP
//!                                                                -> Port-I/O -> client FIFOs -> clients
//!
//! clients -> merge -> UDP egress -+
//! ICMP ------------------------- merge -> IPv4 -> resolver -+
//! DHCP --------------------------+                          |
//! ARP module ----------------------------------------------- merge -> Ethernet
//!     -> trailer pad -> TX FIFO -> phy
//! ```
//!
//! Shutdown is implicit: dropping the physical port and every client
//! interface closes the links, and each stage exits once its input ends.

use super::arp_module::ArpModule;
use super::arp_processor::ArpPendingQueue;
use super::arp_table::{ArpCache, ArpCacheReader, ArpTable};
use super::client::{port_splitter, ClientInterface, UdpEgress};
use super::dhcp_client::{DhcpClient, DhcpTimers};
use super::dhcp_module::DhcpModule;
use super::ethernet_header::{EthernetEgress, EthernetIngress};
use super::host::{host_channel, HostAddress, HostState};
use super::icmp_module::IcmpModule;
use super::ip_dispatch::IpDispatch;
use super::ip_header::{IpEgress, IpIngress};
use super::meta::ClientId;
use super::port_table::{self, PortTable, SharedPortTable};
use super::resolver::Resolver;
use super::trailer::{TrailerPad, TrailerStrip};
use crate::config::{parse_cidr, ClientConfig, Config, PendingPolicy, UnboundPolicy};
use crate::protocol::ethernet::MAX_FRAME_LEN;
use crate::protocol::MacAddr;
use crate::stream::{
    channel, FrameFifo, FrameReader, FrameWriter, Merger, OverflowPolicy, StreamRx,
};
use crate::telemetry::StackStats;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

/// How long a request may stay unanswered before ARP asks again
const ARP_RETRY: Duration = Duration::from_secs(3);
const ARP_AGING_INTERVAL: Duration = Duration::from_secs(1);
/// Outstanding resolution requests from the resolver to the ARP module
const ARP_REQUEST_QUEUE: usize = 64;

/// Name of the physical link in the interface statistics
pub const PHY_INTERFACE: &str = "phy";

/// Resolved settings of one stack instance
#[derive(Debug, Clone)]
pub struct StackConfig {
    pub mac: MacAddr,
    /// Static address; ignored while DHCP is enabled
    pub address: Option<HostAddress>,
    /// `None` disables the DHCP client
    pub dhcp: Option<DhcpTimers>,
    pub unbound_policy: UnboundPolicy,
    pub pending_timeout: Duration,
    pub pending_policy: PendingPolicy,
    pub max_pending: usize,
    pub arp_reachable: Duration,
    pub arp_stale: Duration,
    pub channel_depth: usize,
    pub rx_fifo_words: usize,
    pub tx_fifo_words: usize,
    pub client_fifo_words: usize,
    pub clients: Vec<ClientConfig>,
}

impl StackConfig {
    pub fn from_config(config: &Config) -> Result<Self> {
        let mac = config
            .host
            .mac
            .ok_or_else(|| Error::Config("host MAC address is not set".into()))?;

        let address = match &config.host.address {
            Some(cidr) => {
                let (ip, netmask) = parse_cidr(cidr)?;
                Some(HostAddress {
                    ip,
                    netmask,
                    gateway: config.host.gateway,
                })
            }
            None => None,
        };

        let dhcp = if config.dhcp.enabled {
            Some(DhcpTimers {
                renewal_fraction: config.dhcp.renewal_fraction,
                rebinding_fraction: config.dhcp.rebinding_fraction,
                retransmit_base: Duration::from_secs(config.dhcp.retransmit_base_secs),
                retransmit_max: Duration::from_secs(config.dhcp.retransmit_max_secs),
                max_retries: config.dhcp.max_retries,
            })
        } else {
            None
        };
        if dhcp.is_none() && address.is_none() {
            return Err(Error::Config(
                "DHCP is disabled and no static address is configured".into(),
            ));
        }

        Ok(Self {
            mac,
            address,
            dhcp,
            unbound_policy: config.host.unbound_policy,
            pending_timeout: Duration::from_millis(config.arp.pending_timeout_ms),
            pending_policy: config.arp.pending_policy,
            max_pending: config.arp.max_pending,
            arp_reachable: Duration::from_secs(config.arp.reachable_secs),
            arp_stale: Duration::from_secs(config.arp.stale_secs),
            channel_depth: config.stream.channel_depth.max(1),
            rx_fifo_words: config.stream.rx_fifo_words,
            tx_fifo_words: config.stream.tx_fifo_words,
            client_fifo_words: config.stream.client_fifo_words,
            clients: config.clients.clone(),
        })
    }

    /// Minimal DHCP configuration, mostly for tests
    pub fn new(mac: MacAddr) -> Self {
        let config = Config::default();
        Self {
            mac,
            address: None,
            dhcp: Some(DhcpTimers::default()),
            unbound_policy: config.host.unbound_policy,
            pending_timeout: Duration::from_millis(config.arp.pending_timeout_ms),
            pending_policy: config.arp.pending_policy,
            max_pending: config.arp.max_pending,
            arp_reachable: Duration::from_secs(config.arp.reachable_secs),
            arp_stale: Duration::from_secs(config.arp.stale_secs),
            channel_depth: config.stream.channel_depth,
            rx_fifo_words: config.stream.rx_fifo_words,
            tx_fifo_words: config.stream.tx_fifo_words,
            client_fifo_words: config.stream.client_fifo_words,
            clients: Vec::new(),
        }
    }
}

/// Raw Ethernet frames to and from the wire
pub struct PhysicalPort {
    tx: FrameWriter<()>,
    rx: FrameReader<()>,
}

impl PhysicalPort {
    /// Hand a received frame to the stack.
    pub async fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.tx.send_frame((), frame).await
    }

    /// Next frame the stack transmits; `None` after shutdown.
    pub async fn recv_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            self.rx.next_frame().await?;
            let mut frame = Vec::with_capacity(MAX_FRAME_LEN);
            if self.rx.read_to_end(&mut frame, MAX_FRAME_LEN).await.is_ok() {
                return Some(frame);
            }
        }
    }

    pub fn into_split(self) -> (FrameWriter<()>, FrameReader<()>) {
        (self.tx, self.rx)
    }
}

/// Observation and control side of a running stack
pub struct StackHandle {
    pub stats: Arc<StackStats>,
    pub host: watch::Receiver<HostState>,
    pub arp: ArpCacheReader,
    pub ports: SharedPortTable,
    tasks: Vec<JoinHandle<()>>,
}

impl StackHandle {
    pub fn host_state(&self) -> HostState {
        self.host.borrow().clone()
    }

    /// Wait until every stage has stopped.
    pub async fn join(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }

    pub fn abort(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

pub struct Stack;

impl Stack {
    /// Build and spawn all stages. Must be called inside a tokio runtime.
    pub fn spawn(config: StackConfig) -> (StackHandle, PhysicalPort, Vec<ClientInterface>) {
        let depth = config.channel_depth;
        let stats = Arc::new(StackStats::new());
        let phy_stats = stats.register_interface(PHY_INTERFACE);
        let mut tasks = Vec::new();

        // Host state: static address published up front, DHCP fills it in.
        let mut initial = HostState::new(config.mac);
        if config.dhcp.is_none() {
            initial.address = config.address;
        }
        let (host_tx, host_rx) = host_channel(initial);

        let mut table = PortTable::new();
        for client in &config.clients {
            table.add_client(client.port, client.source, client.remote, client.learn);
        }
        let ports = port_table::shared(table);

        let (cache, arp_reader) = ArpCache::new(ArpTable::new(
            config.arp_reachable,
            config.arp_stale,
            ARP_RETRY,
        ));
        let (arp_req_tx, arp_req_rx) = mpsc::channel(ARP_REQUEST_QUEUE);

        // Ingress
        let (phy_in_tx, phy_in_rx) = channel(depth);
        let (rx_fifo_tx, rx_fifo_rx) = channel(depth);
        let (arp_in_tx, arp_in_rx) = channel(depth);
        let (ip_in_tx, ip_in_rx) = channel(depth);
        let (ip_rx_tx, ip_rx_rx) = channel(depth);
        let (stripped_tx, stripped_rx) = channel(depth);
        let (icmp_in_tx, icmp_in_rx) = channel(depth);
        let (udp_in_tx, udp_in_rx) = channel(depth);

        // Egress
        let (icmp_out_tx, icmp_out_rx) = channel(depth);
        let (udp_merged_tx, udp_merged_rx) = channel(depth);
        let (udp_out_tx, udp_out_rx) = channel(depth);
        let (ip_tx_tx, ip_tx_rx) = channel(depth);
        let (route_tx, route_rx) = channel(depth);
        let (resolved_tx, resolved_rx) = channel(depth);
        let (arp_out_tx, arp_out_rx) = channel(depth);
        let (eth_tx_tx, eth_tx_rx) = channel(depth);
        let (pad_tx, pad_rx) = channel(depth);
        let (tx_fifo_tx, tx_fifo_rx) = channel(depth);
        let (phy_out_tx, phy_out_rx) = channel(depth);

        tasks.push(tokio::spawn(
            FrameFifo::new(
                "RX FIFO",
                phy_in_rx,
                rx_fifo_tx,
                config.rx_fifo_words,
                OverflowPolicy::DropFrame,
                stats.rx_fifo.clone(),
            )
            .run(),
        ));
        tasks.push(tokio::spawn(
            EthernetIngress::new(
                FrameReader::new(rx_fifo_rx),
                FrameWriter::new(arp_in_tx),
                FrameWriter::new(ip_in_tx),
                config.mac,
                stats.clone(),
                phy_stats.clone(),
            )
            .run(),
        ));
        tasks.push(tokio::spawn(
            ArpModule::new(
                FrameReader::new(arp_in_rx),
                FrameWriter::new(arp_out_tx),
                arp_req_rx,
                cache,
                host_rx.clone(),
                stats.clone(),
                ARP_AGING_INTERVAL,
            )
            .run(),
        ));
        tasks.push(tokio::spawn(
            IpIngress::new(
                FrameReader::new(ip_in_rx),
                FrameWriter::new(ip_rx_tx),
                host_rx.clone(),
                stats.clone(),
            )
            .run(),
        ));
        tasks.push(tokio::spawn(
            TrailerStrip::new(
                FrameReader::new(ip_rx_rx),
                FrameWriter::new(stripped_tx),
                stats.clone(),
            )
            .run(),
        ));

        let mut ip_egress_inputs: Vec<StreamRx<_>> = vec![icmp_out_rx];
        let dhcp_writer = match config.dhcp {
            Some(timers) => {
                let (dhcp_in_tx, dhcp_in_rx) = channel(depth);
                let (dhcp_out_tx, dhcp_out_rx) = channel(depth);
                ip_egress_inputs.push(dhcp_out_rx);
                tasks.push(tokio::spawn(
                    DhcpModule::new(
                        FrameReader::new(dhcp_in_rx),
                        FrameWriter::new(dhcp_out_tx),
                        DhcpClient::new(config.mac, timers),
                        host_tx,
                        stats.clone(),
                    )
                    .run(),
                ));
                Some(FrameWriter::new(dhcp_in_tx))
            }
            None => {
                if let Some(address) = config.address {
                    info!("Host: static address {}/{}", address.ip, address.prefix_len());
                }
                None
            }
        };
        ip_egress_inputs.push(udp_out_rx);

        tasks.push(tokio::spawn(
            IpDispatch::new(
                FrameReader::new(stripped_rx),
                FrameWriter::new(icmp_in_tx),
                dhcp_writer,
                FrameWriter::new(udp_in_tx),
                stats.clone(),
            )
            .run(),
        ));
        tasks.push(tokio::spawn(
            IcmpModule::new(
                FrameReader::new(icmp_in_rx),
                FrameWriter::new(icmp_out_tx),
                stats.clone(),
            )
            .run(),
        ));

        // Client interfaces
        let mut clients = Vec::with_capacity(config.clients.len());
        let mut client_outputs = Vec::with_capacity(config.clients.len());
        let mut client_inputs: Vec<StreamRx<_>> = Vec::with_capacity(config.clients.len());
        for (i, client) in config.clients.iter().enumerate() {
            // Each client drains through its own FIFO so a slow reader only
            // loses its own frames.
            let (fifo_in_tx, fifo_in_rx) = channel(depth);
            let (to_client_tx, to_client_rx) = channel(depth);
            let (from_client_tx, from_client_rx) = channel(depth);
            tasks.push(tokio::spawn(
                FrameFifo::new(
                    "Client FIFO",
                    fifo_in_rx,
                    to_client_tx,
                    config.client_fifo_words,
                    OverflowPolicy::DropFrame,
                    stats.register_fifo(&format!("{}_rx", client.name)),
                )
                .run(),
            ));
            client_outputs.push(FrameWriter::new(fifo_in_tx));
            client_inputs.push(from_client_rx);
            clients.push(ClientInterface::new(
                ClientId(i),
                client.name.clone(),
                FrameWriter::new(from_client_tx),
                FrameReader::new(to_client_rx),
                stats.register_interface(&client.name),
            ));
        }
        tasks.push(tokio::spawn(
            port_splitter(
                FrameReader::new(udp_in_rx),
                client_outputs,
                ports.clone(),
                stats.clone(),
            )
            .run(),
        ));
        tasks.push(tokio::spawn(
            Merger::new("Client merge", client_inputs, udp_merged_tx).run(),
        ));
        tasks.push(tokio::spawn(
            UdpEgress::new(
                FrameReader::new(udp_merged_rx),
                FrameWriter::new(udp_out_tx),
                ports.clone(),
                host_rx.clone(),
                stats.clone(),
            )
            .run(),
        ));

        tasks.push(tokio::spawn(
            Merger::new("IP merge", ip_egress_inputs, ip_tx_tx).run(),
        ));
        tasks.push(tokio::spawn(
            IpEgress::new(
                FrameReader::new(ip_tx_rx),
                FrameWriter::new(route_tx),
                host_rx.clone(),
                config.unbound_policy,
                stats.clone(),
            )
            .run(),
        ));
        tasks.push(tokio::spawn(
            Resolver::new(
                FrameReader::new(route_rx),
                FrameWriter::new(resolved_tx),
                arp_reader.clone(),
                arp_req_tx,
                ArpPendingQueue::new(config.max_pending, config.pending_timeout),
                config.pending_policy,
                stats.clone(),
            )
            .run(),
        ));
        tasks.push(tokio::spawn(
            Merger::new("Ethernet merge", vec![resolved_rx, arp_out_rx], eth_tx_tx).run(),
        ));
        tasks.push(tokio::spawn(
            EthernetEgress::new(
                FrameReader::new(eth_tx_rx),
                FrameWriter::new(pad_tx),
                config.mac,
                phy_stats,
            )
            .run(),
        ));
        tasks.push(tokio::spawn(
            TrailerPad::new(FrameReader::new(pad_rx), FrameWriter::new(tx_fifo_tx)).run(),
        ));
        tasks.push(tokio::spawn(
            FrameFifo::new(
                "TX FIFO",
                tx_fifo_rx,
                phy_out_tx,
                config.tx_fifo_words,
                OverflowPolicy::BackPressure,
                stats.tx_fifo.clone(),
            )
            .run(),
        ));

        info!(
            "Stack: {} up with {} client interface(s)",
            config.mac,
            clients.len()
        );

        let handle = StackHandle {
            stats,
            host: host_rx,
            arp: arp_reader,
            ports,
            tasks,
        };
        let phy = PhysicalPort {
            tx: FrameWriter::new(phy_in_tx),
            rx: FrameReader::new(phy_out_rx),
        };
        (handle, phy, clients)
    }
}
