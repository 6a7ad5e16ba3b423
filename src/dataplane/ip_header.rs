//! IPv4 header stages
//!
//! Ingress validates and strips the header (options included) and decides
//! whether the packet is addressed to this host. Egress prepends a fresh
//! 20-byte header and picks the next hop for link-layer resolution.

use super::host::{HostState, NextHop};
use super::meta::{EthRxMeta, IpRxMeta, IpTxMeta, RouteMeta, SourceAddr};
use crate::config::UnboundPolicy;
use crate::protocol::ipv4::{self, Ipv4Builder, Ipv4Header, Protocol, MAX_HEADER_SIZE};
use crate::protocol::MacAddr;
use crate::stream::{FrameReader, FrameWriter};
use crate::telemetry::StackStats;
use crate::Result;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

pub struct IpIngress {
    input: FrameReader<EthRxMeta>,
    output: FrameWriter<IpRxMeta>,
    host: watch::Receiver<HostState>,
    stats: Arc<StackStats>,
}

impl IpIngress {
    pub fn new(
        input: FrameReader<EthRxMeta>,
        output: FrameWriter<IpRxMeta>,
        host: watch::Receiver<HostState>,
        stats: Arc<StackStats>,
    ) -> Self {
        Self {
            input,
            output,
            host,
            stats,
        }
    }

    pub async fn run(mut self) {
        while let Some(meta) = self.input.next_frame().await {
            if self.handle_frame(meta).await.is_err() {
                break;
            }
        }
        debug!("IPv4: ingress stopped");
    }

    /// Returns an error only when the output link is gone.
    async fn handle_frame(&mut self, eth: EthRxMeta) -> Result<()> {
        let mut buf = [0u8; MAX_HEADER_SIZE];
        let header_len = match self.read_header(&mut buf).await {
            Some(len) => len,
            None => {
                self.stats.ip_malformed.inc();
                self.input.drain().await;
                return Ok(());
            }
        };

        let meta = {
            let header = match Ipv4Header::parse(&buf[..header_len]) {
                Ok(h) => h,
                Err(e) => {
                    debug!("IPv4: {}", e);
                    self.stats.ip_malformed.inc();
                    self.input.drain().await;
                    return Ok(());
                }
            };
            if !header.validate_checksum() {
                debug!("IPv4: bad header checksum from {}", header.src_addr());
                self.stats.ip_checksum_errors.inc();
                self.input.drain().await;
                return Ok(());
            }
            if header.is_fragment() {
                debug!("IPv4: fragment from {} dropped", header.src_addr());
                self.stats.ip_fragments.inc();
                self.input.drain().await;
                return Ok(());
            }
            IpRxMeta {
                src_mac: eth.src_mac,
                src_ip: header.src_addr(),
                dst_ip: header.dst_addr(),
                protocol: header.protocol(),
                payload_len: header.payload_len() as u16,
            }
        };

        if !self.accepts(&meta) {
            self.stats.ip_not_for_us.inc();
            self.input.drain().await;
            return Ok(());
        }

        self.output.begin(meta);
        self.input.forward(&mut self.output, None).await?;
        self.output.finish(self.input.error()).await
    }

    /// Read the fixed part, then any options announced by the IHL.
    async fn read_header(&mut self, buf: &mut [u8; MAX_HEADER_SIZE]) -> Option<usize> {
        self.input.read_exact(&mut buf[..1]).await.ok()?;
        let header_len = ipv4::header_len_from_first_byte(buf[0]).ok()?;
        self.input.read_exact(&mut buf[1..header_len]).await.ok()?;
        Some(header_len)
    }

    fn accepts(&self, meta: &IpRxMeta) -> bool {
        let host = self.host.borrow();
        match host.ip() {
            Some(ip) => meta.dst_ip == ip || host.is_broadcast(meta.dst_ip),
            // Offers may be unicast to the address being offered.
            None => {
                host.is_broadcast(meta.dst_ip) || meta.protocol == Protocol::Udp as u8
            }
        }
    }
}

pub struct IpEgress {
    input: FrameReader<IpTxMeta>,
    output: FrameWriter<RouteMeta>,
    host: watch::Receiver<HostState>,
    policy: UnboundPolicy,
    identification: u16,
    stats: Arc<StackStats>,
}

impl IpEgress {
    pub fn new(
        input: FrameReader<IpTxMeta>,
        output: FrameWriter<RouteMeta>,
        host: watch::Receiver<HostState>,
        policy: UnboundPolicy,
        stats: Arc<StackStats>,
    ) -> Self {
        Self {
            input,
            output,
            host,
            policy,
            identification: rand::random(),
            stats,
        }
    }

    pub async fn run(mut self) {
        while let Some(meta) = self.input.next_frame().await {
            if self.handle_frame(meta).await.is_err() {
                break;
            }
        }
        debug!("IPv4: egress stopped");
    }

    async fn handle_frame(&mut self, meta: IpTxMeta) -> Result<()> {
        let (src_ip, next_hop) = {
            let host = self.host.borrow();
            let src_ip = match (meta.source, host.ip()) {
                (SourceAddr::Unspecified, _) => Some(Ipv4Addr::UNSPECIFIED),
                (SourceAddr::Host, Some(ip)) => Some(ip),
                (SourceAddr::Host, None) => match self.policy {
                    UnboundPolicy::ZeroSource => Some(Ipv4Addr::UNSPECIFIED),
                    UnboundPolicy::Suppress => None,
                },
            };
            (src_ip, host.next_hop(meta.dst_ip))
        };

        let Some(src_ip) = src_ip else {
            debug!("IPv4: no address bound, dropping packet to {}", meta.dst_ip);
            self.stats.ip_unbound_suppressed.inc();
            self.input.drain().await;
            return Ok(());
        };
        if meta.checksum_src.is_some_and(|ip| ip != src_ip) {
            debug!(
                "IPv4: source changed to {} under a packet to {}, dropped",
                src_ip, meta.dst_ip
            );
            self.stats.ip_source_changed.inc();
            self.input.drain().await;
            return Ok(());
        }

        let route = match (meta.dst_mac, next_hop) {
            (Some(mac), _) => RouteMeta {
                next_hop: meta.dst_ip,
                dst_mac: Some(mac),
            },
            (None, NextHop::Broadcast) => RouteMeta {
                next_hop: meta.dst_ip,
                dst_mac: Some(MacAddr::BROADCAST),
            },
            (None, NextHop::Resolve(ip)) => RouteMeta {
                next_hop: ip,
                dst_mac: None,
            },
            (None, NextHop::Unreachable) => {
                debug!("IPv4: no route to {}", meta.dst_ip);
                self.stats.ip_no_route.inc();
                self.input.drain().await;
                return Ok(());
            }
        };

        let header = Ipv4Builder::new()
            .identification(self.identification)
            .dont_fragment(true)
            .ttl(ipv4::DEFAULT_TTL)
            .protocol(meta.protocol)
            .src_addr(src_ip)
            .dst_addr(meta.dst_ip)
            .payload_len(meta.payload_len as usize)
            .build();
        self.identification = self.identification.wrapping_add(1);

        let declared = meta.payload_len as usize;
        self.output.begin(route);
        self.output.write(&header).await?;
        let n = self
            .input
            .forward(&mut self.output, Some(declared))
            .await?;
        self.output
            .finish(n < declared || self.input.error())
            .await
    }
}
