//! ARP module task
//!
//! Owns the ARP cache. Answers requests for the host address, learns
//! bindings from incoming traffic, sends one request per unresolved next
//! hop on behalf of the resolver, ages the cache, and announces the host
//! address with a gratuitous ARP whenever it changes.

use super::arp_processor::{process_arp, ArpAction};
use super::arp_table::ArpCache;
use super::host::HostState;
use super::meta::{EthRxMeta, EthTxMeta};
use crate::protocol::arp::{ArpPacket, ARP_PACKET_SIZE};
use crate::protocol::{EtherType, MacAddr};
use crate::stream::{FrameReader, FrameWriter};
use crate::telemetry::StackStats;
use crate::Result;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

pub struct ArpModule {
    input: FrameReader<EthRxMeta>,
    output: FrameWriter<EthTxMeta>,
    requests: mpsc::Receiver<Ipv4Addr>,
    cache: ArpCache,
    host: watch::Receiver<HostState>,
    stats: Arc<StackStats>,
    aging_interval: Duration,
    /// Address last announced with a gratuitous ARP
    announced: Option<Ipv4Addr>,
}

impl ArpModule {
    pub fn new(
        input: FrameReader<EthRxMeta>,
        output: FrameWriter<EthTxMeta>,
        requests: mpsc::Receiver<Ipv4Addr>,
        cache: ArpCache,
        host: watch::Receiver<HostState>,
        stats: Arc<StackStats>,
        aging_interval: Duration,
    ) -> Self {
        Self {
            input,
            output,
            requests,
            cache,
            host,
            stats,
            aging_interval,
            announced: None,
        }
    }

    /// Run until the ingress link closes.
    pub async fn run(mut self) {
        if let Err(e) = self.serve().await {
            debug!("ARP: output closed: {}", e);
        }
        debug!("ARP: module stopped");
    }

    async fn serve(&mut self) -> Result<()> {
        let mut aging = tokio::time::interval(self.aging_interval);
        aging.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut host_open = true;
        let mut requests_open = true;

        // A static address is known before the first change notification.
        self.announce_if_changed().await?;

        loop {
            tokio::select! {
                biased;
                changed = self.host.changed(), if host_open => {
                    if changed.is_err() {
                        host_open = false;
                    } else {
                        self.announce_if_changed().await?;
                    }
                }
                _ = aging.tick() => self.age(),
                ip = self.requests.recv(), if requests_open => match ip {
                    Some(ip) => self.send_request(ip).await?,
                    None => requests_open = false,
                },
                meta = self.input.next_frame() => match meta {
                    Some(meta) => self.handle_frame(meta).await?,
                    None => return Ok(()),
                },
            }
        }
    }

    fn host_snapshot(&self) -> (MacAddr, Option<Ipv4Addr>) {
        let host = self.host.borrow();
        (host.mac, host.ip())
    }

    async fn handle_frame(&mut self, meta: EthRxMeta) -> Result<()> {
        let mut buf = [0u8; ARP_PACKET_SIZE];
        let got = self.input.read(&mut buf).await;
        // Ethernet padding
        self.input.drain().await;

        if got < ARP_PACKET_SIZE || self.input.error() {
            debug!("ARP: short or errored frame from {}", meta.src_mac);
            self.stats.arp_malformed.inc();
            return Ok(());
        }
        let packet = match ArpPacket::parse(&buf) {
            Ok(p) => p,
            Err(e) => {
                debug!("ARP: dropping frame from {}: {}", meta.src_mac, e);
                self.stats.arp_malformed.inc();
                return Ok(());
            }
        };

        let (mac, ip) = self.host_snapshot();
        let now = Instant::now();
        let action = self
            .cache
            .update(|table| process_arp(&packet, table, ip, mac, now));
        self.stats.arp_table_size.set(self.cache.len());

        if let ArpAction::Reply(reply) = action {
            debug!(
                "ARP: Replying to {} ({}) for {}",
                packet.sender_ip, packet.sender_mac, packet.target_ip
            );
            self.emit(reply.target_mac, &reply).await?;
            self.stats.arp_replies_sent.inc();
        }
        Ok(())
    }

    /// Request `ip` unless a request is already outstanding.
    async fn send_request(&mut self, ip: Ipv4Addr) -> Result<()> {
        let now = Instant::now();
        if !self.cache.update(|table| table.mark_incomplete(ip, now)) {
            return Ok(());
        }
        let (mac, our_ip) = self.host_snapshot();
        // Unbound hosts probe with an unspecified sender address.
        let request = ArpPacket::request(mac, our_ip.unwrap_or(Ipv4Addr::UNSPECIFIED), ip);
        debug!("ARP: Requesting {}", ip);
        self.emit(MacAddr::BROADCAST, &request).await?;
        self.stats.arp_requests_sent.inc();
        Ok(())
    }

    async fn announce_if_changed(&mut self) -> Result<()> {
        let (mac, ip) = self.host_snapshot();
        if ip == self.announced {
            return Ok(());
        }
        self.announced = ip;
        if let Some(ip) = ip {
            info!("ARP: Announcing {} at {}", ip, mac);
            self.emit(MacAddr::BROADCAST, &ArpPacket::gratuitous(mac, ip))
                .await?;
            self.stats.arp_announcements_sent.inc();
        }
        Ok(())
    }

    fn age(&mut self) {
        let now = Instant::now();
        let removed = self.cache.update(|table| table.refresh_states(now));
        if removed > 0 {
            debug!("ARP: Aged out {} entries", removed);
        }
        self.stats.arp_table_size.set(self.cache.len());
    }

    async fn emit(&mut self, dst_mac: MacAddr, packet: &ArpPacket) -> Result<()> {
        let meta = EthTxMeta {
            dst_mac,
            ethertype: EtherType::Arp,
        };
        self.output.send_frame(meta, &packet.to_bytes()).await
    }
}
