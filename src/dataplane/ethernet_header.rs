//! Ethernet header stages
//!
//! Ingress strips the 14-byte header, filters on destination MAC and hands
//! the payload to the ARP or IPv4 path. Egress prepends the header with the
//! host MAC as source.

use super::meta::{EthRxMeta, EthTxMeta};
use crate::protocol::ethernet::{EthernetHeader, HEADER_LEN};
use crate::protocol::{EtherType, MacAddr};
use crate::stream::{FrameReader, FrameWriter};
use crate::telemetry::{InterfaceStats, StackStats};
use crate::Result;
use std::sync::Arc;
use tracing::debug;

pub struct EthernetIngress {
    input: FrameReader<()>,
    arp: FrameWriter<EthRxMeta>,
    ip: FrameWriter<EthRxMeta>,
    mac: MacAddr,
    stats: Arc<StackStats>,
    phy: Arc<InterfaceStats>,
}

impl EthernetIngress {
    pub fn new(
        input: FrameReader<()>,
        arp: FrameWriter<EthRxMeta>,
        ip: FrameWriter<EthRxMeta>,
        mac: MacAddr,
        stats: Arc<StackStats>,
        phy: Arc<InterfaceStats>,
    ) -> Self {
        Self {
            input,
            arp,
            ip,
            mac,
            stats,
            phy,
        }
    }

    pub async fn run(mut self) {
        while self.input.next_frame().await.is_some() {
            let mut buf = [0u8; HEADER_LEN];
            let read = self.input.read_exact(&mut buf).await;
            let header = match read.and_then(|()| EthernetHeader::parse(&buf)) {
                Ok(h) => h,
                Err(e) => {
                    let n = self.input.drain().await;
                    debug!("Ethernet: runt frame ({}, {} trailing bytes)", e, n);
                    self.stats.eth_runts.inc();
                    self.phy.rx_drops.inc();
                    continue;
                }
            };

            if header.dst_mac != self.mac && !header.dst_mac.is_broadcast() {
                self.stats.eth_filtered.inc();
                self.input.drain().await;
                continue;
            }

            let Some(ethertype) = header.known_ethertype() else {
                debug!(
                    "Ethernet: unknown EtherType 0x{:04x} from {}",
                    header.ethertype, header.src_mac
                );
                self.stats.eth_unknown_ethertype.inc();
                self.phy.rx_drops.inc();
                self.input.drain().await;
                continue;
            };

            let writer = match ethertype {
                EtherType::Arp => &mut self.arp,
                EtherType::Ipv4 => &mut self.ip,
            };
            writer.begin(EthRxMeta {
                src_mac: header.src_mac,
                dst_mac: header.dst_mac,
                ethertype,
            });
            let forwarded = match self.input.forward(writer, None).await {
                Ok(n) => n,
                Err(_) => break,
            };
            if writer.finish(self.input.error()).await.is_err() {
                break;
            }
            self.phy.record_rx(HEADER_LEN + forwarded);
        }
        debug!("Ethernet: ingress stopped");
    }
}

pub struct EthernetEgress {
    input: FrameReader<EthTxMeta>,
    output: FrameWriter<()>,
    mac: MacAddr,
    phy: Arc<InterfaceStats>,
}

impl EthernetEgress {
    pub fn new(
        input: FrameReader<EthTxMeta>,
        output: FrameWriter<()>,
        mac: MacAddr,
        phy: Arc<InterfaceStats>,
    ) -> Self {
        Self {
            input,
            output,
            mac,
            phy,
        }
    }

    pub async fn run(mut self) {
        while let Some(meta) = self.input.next_frame().await {
            match self.emit(meta).await {
                Ok(n) => self.phy.record_tx(HEADER_LEN + n),
                Err(_) => break,
            }
        }
        debug!("Ethernet: egress stopped");
    }

    async fn emit(&mut self, meta: EthTxMeta) -> Result<usize> {
        let header = EthernetHeader::new(meta.dst_mac, self.mac, meta.ethertype);
        self.output.begin(());
        self.output.write(&header.to_bytes()).await?;
        let n = self.input.forward(&mut self.output, None).await?;
        self.output.finish(self.input.error()).await?;
        Ok(n)
    }
}
