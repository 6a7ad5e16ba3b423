//! Protocol dispatch of incoming IPv4 payloads
//!
//! ICMP goes to the echo responder. UDP loses its header here and is sent
//! to the DHCP client (server port 67 to client port 68, DHCP enabled) or
//! to the port splitter. The egress direction is a plain `Merger`.

use super::meta::{IpRxMeta, UdpRxMeta};
use crate::protocol::dhcp::{DHCP_CLIENT_PORT, DHCP_SERVER_PORT};
use crate::protocol::ipv4::Protocol;
use crate::protocol::udp::{UdpHeader, HEADER_SIZE};
use crate::stream::{FrameReader, FrameWriter};
use crate::telemetry::StackStats;
use crate::Result;
use std::sync::Arc;
use tracing::debug;

pub struct IpDispatch {
    input: FrameReader<IpRxMeta>,
    icmp: FrameWriter<IpRxMeta>,
    dhcp: Option<FrameWriter<UdpRxMeta>>,
    udp: FrameWriter<UdpRxMeta>,
    stats: Arc<StackStats>,
}

impl IpDispatch {
    /// `dhcp` is `None` when the DHCP client is disabled; DHCP replies then
    /// take the normal port routing.
    pub fn new(
        input: FrameReader<IpRxMeta>,
        icmp: FrameWriter<IpRxMeta>,
        dhcp: Option<FrameWriter<UdpRxMeta>>,
        udp: FrameWriter<UdpRxMeta>,
        stats: Arc<StackStats>,
    ) -> Self {
        Self {
            input,
            icmp,
            dhcp,
            udp,
            stats,
        }
    }

    pub async fn run(mut self) {
        while let Some(meta) = self.input.next_frame().await {
            let result = match Protocol::from_u8(meta.protocol) {
                Some(Protocol::Icmp) => self.to_icmp(meta).await,
                Some(Protocol::Udp) => self.to_udp(meta).await,
                None => {
                    debug!(
                        "IPv4: protocol {} from {} not handled",
                        meta.protocol, meta.src_ip
                    );
                    self.stats.ip_unknown_protocol.inc();
                    self.input.drain().await;
                    Ok(())
                }
            };
            if result.is_err() {
                break;
            }
        }
        debug!("IPv4: dispatch stopped");
    }

    async fn to_icmp(&mut self, meta: IpRxMeta) -> Result<()> {
        self.icmp.begin(meta);
        self.input.forward(&mut self.icmp, None).await?;
        self.icmp.finish(self.input.error()).await
    }

    async fn to_udp(&mut self, meta: IpRxMeta) -> Result<()> {
        let mut buf = [0u8; HEADER_SIZE];
        let header = match self.input.read_exact(&mut buf).await {
            Ok(()) => UdpHeader::parse(&buf),
            Err(e) => Err(e),
        };
        let header = match header {
            Ok(h) if h.length <= meta.payload_len => h,
            Ok(h) => {
                debug!(
                    "UDP: length {} exceeds IP payload {} from {}",
                    h.length, meta.payload_len, meta.src_ip
                );
                self.stats.udp_malformed.inc();
                self.input.drain().await;
                return Ok(());
            }
            Err(e) => {
                debug!("UDP: {} from {}", e, meta.src_ip);
                self.stats.udp_malformed.inc();
                self.input.drain().await;
                return Ok(());
            }
        };

        let udp_meta = UdpRxMeta {
            src_mac: meta.src_mac,
            src_ip: meta.src_ip,
            dst_ip: meta.dst_ip,
            src_port: header.src_port,
            dst_port: header.dst_port,
            payload_len: header.payload_len() as u16,
        };
        let is_dhcp = header.src_port == DHCP_SERVER_PORT && header.dst_port == DHCP_CLIENT_PORT;
        let writer = match self.dhcp.as_mut() {
            Some(dhcp) if is_dhcp => dhcp,
            _ => &mut self.udp,
        };

        let declared = header.payload_len();
        writer.begin(udp_meta);
        let n = self.input.forward(writer, Some(declared)).await?;
        writer.finish(n < declared || self.input.error()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::udp::UdpBuilder;
    use crate::protocol::MacAddr;
    use crate::stream::channel;
    use std::net::Ipv4Addr;

    const PEER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 9);
    const OUR_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

    struct Harness {
        input: FrameWriter<IpRxMeta>,
        icmp: FrameReader<IpRxMeta>,
        dhcp: FrameReader<UdpRxMeta>,
        udp: FrameReader<UdpRxMeta>,
        stats: Arc<StackStats>,
    }

    fn make_dispatch() -> Harness {
        let (in_tx, in_rx) = channel(64);
        let (icmp_tx, icmp_rx) = channel(64);
        let (dhcp_tx, dhcp_rx) = channel(64);
        let (udp_tx, udp_rx) = channel(64);
        let stats = Arc::new(StackStats::new());
        tokio::spawn(
            IpDispatch::new(
                FrameReader::new(in_rx),
                FrameWriter::new(icmp_tx),
                Some(FrameWriter::new(dhcp_tx)),
                FrameWriter::new(udp_tx),
                stats.clone(),
            )
            .run(),
        );
        Harness {
            input: FrameWriter::new(in_tx),
            icmp: FrameReader::new(icmp_rx),
            dhcp: FrameReader::new(dhcp_rx),
            udp: FrameReader::new(udp_rx),
            stats,
        }
    }

    fn make_meta(protocol: u8, payload_len: usize) -> IpRxMeta {
        IpRxMeta {
            src_mac: MacAddr([2, 0, 0, 0, 0, 9]),
            src_ip: PEER_IP,
            dst_ip: OUR_IP,
            protocol,
            payload_len: payload_len as u16,
        }
    }

    fn make_datagram(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
        UdpBuilder::new()
            .src_port(src_port)
            .dst_port(dst_port)
            .payload(payload)
            .build(PEER_IP, OUR_IP)
    }

    #[tokio::test]
    async fn test_dispatch_by_protocol_and_port() {
        let mut h = make_dispatch();
        let app = make_datagram(4000, 5000, b"hello");
        let dhcp = make_datagram(67, 68, &[0xdd; 12]);

        h.input.send_frame(make_meta(17, app.len()), &app).await.unwrap();
        h.input.send_frame(make_meta(17, dhcp.len()), &dhcp).await.unwrap();
        h.input.send_frame(make_meta(1, 8), &[8; 8]).await.unwrap();

        let meta = h.udp.next_frame().await.unwrap();
        assert_eq!(meta.src_port, 4000);
        assert_eq!(meta.dst_port, 5000);
        assert_eq!(meta.payload_len, 5);
        let mut payload = Vec::new();
        h.udp.read_to_end(&mut payload, 100).await.unwrap();
        assert_eq!(payload, b"hello");

        let meta = h.dhcp.next_frame().await.unwrap();
        assert_eq!(meta.src_port, 67);
        assert_eq!(h.dhcp.drain().await, 12);

        let meta = h.icmp.next_frame().await.unwrap();
        assert_eq!(meta.protocol, 1);
        assert_eq!(h.icmp.drain().await, 8);
    }

    #[tokio::test]
    async fn test_dispatch_drops_malformed() {
        let mut h = make_dispatch();
        // UDP length larger than the IP payload
        let mut bad = make_datagram(4000, 5000, b"hello");
        bad[5] = 40;
        h.input.send_frame(make_meta(17, bad.len()), &bad).await.unwrap();
        // Header cut short
        h.input.send_frame(make_meta(17, 4), &[0; 4]).await.unwrap();
        // TCP
        h.input.send_frame(make_meta(6, 20), &[0; 20]).await.unwrap();
        drop(h.input);

        assert!(h.udp.next_frame().await.is_none());
        assert_eq!(h.stats.udp_malformed.get(), 2);
        assert_eq!(h.stats.ip_unknown_protocol.get(), 1);
    }
}
