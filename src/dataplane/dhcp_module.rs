//! DHCP module task
//!
//! Wraps the `DhcpClient` state machine: feeds it replies from UDP port 68,
//! ticks its timers, sends its messages as UDP datagrams through the IP
//! egress path and publishes the resulting binding as `HostState`.

use super::dhcp_client::{DhcpClient, DhcpClientAction, DhcpClientState};
use super::host::HostState;
use super::meta::{IpTxMeta, SourceAddr, UdpRxMeta};
use crate::protocol::dhcp::{DhcpHeader, DhcpMessageType, DHCP_CLIENT_PORT, DHCP_SERVER_PORT};
use crate::protocol::ethernet::MAX_FRAME_LEN;
use crate::protocol::ipv4::Protocol;
use crate::protocol::udp::UdpBuilder;
use crate::protocol::MacAddr;
use crate::stream::{FrameReader, FrameWriter};
use crate::telemetry::StackStats;
use crate::Result;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Resolution of the client's timers
pub const DHCP_TICK: Duration = Duration::from_secs(1);

pub struct DhcpModule {
    input: FrameReader<UdpRxMeta>,
    output: FrameWriter<IpTxMeta>,
    client: DhcpClient,
    host: watch::Sender<HostState>,
    stats: Arc<StackStats>,
    tick: Duration,
}

impl DhcpModule {
    pub fn new(
        input: FrameReader<UdpRxMeta>,
        output: FrameWriter<IpTxMeta>,
        client: DhcpClient,
        host: watch::Sender<HostState>,
        stats: Arc<StackStats>,
    ) -> Self {
        Self {
            input,
            output,
            client,
            host,
            stats,
            tick: DHCP_TICK,
        }
    }

    pub async fn run(mut self) {
        if let Err(e) = self.serve().await {
            debug!("DHCP: output closed: {}", e);
        }
        debug!("DHCP: module stopped");
    }

    async fn serve(&mut self) -> Result<()> {
        // The first tick fires immediately and starts discovery.
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = ticker.tick() => {
                    let action = self.client.tick(Instant::now());
                    self.apply(action).await?;
                }
                meta = self.input.next_frame() => match meta {
                    Some(meta) => self.handle_frame(meta).await?,
                    None => return Ok(()),
                },
            }
        }
    }

    async fn handle_frame(&mut self, meta: UdpRxMeta) -> Result<()> {
        let mut payload = Vec::with_capacity(meta.payload_len as usize);
        let read = self.input.read_to_end(&mut payload, MAX_FRAME_LEN).await;
        if read.is_err() || self.input.error() {
            debug!("DHCP: errored message from {}", meta.src_ip);
            self.stats.dhcp_malformed.inc();
            return Ok(());
        }

        let msg_type = match DhcpHeader::parse(&payload) {
            Ok(msg) => msg.message_type(),
            Err(e) => {
                debug!("DHCP: {} from {}", e, meta.src_ip);
                self.stats.dhcp_malformed.inc();
                return Ok(());
            }
        };
        self.stats.dhcp_received.inc();
        if msg_type == Some(DhcpMessageType::Nak) {
            self.stats.dhcp_naks.inc();
        }

        let now = Instant::now();
        let action = self.client.process_response(&payload, now);
        self.apply(action).await?;
        // A NAK leaves the client in INIT; restart without waiting a tick.
        if self.client.state() == DhcpClientState::Init {
            let action = self.client.tick(now);
            self.apply(action).await?;
        }
        Ok(())
    }

    async fn apply(&mut self, action: DhcpClientAction) -> Result<()> {
        match action {
            DhcpClientAction::SendPacket {
                packet,
                dst_ip,
                dst_mac,
                source,
            } => self.send(&packet, dst_ip, dst_mac, source).await?,
            DhcpClientAction::LeaseAcquired(lease) => {
                info!(
                    "DHCP: Bound to {}/{}",
                    lease.ip_addr,
                    lease.address().prefix_len()
                );
                self.stats.dhcp_leases.inc();
                self.host.send_modify(|host| {
                    host.address = Some(lease.address());
                    host.lease = Some(lease.info());
                });
            }
            DhcpClientAction::LeaseRenewed(lease) => {
                self.host.send_modify(|host| host.lease = Some(lease.info()));
            }
            DhcpClientAction::LeaseLost => {
                warn!("DHCP: Address released");
                self.host.send_modify(|host| {
                    host.address = None;
                    host.lease = None;
                });
            }
            DhcpClientAction::None => {}
        }

        let state = self.client.state();
        self.host.send_if_modified(|host| {
            if host.dhcp_state == Some(state) {
                return false;
            }
            host.dhcp_state = Some(state);
            true
        });
        Ok(())
    }

    async fn send(
        &mut self,
        packet: &[u8],
        dst_ip: Ipv4Addr,
        dst_mac: Option<MacAddr>,
        source: SourceAddr,
    ) -> Result<()> {
        let src_ip = match source {
            SourceAddr::Host => self.host.borrow().ip().unwrap_or(Ipv4Addr::UNSPECIFIED),
            SourceAddr::Unspecified => Ipv4Addr::UNSPECIFIED,
        };
        let datagram = UdpBuilder::new()
            .src_port(DHCP_CLIENT_PORT)
            .dst_port(DHCP_SERVER_PORT)
            .payload(packet)
            .build(src_ip, dst_ip);
        let meta = IpTxMeta {
            dst_ip,
            protocol: Protocol::Udp as u8,
            payload_len: datagram.len() as u16,
            source,
            checksum_src: Some(src_ip),
            dst_mac,
        };
        self.output.send_frame(meta, &datagram).await?;
        self.stats.dhcp_sent.inc();
        Ok(())
    }
}
