//! Client interfaces and the UDP stages around them
//!
//! Ingress: the port splitter picks the client for each datagram from the
//! Port-I/O table and learns egress peers. Egress: client streams are
//! merged and `UdpEgress` wraps each payload in a UDP datagram addressed
//! from the same table.

use super::host::HostState;
use super::meta::{ClientId, ClientRxMeta, IpTxMeta, SourceAddr, UdpRxMeta};
use super::port_table::{self, SharedPortTable};
use crate::protocol::ipv4::Protocol;
use crate::protocol::udp::{UdpBuilder, MAX_PAYLOAD};
use crate::stream::{FrameReader, FrameWriter, Route, Splitter};
use crate::telemetry::{InterfaceStats, StackStats};
use crate::Result;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// A datagram delivered to a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub src_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub payload: Vec<u8>,
}

/// Sending half of a client interface
pub struct ClientSender {
    id: ClientId,
    tx: FrameWriter<ClientId>,
    stats: Arc<InterfaceStats>,
}

impl ClientSender {
    /// Queue one datagram payload for the client's egress destination.
    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.tx.send_frame(self.id, payload).await?;
        self.stats.record_tx(payload.len());
        Ok(())
    }
}

/// Receiving half of a client interface
pub struct ClientReceiver {
    rx: FrameReader<ClientRxMeta>,
    stats: Arc<InterfaceStats>,
}

impl ClientReceiver {
    /// Next intact datagram; `None` once the stack shuts down.
    pub async fn recv(&mut self) -> Option<Datagram> {
        loop {
            let meta = self.rx.next_frame().await?;
            let mut payload = Vec::new();
            let read = self.rx.read_to_end(&mut payload, MAX_PAYLOAD).await;
            if read.is_err() || self.rx.error() {
                self.stats.rx_drops.inc();
                continue;
            }
            self.stats.record_rx(payload.len());
            return Some(Datagram {
                src_ip: meta.src_ip,
                src_port: meta.src_port,
                dst_port: meta.dst_port,
                payload,
            });
        }
    }
}

/// One UDP-payload stream pair handed to the application
pub struct ClientInterface {
    name: String,
    sender: ClientSender,
    receiver: ClientReceiver,
}

impl ClientInterface {
    pub fn new(
        id: ClientId,
        name: String,
        tx: FrameWriter<ClientId>,
        rx: FrameReader<ClientRxMeta>,
        stats: Arc<InterfaceStats>,
    ) -> Self {
        Self {
            name,
            sender: ClientSender {
                id,
                tx,
                stats: stats.clone(),
            },
            receiver: ClientReceiver { rx, stats },
        }
    }

    pub fn id(&self) -> ClientId {
        self.sender.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.sender.send(payload).await
    }

    pub async fn recv(&mut self) -> Option<Datagram> {
        self.receiver.recv().await
    }

    pub fn into_split(self) -> (ClientSender, ClientReceiver) {
        (self.sender, self.receiver)
    }
}

/// Splitter routing UDP payloads to client interfaces. Output `i` belongs
/// to `ClientId(i)`.
pub fn port_splitter(
    input: FrameReader<UdpRxMeta>,
    outputs: Vec<FrameWriter<ClientRxMeta>>,
    table: SharedPortTable,
    stats: Arc<StackStats>,
) -> Splitter<UdpRxMeta, ClientRxMeta, impl FnMut(&UdpRxMeta) -> Route<ClientRxMeta>> {
    Splitter::new("Port-I/O", input, outputs, move |meta: &UdpRxMeta| {
        let peer = SocketAddrV4::new(meta.src_ip, meta.src_port);
        let hit = port_table::write(&table, |t| {
            let id = t.lookup(meta.dst_port, meta.src_ip)?;
            Some((id, t.learn(id, peer)))
        });
        match hit {
            Some((id, learned)) => {
                if learned {
                    info!("Port-I/O: {} now sends to {}", id, peer);
                    stats.port_learned.inc();
                }
                Route::To(
                    id.0,
                    ClientRxMeta {
                        src_ip: meta.src_ip,
                        src_port: meta.src_port,
                        dst_port: meta.dst_port,
                    },
                )
            }
            None => {
                debug!(
                    "Port-I/O: no client for port {} from {}",
                    meta.dst_port, meta.src_ip
                );
                stats.port_misses.inc();
                Route::Drop
            }
        }
    })
}

/// Builds UDP datagrams from merged client payloads.
pub struct UdpEgress {
    input: FrameReader<ClientId>,
    output: FrameWriter<IpTxMeta>,
    table: SharedPortTable,
    host: watch::Receiver<HostState>,
    stats: Arc<StackStats>,
}

impl UdpEgress {
    pub fn new(
        input: FrameReader<ClientId>,
        output: FrameWriter<IpTxMeta>,
        table: SharedPortTable,
        host: watch::Receiver<HostState>,
        stats: Arc<StackStats>,
    ) -> Self {
        Self {
            input,
            output,
            table,
            host,
            stats,
        }
    }

    pub async fn run(mut self) {
        while let Some(id) = self.input.next_frame().await {
            if self.handle_frame(id).await.is_err() {
                break;
            }
        }
        debug!("UDP: egress stopped");
    }

    async fn handle_frame(&mut self, id: ClientId) -> Result<()> {
        let mut payload = Vec::new();
        if let Err(e) = self.input.read_to_end(&mut payload, MAX_PAYLOAD).await {
            debug!("UDP: {} payload dropped: {}", id, e);
            self.stats.udp_oversize.inc();
            return Ok(());
        }
        if self.input.error() {
            return Ok(());
        }

        let route = port_table::read(&self.table, |t| t.destination(id).zip(t.local_port(id)));
        let Some((dst, src_port)) = route else {
            debug!("UDP: {} has no destination yet", id);
            self.stats.port_no_destination.inc();
            return Ok(());
        };

        let src_ip = self.host.borrow().ip().unwrap_or(Ipv4Addr::UNSPECIFIED);
        let datagram = UdpBuilder::new()
            .src_port(src_port)
            .dst_port(dst.port())
            .payload(&payload)
            .build(src_ip, *dst.ip());
        let meta = IpTxMeta {
            dst_ip: *dst.ip(),
            protocol: Protocol::Udp as u8,
            payload_len: datagram.len() as u16,
            source: SourceAddr::Host,
            checksum_src: Some(src_ip),
            dst_mac: None,
        };
        self.output.send_frame(meta, &datagram).await
    }
}
