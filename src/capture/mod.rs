//! Physical link backends
//!
//! A backend moves raw Ethernet frames between a network device and the
//! stack's `PhysicalPort`. AF_PACKET is the only backend; the `Capture`
//! trait is the seam the pump and the tests use.

mod af_packet;

pub use af_packet::{interface_mac, AfPacketSocket};

use crate::dataplane::PhysicalPort;
use crate::protocol::ethernet::MAX_FRAME_LEN;
use crate::stream::{FrameReader, FrameWriter};
use crate::Result;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Receive buffer; room for a VLAN tag or jumbo frames the stack will drop
const RX_BUFFER: usize = 9216;

/// Information about a received frame
#[derive(Debug, Clone, Copy)]
pub struct RxInfo {
    /// Number of bytes received
    pub len: usize,
    /// The frame is a copy of one this host transmitted
    pub outgoing: bool,
}

/// Frame I/O backend
///
/// Both directions take `&self` so receive and transmit can run on
/// separate tasks.
pub trait Capture: Send + Sync {
    /// Receive a frame into the provided buffer
    fn recv(&self, buf: &mut [u8]) -> impl Future<Output = Result<RxInfo>> + Send;

    /// Send a frame
    fn send(&self, buf: &[u8]) -> impl Future<Output = Result<usize>> + Send;
}

/// Move frames between `capture` and the stack until either side fails
/// or the stack shuts down.
pub async fn run_link<C: Capture>(capture: Arc<C>, port: PhysicalPort) -> Result<()> {
    let (mut to_stack, mut from_stack) = port.into_split();
    let result = tokio::select! {
        r = pump_rx(&*capture, &mut to_stack) => r,
        r = pump_tx(&*capture, &mut from_stack) => r,
    };
    debug!("Link: stopped");
    result
}

async fn pump_rx<C: Capture>(capture: &C, to_stack: &mut FrameWriter<()>) -> Result<()> {
    let mut buf = vec![0u8; RX_BUFFER];
    loop {
        let info = capture.recv(&mut buf).await?;
        if info.outgoing {
            continue;
        }
        to_stack.send_frame((), &buf[..info.len]).await?;
    }
}

async fn pump_tx<C: Capture>(capture: &C, from_stack: &mut FrameReader<()>) -> Result<()> {
    let mut frame = Vec::with_capacity(MAX_FRAME_LEN);
    while from_stack.next_frame().await.is_some() {
        frame.clear();
        if from_stack.read_to_end(&mut frame, MAX_FRAME_LEN).await.is_err() {
            continue;
        }
        if let Err(e) = capture.send(&frame).await {
            warn!("Link: send of {} bytes failed: {}", frame.len(), e);
            return Err(e);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataplane::{Stack, StackConfig};
    use crate::protocol::arp::{ArpOp, ArpPacket};
    use crate::protocol::ethernet::{EthernetHeader, FrameBuilder, HEADER_LEN};
    use crate::protocol::{EtherType, MacAddr};
    use crate::Error;
    use std::net::Ipv4Addr;
    use tokio::sync::{mpsc, Mutex};

    const OUR_MAC: MacAddr = MacAddr([2, 0, 0, 0, 0, 1]);
    const PEER_MAC: MacAddr = MacAddr([2, 0, 0, 0, 0, 9]);

    /// In-memory wire: frames pushed by the test, frames sent by the stack
    struct MockCapture {
        rx: Mutex<mpsc::Receiver<(Vec<u8>, bool)>>,
        tx: mpsc::Sender<Vec<u8>>,
    }

    impl Capture for MockCapture {
        async fn recv(&self, buf: &mut [u8]) -> Result<RxInfo> {
            let next = self.rx.lock().await.recv().await;
            let (frame, outgoing) = next.ok_or(Error::StreamClosed)?;
            buf[..frame.len()].copy_from_slice(&frame);
            Ok(RxInfo {
                len: frame.len(),
                outgoing,
            })
        }

        async fn send(&self, buf: &[u8]) -> Result<usize> {
            self.tx
                .send(buf.to_vec())
                .await
                .map_err(|_| Error::StreamClosed)?;
            Ok(buf.len())
        }
    }

    #[tokio::test]
    async fn test_link_pumps_both_directions() {
        let mut config = StackConfig::new(OUR_MAC);
        config.dhcp = None;
        config.address = Some(crate::dataplane::HostAddress {
            ip: Ipv4Addr::new(10, 0, 0, 2),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: None,
        });
        let (_handle, phy, _clients) = Stack::spawn(config);

        let (wire_tx, wire_rx) = mpsc::channel(16);
        let (sent_tx, mut sent_rx) = mpsc::channel(16);
        let capture = Arc::new(MockCapture {
            rx: Mutex::new(wire_rx),
            tx: sent_tx,
        });
        tokio::spawn(run_link(capture, phy));

        let request =
            ArpPacket::request(PEER_MAC, Ipv4Addr::new(10, 0, 0, 9), Ipv4Addr::new(10, 0, 0, 2));
        let frame = FrameBuilder::new()
            .dst_mac(MacAddr::BROADCAST)
            .src_mac(PEER_MAC)
            .ethertype(EtherType::Arp as u16)
            .payload(&request.to_bytes())
            .build();
        // Looped-back copy of our own transmission is ignored.
        wire_tx.send((frame.clone(), true)).await.unwrap();
        wire_tx.send((frame, false)).await.unwrap();

        // Skip the startup announcement.
        let reply = loop {
            let out = sent_rx.recv().await.unwrap();
            let arp = ArpPacket::parse(&out[HEADER_LEN..]).unwrap();
            if arp.operation == ArpOp::Reply {
                break out;
            }
        };
        assert_eq!(reply.len(), 60);
        let eth = EthernetHeader::parse(&reply).unwrap();
        assert_eq!(eth.dst_mac, PEER_MAC);
        assert_eq!(eth.src_mac, OUR_MAC);
    }
}
