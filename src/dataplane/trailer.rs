//! Ethernet trailer handling
//!
//! Short frames are padded on the wire, so an IPv4 payload can be followed
//! by junk. Ingress trims it off using the length from the IP header;
//! egress pads outgoing frames back up to the physical minimum.

use super::meta::IpRxMeta;
use crate::protocol::ethernet::MIN_FRAME_LEN;
use crate::stream::{FrameReader, FrameWriter};
use crate::telemetry::StackStats;
use crate::Result;
use std::sync::Arc;
use tracing::debug;

/// Forwards exactly `payload_len` bytes of every IPv4 payload.
pub struct TrailerStrip {
    input: FrameReader<IpRxMeta>,
    output: FrameWriter<IpRxMeta>,
    stats: Arc<StackStats>,
}

impl TrailerStrip {
    pub fn new(
        input: FrameReader<IpRxMeta>,
        output: FrameWriter<IpRxMeta>,
        stats: Arc<StackStats>,
    ) -> Self {
        Self {
            input,
            output,
            stats,
        }
    }

    pub async fn run(mut self) {
        while let Some(meta) = self.input.next_frame().await {
            if self.strip(meta).await.is_err() {
                break;
            }
        }
        debug!("Trailer: strip stopped");
    }

    async fn strip(&mut self, meta: IpRxMeta) -> Result<()> {
        let declared = meta.payload_len as usize;
        self.output.begin(meta);
        let n = self.input.forward(&mut self.output, Some(declared)).await?;
        let short = n < declared;
        if short {
            debug!(
                "Trailer: payload from {} is {} bytes, header says {}",
                meta.src_ip, n, declared
            );
            self.stats.trailer_short.inc();
        }
        self.output.finish(short || self.input.error()).await
    }
}

/// Zero-pads frames to the minimum Ethernet frame size.
pub struct TrailerPad {
    input: FrameReader<()>,
    output: FrameWriter<()>,
}

impl TrailerPad {
    pub fn new(input: FrameReader<()>, output: FrameWriter<()>) -> Self {
        Self { input, output }
    }

    pub async fn run(mut self) {
        while self.input.next_frame().await.is_some() {
            if self.pad().await.is_err() {
                break;
            }
        }
        debug!("Trailer: pad stopped");
    }

    async fn pad(&mut self) -> Result<()> {
        self.output.begin(());
        let n = self.input.forward(&mut self.output, None).await?;
        if n < MIN_FRAME_LEN {
            self.output.write(&[0u8; MIN_FRAME_LEN][n..]).await?;
        }
        self.output.finish(self.input.error()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MacAddr;
    use crate::stream::channel;
    use std::net::Ipv4Addr;

    fn make_meta(payload_len: u16) -> IpRxMeta {
        IpRxMeta {
            src_mac: MacAddr([2, 0, 0, 0, 0, 9]),
            src_ip: Ipv4Addr::new(10, 0, 0, 9),
            dst_ip: Ipv4Addr::new(10, 0, 0, 2),
            protocol: 17,
            payload_len,
        }
    }

    #[tokio::test]
    async fn test_strip_removes_padding() {
        let (in_tx, in_rx) = channel(64);
        let (out_tx, out_rx) = channel(64);
        let stats = Arc::new(StackStats::new());
        tokio::spawn(
            TrailerStrip::new(FrameReader::new(in_rx), FrameWriter::new(out_tx), stats.clone())
                .run(),
        );
        let mut input = FrameWriter::new(in_tx);
        let mut output = FrameReader::new(out_rx);

        let mut frame = vec![0x11; 10];
        frame.extend_from_slice(&[0; 16]);
        input.send_frame(make_meta(10), &frame).await.unwrap();
        output.next_frame().await.unwrap();
        let mut payload = Vec::new();
        output.read_to_end(&mut payload, 64).await.unwrap();
        assert_eq!(payload, vec![0x11; 10]);
        assert!(!output.error());

        // Truncated payload is flagged.
        input.send_frame(make_meta(40), &[0x22; 12]).await.unwrap();
        output.next_frame().await.unwrap();
        assert_eq!(output.drain().await, 12);
        assert!(output.error());

        drop(input);
        assert!(output.next_frame().await.is_none());
        assert_eq!(stats.trailer_short.get(), 1);
    }

    #[tokio::test]
    async fn test_pad_to_minimum() {
        let (in_tx, in_rx) = channel(64);
        let (out_tx, out_rx) = channel(64);
        tokio::spawn(TrailerPad::new(FrameReader::new(in_rx), FrameWriter::new(out_tx)).run());
        let mut input = FrameWriter::new(in_tx);
        let mut output = FrameReader::new(out_rx);

        input.send_frame((), &[0xff; 42]).await.unwrap();
        output.next_frame().await.unwrap();
        let mut frame = Vec::new();
        output.read_to_end(&mut frame, 2048).await.unwrap();
        assert_eq!(frame.len(), MIN_FRAME_LEN);
        assert_eq!(&frame[..42], &[0xff; 42]);
        assert!(frame[42..].iter().all(|b| *b == 0));

        input.send_frame((), &[0xee; 100]).await.unwrap();
        output.next_frame().await.unwrap();
        assert_eq!(output.drain().await, 100);
    }
}
