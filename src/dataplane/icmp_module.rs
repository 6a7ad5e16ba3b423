//! ICMP echo responder
//!
//! Turns each echo request into a reply while the payload streams through.
//! The request checksum is verified on the fly; a mismatch is only known
//! at the end, so the reply is flagged as errored and the TX FIFO drops it.

use super::meta::{IpRxMeta, IpTxMeta, SourceAddr};
use crate::protocol::checksum::Checksum;
use crate::protocol::icmp::{EchoHeader, ICMP_HEADER_SIZE};
use crate::protocol::ipv4::Protocol;
use crate::stream::{FrameReader, FrameWriter, WORD_BYTES};
use crate::telemetry::StackStats;
use crate::Result;
use std::sync::Arc;
use tracing::debug;

pub struct IcmpModule {
    input: FrameReader<IpRxMeta>,
    output: FrameWriter<IpTxMeta>,
    stats: Arc<StackStats>,
}

impl IcmpModule {
    pub fn new(
        input: FrameReader<IpRxMeta>,
        output: FrameWriter<IpTxMeta>,
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
            if self.handle_frame(meta).await.is_err() {
                break;
            }
        }
        debug!("ICMP: module stopped");
    }

    async fn handle_frame(&mut self, meta: IpRxMeta) -> Result<()> {
        let mut buf = [0u8; ICMP_HEADER_SIZE];
        let header = match self.input.read_exact(&mut buf).await {
            Ok(()) => EchoHeader::parse(&buf),
            Err(e) => Err(e),
        };
        let header = match header {
            Ok(h) => h,
            Err(e) => {
                debug!("ICMP: {} from {}", e, meta.src_ip);
                self.stats.icmp_malformed.inc();
                self.input.drain().await;
                return Ok(());
            }
        };
        if !header.is_echo_request() {
            debug!(
                "ICMP: type {} code {} from {} ignored",
                header.icmp_type, header.code, meta.src_ip
            );
            self.stats.icmp_other_types.inc();
            self.input.drain().await;
            return Ok(());
        }

        let mut check = Checksum::new();
        check.add_bytes(&buf);

        // Reply straight to the sender's MAC; no ARP lookup needed.
        self.output.begin(IpTxMeta {
            dst_ip: meta.src_ip,
            protocol: Protocol::Icmp as u8,
            payload_len: meta.payload_len,
            source: SourceAddr::Host,
            checksum_src: None,
            dst_mac: Some(meta.src_mac),
        });
        self.output.write(&header.to_reply().to_bytes()).await?;

        let mut chunk = [0u8; WORD_BYTES];
        loop {
            let n = self.input.read(&mut chunk).await;
            if n == 0 {
                break;
            }
            check.add_bytes(&chunk[..n]);
            self.output.write(&chunk[..n]).await?;
        }

        let valid = check.verifies();
        if valid {
            self.stats.icmp_echo_replies.inc();
        } else {
            debug!("ICMP: bad checksum on echo request from {}", meta.src_ip);
            self.stats.icmp_checksum_errors.inc();
        }
        self.output.finish(!valid || self.input.error()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::icmp::{build_echo, IcmpType};
    use crate::protocol::{checksum, MacAddr};
    use crate::stream::channel;
    use std::net::Ipv4Addr;

    const PEER_MAC: MacAddr = MacAddr([2, 0, 0, 0, 0, 9]);
    const PEER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 9);

    fn make_meta(len: usize) -> IpRxMeta {
        IpRxMeta {
            src_mac: PEER_MAC,
            src_ip: PEER_IP,
            dst_ip: Ipv4Addr::new(10, 0, 0, 2),
            protocol: 1,
            payload_len: len as u16,
        }
    }

    fn make_module() -> (FrameWriter<IpRxMeta>, FrameReader<IpTxMeta>, Arc<StackStats>) {
        let (in_tx, in_rx) = channel(64);
        let (out_tx, out_rx) = channel(64);
        let stats = Arc::new(StackStats::new());
        tokio::spawn(
            IcmpModule::new(FrameReader::new(in_rx), FrameWriter::new(out_tx), stats.clone())
                .run(),
        );
        (FrameWriter::new(in_tx), FrameReader::new(out_rx), stats)
    }

    #[tokio::test]
    async fn test_echo_reply() {
        let (mut input, mut output, stats) = make_module();
        let request = build_echo(IcmpType::EchoRequest, 0x1234, 1, &[0xaa, 0xbb]);
        input.send_frame(make_meta(request.len()), &request).await.unwrap();

        let meta = output.next_frame().await.unwrap();
        assert_eq!(meta.dst_ip, PEER_IP);
        assert_eq!(meta.dst_mac, Some(PEER_MAC));
        assert_eq!(meta.protocol, 1);
        assert_eq!(meta.payload_len, 10);
        let mut reply = Vec::new();
        output.read_to_end(&mut reply, 100).await.unwrap();
        assert!(!output.error());

        assert_eq!(reply, build_echo(IcmpType::EchoReply, 0x1234, 1, &[0xaa, 0xbb]));
        assert_eq!(checksum::checksum(&reply), 0);

        drop(input);
        assert!(output.next_frame().await.is_none());
        assert_eq!(stats.icmp_echo_replies.get(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_request_flags_reply() {
        let (mut input, mut output, stats) = make_module();
        let mut request = build_echo(IcmpType::EchoRequest, 7, 7, &[1, 2, 3, 4, 5]);
        request[9] ^= 0xff;
        input.send_frame(make_meta(request.len()), &request).await.unwrap();

        output.next_frame().await.unwrap();
        output.drain().await;
        assert!(output.error());

        drop(input);
        assert!(output.next_frame().await.is_none());
        assert_eq!(stats.icmp_checksum_errors.get(), 1);
        assert_eq!(stats.icmp_echo_replies.get(), 0);
    }

    #[tokio::test]
    async fn test_non_echo_drained() {
        let (mut input, mut output, stats) = make_module();
        let reply = build_echo(IcmpType::EchoReply, 1, 1, &[]);
        input.send_frame(make_meta(reply.len()), &reply).await.unwrap();
        input.send_frame(make_meta(3), &[8, 0, 0]).await.unwrap();
        drop(input);

        assert!(output.next_frame().await.is_none());
        assert_eq!(stats.icmp_other_types.get(), 1);
        assert_eq!(stats.icmp_malformed.get(), 1);
    }
}
