//! Link-layer resolution of outgoing IPv4 packets
//!
//! Frames with a known destination MAC, or whose next hop resolves, stream
//! straight through. The rest ask the ARP module for a request and either
//! wait in the pending queue or are dropped, per `PendingPolicy`.

use super::arp_processor::ArpPendingQueue;
use super::arp_table::{ArpCacheReader, Resolution};
use super::meta::{EthTxMeta, RouteMeta};
use crate::config::PendingPolicy;
use crate::protocol::ethernet::MAX_FRAME_LEN;
use crate::protocol::{EtherType, MacAddr};
use crate::stream::{FrameReader, FrameWriter};
use crate::telemetry::StackStats;
use crate::Result;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

pub struct Resolver {
    input: FrameReader<RouteMeta>,
    output: FrameWriter<EthTxMeta>,
    cache: ArpCacheReader,
    requests: mpsc::Sender<Ipv4Addr>,
    pending: ArpPendingQueue<Vec<u8>>,
    policy: PendingPolicy,
    stats: Arc<StackStats>,
}

fn ipv4_meta(dst_mac: MacAddr) -> EthTxMeta {
    EthTxMeta {
        dst_mac,
        ethertype: EtherType::Ipv4,
    }
}

impl Resolver {
    pub fn new(
        input: FrameReader<RouteMeta>,
        output: FrameWriter<EthTxMeta>,
        cache: ArpCacheReader,
        requests: mpsc::Sender<Ipv4Addr>,
        pending: ArpPendingQueue<Vec<u8>>,
        policy: PendingPolicy,
        stats: Arc<StackStats>,
    ) -> Self {
        Self {
            input,
            output,
            cache,
            requests,
            pending,
            policy,
            stats,
        }
    }

    pub async fn run(mut self) {
        if let Err(e) = self.serve().await {
            debug!("Resolver: output closed: {}", e);
        }
        debug!("Resolver: stopped");
    }

    async fn serve(&mut self) -> Result<()> {
        let mut cache_open = true;
        loop {
            let deadline = self.pending.next_expiry();
            let waiting = !self.pending.is_empty();
            tokio::select! {
                biased;
                changed = self.cache.changed(), if cache_open && waiting => {
                    if changed.is_err() {
                        cache_open = false;
                    }
                    self.flush_resolved().await?;
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.expire(Instant::now());
                }
                meta = self.input.next_frame() => match meta {
                    Some(meta) => self.handle_frame(meta).await?,
                    None => return Ok(()),
                },
            }
        }
    }

    async fn handle_frame(&mut self, meta: RouteMeta) -> Result<()> {
        let resolved = match meta.dst_mac {
            Some(mac) => Some(mac),
            None => match self.cache.resolve(meta.next_hop) {
                Resolution::Resolved(mac) => Some(mac),
                Resolution::Pending => None,
            },
        };

        if let Some(dst_mac) = resolved {
            // Earlier frames to the same hop go first.
            if self.pending.has_pending(&meta.next_hop) {
                self.flush(meta.next_hop, dst_mac).await?;
            }
            self.output.begin(ipv4_meta(dst_mac));
            self.input.forward(&mut self.output, None).await?;
            return self.output.finish(self.input.error()).await;
        }

        // The ARP module drops duplicate requests itself; a full channel
        // only delays the request to the next frame.
        let _ = self.requests.try_send(meta.next_hop);

        match self.policy {
            PendingPolicy::Drop => {
                self.input.drain().await;
                self.stats.arp_unresolved_drops.inc();
                debug!("Resolver: {} unresolved, frame dropped", meta.next_hop);
            }
            PendingPolicy::Queue => {
                let mut frame = Vec::new();
                let ok = self.input.read_to_end(&mut frame, MAX_FRAME_LEN).await.is_ok();
                if !ok || self.input.error() {
                    return Ok(());
                }
                if !self.pending.enqueue(meta.next_hop, frame, Instant::now()) {
                    self.stats.arp_unresolved_drops.inc();
                    debug!("Resolver: pending queue for {} full", meta.next_hop);
                }
                self.update_gauges();
            }
        }
        Ok(())
    }

    async fn flush_resolved(&mut self) -> Result<()> {
        for ip in self.pending.ips() {
            if let Resolution::Resolved(mac) = self.cache.resolve(ip) {
                self.flush(ip, mac).await?;
            }
        }
        Ok(())
    }

    async fn flush(&mut self, ip: Ipv4Addr, dst_mac: MacAddr) -> Result<()> {
        let frames = self.pending.dequeue(&ip);
        debug!("Resolver: {} resolved, sending {} held frames", ip, frames.len());
        self.update_gauges();
        for frame in frames {
            self.output.send_frame(ipv4_meta(dst_mac), &frame).await?;
        }
        Ok(())
    }

    fn expire(&mut self, now: Instant) {
        let expired = self.pending.expire_old(now);
        if expired > 0 {
            debug!("Resolver: {} frames expired unresolved", expired);
            self.stats.arp_pending_expired.add(expired as u64);
        }
        self.update_gauges();
    }

    fn update_gauges(&self) {
        self.stats.arp_pending_frames.set(self.pending.frame_count());
        self.stats.arp_pending_ips.set(self.pending.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataplane::arp_table::{ArpCache, ArpTable};
    use crate::stream::channel;
    use std::time::Duration;

    const HOP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 9);
    const HOP_MAC: MacAddr = MacAddr([2, 0, 0, 0, 0, 9]);

    struct Harness {
        input: FrameWriter<RouteMeta>,
        output: FrameReader<EthTxMeta>,
        requests: mpsc::Receiver<Ipv4Addr>,
        cache: ArpCache,
        stats: Arc<StackStats>,
    }

    fn make_resolver(policy: PendingPolicy) -> Harness {
        let (in_tx, in_rx) = channel(64);
        let (out_tx, out_rx) = channel(64);
        let (req_tx, req_rx) = mpsc::channel(8);
        let (cache, reader) = ArpCache::new(ArpTable::new(
            Duration::from_secs(30),
            Duration::from_secs(120),
            Duration::from_secs(1),
        ));
        let stats = Arc::new(StackStats::new());
        let resolver = Resolver::new(
            FrameReader::new(in_rx),
            FrameWriter::new(out_tx),
            reader,
            req_tx,
            ArpPendingQueue::new(4, Duration::from_secs(1)),
            policy,
            stats.clone(),
        );
        tokio::spawn(resolver.run());
        Harness {
            input: FrameWriter::new(in_tx),
            output: FrameReader::new(out_rx),
            requests: req_rx,
            cache,
            stats,
        }
    }

    fn make_route() -> RouteMeta {
        RouteMeta {
            next_hop: HOP,
            dst_mac: None,
        }
    }

    async fn recv_frame(output: &mut FrameReader<EthTxMeta>) -> Option<(EthTxMeta, Vec<u8>)> {
        let meta = output.next_frame().await?;
        let mut bytes = Vec::new();
        output.read_to_end(&mut bytes, 2048).await.ok()?;
        Some((meta, bytes))
    }

    #[tokio::test]
    async fn test_explicit_mac_passes_through() {
        let mut h = make_resolver(PendingPolicy::Queue);
        let meta = RouteMeta {
            next_hop: HOP,
            dst_mac: Some(MacAddr::BROADCAST),
        };
        h.input.send_frame(meta, &[1, 2, 3]).await.unwrap();

        let (meta, bytes) = recv_frame(&mut h.output).await.unwrap();
        assert_eq!(meta.dst_mac, MacAddr::BROADCAST);
        assert_eq!(meta.ethertype, EtherType::Ipv4);
        assert_eq!(bytes, vec![1, 2, 3]);
        assert!(h.requests.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_held_frames_flush_on_reply() {
        let mut h = make_resolver(PendingPolicy::Queue);
        h.input.send_frame(make_route(), &[1; 20]).await.unwrap();
        h.input.send_frame(make_route(), &[2; 20]).await.unwrap();

        assert_eq!(h.requests.recv().await, Some(HOP));
        assert_eq!(h.requests.recv().await, Some(HOP));

        h.cache.update(|t| t.insert(HOP, HOP_MAC, Instant::now()));

        let (meta, first) = recv_frame(&mut h.output).await.unwrap();
        assert_eq!(meta.dst_mac, HOP_MAC);
        assert_eq!(first, vec![1; 20]);
        let (_, second) = recv_frame(&mut h.output).await.unwrap();
        assert_eq!(second, vec![2; 20]);

        // Resolved now: no further requests.
        h.input.send_frame(make_route(), &[3; 20]).await.unwrap();
        let (_, third) = recv_frame(&mut h.output).await.unwrap();
        assert_eq!(third, vec![3; 20]);
        assert!(h.requests.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_window_expires() {
        let mut h = make_resolver(PendingPolicy::Queue);
        h.input.send_frame(make_route(), &[1; 20]).await.unwrap();
        assert_eq!(h.requests.recv().await, Some(HOP));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.stats.arp_pending_frames.get(), 1);
        assert_eq!(h.stats.arp_pending_ips.get(), 1);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        drop(h.input);
        assert!(h.output.next_frame().await.is_none());
        assert_eq!(h.stats.arp_pending_expired.get(), 1);
        assert_eq!(h.stats.arp_pending_frames.get(), 0);
        assert_eq!(h.stats.arp_pending_ips.get(), 0);
        drop(h.cache);
    }

    #[tokio::test]
    async fn test_drop_policy() {
        let mut h = make_resolver(PendingPolicy::Drop);
        h.input.send_frame(make_route(), &[1; 20]).await.unwrap();
        assert_eq!(h.requests.recv().await, Some(HOP));

        drop(h.input);
        assert!(h.output.next_frame().await.is_none());
        assert_eq!(h.stats.arp_unresolved_drops.get(), 1);
        drop(h.cache);
    }
}
