//! Metrics collection for frame statistics.
//!
//! Provides thread-safe counters for the drop-and-count paths of every
//! pipeline stage, occupancy gauges for the FIFOs and the ARP pending
//! queue, and per-interface traffic statistics.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Atomic counter for thread-safe increment operations.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Creates a new counter initialized to zero.
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Increments the counter by 1.
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds a value to the counter.
    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    /// Gets the current value of the counter.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Gauge holding the latest observed value.
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn set(&self, val: usize) {
        self.0.store(val as u64, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-interface statistics.
#[derive(Debug, Default)]
pub struct InterfaceStats {
    /// Number of frames received.
    pub rx_frames: Counter,
    /// Number of bytes received.
    pub rx_bytes: Counter,
    /// Number of frames transmitted.
    pub tx_frames: Counter,
    /// Number of bytes transmitted.
    pub tx_bytes: Counter,
    /// Number of receive drops.
    pub rx_drops: Counter,
    /// Number of transmit drops.
    pub tx_drops: Counter,
}

impl InterfaceStats {
    /// Creates new interface statistics initialized to zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a received frame.
    pub fn record_rx(&self, bytes: usize) {
        self.rx_frames.inc();
        self.rx_bytes.add(bytes as u64);
    }

    /// Records a transmitted frame.
    pub fn record_tx(&self, bytes: usize) {
        self.tx_frames.inc();
        self.tx_bytes.add(bytes as u64);
    }
}

/// Statistics of one frame FIFO.
#[derive(Debug, Default)]
pub struct FifoStats {
    /// Words currently queued.
    pub occupancy: Gauge,
    /// Frames accepted completely.
    pub frames: Counter,
    /// Frames dropped because the FIFO was full.
    pub overflow_drops: Counter,
    /// Frames discarded because they carried the error flag.
    pub error_drops: Counter,
}

impl FifoStats {
    pub fn set_occupancy(&self, words: usize) {
        self.occupancy.set(words);
    }
}

/// All counters of one stack instance.
///
/// Every stage holds an `Arc<StackStats>` and bumps the counter matching
/// the reason a frame was dropped.
#[derive(Debug, Default)]
pub struct StackStats {
    /// Physical link and client interface statistics.
    interfaces: RwLock<BTreeMap<String, Arc<InterfaceStats>>>,
    /// Per-client receive FIFOs.
    fifos: RwLock<BTreeMap<String, Arc<FifoStats>>>,

    pub rx_fifo: Arc<FifoStats>,
    pub tx_fifo: Arc<FifoStats>,

    // Ethernet
    pub eth_runts: Counter,
    pub eth_unknown_ethertype: Counter,
    pub eth_filtered: Counter,

    // ARP
    pub arp_malformed: Counter,
    pub arp_requests_sent: Counter,
    pub arp_replies_sent: Counter,
    pub arp_announcements_sent: Counter,
    pub arp_unresolved_drops: Counter,
    pub arp_pending_expired: Counter,
    pub arp_table_size: Gauge,
    pub arp_pending_frames: Gauge,
    pub arp_pending_ips: Gauge,

    // IPv4
    pub ip_malformed: Counter,
    pub ip_checksum_errors: Counter,
    pub ip_fragments: Counter,
    pub ip_not_for_us: Counter,
    pub ip_unknown_protocol: Counter,
    pub ip_unbound_suppressed: Counter,
    pub ip_no_route: Counter,
    pub ip_source_changed: Counter,
    pub trailer_short: Counter,

    // UDP and port routing
    pub udp_malformed: Counter,
    pub udp_oversize: Counter,
    pub port_misses: Counter,
    pub port_no_destination: Counter,
    pub port_learned: Counter,

    // ICMP
    pub icmp_echo_replies: Counter,
    pub icmp_checksum_errors: Counter,
    pub icmp_other_types: Counter,
    pub icmp_malformed: Counter,

    // DHCP
    pub dhcp_sent: Counter,
    pub dhcp_received: Counter,
    pub dhcp_malformed: Counter,
    pub dhcp_leases: Counter,
    pub dhcp_naks: Counter,
}

impl StackStats {
    /// Creates a new stats registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an interface for statistics tracking and returns its
    /// counters.
    pub fn register_interface(&self, name: &str) -> Arc<InterfaceStats> {
        let mut interfaces = self
            .interfaces
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        interfaces.entry(name.to_string()).or_default().clone()
    }

    /// Counters of a registered interface.
    pub fn interface(&self, name: &str) -> Option<Arc<InterfaceStats>> {
        self.interfaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Registers a named FIFO and returns its statistics.
    pub fn register_fifo(&self, name: &str) -> Arc<FifoStats> {
        let mut fifos = self.fifos.write().unwrap_or_else(PoisonError::into_inner);
        fifos.entry(name.to_string()).or_default().clone()
    }

    /// Exports all metrics as key-value pairs.
    pub fn export(&self) -> Vec<(String, u64)> {
        let counters: &[(&str, &Counter)] = &[
            ("rx_fifo_frames", &self.rx_fifo.frames),
            ("rx_fifo_overflow_drops", &self.rx_fifo.overflow_drops),
            ("rx_fifo_error_drops", &self.rx_fifo.error_drops),
            ("tx_fifo_frames", &self.tx_fifo.frames),
            ("tx_fifo_overflow_drops", &self.tx_fifo.overflow_drops),
            ("tx_fifo_error_drops", &self.tx_fifo.error_drops),
            ("eth_runts", &self.eth_runts),
            ("eth_unknown_ethertype", &self.eth_unknown_ethertype),
            ("eth_filtered", &self.eth_filtered),
            ("arp_malformed", &self.arp_malformed),
            ("arp_requests_sent", &self.arp_requests_sent),
            ("arp_replies_sent", &self.arp_replies_sent),
            ("arp_announcements_sent", &self.arp_announcements_sent),
            ("arp_unresolved_drops", &self.arp_unresolved_drops),
            ("arp_pending_expired", &self.arp_pending_expired),
            ("ip_malformed", &self.ip_malformed),
            ("ip_checksum_errors", &self.ip_checksum_errors),
            ("ip_fragments", &self.ip_fragments),
            ("ip_not_for_us", &self.ip_not_for_us),
            ("ip_unknown_protocol", &self.ip_unknown_protocol),
            ("ip_unbound_suppressed", &self.ip_unbound_suppressed),
            ("ip_no_route", &self.ip_no_route),
            ("ip_source_changed", &self.ip_source_changed),
            ("trailer_short", &self.trailer_short),
            ("udp_malformed", &self.udp_malformed),
            ("udp_oversize", &self.udp_oversize),
            ("port_misses", &self.port_misses),
            ("port_no_destination", &self.port_no_destination),
            ("port_learned", &self.port_learned),
            ("icmp_echo_replies", &self.icmp_echo_replies),
            ("icmp_checksum_errors", &self.icmp_checksum_errors),
            ("icmp_other_types", &self.icmp_other_types),
            ("icmp_malformed", &self.icmp_malformed),
            ("dhcp_sent", &self.dhcp_sent),
            ("dhcp_received", &self.dhcp_received),
            ("dhcp_malformed", &self.dhcp_malformed),
            ("dhcp_leases", &self.dhcp_leases),
            ("dhcp_naks", &self.dhcp_naks),
        ];

        let mut result: Vec<(String, u64)> = counters
            .iter()
            .map(|(name, c)| (name.to_string(), c.get()))
            .collect();
        result.extend([
            ("rx_fifo_occupancy".into(), self.rx_fifo.occupancy.get()),
            ("tx_fifo_occupancy".into(), self.tx_fifo.occupancy.get()),
            ("arp_table_size".into(), self.arp_table_size.get()),
            ("arp_pending_frames".into(), self.arp_pending_frames.get()),
            ("arp_pending_ips".into(), self.arp_pending_ips.get()),
        ]);

        // Per-interface metrics
        let interfaces = self
            .interfaces
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for (name, stats) in interfaces.iter() {
            result.extend([
                (format!("{}_rx_frames", name), stats.rx_frames.get()),
                (format!("{}_rx_bytes", name), stats.rx_bytes.get()),
                (format!("{}_tx_frames", name), stats.tx_frames.get()),
                (format!("{}_tx_bytes", name), stats.tx_bytes.get()),
                (format!("{}_rx_drops", name), stats.rx_drops.get()),
                (format!("{}_tx_drops", name), stats.tx_drops.get()),
            ]);
        }
        drop(interfaces);

        let fifos = self.fifos.read().unwrap_or_else(PoisonError::into_inner);
        for (name, stats) in fifos.iter() {
            result.extend([
                (format!("{}_fifo_frames", name), stats.frames.get()),
                (format!("{}_fifo_overflow_drops", name), stats.overflow_drops.get()),
                (format!("{}_fifo_error_drops", name), stats.error_drops.get()),
                (format!("{}_fifo_occupancy", name), stats.occupancy.get()),
            ]);
        }

        result
    }

    /// Value of one exported metric, mainly for tests and status output.
    pub fn get(&self, name: &str) -> Option<u64> {
        self.export()
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_basic() {
        let counter = Counter::new();
        assert_eq!(counter.get(), 0);

        counter.inc();
        assert_eq!(counter.get(), 1);

        counter.add(10);
        assert_eq!(counter.get(), 11);
    }

    #[test]
    fn test_interface_stats() {
        let stats = InterfaceStats::new();

        stats.record_rx(100);
        stats.record_rx(200);
        stats.record_tx(150);

        assert_eq!(stats.rx_frames.get(), 2);
        assert_eq!(stats.rx_bytes.get(), 300);
        assert_eq!(stats.tx_frames.get(), 1);
        assert_eq!(stats.tx_bytes.get(), 150);
    }

    #[test]
    fn test_stack_stats_export() {
        let stats = StackStats::new();

        let phy = stats.register_interface("phy");
        stats.register_interface("telemetry");
        phy.record_rx(64);
        stats
            .interface("telemetry")
            .unwrap()
            .record_tx(12);

        stats.eth_unknown_ethertype.inc();
        stats.arp_requests_sent.add(3);
        stats.rx_fifo.set_occupancy(7);

        let metrics = stats.export();
        assert!(metrics.contains(&("eth_unknown_ethertype".into(), 1)));
        assert!(metrics.contains(&("arp_requests_sent".into(), 3)));
        assert!(metrics.contains(&("rx_fifo_occupancy".into(), 7)));
        assert!(metrics.contains(&("phy_rx_bytes".into(), 64)));
        assert!(metrics.contains(&("telemetry_tx_frames".into(), 1)));
        assert_eq!(stats.get("port_misses"), Some(0));
        assert_eq!(stats.get("no_such_metric"), None);
    }

    #[test]
    fn test_registered_fifo_exported() {
        let stats = StackStats::new();
        let fifo = stats.register_fifo("app_rx");
        fifo.overflow_drops.inc();
        fifo.set_occupancy(12);
        assert!(Arc::ptr_eq(&fifo, &stats.register_fifo("app_rx")));
        assert_eq!(stats.get("app_rx_fifo_overflow_drops"), Some(1));
        assert_eq!(stats.get("app_rx_fifo_occupancy"), Some(12));
    }

    #[test]
    fn test_register_interface_is_idempotent() {
        let stats = StackStats::new();
        let a = stats.register_interface("phy");
        a.record_rx(1);
        let b = stats.register_interface("phy");
        assert_eq!(b.rx_frames.get(), 1);
    }
}
