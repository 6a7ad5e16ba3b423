//! Configuration types

use crate::protocol::MacAddr;
use crate::telemetry::LogConfig;
use crate::{Error, Result};
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// User-defined configuration (config.toml)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub dhcp: DhcpConfig,
    #[serde(default)]
    pub arp: ArpConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub logging: LogConfig,
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostConfig {
    /// Fixed MAC of the endpoint. The binary falls back to the interface
    /// MAC when unset.
    pub mac: Option<MacAddr>,
    /// Network interface the binary binds to
    pub interface: Option<String>,
    /// Static address in CIDR form, used when DHCP is disabled
    pub address: Option<String>,
    pub gateway: Option<Ipv4Addr>,
    #[serde(default)]
    pub unbound_policy: UnboundPolicy,
}

/// What happens to traffic needing the host address while none is bound
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnboundPolicy {
    /// Drain and count
    #[default]
    Suppress,
    /// Send with source 0.0.0.0
    ZeroSource,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DhcpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// T1 as a fraction of the lease when the server sends no option 58
    #[serde(default = "default_renewal_fraction")]
    pub renewal_fraction: f64,
    /// T2 as a fraction of the lease when the server sends no option 59
    #[serde(default = "default_rebinding_fraction")]
    pub rebinding_fraction: f64,
    #[serde(default = "default_retransmit_base")]
    pub retransmit_base_secs: u64,
    #[serde(default = "default_retransmit_max")]
    pub retransmit_max_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
}

impl Default for DhcpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            renewal_fraction: default_renewal_fraction(),
            rebinding_fraction: default_rebinding_fraction(),
            retransmit_base_secs: default_retransmit_base(),
            retransmit_max_secs: default_retransmit_max(),
            max_retries: default_max_retries(),
        }
    }
}

/// Fate of frames whose next hop is not resolved yet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingPolicy {
    /// Hold them for the pending window
    #[default]
    Queue,
    /// Drop them right away
    Drop,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArpConfig {
    #[serde(default = "default_pending_timeout")]
    pub pending_timeout_ms: u64,
    #[serde(default)]
    pub pending_policy: PendingPolicy,
    /// Frames held per unresolved address
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
    #[serde(default = "default_reachable")]
    pub reachable_secs: u64,
    #[serde(default = "default_stale")]
    pub stale_secs: u64,
}

impl Default for ArpConfig {
    fn default() -> Self {
        Self {
            pending_timeout_ms: default_pending_timeout(),
            pending_policy: PendingPolicy::default(),
            max_pending: default_max_pending(),
            reachable_secs: default_reachable(),
            stale_secs: default_stale(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Words buffered on each link between stages
    #[serde(default = "default_channel_depth")]
    pub channel_depth: usize,
    #[serde(default = "default_fifo_words")]
    pub rx_fifo_words: usize,
    #[serde(default = "default_fifo_words")]
    pub tx_fifo_words: usize,
    /// Receive FIFO in front of each client interface. A full FIFO drops
    /// the client's frames instead of stalling the shared ingress path.
    #[serde(default = "default_fifo_words")]
    pub client_fifo_words: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel_depth: default_channel_depth(),
            rx_fifo_words: default_fifo_words(),
            tx_fifo_words: default_fifo_words(),
            client_fifo_words: default_fifo_words(),
        }
    }
}

/// How a client's egress destination follows observed ingress traffic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearnPolicy {
    /// Only the configured destination is used
    Off,
    /// Learn only while no destination is configured
    #[default]
    Fill,
    /// Learned peers replace the configured destination
    Override,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub name: String,
    /// Local UDP port: ingress destination port and egress source port
    pub port: u16,
    /// Only accept datagrams from this source address
    pub source: Option<Ipv4Addr>,
    /// Static egress destination
    pub remote: Option<SocketAddrV4>,
    #[serde(default)]
    pub learn: LearnPolicy,
    /// Local UDP socket the binary bridges this client to
    pub bridge: Option<SocketAddr>,
}

fn default_true() -> bool {
    true
}

fn default_renewal_fraction() -> f64 {
    0.5
}

fn default_rebinding_fraction() -> f64 {
    0.875
}

fn default_retransmit_base() -> u64 {
    4
}

fn default_retransmit_max() -> u64 {
    64
}

fn default_max_retries() -> u8 {
    10
}

fn default_pending_timeout() -> u64 {
    1000
}

fn default_max_pending() -> usize {
    16
}

fn default_reachable() -> u64 {
    30
}

fn default_stale() -> u64 {
    300
}

fn default_channel_depth() -> usize {
    64
}

fn default_fifo_words() -> usize {
    2048
}

/// Parse `a.b.c.d/len` into the address and its netmask.
pub fn parse_cidr(cidr: &str) -> Result<(Ipv4Addr, Ipv4Addr)> {
    let (ip, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| Error::Config(format!("invalid CIDR: {}", cidr)))?;
    let ip: Ipv4Addr = ip
        .parse()
        .map_err(|_| Error::Config(format!("invalid IP: {}", ip)))?;
    let prefix: u8 = prefix
        .parse()
        .ok()
        .filter(|p| *p <= 32)
        .ok_or_else(|| Error::Config(format!("invalid prefix: {}", prefix)))?;
    let mask = u32::MAX.checked_shl(32 - prefix as u32).unwrap_or(0);
    Ok((ip, Ipv4Addr::from(mask)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::LogFormat;

    #[test]
    fn test_parse_full_config() {
        let config: Config = toml::from_str(
            r#"
            [host]
            mac = "02:00:00:00:00:01"
            interface = "eth1"
            address = "10.0.0.2/24"
            gateway = "10.0.0.1"
            unbound_policy = "zero-source"

            [dhcp]
            enabled = false

            [arp]
            pending_policy = "drop"
            pending_timeout_ms = 500

            [logging]
            level = "debug"
            format = "json"

            [[clients]]
            name = "telemetry"
            port = 5000
            remote = "10.0.0.9:6000"
            learn = "override"

            [[clients]]
            name = "control"
            port = 5001
            source = "10.0.0.7"
            bridge = "127.0.0.1:15001"
            "#,
        )
        .unwrap();

        assert_eq!(config.host.mac, Some(MacAddr([2, 0, 0, 0, 0, 1])));
        assert_eq!(config.host.unbound_policy, UnboundPolicy::ZeroSource);
        assert!(!config.dhcp.enabled);
        assert_eq!(config.dhcp.max_retries, 10);
        assert_eq!(config.arp.pending_policy, PendingPolicy::Drop);
        assert_eq!(config.arp.max_pending, 16);
        assert_eq!(config.stream.channel_depth, 64);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.clients.len(), 2);
        assert_eq!(config.clients[0].learn, LearnPolicy::Override);
        assert_eq!(config.clients[1].learn, LearnPolicy::Fill);
        assert_eq!(config.clients[1].source, Some(Ipv4Addr::new(10, 0, 0, 7)));
    }

    #[test]
    fn test_empty_config_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.dhcp.enabled);
        assert_eq!(config.dhcp.renewal_fraction, 0.5);
        assert_eq!(config.host.unbound_policy, UnboundPolicy::Suppress);
        assert!(config.clients.is_empty());
    }

    #[test]
    fn test_parse_cidr() {
        assert_eq!(
            parse_cidr("192.168.1.10/24").unwrap(),
            (Ipv4Addr::new(192, 168, 1, 10), Ipv4Addr::new(255, 255, 255, 0))
        );
        assert_eq!(
            parse_cidr("10.0.0.1/32").unwrap().1,
            Ipv4Addr::new(255, 255, 255, 255)
        );
        assert_eq!(parse_cidr("10.0.0.1/0").unwrap().1, Ipv4Addr::UNSPECIFIED);
        assert!(parse_cidr("10.0.0.1").is_err());
        assert!(parse_cidr("10.0.0.1/33").is_err());
        assert!(parse_cidr("10.0.0/8").is_err());
    }
}
