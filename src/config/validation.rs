//! Configuration validation

use super::{parse_cidr, Config, LearnPolicy};
use crate::protocol::ethernet::MAX_FRAME_LEN;
use crate::stream::WORD_BYTES;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            println!("[WARN] {}", warning);
        }
        for error in &self.errors {
            println!("[ERROR] {}", error);
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate configuration and return warnings/errors
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_host(config, &mut result);
    validate_dhcp(config, &mut result);
    validate_arp(config, &mut result);
    validate_stream(config, &mut result);
    validate_clients(config, &mut result);

    result
}

fn validate_host(config: &Config, result: &mut ValidationResult) {
    let host = &config.host;
    if host.mac.is_none() && host.interface.is_none() {
        result.error("host: neither mac nor interface is set");
    }
    if let Some(mac) = host.mac {
        if mac.is_multicast() {
            result.error(format!("host.mac: {} is not a unicast address", mac));
        }
    }

    match &host.address {
        Some(cidr) => match parse_cidr(cidr) {
            Ok((ip, netmask)) => {
                if config.dhcp.enabled {
                    result.warn("host.address: ignored while DHCP is enabled");
                }
                if let Some(gw) = host.gateway {
                    let mask = u32::from(netmask);
                    if u32::from(gw) & mask != u32::from(ip) & mask {
                        result.error(format!(
                            "host.gateway: {} is not inside {}",
                            gw, cidr
                        ));
                    }
                }
            }
            Err(e) => result.error(format!("host.address: {}", e)),
        },
        None => {
            if !config.dhcp.enabled {
                result.error("host.address: required when DHCP is disabled");
            }
        }
    }
}

fn validate_dhcp(config: &Config, result: &mut ValidationResult) {
    let dhcp = &config.dhcp;
    if !dhcp.enabled {
        return;
    }
    let renewal_ok = dhcp.renewal_fraction > 0.0 && dhcp.renewal_fraction < 1.0;
    let rebinding_ok = dhcp.rebinding_fraction > 0.0 && dhcp.rebinding_fraction < 1.0;
    if !renewal_ok {
        result.error(format!(
            "dhcp.renewal_fraction: {} is not within (0, 1)",
            dhcp.renewal_fraction
        ));
    }
    if !rebinding_ok {
        result.error(format!(
            "dhcp.rebinding_fraction: {} is not within (0, 1)",
            dhcp.rebinding_fraction
        ));
    }
    if renewal_ok && rebinding_ok && dhcp.renewal_fraction >= dhcp.rebinding_fraction {
        result.error("dhcp: renewal_fraction must be below rebinding_fraction");
    }
    if dhcp.retransmit_base_secs == 0 {
        result.error("dhcp.retransmit_base_secs: must be at least 1");
    }
    if dhcp.retransmit_max_secs < dhcp.retransmit_base_secs {
        result.warn(format!(
            "dhcp.retransmit_max_secs: {} is below the base, every retry waits {}s",
            dhcp.retransmit_max_secs, dhcp.retransmit_max_secs
        ));
    }
}

fn validate_arp(config: &Config, result: &mut ValidationResult) {
    let arp = &config.arp;
    if arp.max_pending == 0 {
        result.warn("arp.max_pending: 0 drops every unresolved frame");
    }
    if arp.stale_secs < arp.reachable_secs {
        result.warn("arp.stale_secs: shorter than reachable_secs, entries never go stale");
    }
}

fn validate_stream(config: &Config, result: &mut ValidationResult) {
    let stream = &config.stream;
    if stream.channel_depth == 0 {
        result.error("stream.channel_depth: must be at least 1");
    }
    let min_words = MAX_FRAME_LEN.div_ceil(WORD_BYTES);
    if stream.rx_fifo_words < min_words {
        result.warn(format!(
            "stream.rx_fifo_words: {} cannot hold a full-size frame",
            stream.rx_fifo_words
        ));
    }
    if stream.tx_fifo_words < min_words {
        result.warn(format!(
            "stream.tx_fifo_words: {} cannot hold a full-size frame",
            stream.tx_fifo_words
        ));
    }
    if stream.client_fifo_words < min_words {
        result.warn(format!(
            "stream.client_fifo_words: {} cannot hold a full-size datagram",
            stream.client_fifo_words
        ));
    }
}

fn validate_clients(config: &Config, result: &mut ValidationResult) {
    if config.clients.is_empty() {
        result.warn("clients: none defined, UDP traffic will be dropped");
    }

    let mut names = HashSet::new();
    let mut keys = HashSet::new();
    let mut bridges = HashSet::new();
    for client in &config.clients {
        let name = &client.name;
        if !names.insert(name.as_str()) {
            result.error(format!("clients.{}: duplicate name", name));
        }
        if client.port == 0 {
            result.error(format!("clients.{}: port 0 is not usable", name));
        }
        if !keys.insert((client.port, client.source)) {
            result.warn(format!(
                "clients.{}: port {} already claimed, the later entry wins",
                name, client.port
            ));
        }
        if client.remote.is_none() && client.learn == LearnPolicy::Off {
            result.error(format!(
                "clients.{}: no remote and learning is off, nothing can be sent",
                name
            ));
        }
        if let Some(bridge) = client.bridge {
            if !bridges.insert(bridge) {
                result.error(format!("clients.{}: bridge {} already in use", name, bridge));
            }
        }
    }
}
