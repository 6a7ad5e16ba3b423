//! ARP packet processor
//!
//! Handles ARP request/reply logic, table updates, and the queue of frames
//! waiting for an address to resolve.

use super::arp_table::ArpTable;
use crate::protocol::arp::{ArpOp, ArpPacket};
use crate::protocol::MacAddr;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::time::Instant;

/// Result of processing an ARP packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArpAction {
    /// No action needed
    None,
    /// Send an ARP reply
    Reply(ArpPacket),
    /// Table was updated
    TableUpdated,
}

/// Process an incoming ARP packet
///
/// # Arguments
/// * `packet` - The parsed ARP packet
/// * `table` - The ARP table to update
/// * `local_ip` - Our address, `None` while no lease is bound
/// * `local_mac` - Our MAC address
/// * `now` - Timestamp for new or refreshed entries
pub fn process_arp(
    packet: &ArpPacket,
    table: &mut ArpTable,
    local_ip: Option<Ipv4Addr>,
    local_mac: MacAddr,
    now: Instant,
) -> ArpAction {
    // Probes carry no sender binding.
    if packet.sender_ip.is_unspecified() || packet.sender_mac == local_mac {
        return ArpAction::None;
    }

    let for_us = local_ip.is_some_and(|ip| packet.target_ip == ip);
    let sender_known = table.lookup(&packet.sender_ip).is_some();
    let learn = sender_known
        || for_us
        || packet.operation == ArpOp::Reply
        || packet.is_gratuitous();

    if learn {
        table.insert(packet.sender_ip, packet.sender_mac, now);
    }

    match packet.operation {
        ArpOp::Request if for_us => ArpAction::Reply(ArpPacket::reply_to(packet, local_mac)),
        _ if learn => ArpAction::TableUpdated,
        _ => ArpAction::None,
    }
}

#[derive(Debug)]
struct Pending<T> {
    item: T,
    queued_at: Instant,
}

/// Frames waiting for ARP resolution, keyed by next-hop address
///
/// Bounded per address; anything older than `max_age` is expired by the
/// owner calling `expire_old`.
#[derive(Debug)]
pub struct ArpPendingQueue<T> {
    pending: HashMap<Ipv4Addr, Vec<Pending<T>>>,
    max_per_ip: usize,
    max_age: Duration,
}

impl<T> ArpPendingQueue<T> {
    pub fn new(max_per_ip: usize, max_age: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            max_per_ip,
            max_age,
        }
    }

    /// Queue an item. Returns false when the per-address limit is reached.
    pub fn enqueue(&mut self, target_ip: Ipv4Addr, item: T, now: Instant) -> bool {
        let queue = self.pending.entry(target_ip).or_default();
        if queue.len() >= self.max_per_ip {
            return false;
        }
        queue.push(Pending {
            item,
            queued_at: now,
        });
        true
    }

    /// Take every item waiting on `ip`, oldest first.
    pub fn dequeue(&mut self, ip: &Ipv4Addr) -> Vec<T> {
        self.pending
            .remove(ip)
            .map(|items| items.into_iter().map(|p| p.item).collect())
            .unwrap_or_default()
    }

    pub fn has_pending(&self, ip: &Ipv4Addr) -> bool {
        self.pending.get(ip).is_some_and(|v| !v.is_empty())
    }

    /// Drop items older than the window. Returns how many were dropped.
    pub fn expire_old(&mut self, now: Instant) -> usize {
        let max_age = self.max_age;
        let mut expired = 0;
        for queue in self.pending.values_mut() {
            let before = queue.len();
            queue.retain(|p| now.duration_since(p.queued_at) < max_age);
            expired += before - queue.len();
        }
        self.pending.retain(|_, v| !v.is_empty());
        expired
    }

    /// When the oldest queued item runs out of time
    pub fn next_expiry(&self) -> Option<Instant> {
        self.pending
            .values()
            .filter_map(|q| q.first())
            .map(|p| p.queued_at + self.max_age)
            .min()
    }

    /// Addresses with queued items
    pub fn ips(&self) -> Vec<Ipv4Addr> {
        self.pending.keys().copied().collect()
    }

    /// Total queued items across all addresses
    pub fn frame_count(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Number of addresses with queued items
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
