//! ARP cache (IP to MAC mapping)
//!
//! `ArpTable` is the plain data structure. `ArpCache` wraps it for the ARP
//! module, the only writer, and hands out `ArpCacheReader`s to the resolver.
//! Every mutation bumps a generation counter on a `watch` channel so readers
//! waiting on a pending address wake up.

use crate::protocol::MacAddr;
use crate::{Error, Result};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// ARP entry state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpState {
    /// Request sent, waiting for a reply
    Incomplete,
    /// Confirmed recently
    Reachable,
    /// Not confirmed for a while, still usable
    Stale,
}

#[derive(Debug, Clone)]
struct ArpEntry {
    mac: MacAddr,
    state: ArpState,
    last_updated: Instant,
}

/// Outcome of a cache lookup as seen by the egress path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Resolved(MacAddr),
    Pending,
}

/// ARP table for IP to MAC resolution
#[derive(Debug)]
pub struct ArpTable {
    entries: HashMap<Ipv4Addr, ArpEntry>,
    reachable_time: Duration,
    stale_time: Duration,
    incomplete_time: Duration,
}

impl ArpTable {
    pub fn new(reachable_time: Duration, stale_time: Duration, incomplete_time: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            reachable_time,
            stale_time,
            incomplete_time,
        }
    }

    /// Insert or refresh a binding; the entry becomes Reachable.
    pub fn insert(&mut self, ip: Ipv4Addr, mac: MacAddr, now: Instant) {
        self.entries.insert(
            ip,
            ArpEntry {
                mac,
                state: ArpState::Reachable,
                last_updated: now,
            },
        );
    }

    pub fn lookup(&self, ip: &Ipv4Addr) -> Option<(MacAddr, ArpState)> {
        self.entries.get(ip).map(|e| (e.mac, e.state))
    }

    /// Stale entries still resolve; only Incomplete and absent ones pend.
    pub fn resolve(&self, ip: &Ipv4Addr) -> Resolution {
        match self.entries.get(ip) {
            Some(e) if e.state != ArpState::Incomplete => Resolution::Resolved(e.mac),
            _ => Resolution::Pending,
        }
    }

    /// Mark an address as awaiting a reply.
    ///
    /// Returns false when a request is already outstanding or the address
    /// already resolves, so the caller sends at most one request per IP.
    pub fn mark_incomplete(&mut self, ip: Ipv4Addr, now: Instant) -> bool {
        if self.entries.contains_key(&ip) {
            return false;
        }
        self.entries.insert(
            ip,
            ArpEntry {
                mac: MacAddr::ZERO,
                state: ArpState::Incomplete,
                last_updated: now,
            },
        );
        true
    }

    /// Age entries. Returns the number of entries removed.
    pub fn refresh_states(&mut self, now: Instant) -> usize {
        for entry in self.entries.values_mut() {
            let age = now.duration_since(entry.last_updated);
            if entry.state == ArpState::Reachable && age >= self.reachable_time {
                entry.state = ArpState::Stale;
            }
        }

        let before = self.entries.len();
        let (stale_time, incomplete_time) = (self.stale_time, self.incomplete_time);
        self.entries.retain(|_, e| {
            let age = now.duration_since(e.last_updated);
            match e.state {
                ArpState::Incomplete => age < incomplete_time,
                _ => age < stale_time,
            }
        });
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Writer handle owned by the ARP module
#[derive(Debug)]
pub struct ArpCache {
    table: Arc<RwLock<ArpTable>>,
    generation: watch::Sender<u64>,
}

/// Read-only handle
#[derive(Debug, Clone)]
pub struct ArpCacheReader {
    table: Arc<RwLock<ArpTable>>,
    generation: watch::Receiver<u64>,
}

impl ArpCache {
    pub fn new(table: ArpTable) -> (Self, ArpCacheReader) {
        let table = Arc::new(RwLock::new(table));
        let (tx, rx) = watch::channel(0);
        let reader = ArpCacheReader {
            table: table.clone(),
            generation: rx,
        };
        (
            Self {
                table,
                generation: tx,
            },
            reader,
        )
    }

    /// Mutate the table under the write lock and wake readers.
    pub fn update<R>(&self, f: impl FnOnce(&mut ArpTable) -> R) -> R {
        let result = {
            let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
            f(&mut table)
        };
        self.generation.send_modify(|g| *g = g.wrapping_add(1));
        result
    }

    pub fn len(&self) -> usize {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArpCacheReader {
    pub fn resolve(&self, ip: Ipv4Addr) -> Resolution {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .resolve(&ip)
    }

    pub fn lookup(&self, ip: Ipv4Addr) -> Option<(MacAddr, ArpState)> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .lookup(&ip)
    }

    pub fn len(&self) -> usize {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for the next cache mutation. Fails once the writer is gone.
    pub async fn changed(&mut self) -> Result<()> {
        self.generation
            .changed()
            .await
            .map_err(|_| Error::StreamClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_table() -> ArpTable {
        ArpTable::new(
            Duration::from_secs(30),
            Duration::from_secs(120),
            Duration::from_secs(3),
        )
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut table = make_table();
        let ip = Ipv4Addr::new(192, 168, 1, 1);
        let mac = MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);

        table.insert(ip, mac, Instant::now());

        let (found_mac, state) = table.lookup(&ip).unwrap();
        assert_eq!(found_mac, mac);
        assert_eq!(state, ArpState::Reachable);
        assert_eq!(table.resolve(&ip), Resolution::Resolved(mac));
    }

    #[test]
    fn test_mark_incomplete_once() {
        let mut table = make_table();
        let ip = Ipv4Addr::new(192, 168, 1, 9);
        let now = Instant::now();

        assert!(table.mark_incomplete(ip, now));
        assert!(!table.mark_incomplete(ip, now));
        assert_eq!(table.resolve(&ip), Resolution::Pending);

        // A reply completes the entry.
        table.insert(ip, MacAddr([2, 0, 0, 0, 0, 9]), now);
        assert!(!table.mark_incomplete(ip, now));
        assert!(matches!(table.resolve(&ip), Resolution::Resolved(_)));
    }

    #[test]
    fn test_aging() {
        let mut table = make_table();
        let start = Instant::now();
        let ip = Ipv4Addr::new(10, 0, 0, 1);
        let pending = Ipv4Addr::new(10, 0, 0, 2);
        table.insert(ip, MacAddr([2, 0, 0, 0, 0, 1]), start);
        table.mark_incomplete(pending, start);

        assert_eq!(table.refresh_states(start + Duration::from_secs(5)), 1);
        assert!(table.lookup(&pending).is_none());

        table.refresh_states(start + Duration::from_secs(31));
        assert_eq!(table.lookup(&ip).unwrap().1, ArpState::Stale);
        // Stale entries still resolve.
        assert!(matches!(table.resolve(&ip), Resolution::Resolved(_)));

        assert_eq!(table.refresh_states(start + Duration::from_secs(121)), 1);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_reader_sees_updates() {
        let (cache, mut reader) = ArpCache::new(make_table());
        let ip = Ipv4Addr::new(10, 0, 0, 1);
        let mac = MacAddr([2, 0, 0, 0, 0, 1]);

        assert_eq!(reader.resolve(ip), Resolution::Pending);
        cache.update(|t| t.insert(ip, mac, Instant::now()));
        reader.changed().await.unwrap();
        assert_eq!(reader.resolve(ip), Resolution::Resolved(mac));
        assert_eq!(reader.len(), 1);

        drop(cache);
        assert!(reader.changed().await.is_err());
    }
}
