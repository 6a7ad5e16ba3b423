//! Port-I/O table
//!
//! Maps incoming datagrams to client interfaces by destination port and,
//! optionally, source address. Also holds each client's egress side: the
//! local source port and the remote it sends to, static or learned.

use super::meta::ClientId;
use crate::config::LearnPolicy;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone)]
struct EgressEntry {
    local_port: u16,
    remote: Option<SocketAddrV4>,
    learned: Option<SocketAddrV4>,
    learn: LearnPolicy,
}

/// Ingress routing and egress addressing of the client interfaces
#[derive(Debug, Default)]
pub struct PortTable {
    /// (destination port, source address) -> client
    exact: HashMap<(u16, Ipv4Addr), ClientId>,
    /// destination port -> client, any source
    wildcard: HashMap<u16, ClientId>,
    egress: Vec<EgressEntry>,
}

impl PortTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the next client and its ingress entry.
    pub fn add_client(
        &mut self,
        port: u16,
        source: Option<Ipv4Addr>,
        remote: Option<SocketAddrV4>,
        learn: LearnPolicy,
    ) -> ClientId {
        let id = ClientId(self.egress.len());
        self.egress.push(EgressEntry {
            local_port: port,
            remote,
            learned: None,
            learn,
        });
        self.insert(port, source, id);
        id
    }

    /// Add an ingress entry. An existing entry for the same key is
    /// replaced and returned.
    pub fn insert(
        &mut self,
        dst_port: u16,
        source: Option<Ipv4Addr>,
        id: ClientId,
    ) -> Option<ClientId> {
        match source {
            Some(ip) => self.exact.insert((dst_port, ip), id),
            None => self.wildcard.insert(dst_port, id),
        }
    }

    /// Exact source entries win over wildcard entries.
    pub fn lookup(&self, dst_port: u16, src_ip: Ipv4Addr) -> Option<ClientId> {
        self.exact
            .get(&(dst_port, src_ip))
            .or_else(|| self.wildcard.get(&dst_port))
            .copied()
    }

    pub fn local_port(&self, id: ClientId) -> Option<u16> {
        self.egress.get(id.0).map(|e| e.local_port)
    }

    /// Where datagrams sent by `id` go
    pub fn destination(&self, id: ClientId) -> Option<SocketAddrV4> {
        let entry = self.egress.get(id.0)?;
        match entry.learn {
            LearnPolicy::Off => entry.remote,
            LearnPolicy::Fill => entry.remote.or(entry.learned),
            LearnPolicy::Override => entry.learned.or(entry.remote),
        }
    }

    /// Record the peer seen on ingress. Returns true when the egress
    /// destination of `id` changed.
    pub fn learn(&mut self, id: ClientId, peer: SocketAddrV4) -> bool {
        let Some(entry) = self.egress.get_mut(id.0) else {
            return false;
        };
        let allowed = match entry.learn {
            LearnPolicy::Off => false,
            LearnPolicy::Fill => entry.remote.is_none(),
            LearnPolicy::Override => true,
        };
        if !allowed || entry.learned == Some(peer) {
            return false;
        }
        entry.learned = Some(peer);
        true
    }
}

/// Port table shared between the splitter (learning) and UDP egress
pub type SharedPortTable = Arc<RwLock<PortTable>>;

pub fn shared(table: PortTable) -> SharedPortTable {
    Arc::new(RwLock::new(table))
}

/// Read access that survives a poisoned lock
pub fn read<R>(table: &SharedPortTable, f: impl FnOnce(&PortTable) -> R) -> R {
    f(&table.read().unwrap_or_else(PoisonError::into_inner))
}

pub fn write<R>(table: &SharedPortTable, f: impl FnOnce(&mut PortTable) -> R) -> R {
    f(&mut table.write().unwrap_or_else(PoisonError::into_inner))
}
