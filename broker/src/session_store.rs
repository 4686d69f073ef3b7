// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Session Store (C5), §4.4: persisted per-client state across reconnects
//! — sessions, subscriptions, the offline queue and the QoS 1/2 inflight
//! tables. Backed by a pluggable `SessionBackend`, mirroring the
//! `RetainedBackend` seam in [`crate::retained`] and the teacher's
//! `connectors/` pattern for swappable storage drivers; an in-memory
//! reference backend is the default.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::RwLock;

use crate::routing::types::{BrokerMessage, ClientId, InflightMap, InflightOut, InflightState, Session, Subscription};
use codec::PacketId;

/// Per-client persisted state tracked by the in-memory backend.
#[derive(Debug, Default)]
struct ClientRecord {
    session: Option<Session>,
    subscriptions: HashMap<String, Subscription>,
    offline_queue: VecDeque<BrokerMessage>,
    inflight_out: InflightMap<InflightOut>,
    inflight_in: InflightMap<()>,
}

/// Pluggable persistence driver for session state, mirroring the logical
/// schema of §6.3.
pub trait SessionBackend: Send + Sync + std::fmt::Debug {
    fn load_session(&self, client_id: &str) -> Option<Session>;
    fn save_session(&self, session: Session);
    fn delete_session(&self, client_id: &str);
}

/// Default single-node backend: an `RwLock<HashMap>` of per-client records.
/// Implements both [`SessionBackend`] and the richer offline-queue/
/// subscription/inflight operations §4.4 requires, since those need no
/// external driver seam to be useful for a single node — a clustered
/// deployment shares this state via the replicated cluster map
/// ([`crate::cluster::ClusterMap`]) rather than by sharing this store.
#[derive(Debug, Default)]
pub struct SessionStore {
    clients: RwLock<HashMap<ClientId, ClientRecord>>,
    offline_queue_cap: usize,
}

impl SessionBackend for SessionStore {
    fn load_session(&self, client_id: &str) -> Option<Session> {
        self.clients
            .read()
            .expect("session store poisoned")
            .get(client_id)
            .and_then(|r| r.session.clone())
    }

    fn save_session(&self, session: Session) {
        let mut clients = self.clients.write().expect("session store poisoned");
        clients
            .entry(session.client_id.clone())
            .or_default()
            .session = Some(session);
    }

    fn delete_session(&self, client_id: &str) {
        self.clients
            .write()
            .expect("session store poisoned")
            .remove(client_id);
    }
}

impl SessionStore {
    #[must_use]
    pub fn new(offline_queue_cap: usize) -> Self {
        Self {
            clients: RwLock::default(),
            offline_queue_cap,
        }
    }

    pub fn add_subscription(&self, client_id: &str, sub: Subscription) {
        let mut clients = self.clients.write().expect("session store poisoned");
        clients
            .entry(client_id.to_string())
            .or_default()
            .subscriptions
            .insert(sub.topic_filter.clone(), sub);
    }

    pub fn remove_subscription(&self, client_id: &str, filter: &str) {
        let mut clients = self.clients.write().expect("session store poisoned");
        if let Some(record) = clients.get_mut(client_id) {
            record.subscriptions.remove(filter);
        }
    }

    #[must_use]
    pub fn subscriptions(&self, client_id: &str) -> Vec<Subscription> {
        self.clients
            .read()
            .expect("session store poisoned")
            .get(client_id)
            .map(|r| r.subscriptions.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Enqueue a message for an offline client. Overflow policy is
    /// drop-oldest; returns `true` if a queued message was dropped to make
    /// room, so the caller can log the configured WARN (§4.4).
    pub fn enqueue_offline(&self, client_id: &str, message: BrokerMessage) -> bool {
        let mut clients = self.clients.write().expect("session store poisoned");
        let record = clients.entry(client_id.to_string()).or_default();
        let mut dropped = false;
        if record.offline_queue.len() >= self.offline_queue_cap {
            record.offline_queue.pop_front();
            dropped = true;
        }
        record.offline_queue.push_back(message);
        dropped
    }

    /// Drain up to `cap` queued messages in FIFO order.
    pub fn drain_offline(&self, client_id: &str, cap: usize) -> Vec<BrokerMessage> {
        let mut clients = self.clients.write().expect("session store poisoned");
        let Some(record) = clients.get_mut(client_id) else {
            return Vec::new();
        };
        let take = cap.min(record.offline_queue.len());
        record.offline_queue.drain(..take).collect()
    }

    #[must_use]
    pub fn count_offline(&self, client_id: &str) -> usize {
        self.clients
            .read()
            .expect("session store poisoned")
            .get(client_id)
            .map_or(0, |r| r.offline_queue.len())
    }

    pub fn purge_offline(&self, client_id: &str) -> usize {
        let mut clients = self.clients.write().expect("session store poisoned");
        clients.get_mut(client_id).map_or(0, |r| {
            let n = r.offline_queue.len();
            r.offline_queue.clear();
            n
        })
    }

    /// Record a newly sent outbound QoS 1/2 message under `packet_id`.
    pub fn add_inflight_out(&self, client_id: &str, packet_id: PacketId, message: BrokerMessage) {
        let mut clients = self.clients.write().expect("session store poisoned");
        clients
            .entry(client_id.to_string())
            .or_default()
            .inflight_out
            .insert(
                packet_id,
                InflightOut {
                    state: InflightState::Published,
                    message,
                },
            );
    }

    /// Transition a QoS 2 outbound entry to `received` on PUBREC.
    pub fn mark_inflight_received(&self, client_id: &str, packet_id: PacketId) {
        let mut clients = self.clients.write().expect("session store poisoned");
        if let Some(record) = clients.get_mut(client_id) {
            if let Some(entry) = record.inflight_out.get_mut(&packet_id) {
                entry.state = InflightState::Received;
            }
        }
    }

    pub fn remove_inflight_out(&self, client_id: &str, packet_id: PacketId) -> Option<InflightOut> {
        let mut clients = self.clients.write().expect("session store poisoned");
        clients
            .get_mut(client_id)
            .and_then(|r| r.inflight_out.remove(&packet_id))
    }

    #[must_use]
    pub fn inflight_out(&self, client_id: &str) -> BTreeMap<PacketId, InflightOut> {
        self.clients
            .read()
            .expect("session store poisoned")
            .get(client_id)
            .map(|r| r.inflight_out.clone())
            .unwrap_or_default()
    }

    /// Next free outbound packet id not currently inflight, wrapping
    /// around the 16-bit space (§4.7.4 step 3). Returns `None` when every
    /// id is in use (flow-control backpressure).
    #[must_use]
    pub fn next_free_packet_id(&self, client_id: &str) -> Option<PacketId> {
        let clients = self.clients.read().expect("session store poisoned");
        let used = clients
            .get(client_id)
            .map(|r| &r.inflight_out)
            .map(|m| m.keys().copied().collect::<std::collections::HashSet<_>>())
            .unwrap_or_default();
        (1..=PacketId::MAX).find(|id| !used.contains(id))
    }

    /// Record an inbound QoS 2 PUBLISH's packet id to deduplicate a
    /// retransmitted `dup=true` PUBLISH before PUBREL arrives (§4.7.3 step
    /// 5, §7 duplicate handling).
    pub fn add_inflight_in(&self, client_id: &str, packet_id: PacketId) {
        let mut clients = self.clients.write().expect("session store poisoned");
        clients
            .entry(client_id.to_string())
            .or_default()
            .inflight_in
            .insert(packet_id, ());
    }

    #[must_use]
    pub fn has_inflight_in(&self, client_id: &str, packet_id: PacketId) -> bool {
        self.clients
            .read()
            .expect("session store poisoned")
            .get(client_id)
            .is_some_and(|r| r.inflight_in.contains_key(&packet_id))
    }

    pub fn remove_inflight_in(&self, client_id: &str, packet_id: PacketId) {
        let mut clients = self.clients.write().expect("session store poisoned");
        if let Some(record) = clients.get_mut(client_id) {
            record.inflight_in.remove(&packet_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::types::ConnectionState;
    use codec::QoS;

    fn session(client_id: &str) -> Session {
        Session::new(client_id, "node-1", false)
    }

    #[test]
    fn session_round_trip() {
        let store = SessionStore::new(10);
        assert!(store.load_session("c1").is_none());
        store.save_session(session("c1"));
        let loaded = store.load_session("c1").unwrap();
        assert_eq!(loaded.client_id, "c1");
        assert_eq!(loaded.connected, ConnectionState::Online);
        store.delete_session("c1");
        assert!(store.load_session("c1").is_none());
    }

    #[test]
    fn offline_queue_drops_oldest_on_overflow() {
        let store = SessionStore::new(2);
        let msg = |t: &str| BrokerMessage::new("p", t, vec![], QoS::AtLeastOnce, false);
        assert!(!store.enqueue_offline("c1", msg("a")));
        assert!(!store.enqueue_offline("c1", msg("b")));
        assert!(store.enqueue_offline("c1", msg("c")));
        let drained = store.drain_offline("c1", 10);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].topic, "b");
        assert_eq!(drained[1].topic, "c");
    }

    #[test]
    fn inflight_out_lifecycle() {
        let store = SessionStore::new(10);
        let msg = BrokerMessage::new("p", "a/b", vec![], QoS::ExactOnce, false);
        store.add_inflight_out("c1", 1, msg);
        assert_eq!(store.inflight_out("c1").len(), 1);
        store.mark_inflight_received("c1", 1);
        assert_eq!(
            store.inflight_out("c1").get(&1).unwrap().state,
            InflightState::Received
        );
        let removed = store.remove_inflight_out("c1", 1);
        assert!(removed.is_some());
        assert!(store.inflight_out("c1").is_empty());
    }

    #[test]
    fn packet_id_allocation_skips_inflight() {
        let store = SessionStore::new(10);
        let msg = BrokerMessage::new("p", "a/b", vec![], QoS::AtLeastOnce, false);
        let id = store.next_free_packet_id("c1").unwrap();
        assert_eq!(id, 1);
        store.add_inflight_out("c1", 1, msg);
        let next = store.next_free_packet_id("c1").unwrap();
        assert_eq!(next, 2);
    }

    #[test]
    fn incoming_inflight_deduplicates() {
        let store = SessionStore::new(10);
        assert!(!store.has_inflight_in("c1", 9));
        store.add_inflight_in("c1", 9);
        assert!(store.has_inflight_in("c1", 9));
        store.remove_inflight_in("c1", 9);
        assert!(!store.has_inflight_in("c1", 9));
    }
}
