// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Cluster replication of `clientId -> nodeId` and `topic/pattern ->
//! set<nodeId>`, §3 and §4.8/§9: a keyed last-writer-wins CRDT with
//! node-local monotonic timestamps. Readers tolerate brief staleness;
//! end-to-end QoS recovery (inflight retransmit) is what actually restores
//! correctness across a stale or dropped routing hop, not this map.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::routing::types::{ClientId, NodeId};

/// A single LWW register: the value currently believed true, tagged with
/// the logical clock value of the write that produced it.
#[derive(Debug, Clone)]
struct Lww<V> {
    value: V,
    clock: u64,
}

/// Events broadcast on `broadcast.subs`, §6.2 control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    ClientConnected { client_id: ClientId, node_id: NodeId },
    ClientDisconnected { client_id: ClientId },
    NodeFailure { node_id: NodeId },
}

/// Node-local monotonic counter used to tag writes to the replicated maps.
/// Not wall-clock time: only relative order between writes from the same
/// node matters, and remote deltas bring their own counter value.
#[derive(Debug, Default)]
pub struct LogicalClock(AtomicU64);

impl LogicalClock {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn tick(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Replicated `clientId -> nodeId` ownership map plus `topic/pattern ->
/// set<nodeId>` interest map.
#[derive(Debug, Default)]
pub struct ClusterMap {
    owners: RwLock<HashMap<ClientId, Lww<NodeId>>>,
    interest: RwLock<HashMap<String, HashMap<NodeId, u64>>>,
    clock: LogicalClock,
}

impl ClusterMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `client_id` now lives on `node_id`, with a fresh local
    /// clock tick. Returns the delta to broadcast on `broadcast.subs`.
    pub fn set_owner(&self, client_id: &str, node_id: &str) -> ClusterEvent {
        let clock = self.clock.tick();
        self.apply_owner(client_id, node_id, clock);
        ClusterEvent::ClientConnected {
            client_id: client_id.to_string(),
            node_id: node_id.to_string(),
        }
    }

    /// Apply a remote or local owner write, keeping only the highest-clock
    /// value per key (last-writer-wins).
    pub fn apply_owner(&self, client_id: &str, node_id: &str, clock: u64) {
        let mut owners = self.owners.write().expect("cluster owners poisoned");
        let slot = owners.entry(client_id.to_string());
        match slot {
            std::collections::hash_map::Entry::Occupied(mut e) => {
                if clock >= e.get().clock {
                    e.insert(Lww {
                        value: node_id.to_string(),
                        clock,
                    });
                }
            }
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(Lww {
                    value: node_id.to_string(),
                    clock,
                });
            }
        }
    }

    #[must_use]
    pub fn owner_of(&self, client_id: &str) -> Option<NodeId> {
        self.owners
            .read()
            .expect("cluster owners poisoned")
            .get(client_id)
            .map(|lww| lww.value.clone())
    }

    pub fn remove_owner(&self, client_id: &str) -> ClusterEvent {
        self.owners
            .write()
            .expect("cluster owners poisoned")
            .remove(client_id);
        ClusterEvent::ClientDisconnected {
            client_id: client_id.to_string(),
        }
    }

    /// Mark `pattern` as having at least one interested subscriber on
    /// `node_id`.
    pub fn add_interest(&self, pattern: &str, node_id: &str) {
        let clock = self.clock.tick();
        let mut interest = self.interest.write().expect("cluster interest poisoned");
        let nodes = interest.entry(pattern.to_string()).or_default();
        nodes
            .entry(node_id.to_string())
            .and_modify(|c| *c = (*c).max(clock))
            .or_insert(clock);
    }

    pub fn remove_interest(&self, pattern: &str, node_id: &str) {
        let mut interest = self.interest.write().expect("cluster interest poisoned");
        if let Some(nodes) = interest.get_mut(pattern) {
            nodes.remove(node_id);
            if nodes.is_empty() {
                interest.remove(pattern);
            }
        }
    }

    #[must_use]
    pub fn nodes_interested_in(&self, pattern: &str) -> HashSet<NodeId> {
        self.interest
            .read()
            .expect("cluster interest poisoned")
            .get(pattern)
            .map(|nodes| nodes.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop every node-local record of `node_id` (§7, `NodeFailure`
    /// tolerated: routing may drop a frame, recovered by QoS retransmit).
    pub fn handle_node_failure(&self, node_id: &str) {
        self.owners
            .write()
            .expect("cluster owners poisoned")
            .retain(|_, lww| lww.value != node_id);
        let mut interest = self.interest.write().expect("cluster interest poisoned");
        interest.retain(|_, nodes| {
            nodes.remove(node_id);
            !nodes.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_writer_wins_on_conflicting_owner() {
        let map = ClusterMap::new();
        map.apply_owner("c1", "node-a", 5);
        map.apply_owner("c1", "node-b", 3);
        assert_eq!(map.owner_of("c1").as_deref(), Some("node-a"));
        map.apply_owner("c1", "node-c", 7);
        assert_eq!(map.owner_of("c1").as_deref(), Some("node-c"));
    }

    #[test]
    fn interest_tracks_multiple_nodes() {
        let map = ClusterMap::new();
        map.add_interest("room/+/temp", "node-a");
        map.add_interest("room/+/temp", "node-b");
        assert_eq!(map.nodes_interested_in("room/+/temp").len(), 2);
        map.remove_interest("room/+/temp", "node-a");
        assert_eq!(map.nodes_interested_in("room/+/temp").len(), 1);
    }

    #[test]
    fn node_failure_clears_owned_clients_and_interest() {
        let map = ClusterMap::new();
        map.apply_owner("c1", "node-a", 1);
        map.add_interest("a/b", "node-a");
        map.handle_node_failure("node-a");
        assert!(map.owner_of("c1").is_none());
        assert!(map.nodes_interested_in("a/b").is_empty());
    }
}
