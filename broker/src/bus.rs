// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Message Bus (C6), §4.5: intra- and inter-node transport of
//! `BrokerMessage`, modeled on the teacher's existing actor/mailbox style
//! (`Sender`/`Receiver` pairs per destination, as used throughout the
//! original `dispatcher`/`session` actors).
//!
//! Logical addresses:
//! - `client.<clientId>` — single-reader mailbox for the Session Handler
//!   that currently owns that client's connection.
//! - `node.<nodeId>` — fan-in for cross-node bulk delivery.
//! - `broadcast.retained` / `broadcast.subs` — cluster-wide fan-out.
//!
//! Delivery is at-least-once within a node (bounded mpsc with backpressure)
//! and best-effort across nodes; cross-node drops for QoS ≥ 1 are repaired
//! by the origin session's inflight retransmit, not by this layer.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::{broadcast, mpsc};

use crate::cluster::ClusterEvent;
use crate::error::{Error, ErrorKind};
use crate::routing::types::{BrokerMessage, ClientId, NodeId};

/// A bus frame: either a single message or a batch destined for the same
/// recipient. Order within a batch for one (publisher, subscriber) pair is
/// preserved; order across publishers is not (§4.5).
#[derive(Debug, Clone)]
pub enum BusFrame {
    Single(BrokerMessage),
    Bulk(Vec<BrokerMessage>),
}

impl BusFrame {
    #[must_use]
    pub fn into_vec(self) -> Vec<BrokerMessage> {
        match self {
            Self::Single(m) => vec![m],
            Self::Bulk(messages) => messages,
        }
    }
}

const MAILBOX_CAPACITY: usize = 1024;
const BROADCAST_CAPACITY: usize = 256;

/// Intra- and inter-node transport of `BrokerMessage`.
#[derive(Debug)]
pub struct MessageBus {
    clients: RwLock<HashMap<ClientId, mpsc::Sender<BusFrame>>>,
    nodes: RwLock<HashMap<NodeId, mpsc::Sender<BusFrame>>>,
    retained_tx: broadcast::Sender<(String, Option<BrokerMessage>)>,
    subs_tx: broadcast::Sender<ClusterEvent>,
}

impl Default for MessageBus {
    fn default() -> Self {
        let (retained_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (subs_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            clients: RwLock::default(),
            nodes: RwLock::default(),
            retained_tx,
            subs_tx,
        }
    }
}

impl MessageBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `client.<client_id>`'s mailbox, replacing any prior sender
    /// (takeover closes the old connection's receiver implicitly — the
    /// prior `SessionHandler` observes its channel closed).
    pub fn register_client(&self, client_id: &str) -> mpsc::Receiver<BusFrame> {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        self.clients
            .write()
            .expect("bus clients poisoned")
            .insert(client_id.to_string(), tx);
        rx
    }

    pub fn unregister_client(&self, client_id: &str) {
        self.clients
            .write()
            .expect("bus clients poisoned")
            .remove(client_id);
    }

    #[must_use]
    pub fn has_client(&self, client_id: &str) -> bool {
        self.clients
            .read()
            .expect("bus clients poisoned")
            .contains_key(client_id)
    }

    /// Non-blocking enqueue onto `client.<client_id>`'s mailbox (§9: "cross
    /// session work must be strictly non-blocking enqueues").
    ///
    /// # Errors
    ///
    /// Returns `BusError` if the client has no registered mailbox or its
    /// mailbox is full/closed.
    pub fn send_to_client(&self, client_id: &str, frame: BusFrame) -> Result<(), Error> {
        let tx = self
            .clients
            .read()
            .expect("bus clients poisoned")
            .get(client_id)
            .cloned();
        let Some(tx) = tx else {
            return Err(Error::from_string(
                ErrorKind::BusError,
                format!("no mailbox registered for client {client_id}"),
            ));
        };
        tx.try_send(frame).map_err(|err| {
            Error::from_string(
                ErrorKind::BusError,
                format!("mailbox send to {client_id} failed: {err}"),
            )
        })
    }

    pub fn register_node(&self, node_id: &str) -> mpsc::Receiver<BusFrame> {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        self.nodes
            .write()
            .expect("bus nodes poisoned")
            .insert(node_id.to_string(), tx);
        rx
    }

    /// Best-effort cross-node batch delivery to `node.<node_id>`.
    ///
    /// # Errors
    ///
    /// Returns `BusError` if the node has no registered mailbox or it is
    /// full; callers treat this as a tolerated drop per §4.5/§7.
    pub fn send_to_node(&self, node_id: &str, messages: Vec<BrokerMessage>) -> Result<(), Error> {
        let tx = self
            .nodes
            .read()
            .expect("bus nodes poisoned")
            .get(node_id)
            .cloned();
        let Some(tx) = tx else {
            return Err(Error::from_string(
                ErrorKind::BusError,
                format!("no mailbox registered for node {node_id}"),
            ));
        };
        tx.try_send(BusFrame::Bulk(messages)).map_err(|err| {
            Error::from_string(
                ErrorKind::BusError,
                format!("mailbox send to node {node_id} failed: {err}"),
            )
        })
    }

    #[must_use]
    pub fn subscribe_retained(&self) -> broadcast::Receiver<(String, Option<BrokerMessage>)> {
        self.retained_tx.subscribe()
    }

    /// Broadcast a retained-store change. `None` signals a delete.
    pub fn publish_retained_delta(&self, topic: &str, message: Option<BrokerMessage>) {
        // A lagging/absent subscriber is fine: retained deltas are
        // eventually-consistent cluster state, not a QoS-bearing path.
        let _ = self.retained_tx.send((topic.to_string(), message));
    }

    #[must_use]
    pub fn subscribe_subs(&self) -> broadcast::Receiver<ClusterEvent> {
        self.subs_tx.subscribe()
    }

    pub fn publish_subs_event(&self, event: ClusterEvent) {
        let _ = self.subs_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::QoS;

    #[tokio::test]
    async fn client_mailbox_round_trip() {
        let bus = MessageBus::new();
        let mut rx = bus.register_client("c1");
        let msg = BrokerMessage::new("p", "a/b", vec![1, 2], QoS::AtMostOnce, false);
        bus.send_to_client("c1", BusFrame::Single(msg.clone()))
            .unwrap();
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.into_vec(), vec![msg]);
    }

    #[test]
    fn send_to_unregistered_client_errors() {
        let bus = MessageBus::new();
        let msg = BrokerMessage::new("p", "a/b", vec![], QoS::AtMostOnce, false);
        assert!(bus.send_to_client("ghost", BusFrame::Single(msg)).is_err());
    }

    #[tokio::test]
    async fn node_bulk_preserves_order() {
        let bus = MessageBus::new();
        let mut rx = bus.register_node("node-2");
        let batch = vec![
            BrokerMessage::new("p", "a/1", vec![], QoS::AtMostOnce, false),
            BrokerMessage::new("p", "a/2", vec![], QoS::AtMostOnce, false),
        ];
        bus.send_to_node("node-2", batch.clone()).unwrap();
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.into_vec(), batch);
    }

    #[tokio::test]
    async fn retained_broadcast_reaches_subscribers() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe_retained();
        bus.publish_retained_delta("sensor/1", None);
        let (topic, message) = rx.recv().await.unwrap();
        assert_eq!(topic, "sensor/1");
        assert!(message.is_none());
    }
}
