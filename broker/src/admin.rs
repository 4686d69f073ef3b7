// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Administrative surface (§6.4): narrow request/response operations the
//! core exposes for an out-of-scope GraphQL/dashboard layer to call over
//! the bus's control channel. Implemented as a thin struct over C3/C5/C6
//! rather than a full admin protocol, matching §1's framing of the admin
//! surface as "treated as external".

use crate::bus::BusFrame;
use crate::error::Error;
use crate::routing::types::{BrokerMessage, ConnectionState, NodeId};
use crate::session_handler::BrokerCore;

/// `getClientDetails(clientId)` response.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientDetails {
    pub node_id: NodeId,
    pub clean_start: bool,
    pub client_address: String,
    pub session_expiry_interval: u32,
}

#[derive(Debug, Clone)]
pub struct AdminApi<'a> {
    core: &'a BrokerCore,
}

impl<'a> AdminApi<'a> {
    #[must_use]
    pub const fn new(core: &'a BrokerCore) -> Self {
        Self { core }
    }

    #[must_use]
    pub fn get_client_details(&self, client_id: &str) -> Option<ClientDetails> {
        let session = self.core.sessions.load_session(client_id)?;
        Some(ClientDetails {
            node_id: session.node_id,
            clean_start: session.clean_start,
            client_address: session.client_address,
            session_expiry_interval: session.session_expiry_interval,
        })
    }

    #[must_use]
    pub fn get_client_status(&self, client_id: &str) -> ConnectionState {
        match self.core.sessions.load_session(client_id) {
            Some(session) => session.connected,
            None => ConnectionState::Unknown,
        }
    }

    /// Admin-privileged publish: bypasses ACL, delivered the same way a
    /// regular ingress PUBLISH is (fan-out via C3/C6, archived via C8).
    ///
    /// # Errors
    ///
    /// Returns an error only for a malformed topic; authorization is
    /// bypassed by design of this interface.
    pub fn publish(&self, message: BrokerMessage) -> Result<(), Error> {
        if message.retain {
            if message.payload.is_empty() {
                self.core.retained.delete(&message.topic);
                self.core.bus.publish_retained_delta(&message.topic, None);
            } else {
                self.core.retained.put(&message.topic, message.clone());
                self.core.bus.publish_retained_delta(&message.topic, Some(message.clone()));
            }
        }
        for subscriber in self.core.subscriptions.find_all_subscribers(&message.topic) {
            let mut outgoing = message.clone();
            outgoing.qos = outgoing.downgrade_qos(subscriber.qos);
            match self.core.cluster.owner_of(&subscriber.client_id) {
                Some(node) if node != self.core.node_id => {
                    let _ = self.core.bus.send_to_node(&node, vec![outgoing]);
                }
                _ => {
                    if self
                        .core
                        .bus
                        .send_to_client(&subscriber.client_id, BusFrame::Single(outgoing.clone()))
                        .is_err()
                    {
                        self.core.sessions.enqueue_offline(&subscriber.client_id, outgoing);
                    }
                }
            }
        }
        self.core.archive.ingest(&message);
        Ok(())
    }

    /// `purgeQueued(clientId?)`: clears one client's offline queue, or
    /// every known client's if `client_id` is `None`. Returns the count of
    /// messages deleted.
    pub fn purge_queued(&self, client_id: Option<&str>, known_clients: &[String]) -> usize {
        match client_id {
            Some(id) => self.core.sessions.purge_offline(id),
            None => known_clients.iter().map(|id| self.core.sessions.purge_offline(id)).sum(),
        }
    }

    #[must_use]
    pub fn get_session_count(&self, known_clients: &[String]) -> usize {
        known_clients
            .iter()
            .filter(|id| self.core.sessions.load_session(id).is_some())
            .count()
    }

    #[must_use]
    pub fn get_all_client_metrics(&self, known_clients: &[String]) -> Vec<ClientMetrics> {
        known_clients
            .iter()
            .filter_map(|id| {
                let session = self.core.sessions.load_session(id)?;
                Some(ClientMetrics {
                    client_id: id.clone(),
                    messages_in: session.messages_in,
                    messages_out: session.messages_out,
                    offline_queue_len: self.core.sessions.count_offline(id),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMetrics {
    pub client_id: String,
    pub messages_in: u64,
    pub messages_out: u64,
    pub offline_queue_len: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchivePipeline;
    use crate::cluster::ClusterMap;
    use crate::retained::RetainedStore;
    use crate::routing::SubscriptionManager;
    use crate::session_store::SessionStore;
    use codec::QoS;
    use std::sync::Arc;

    fn core() -> BrokerCore {
        BrokerCore::new(
            "node-1",
            Arc::new(SubscriptionManager::new()),
            Arc::new(SessionStore::new(100)),
            Arc::new(RetainedStore::default()),
            Arc::new(ClusterMap::new()),
            Arc::new(crate::bus::MessageBus::new()),
            Arc::new(ArchivePipeline::new(Vec::new())),
        )
    }

    #[test]
    fn unknown_client_status_is_unknown() {
        let core = core();
        let admin = AdminApi::new(&core);
        assert_eq!(admin.get_client_status("ghost"), ConnectionState::Unknown);
        assert!(admin.get_client_details("ghost").is_none());
    }

    #[test]
    fn purge_queued_clears_offline_messages() {
        let core = core();
        let msg = BrokerMessage::new("p", "a/b", vec![], QoS::AtLeastOnce, false);
        core.sessions.enqueue_offline("c1", msg);
        let admin = AdminApi::new(&core);
        assert_eq!(admin.purge_queued(Some("c1"), &[]), 1);
        assert_eq!(core.sessions.count_offline("c1"), 0);
    }

    #[test]
    fn admin_publish_reaches_subscriber_mailbox() {
        let core = core();
        core.subscriptions
            .subscribe(crate::routing::types::Subscription::new("c1", "a/b", QoS::AtMostOnce));
        core.bus.register_client("c1");
        let admin = AdminApi::new(&core);
        let msg = BrokerMessage::new("admin", "a/b", b"hi".to_vec(), QoS::AtMostOnce, false);
        admin.publish(msg).unwrap();
    }

    #[test]
    fn session_count_reflects_known_clients() {
        let core = core();
        core.sessions.save_session(crate::routing::types::Session::new("c1", "node-1", true));
        let admin = AdminApi::new(&core);
        assert_eq!(admin.get_session_count(&["c1".to_string(), "c2".to_string()]), 1);
    }
}
