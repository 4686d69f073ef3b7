// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Hash map from exact (non-wildcard) topic to the set of clients subscribed
//! to it, for O(1) lookup on the hot publish path.

use std::collections::HashMap;
use std::sync::RwLock;

use codec::QoS;

use super::types::ClientId;

#[derive(Debug, Default)]
pub struct ExactIndex {
    map: RwLock<HashMap<String, HashMap<ClientId, QoS>>>,
}

impl ExactIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, topic: &str, client_id: &str, qos: QoS) {
        let mut map = self.map.write().expect("exact index poisoned");
        map.entry(topic.to_string())
            .or_default()
            .insert(client_id.to_string(), qos);
    }

    pub fn unsubscribe(&self, topic: &str, client_id: &str) {
        let mut map = self.map.write().expect("exact index poisoned");
        if let Some(clients) = map.get_mut(topic) {
            clients.remove(client_id);
            if clients.is_empty() {
                map.remove(topic);
            }
        }
    }

    /// All `(client_id, qos)` pairs subscribed to exactly this topic.
    #[must_use]
    pub fn find(&self, topic: &str) -> Vec<(ClientId, QoS)> {
        let map = self.map.read().expect("exact index poisoned");
        map.get(topic)
            .map(|clients| clients.iter().map(|(c, q)| (c.clone(), *q)).collect())
            .unwrap_or_default()
    }

    /// Remove every subscription held by `client_id`, returning the topics it
    /// was subscribed to (for cluster cleanup).
    pub fn disconnect_client(&self, client_id: &str) -> Vec<String> {
        let mut map = self.map.write().expect("exact index poisoned");
        let mut affected = Vec::new();
        map.retain(|topic, clients| {
            if clients.remove(client_id).is_some() {
                affected.push(topic.clone());
            }
            !clients.is_empty()
        });
        affected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_and_find() {
        let idx = ExactIndex::new();
        idx.subscribe("a/b", "client-1", QoS::AtLeastOnce);
        let found = idx.find("a/b");
        assert_eq!(found, vec![("client-1".to_string(), QoS::AtLeastOnce)]);
    }

    #[test]
    fn resubscribe_overwrites_qos() {
        let idx = ExactIndex::new();
        idx.subscribe("a/b", "client-1", QoS::AtMostOnce);
        idx.subscribe("a/b", "client-1", QoS::ExactOnce);
        let found = idx.find("a/b");
        assert_eq!(found, vec![("client-1".to_string(), QoS::ExactOnce)]);
    }

    #[test]
    fn disconnect_removes_all_topics() {
        let idx = ExactIndex::new();
        idx.subscribe("a/b", "client-1", QoS::AtMostOnce);
        idx.subscribe("c/d", "client-1", QoS::AtMostOnce);
        let affected = idx.disconnect_client("client-1");
        assert_eq!(affected.len(), 2);
        assert!(idx.find("a/b").is_empty());
    }
}
