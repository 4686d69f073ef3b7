// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Retained-message store (C4), §4.3. Keyed by topic, overwrite-on-put,
//! delete-on-empty-payload. A durable `RetainedBackend` plays the role of
//! the external persistence driver the spec calls for; the in-memory
//! implementation is the reference/single-node backend. A second, purely
//! in-process index is kept for wildcard replay on SUBSCRIBE: unlike the
//! subscription trie (C1), which stores wildcard *filters* and is queried
//! with a concrete topic, this index stores concrete *topics* and is
//! queried with a (possibly wildcarded) filter — the opposite traversal —
//! so it cannot reuse `routing::topic_trie::TopicTrie` directly.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::routing::types::BrokerMessage;

const SYS_PREFIX: &str = "$SYS";

/// Pluggable persistence driver for retained messages, §1/§4.3 ("a durable
/// keyed store backed by an external persistence driver").
pub trait RetainedBackend: Send + Sync + std::fmt::Debug {
    fn put(&self, topic: &str, message: BrokerMessage);
    fn delete(&self, topic: &str);
    fn get(&self, topic: &str) -> Option<BrokerMessage>;
}

/// Default single-node backend: a plain `RwLock<HashMap>`.
#[derive(Debug, Default)]
pub struct InMemoryRetainedBackend {
    map: RwLock<HashMap<String, BrokerMessage>>,
}

impl RetainedBackend for InMemoryRetainedBackend {
    fn put(&self, topic: &str, message: BrokerMessage) {
        self.map
            .write()
            .expect("retained backend poisoned")
            .insert(topic.to_string(), message);
    }

    fn delete(&self, topic: &str) {
        self.map
            .write()
            .expect("retained backend poisoned")
            .remove(topic);
    }

    fn get(&self, topic: &str) -> Option<BrokerMessage> {
        self.map
            .read()
            .expect("retained backend poisoned")
            .get(topic)
            .cloned()
    }
}

#[derive(Debug, Default)]
struct MatchNode {
    children: HashMap<String, RwLock<MatchNode>>,
    message: Option<BrokerMessage>,
}

impl MatchNode {
    fn is_empty(&self) -> bool {
        self.children.is_empty() && self.message.is_none()
    }
}

/// Wildcard-queryable index of concrete retained topics, backing
/// [`RetainedStore::find_matching`].
#[derive(Debug, Default)]
struct MatchIndex {
    root: RwLock<MatchNode>,
}

impl MatchIndex {
    fn put(&self, topic: &str, message: BrokerMessage) {
        let levels: Vec<&str> = topic.split('/').collect();
        let mut guard = self.root.write().expect("retained index poisoned");
        let mut node = &mut *guard;
        for level in &levels {
            node = node
                .children
                .entry((*level).to_string())
                .or_default()
                .get_mut()
                .expect("retained index poisoned");
        }
        node.message = Some(message);
    }

    fn delete(&self, topic: &str) {
        let levels: Vec<&str> = topic.split('/').collect();
        let mut guard = self.root.write().expect("retained index poisoned");
        Self::delete_rec(&mut guard, &levels);
    }

    fn delete_rec(node: &mut MatchNode, levels: &[&str]) {
        if levels.is_empty() {
            node.message = None;
            return;
        }
        let level = levels[0];
        let mut prune = false;
        if let Some(child_lock) = node.children.get(level) {
            let mut child = child_lock.write().expect("retained index poisoned");
            Self::delete_rec(&mut child, &levels[1..]);
            prune = child.is_empty();
        }
        if prune {
            node.children.remove(level);
        }
    }

    /// Enumerate retained messages whose topic matches `filter`. `filter`
    /// may contain `+`/`#`; bare `#` excludes `$SYS/...` per MQTT
    /// convention, mirroring the subscription trie's policy.
    fn find_matching(&self, filter: &str) -> Vec<BrokerMessage> {
        let levels: Vec<&str> = filter.split('/').collect();
        let guard = self.root.read().expect("retained index poisoned");
        let mut out = Vec::new();
        Self::find_rec(&guard, &levels, true, &mut out);
        out
    }

    fn find_rec(node: &MatchNode, levels: &[&str], at_root: bool, out: &mut Vec<BrokerMessage>) {
        if levels.is_empty() {
            if let Some(message) = &node.message {
                out.push(message.clone());
            }
            return;
        }
        let level = levels[0];
        let rest = &levels[1..];

        match level {
            "#" => Self::collect_all(node, at_root, out),
            "+" => {
                for (name, child_lock) in &node.children {
                    if at_root && name == SYS_PREFIX {
                        continue;
                    }
                    let child = child_lock.read().expect("retained index poisoned");
                    Self::find_rec(&child, rest, false, out);
                }
            }
            literal => {
                if let Some(child_lock) = node.children.get(literal) {
                    let child = child_lock.read().expect("retained index poisoned");
                    Self::find_rec(&child, rest, false, out);
                }
            }
        }
    }

    /// Collect every stored message at or below `node`, excluding the
    /// `$SYS` subtree when starting from the root (bare `#` semantics).
    fn collect_all(node: &MatchNode, at_root: bool, out: &mut Vec<BrokerMessage>) {
        if let Some(message) = &node.message {
            out.push(message.clone());
        }
        for (name, child_lock) in &node.children {
            if at_root && name == SYS_PREFIX {
                continue;
            }
            let child = child_lock.read().expect("retained index poisoned");
            Self::collect_all(&child, false, out);
        }
    }
}

/// The retained-message store, §4.3.
#[derive(Debug)]
pub struct RetainedStore {
    backend: Box<dyn RetainedBackend>,
    index: MatchIndex,
}

impl Default for RetainedStore {
    fn default() -> Self {
        Self::new(Box::new(InMemoryRetainedBackend::default()))
    }
}

impl RetainedStore {
    #[must_use]
    pub fn new(backend: Box<dyn RetainedBackend>) -> Self {
        Self {
            backend,
            index: MatchIndex::default(),
        }
    }

    /// Upsert a retained message. `message.payload` must be non-empty and
    /// `message.retain` must be true; callers enforce this at ingress
    /// (§4.7.3 step 4).
    pub fn put(&self, topic: &str, message: BrokerMessage) {
        self.backend.put(topic, message.clone());
        self.index.put(topic, message);
    }

    /// Delete the retained record for `topic` (empty-payload retained
    /// publish, MQTT semantics).
    pub fn delete(&self, topic: &str) {
        self.backend.delete(topic);
        self.index.delete(topic);
    }

    #[must_use]
    pub fn get(&self, topic: &str) -> Option<BrokerMessage> {
        self.backend.get(topic)
    }

    /// Stream retained messages whose topic matches `filter`, for SUBSCRIBE
    /// replay (§4.3).
    #[must_use]
    pub fn find_matching(&self, filter: &str) -> Vec<BrokerMessage> {
        self.index.find_matching(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::QoS;

    fn msg(topic: &str) -> BrokerMessage {
        BrokerMessage::new("pub-1", topic, b"on".to_vec(), QoS::AtLeastOnce, true)
    }

    #[test]
    fn put_overwrites_and_delete_clears() {
        let store = RetainedStore::default();
        store.put("sensor/1", msg("sensor/1"));
        assert!(store.get("sensor/1").is_some());
        let mut updated = msg("sensor/1");
        updated.payload = b"off".to_vec();
        store.put("sensor/1", updated);
        assert_eq!(store.get("sensor/1").unwrap().payload, b"off");
        store.delete("sensor/1");
        assert!(store.get("sensor/1").is_none());
    }

    #[test]
    fn find_matching_respects_wildcards() {
        let store = RetainedStore::default();
        store.put("sensor/1", msg("sensor/1"));
        store.put("sensor/2", msg("sensor/2"));
        let found = store.find_matching("sensor/#");
        assert_eq!(found.len(), 2);
        let found = store.find_matching("sensor/+");
        assert_eq!(found.len(), 2);
        assert!(store.find_matching("other/#").is_empty());
    }

    #[test]
    fn bare_hash_excludes_sys() {
        let store = RetainedStore::default();
        store.put("$SYS/broker/uptime", msg("$SYS/broker/uptime"));
        store.put("a/b", msg("a/b"));
        let found = store.find_matching("#");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].topic, "a/b");
        let found = store.find_matching("$SYS/#");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].topic, "$SYS/broker/uptime");
    }
}
