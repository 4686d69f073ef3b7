// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Combines the exact index (C2) and a wildcard topic trie (C1) into the
//! single local-node view of "who is subscribed to what".

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use codec::QoS;

use super::exact_index::ExactIndex;
use super::topic_trie::TopicTrie;
use super::types::{ClientId, RetainHandling, Subscription};

fn has_wildcard(filter: &str) -> bool {
    filter.contains(['+', '#'])
}

/// One subscriber resolved for a given publish, with dedup already applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscriber {
    pub client_id: ClientId,
    pub qos: QoS,
}

#[derive(Debug, Default)]
pub struct SubscriptionManager {
    exact: ExactIndex,
    wildcard: TopicTrie<ClientId, QoS>,
    /// Per-client set of filters carrying `noLocal`, `retainAsPublished` or a
    /// non-default `retainHandling`, and the full subscription record.
    flagged: RwLock<HashMap<ClientId, HashMap<String, Subscription>>>,
}

impl SubscriptionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: re-subscribing the same filter overwrites qos/flags
    /// without duplicating delivery.
    pub fn subscribe(&self, sub: Subscription) {
        if has_wildcard(&sub.topic_filter) {
            self.wildcard
                .add(&sub.topic_filter, Some((sub.client_id.clone(), sub.qos)));
        } else {
            self.exact
                .subscribe(&sub.topic_filter, &sub.client_id, sub.qos);
        }
        let mut flagged = self.flagged.write().expect("flagged map poisoned");
        flagged
            .entry(sub.client_id.clone())
            .or_default()
            .insert(sub.topic_filter.clone(), sub);
    }

    pub fn unsubscribe(&self, client_id: &str, filter: &str) {
        if has_wildcard(filter) {
            self.wildcard.del(filter, &client_id.to_string());
        } else {
            self.exact.unsubscribe(filter, client_id);
        }
        let mut flagged = self.flagged.write().expect("flagged map poisoned");
        if let Some(set) = flagged.get_mut(client_id) {
            set.remove(filter);
            if set.is_empty() {
                flagged.remove(client_id);
            }
        }
    }

    /// Whether `client_id` already held this exact filter before this call
    /// (used to implement `retainHandling=1`).
    #[must_use]
    pub fn already_subscribed(&self, client_id: &str, filter: &str) -> bool {
        self.flagged
            .read()
            .expect("flagged map poisoned")
            .get(client_id)
            .is_some_and(|set| set.contains_key(filter))
    }

    #[must_use]
    pub fn subscription(&self, client_id: &str, filter: &str) -> Option<Subscription> {
        self.flagged
            .read()
            .expect("flagged map poisoned")
            .get(client_id)
            .and_then(|set| set.get(filter))
            .cloned()
    }

    /// Union of exact and wildcard matches for `topic`, deduplicated by
    /// client, keeping the highest QoS across multiple matching filters.
    #[must_use]
    pub fn find_all_subscribers(&self, topic: &str) -> Vec<Subscriber> {
        let mut best: HashMap<ClientId, QoS> = HashMap::new();
        for (client_id, qos) in self.exact.find(topic) {
            best.entry(client_id)
                .and_modify(|q| *q = (*q).max(qos))
                .or_insert(qos);
        }
        for (client_id, qos) in self.wildcard.find_data(topic) {
            best.entry(client_id)
                .and_modify(|q| *q = (*q).max(qos))
                .or_insert(qos);
        }
        best.into_iter()
            .map(|(client_id, qos)| Subscriber { client_id, qos })
            .collect()
    }

    /// True iff any of `client_id`'s `noLocal` subscriptions match `topic`.
    #[must_use]
    pub fn has_no_local(&self, client_id: &str, topic: &str) -> bool {
        let flagged = self.flagged.read().expect("flagged map poisoned");
        let Some(set) = flagged.get(client_id) else {
            return false;
        };
        set.values()
            .filter(|sub| sub.no_local)
            .any(|sub| filter_matches(&sub.topic_filter, topic))
    }

    /// Retained-replay parameters for every matching subscription of
    /// `client_id` against `topic`, honoring `retainHandling` and
    /// `retainAsPublished`.
    #[must_use]
    pub fn retained_replay_specs(&self, client_id: &str, topic: &str) -> Vec<(RetainHandling, bool)> {
        let flagged = self.flagged.read().expect("flagged map poisoned");
        let Some(set) = flagged.get(client_id) else {
            return Vec::new();
        };
        set.values()
            .filter(|sub| filter_matches(&sub.topic_filter, topic))
            .map(|sub| (sub.retain_handling, sub.retain_as_published))
            .collect()
    }

    /// Remove `client_id` from both indexes; return the affected filters for
    /// cluster cleanup.
    pub fn disconnect_client(&self, client_id: &str) -> Vec<String> {
        let mut affected: HashSet<String> = self.exact.disconnect_client(client_id).into_iter().collect();
        self.wildcard.remove_key_everywhere(&client_id.to_string());
        let mut flagged = self.flagged.write().expect("flagged map poisoned");
        if let Some(set) = flagged.remove(client_id) {
            affected.extend(set.into_keys());
        }
        affected.into_iter().collect()
    }
}

/// Minimal filter-vs-topic matcher used only for per-client flag lookups;
/// the authoritative wildcard matching for routing lives in the trie.
fn filter_matches(filter: &str, topic: &str) -> bool {
    if filter == topic {
        return true;
    }
    let f_levels: Vec<&str> = filter.split('/').collect();
    let t_levels: Vec<&str> = topic.split('/').collect();
    if t_levels.first().copied() == Some("$SYS") && !filter.starts_with('$') {
        return false;
    }
    let mut fi = 0;
    let mut ti = 0;
    while fi < f_levels.len() {
        if f_levels[fi] == "#" {
            return true;
        }
        if ti >= t_levels.len() {
            return false;
        }
        if f_levels[fi] != "+" && f_levels[fi] != t_levels[ti] {
            return false;
        }
        fi += 1;
        ti += 1;
    }
    ti == t_levels.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_keeps_highest_qos() {
        let mgr = SubscriptionManager::new();
        mgr.subscribe(Subscription::new("c1", "a/b", QoS::AtMostOnce));
        mgr.subscribe(Subscription::new("c1", "a/+", QoS::ExactOnce));
        let subs = mgr.find_all_subscribers("a/b");
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].qos, QoS::ExactOnce);
    }

    #[test]
    fn no_local_flag_is_tracked() {
        let mgr = SubscriptionManager::new();
        let mut sub = Subscription::new("c1", "chat/room", QoS::AtLeastOnce);
        sub.no_local = true;
        mgr.subscribe(sub);
        assert!(mgr.has_no_local("c1", "chat/room"));
        assert!(!mgr.has_no_local("c1", "other/room"));
    }

    #[test]
    fn resubscribe_is_idempotent() {
        let mgr = SubscriptionManager::new();
        mgr.subscribe(Subscription::new("c1", "a/b", QoS::AtMostOnce));
        assert!(!mgr.already_subscribed("c1", "a/b"));
        mgr.subscribe(Subscription::new("c1", "a/b", QoS::AtMostOnce));
        assert!(mgr.already_subscribed("c1", "a/b"));
        let subs = mgr.find_all_subscribers("a/b");
        assert_eq!(subs.len(), 1);
    }

    #[test]
    fn disconnect_clears_both_indexes() {
        let mgr = SubscriptionManager::new();
        mgr.subscribe(Subscription::new("c1", "a/b", QoS::AtMostOnce));
        mgr.subscribe(Subscription::new("c1", "a/+", QoS::AtMostOnce));
        let affected = mgr.disconnect_client("c1");
        assert_eq!(affected.len(), 2);
        assert!(mgr.find_all_subscribers("a/b").is_empty());
    }
}
