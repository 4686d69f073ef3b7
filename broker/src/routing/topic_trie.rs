// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Hierarchical trie keyed by topic level, generic over a secondary key `K`
//! and payload `V`. Backs both the wildcard subscription index and, via
//! distinct instantiations, any other topic-shaped lookup.

use std::collections::HashMap;
use std::sync::RwLock;

const SYS_PREFIX: &str = "$SYS";

fn split_levels(topic: &str) -> Vec<&str> {
    topic.split('/').collect()
}

#[derive(Debug)]
struct TrieNode<K, V> {
    children: HashMap<String, RwLock<TrieNode<K, V>>>,
    leaf: HashMap<K, V>,
}

impl<K, V> Default for TrieNode<K, V> {
    fn default() -> Self {
        Self {
            children: HashMap::new(),
            leaf: HashMap::new(),
        }
    }
}

impl<K, V> TrieNode<K, V> {
    fn is_empty(&self) -> bool {
        self.children.is_empty() && self.leaf.is_empty()
    }
}

/// A concurrent hierarchical map. Readers never block; writers serialize
/// per-node via insert-if-absent on children.
#[derive(Debug)]
pub struct TopicTrie<K, V> {
    root: RwLock<TrieNode<K, V>>,
}

impl<K, V> Default for TopicTrie<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TopicTrie<K, V>
where
    K: Clone + Eq + std::hash::Hash,
    V: Clone,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: RwLock::new(TrieNode::default()),
        }
    }

    /// Descend, creating missing children, and install `(k, v)` at the leaf.
    /// Passing a path with no `(k, v)` only materializes it.
    pub fn add(&self, topic: &str, entry: Option<(K, V)>) {
        let levels = split_levels(topic);
        let mut guard = self.root.write().expect("topic trie root poisoned");
        let mut node = &mut *guard;
        for level in &levels {
            node = node
                .children
                .entry((*level).to_string())
                .or_default()
                .get_mut()
                .expect("topic trie node poisoned");
        }
        if let Some((k, v)) = entry {
            node.leaf.insert(k, v);
        }
    }

    /// Remove `k` from the leaf at `topic`, pruning now-empty nodes on unwind.
    pub fn del(&self, topic: &str, k: &K) {
        let levels = split_levels(topic);
        let mut guard = self.root.write().expect("topic trie root poisoned");
        Self::del_rec(&mut guard, &levels, k);
    }

    fn del_rec(node: &mut TrieNode<K, V>, levels: &[&str], k: &K) {
        if levels.is_empty() {
            node.leaf.remove(k);
            return;
        }
        let level = levels[0];
        let mut prune = false;
        if let Some(child_lock) = node.children.get(level) {
            let mut child = child_lock.write().expect("topic trie node poisoned");
            Self::del_rec(&mut child, &levels[1..], k);
            prune = child.is_empty();
        }
        if prune {
            node.children.remove(level);
        }
    }

    /// Remove every entry for `k` anywhere in the trie, pruning empty nodes.
    pub fn remove_key_everywhere(&self, k: &K) {
        let mut guard = self.root.write().expect("topic trie root poisoned");
        Self::remove_key_rec(&mut guard, k);
    }

    fn remove_key_rec(node: &mut TrieNode<K, V>, k: &K) {
        node.leaf.remove(k);
        let mut to_prune = Vec::new();
        for (level, child_lock) in &node.children {
            let mut child = child_lock.write().expect("topic trie node poisoned");
            Self::remove_key_rec(&mut child, k);
            if child.is_empty() {
                to_prune.push(level.clone());
            }
        }
        for level in to_prune {
            node.children.remove(&level);
        }
    }

    /// Given a concrete topic name (no wildcards), return all `(k, v)` pairs
    /// stored along a trie path that matches it, honoring `+` and `#`
    /// wildcards stored in the trie and excluding `$SYS/...` from bare
    /// wildcard prefixes.
    #[must_use]
    pub fn find_data(&self, topic_name: &str) -> Vec<(K, V)> {
        let levels = split_levels(topic_name);
        let is_sys = levels.first().copied() == Some(SYS_PREFIX);
        let guard = self.root.read().expect("topic trie root poisoned");
        let mut out = Vec::new();
        Self::find_rec(&guard, &levels, is_sys, true, &mut out);
        out
    }

    fn find_rec(
        node: &TrieNode<K, V>,
        levels: &[&str],
        is_sys: bool,
        at_root: bool,
        out: &mut Vec<(K, V)>,
    ) {
        if levels.is_empty() {
            out.extend(node.leaf.iter().map(|(k, v)| (k.clone(), v.clone())));
            // `a/#` also matches the parent topic `a` (OASIS 4.7.1.2): a `#`
            // child one level below where the topic ends still applies.
            if let Some(child_lock) = node.children.get("#") {
                if !(at_root && is_sys) {
                    let child = child_lock.read().expect("topic trie node poisoned");
                    out.extend(child.leaf.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
            return;
        }
        let level = levels[0];
        let rest = &levels[1..];

        if let Some(child_lock) = node.children.get(level) {
            let child = child_lock.read().expect("topic trie node poisoned");
            Self::find_rec(&child, rest, is_sys, false, out);
        }
        if let Some(child_lock) = node.children.get("+") {
            let child = child_lock.read().expect("topic trie node poisoned");
            Self::find_rec(&child, rest, is_sys, false, out);
        }
        if let Some(child_lock) = node.children.get("#") {
            // A bare `#` at the root never matches `$SYS/...`.
            if !(at_root && is_sys) {
                let child = child_lock.read().expect("topic trie node poisoned");
                out.extend(child.leaf.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
    }

    /// Boolean fast path of [`Self::find_data`].
    #[must_use]
    pub fn is_matching(&self, topic_name: &str) -> bool {
        !self.find_data(topic_name).is_empty()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root
            .read()
            .expect("topic trie root poisoned")
            .is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matches_nested_level() {
        let trie: TopicTrie<&str, u8> = TopicTrie::new();
        trie.add("room/+/temp", Some(("alice", 1)));
        let found = trie.find_data("room/kitchen/temp");
        assert_eq!(found, vec![("alice", 1)]);
        assert!(trie.find_data("room/kitchen/humidity").is_empty());
    }

    #[test]
    fn multi_level_matches_suffix() {
        let trie: TopicTrie<&str, u8> = TopicTrie::new();
        trie.add("orders/#", Some(("bob", 2)));
        assert_eq!(trie.find_data("orders/42/line/1"), vec![("bob", 2)]);
    }

    #[test]
    fn multi_level_matches_parent_topic() {
        // OASIS 4.7.1.2: `sport/tennis/player1/#` also matches the parent
        // topic `sport/tennis/player1`.
        let trie: TopicTrie<&str, u8> = TopicTrie::new();
        trie.add("orders/#", Some(("bob", 2)));
        assert_eq!(trie.find_data("orders"), vec![("bob", 2)]);
    }

    #[test]
    fn bare_hash_excludes_sys() {
        let trie: TopicTrie<&str, u8> = TopicTrie::new();
        trie.add("#", Some(("carol", 0)));
        assert!(trie.find_data("$SYS/broker/uptime").is_empty());
        assert_eq!(trie.find_data("a/b"), vec![("carol", 0)]);
    }

    #[test]
    fn literal_sys_prefix_is_matched() {
        let trie: TopicTrie<&str, u8> = TopicTrie::new();
        trie.add("$SYS/#", Some(("dana", 0)));
        assert_eq!(trie.find_data("$SYS/broker/uptime"), vec![("dana", 0)]);
    }

    #[test]
    fn del_prunes_empty_nodes() {
        let trie: TopicTrie<&str, u8> = TopicTrie::new();
        trie.add("a/b/c", Some(("k", 1)));
        trie.del("a/b/c", &"k");
        assert!(trie.is_empty());
    }

    #[test]
    fn remove_key_everywhere_clears_all_paths() {
        let trie: TopicTrie<&str, u8> = TopicTrie::new();
        trie.add("a/+", Some(("k", 1)));
        trie.add("b/#", Some(("k", 2)));
        trie.remove_key_everywhere(&"k");
        assert!(trie.is_empty());
    }
}
