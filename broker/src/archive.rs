// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Archive Pipeline (C8), §4.6: fans published messages into configured
//! archive groups, writing to a last-value store and/or a historical
//! archive. Stores are pluggable (`LastValueBackend` / `ArchiveBackend`),
//! mirroring the `RetainedBackend`/`SessionBackend` seams and the
//! teacher's `connectors::pgsql_conn`/`connectors::mongo_conn` style of
//! swappable SQL/NoSQL drivers; in-memory reference backends are the
//! default for a single node.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::config::archive::{ArchiveGroup, PayloadFormat};
use crate::routing::topic_trie::TopicTrie;
use crate::routing::types::{now_millis, BrokerMessage};

/// A last-value record: the most recent message seen for a topic within a
/// group.
#[derive(Debug, Clone)]
pub struct LastValueRecord {
    pub topic: String,
    pub time_millis: i64,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub client_id: String,
}

/// A single row of the historical archive, §4.6 step 4.
#[derive(Debug, Clone)]
pub struct ArchiveRecord {
    pub topic: String,
    pub time_millis: i64,
    pub qos: u8,
    pub retained: bool,
    pub client_id: String,
    pub message_uuid: String,
    pub payload: Vec<u8>,
}

/// Pluggable last-value store for one archive group.
pub trait LastValueBackend: Send + Sync + std::fmt::Debug {
    fn upsert(&self, record: LastValueRecord);
    fn get(&self, topic: &str) -> Option<LastValueRecord>;
    /// Evict down to `capacity` entries, LRU-by-last-write-time first
    /// (§4.6, memory-backed last-value retention is size-based).
    fn purge_to_capacity(&self, capacity: usize) -> usize;
    /// Evict entries whose `time_millis` is older than `horizon_millis`.
    fn purge_older_than(&self, horizon_millis: i64) -> usize;
    fn len(&self) -> usize;
}

/// In-memory last-value backend: a `HashMap` keyed by topic plus insertion
/// order for LRU eviction.
#[derive(Debug, Default)]
pub struct InMemoryLastValueBackend {
    records: RwLock<HashMap<String, LastValueRecord>>,
}

impl LastValueBackend for InMemoryLastValueBackend {
    fn upsert(&self, record: LastValueRecord) {
        self.records
            .write()
            .expect("last-value backend poisoned")
            .insert(record.topic.clone(), record);
    }

    fn get(&self, topic: &str) -> Option<LastValueRecord> {
        self.records
            .read()
            .expect("last-value backend poisoned")
            .get(topic)
            .cloned()
    }

    fn purge_to_capacity(&self, capacity: usize) -> usize {
        let mut records = self.records.write().expect("last-value backend poisoned");
        if records.len() <= capacity {
            return 0;
        }
        let mut by_age: Vec<(String, i64)> = records
            .iter()
            .map(|(topic, r)| (topic.clone(), r.time_millis))
            .collect();
        by_age.sort_by_key(|(_, t)| *t);
        let evict_count = records.len() - capacity;
        let mut evicted = 0;
        for (topic, _) in by_age.into_iter().take(evict_count) {
            records.remove(&topic);
            evicted += 1;
        }
        evicted
    }

    fn purge_older_than(&self, horizon_millis: i64) -> usize {
        let mut records = self.records.write().expect("last-value backend poisoned");
        let before = records.len();
        records.retain(|_, r| r.time_millis >= horizon_millis);
        before - records.len()
    }

    fn len(&self) -> usize {
        self.records.read().expect("last-value backend poisoned").len()
    }
}

/// Pluggable historical archive store for one archive group.
pub trait ArchiveBackend: Send + Sync + std::fmt::Debug {
    fn append(&self, record: ArchiveRecord);
    /// Delete rows older than `horizon_millis`; returns the count removed.
    fn purge_older_than(&self, horizon_millis: i64) -> usize;
    fn len(&self) -> usize;
    fn records(&self) -> Vec<ArchiveRecord>;
}

/// In-memory append-log reference backend.
#[derive(Debug, Default)]
pub struct InMemoryArchiveBackend {
    rows: RwLock<Vec<ArchiveRecord>>,
}

impl ArchiveBackend for InMemoryArchiveBackend {
    fn append(&self, record: ArchiveRecord) {
        self.rows.write().expect("archive backend poisoned").push(record);
    }

    fn purge_older_than(&self, horizon_millis: i64) -> usize {
        let mut rows = self.rows.write().expect("archive backend poisoned");
        let before = rows.len();
        rows.retain(|r| r.time_millis >= horizon_millis);
        before - rows.len()
    }

    fn len(&self) -> usize {
        self.rows.read().expect("archive backend poisoned").len()
    }

    fn records(&self) -> Vec<ArchiveRecord> {
        self.rows.read().expect("archive backend poisoned").clone()
    }
}

/// Cluster-wide named mutual exclusion for retention purge runs (§4.6:
/// "acquires a cluster-wide named lock before running so that at most one
/// node purges a shared store at a time"). A real deployment backs this by
/// a distributed lock service; the no-op single-node implementation below
/// always succeeds since there is only ever one purger.
pub trait ClusterLock: Send + Sync + std::fmt::Debug {
    fn try_acquire(&self, name: &str) -> bool;
    fn release(&self, name: &str);
}

#[derive(Debug, Default)]
pub struct SingleNodeClusterLock;

impl ClusterLock for SingleNodeClusterLock {
    fn try_acquire(&self, _name: &str) -> bool {
        true
    }

    fn release(&self, _name: &str) {}
}

/// One configured group's runtime state: its config plus the backends it
/// was provisioned with.
struct GroupState {
    config: ArchiveGroup,
    matcher: TopicTrie<(), ()>,
    last_value: Option<Box<dyn LastValueBackend>>,
    archive: Option<Box<dyn ArchiveBackend>>,
}

impl std::fmt::Debug for GroupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupState")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Encodes `payload` per the group's `PayloadFormat`, §4.6: `DEFAULT`
/// always stores the base64-opaque form; `JSON` keeps the raw UTF-8 bytes
/// when they parse (the structured-object column a real SQL/NoSQL backend
/// derives from them is that backend's concern, not this pipeline's),
/// falling back to base64 otherwise.
#[must_use]
fn encode_payload(payload: &[u8], format: PayloadFormat) -> Vec<u8> {
    use base64::{engine::general_purpose::STANDARD, Engine};
    match format {
        PayloadFormat::Default => STANDARD.encode(payload).into_bytes(),
        PayloadFormat::Json => {
            if std::str::from_utf8(payload).is_ok() {
                payload.to_vec()
            } else {
                STANDARD.encode(payload).into_bytes()
            }
        }
    }
}

/// The archive pipeline, §4.6.
#[derive(Debug)]
pub struct ArchivePipeline {
    groups: Vec<GroupState>,
    lock: Box<dyn ClusterLock>,
}

impl ArchivePipeline {
    /// Build the pipeline from configured groups, provisioning an
    /// in-memory backend for every store a group enables.
    #[must_use]
    pub fn new(configs: Vec<ArchiveGroup>) -> Self {
        Self::with_lock(configs, Box::new(SingleNodeClusterLock))
    }

    #[must_use]
    pub fn with_lock(configs: Vec<ArchiveGroup>, lock: Box<dyn ClusterLock>) -> Self {
        let groups = configs
            .into_iter()
            .map(|config| {
                let matcher = TopicTrie::new();
                for filter in &config.topic_filter {
                    matcher.add(filter, Some(((), ())));
                }
                let last_value: Option<Box<dyn LastValueBackend>> = config
                    .last_val_store
                    .then(|| Box::new(InMemoryLastValueBackend::default()) as Box<dyn LastValueBackend>);
                let archive: Option<Box<dyn ArchiveBackend>> = config
                    .archive_store
                    .then(|| Box::new(InMemoryArchiveBackend::default()) as Box<dyn ArchiveBackend>);
                GroupState {
                    config,
                    matcher,
                    last_value,
                    archive,
                }
            })
            .collect();
        Self { groups, lock }
    }

    /// Fan `message` to every configured group per §4.6 steps 1-4. Called
    /// exactly once per published message, by the ingress node (§4.7.3
    /// step 8).
    pub fn ingest(&self, message: &BrokerMessage) {
        for group in &self.groups {
            if group.config.retained_only && !message.retain {
                continue;
            }
            if group.matcher.find_data(&message.topic).is_empty() {
                continue;
            }
            let payload = encode_payload(&message.payload, group.config.payload_format);
            if let Some(backend) = &group.last_value {
                backend.upsert(LastValueRecord {
                    topic: message.topic.clone(),
                    time_millis: message.time_millis,
                    payload: payload.clone(),
                    qos: message.qos as u8,
                    client_id: message.sender_id.clone(),
                });
            }
            if let Some(backend) = &group.archive {
                backend.append(ArchiveRecord {
                    topic: message.topic.clone(),
                    time_millis: message.time_millis,
                    qos: message.qos as u8,
                    retained: message.retain,
                    client_id: message.sender_id.clone(),
                    message_uuid: message.message_uuid.clone(),
                    payload,
                });
            }
        }
    }

    /// Run the retention purge for every group, gated by the cluster lock.
    /// Returns the number of groups actually purged (lock held).
    pub fn purge(&self) -> usize {
        let now = now_millis();
        let mut purged = 0;
        for group in &self.groups {
            let lock_name = format!("archive.purge.{}", group.config.name);
            if !self.lock.try_acquire(&lock_name) {
                continue;
            }
            if let Some(backend) = &group.archive {
                let horizon = now - (group.config.archive_retention_secs as i64) * 1000;
                backend.purge_older_than(horizon);
            }
            if let Some(backend) = &group.last_value {
                if let Some(retention_secs) = group.config.last_val_retention_secs {
                    let horizon = now - (retention_secs as i64) * 1000;
                    backend.purge_older_than(horizon);
                } else {
                    backend.purge_to_capacity(group.config.last_val_capacity);
                }
            }
            self.lock.release(&lock_name);
            purged += 1;
        }
        purged
    }

    #[must_use]
    pub fn group_names(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.config.name.as_str()).collect()
    }

    #[must_use]
    pub fn last_value(&self, group_name: &str, topic: &str) -> Option<LastValueRecord> {
        self.groups
            .iter()
            .find(|g| g.config.name == group_name)
            .and_then(|g| g.last_value.as_ref())
            .and_then(|backend| backend.get(topic))
    }

    #[must_use]
    pub fn archive_records(&self, group_name: &str) -> Vec<ArchiveRecord> {
        self.groups
            .iter()
            .find(|g| g.config.name == group_name)
            .and_then(|g| g.archive.as_ref())
            .map_or_else(Vec::new, |backend| backend.records())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::QoS;

    fn group(name: &str, retained_only: bool) -> ArchiveGroup {
        ArchiveGroup {
            name: name.to_string(),
            topic_filter: vec!["sensor/#".to_string()],
            retained_only,
            last_val_store: true,
            archive_store: true,
            payload_format: PayloadFormat::Default,
            last_val_retention_secs: None,
            last_val_capacity: 10,
            archive_retention_secs: 30 * 24 * 3600,
            purge_interval_secs: 3600,
        }
    }

    #[test]
    fn non_matching_topic_is_skipped() {
        let pipeline = ArchivePipeline::new(vec![group("g1", false)]);
        let msg = BrokerMessage::new("p", "other/1", b"x".to_vec(), QoS::AtMostOnce, false);
        pipeline.ingest(&msg);
        assert!(pipeline.last_value("g1", "other/1").is_none());
        assert_eq!(pipeline.archive_records("g1").len(), 0);
    }

    #[test]
    fn retained_only_group_skips_non_retained() {
        let pipeline = ArchivePipeline::new(vec![group("g1", true)]);
        let msg = BrokerMessage::new("p", "sensor/1", b"x".to_vec(), QoS::AtMostOnce, false);
        pipeline.ingest(&msg);
        assert!(pipeline.last_value("g1", "sensor/1").is_none());
    }

    #[test]
    fn matching_message_updates_last_value_and_archive() {
        use base64::{engine::general_purpose::STANDARD, Engine};
        let pipeline = ArchivePipeline::new(vec![group("g1", false)]);
        let msg = BrokerMessage::new("p", "sensor/1", b"22.5".to_vec(), QoS::AtLeastOnce, false);
        pipeline.ingest(&msg);
        assert_eq!(
            pipeline.last_value("g1", "sensor/1").unwrap().payload,
            STANDARD.encode("22.5").into_bytes()
        );
        assert_eq!(pipeline.archive_records("g1").len(), 1);

        let msg2 = BrokerMessage::new("p", "sensor/1", b"23.0".to_vec(), QoS::AtLeastOnce, false);
        pipeline.ingest(&msg2);
        assert_eq!(
            pipeline.last_value("g1", "sensor/1").unwrap().payload,
            STANDARD.encode("23.0").into_bytes()
        );
        assert_eq!(pipeline.archive_records("g1").len(), 2);
    }

    #[test]
    fn last_value_capacity_evicts_oldest() {
        let backend = InMemoryLastValueBackend::default();
        for i in 0..5 {
            backend.upsert(LastValueRecord {
                topic: format!("t/{i}"),
                time_millis: i64::from(i),
                payload: vec![],
                qos: 0,
                client_id: "p".to_string(),
            });
        }
        let evicted = backend.purge_to_capacity(2);
        assert_eq!(evicted, 3);
        assert_eq!(backend.len(), 2);
        assert!(backend.get("t/3").is_some());
        assert!(backend.get("t/4").is_some());
    }

    #[test]
    fn purge_respects_cluster_lock() {
        #[derive(Debug, Default)]
        struct NeverLock;
        impl ClusterLock for NeverLock {
            fn try_acquire(&self, _name: &str) -> bool {
                false
            }
            fn release(&self, _name: &str) {}
        }
        let pipeline = ArchivePipeline::with_lock(vec![group("g1", false)], Box::new(NeverLock));
        let msg = BrokerMessage::new("p", "sensor/1", b"x".to_vec(), QoS::AtMostOnce, false);
        pipeline.ingest(&msg);
        assert_eq!(pipeline.purge(), 0);
        assert_eq!(pipeline.archive_records("g1").len(), 1);
    }
}
