// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Shared data types passed between the routing components.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use codec::{PacketId, QoS};

pub type ClientId = String;
pub type NodeId = String;

/// Server-assigned unique id, stable across clones and re-delivery.
pub type MessageUuid = String;

#[must_use]
pub fn new_message_uuid() -> MessageUuid {
    uuid::Uuid::new_v4().to_string()
}

#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64)
}

/// MQTT5 properties carried by a `BrokerMessage`, all optional.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MessageProperties {
    pub expiry_interval: Option<u32>,
    pub payload_format_indicator: Option<u8>,
    pub content_type: Option<String>,
    pub response_topic: Option<String>,
    pub correlation_data: Option<Vec<u8>>,
    /// Ordered key/value multimap; order is preserved on the wire.
    pub user_properties: Vec<(String, String)>,
}

/// The unit of transport passed through the subscription manager, message bus
/// and archive pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMessage {
    pub message_uuid: MessageUuid,
    pub message_id: PacketId,
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    pub queued: bool,
    pub client_id: ClientId,
    pub sender_id: ClientId,
    pub time_millis: i64,
    pub properties: MessageProperties,
}

impl BrokerMessage {
    #[must_use]
    pub fn new(sender_id: &str, topic: &str, payload: Vec<u8>, qos: QoS, retain: bool) -> Self {
        Self {
            message_uuid: new_message_uuid(),
            message_id: 0,
            topic: topic.to_string(),
            payload,
            qos,
            retain,
            dup: false,
            queued: false,
            client_id: sender_id.to_string(),
            sender_id: sender_id.to_string(),
            time_millis: now_millis(),
            properties: MessageProperties::default(),
        }
    }

    /// Effective QoS for delivery to a subscriber: never upgraded on re-delivery.
    #[must_use]
    pub fn downgrade_qos(&self, subscriber_qos: QoS) -> QoS {
        self.qos.min(subscriber_qos)
    }

    /// Recompute remaining `expiry_interval` given the elapsed time since ingress.
    /// Returns `false` if the message has expired and must be dropped.
    pub fn recompute_expiry(&mut self, at_millis: i64) -> bool {
        let Some(expiry) = self.properties.expiry_interval else {
            return true;
        };
        let elapsed_secs = (at_millis - self.time_millis).max(0) / 1000;
        let remaining = i64::from(expiry) - elapsed_secs;
        if remaining <= 0 {
            return false;
        }
        self.properties.expiry_interval = Some(remaining as u32);
        true
    }
}

/// `retainHandling` option of a subscription, MQTT5 §3.8.3.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetainHandling {
    #[default]
    SendRetained = 0,
    SendOnNewSubscribeOnly = 1,
    Never = 2,
}

/// A single client subscription to a topic filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub client_id: ClientId,
    pub topic_filter: String,
    pub qos: QoS,
    pub no_local: bool,
    pub retain_as_published: bool,
    pub retain_handling: RetainHandling,
}

impl Subscription {
    #[must_use]
    pub fn new(client_id: &str, topic_filter: &str, qos: QoS) -> Self {
        Self {
            client_id: client_id.to_string(),
            topic_filter: topic_filter.to_string(),
            qos,
            no_local: false,
            retain_as_published: false,
            retain_handling: RetainHandling::default(),
        }
    }

    #[must_use]
    pub fn has_wildcard(&self) -> bool {
        self.topic_filter.contains(['+', '#'])
    }
}

/// Tri-state connectivity of a session, as tracked by the cluster map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    Online,
    Offline,
    #[default]
    Unknown,
}

/// `session.lastWill`, armed at CONNECT and disarmed on graceful reconnect.
#[derive(Debug, Clone, PartialEq)]
pub struct LastWill {
    pub message: BrokerMessage,
    pub delay_interval: u32,
}

/// Persisted per-client state, owned exclusively by the Session Handler that
/// currently holds the client's connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub client_id: ClientId,
    pub clean_start: bool,
    pub connected: ConnectionState,
    pub node_id: NodeId,
    pub client_address: String,
    /// Seconds; 0 = delete on disconnect, `u32::MAX` = never expire.
    pub session_expiry_interval: u32,
    pub last_will: Option<LastWill>,
    pub messages_in: u64,
    pub messages_out: u64,
}

impl Session {
    #[must_use]
    pub fn new(client_id: &str, node_id: &str, clean_start: bool) -> Self {
        Self {
            client_id: client_id.to_string(),
            clean_start,
            connected: ConnectionState::Online,
            node_id: node_id.to_string(),
            client_address: String::new(),
            session_expiry_interval: 0,
            last_will: None,
            messages_in: 0,
            messages_out: 0,
        }
    }

    #[must_use]
    pub fn expires_on_disconnect(&self) -> bool {
        self.clean_start || self.session_expiry_interval == 0
    }
}

/// State of an inflight QoS 2 outbound message, §4.7.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InflightState {
    Published,
    Received,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InflightOut {
    pub state: InflightState,
    pub message: BrokerMessage,
}

/// Ordered map keyed by 16-bit packet id, used for both outbound and
/// incoming-in-flight tables.
pub type InflightMap<V> = BTreeMap<PacketId, V>;
