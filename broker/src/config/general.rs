// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use codec::QoS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Error;

/// General section in config: routing limits, cluster identity and timing.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct General {
    /// This node's id, used as the `nodeId` half of the cluster's
    /// `clientId -> nodeId` and `topic -> nodeSet` maps (§3, §5).
    ///
    /// Default is "node-1".
    #[serde(default = "General::default_node_id")]
    node_id: String,

    /// Set maximum size for publish message payload.
    ///
    /// Received messages that exceed this size will not be accepted by the
    /// broker. MQTT imposes a maximum payload size of 268435455 bytes.
    ///
    /// Default value is 0, which means that all valid MQTT messages are
    /// accepted.
    #[serde(default = "General::default_message_size_limit")]
    message_size_limit: u32,

    /// For MQTT v5 clients, the server may send a "server keep_alive" value
    /// overriding the client's request so it disconnects stale clients
    /// sooner. Only applies to MQTT v5 clients. Maximum allowable is 65535.
    ///
    /// Default value is 65535.
    #[serde(default = "General::default_maximum_keep_alive")]
    maximum_keep_alive: u32,

    /// Maximum QoS supported; clients publishing above this are disconnected.
    ///
    /// Default is 2.
    #[serde(default = "General::default_maximum_qos")]
    maximum_qos: QoS,

    /// Cap on the per-client offline queue (§4.4); overflow drops the
    /// oldest queued message with a WARN.
    ///
    /// Default is 1000.
    #[serde(default = "General::default_offline_queue_cap")]
    offline_queue_cap: usize,

    /// Target bound on how stale the replicated `topic -> nodeSet` map may
    /// be allowed to drift before the next broadcast (§9, Open Question b).
    /// This is a soft target, not a hard real-time guarantee.
    ///
    /// Default is 2 seconds.
    #[serde(default = "General::default_cluster_sync_interval")]
    cluster_sync_interval: u64,

    /// Timeout for bus requests that expect a reply (metrics, takeover
    /// notification), §5.
    ///
    /// Default is 5 seconds.
    #[serde(default = "General::default_bus_request_timeout")]
    bus_request_timeout: u64,

    /// Bounded deadline for draining pending acks during graceful shutdown,
    /// §5.
    ///
    /// Default is 30 seconds.
    #[serde(default = "General::default_shutdown_drain_deadline")]
    shutdown_drain_deadline: u64,
}

impl General {
    #[must_use]
    pub fn default_node_id() -> String {
        "node-1".to_string()
    }

    #[must_use]
    pub const fn default_message_size_limit() -> u32 {
        64 * 1024
    }

    #[must_use]
    pub const fn default_maximum_qos() -> QoS {
        QoS::ExactOnce
    }

    #[must_use]
    pub const fn default_maximum_keep_alive() -> u32 {
        65535
    }

    #[must_use]
    pub const fn default_offline_queue_cap() -> usize {
        1000
    }

    #[must_use]
    pub const fn default_cluster_sync_interval() -> u64 {
        2
    }

    #[must_use]
    pub const fn default_bus_request_timeout() -> u64 {
        5
    }

    #[must_use]
    pub const fn default_shutdown_drain_deadline() -> u64 {
        30
    }

    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    #[must_use]
    pub const fn message_size_limit(&self) -> u32 {
        self.message_size_limit
    }

    #[must_use]
    pub const fn maximum_keep_alive(&self) -> u32 {
        self.maximum_keep_alive
    }

    #[must_use]
    pub const fn maximum_qos(&self) -> QoS {
        self.maximum_qos
    }

    #[must_use]
    pub const fn offline_queue_cap(&self) -> usize {
        self.offline_queue_cap
    }

    #[must_use]
    pub const fn cluster_sync_interval(&self) -> Duration {
        Duration::from_secs(self.cluster_sync_interval)
    }

    #[must_use]
    pub const fn bus_request_timeout(&self) -> Duration {
        Duration::from_secs(self.bus_request_timeout)
    }

    #[must_use]
    pub const fn shutdown_drain_deadline(&self) -> Duration {
        Duration::from_secs(self.shutdown_drain_deadline)
    }

    /// Validate config.
    ///
    /// # Errors
    ///
    /// Returns error if `node_id` is empty.
    pub fn validate(&self) -> Result<(), Error> {
        if self.node_id.trim().is_empty() {
            return Err(Error::from_string(
                crate::error::ErrorKind::ConfigError,
                "general.node_id must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for General {
    fn default() -> Self {
        Self {
            node_id: Self::default_node_id(),
            message_size_limit: Self::default_message_size_limit(),
            maximum_qos: Self::default_maximum_qos(),
            maximum_keep_alive: Self::default_maximum_keep_alive(),
            offline_queue_cap: Self::default_offline_queue_cap(),
            cluster_sync_interval: Self::default_cluster_sync_interval(),
            bus_request_timeout: Self::default_bus_request_timeout(),
            shutdown_drain_deadline: Self::default_shutdown_drain_deadline(),
        }
    }
}
