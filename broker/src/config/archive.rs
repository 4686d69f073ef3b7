// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Archive group configuration, §4.6.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// How a published payload is stored by an archive group.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadFormat {
    /// Store payload as base64-opaque bytes.
    #[default]
    #[serde(alias = "default")]
    Default,

    /// Attempt UTF-8/JSON parse; store a structured column plus raw bytes,
    /// falling back to base64 when parsing fails.
    #[serde(alias = "json")]
    Json,
}

/// A named `{ topicFilter[], retainedOnly, lastValStore, archiveStore,
/// payloadFormat, lastValRetention, archiveRetention, purgeInterval }`
/// configuration (§4.6).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ArchiveGroup {
    /// Unique group name.
    pub name: String,

    /// Topic filters this group captures; a message is archived if any
    /// filter matches.
    pub topic_filter: Vec<String>,

    /// Only archive messages published with `retain=true`.
    #[serde(default)]
    pub retained_only: bool,

    /// Enable last-value-per-topic capture.
    #[serde(default)]
    pub last_val_store: bool,

    /// Enable append-only historical capture.
    #[serde(default)]
    pub archive_store: bool,

    #[serde(default)]
    pub payload_format: PayloadFormat,

    /// Retention horizon for the last-value store, in seconds. `None` means
    /// size-based (LRU) retention for memory-backed stores.
    #[serde(default)]
    pub last_val_retention_secs: Option<u64>,

    /// Maximum entries retained for a memory-backed last-value store when
    /// `last_val_retention_secs` is `None`.
    #[serde(default = "ArchiveGroup::default_last_val_capacity")]
    pub last_val_capacity: usize,

    /// Retention horizon for the historical archive, in seconds.
    #[serde(default = "ArchiveGroup::default_archive_retention_secs")]
    pub archive_retention_secs: u64,

    /// How often the retention sweep runs, in seconds.
    #[serde(default = "ArchiveGroup::default_purge_interval_secs")]
    pub purge_interval_secs: u64,
}

impl ArchiveGroup {
    #[must_use]
    pub const fn default_last_val_capacity() -> usize {
        10_000
    }

    #[must_use]
    pub const fn default_archive_retention_secs() -> u64 {
        30 * 24 * 3600
    }

    #[must_use]
    pub const fn default_purge_interval_secs() -> u64 {
        3600
    }

    /// Validate config.
    ///
    /// # Errors
    ///
    /// Returns error if the group has no topic filters or no store enabled.
    pub fn validate(&self) -> Result<(), Error> {
        if self.topic_filter.is_empty() {
            return Err(Error::from_string(
                crate::error::ErrorKind::ConfigError,
                format!("archive group {} has no topic_filter entries", self.name),
            ));
        }
        if !self.last_val_store && !self.archive_store {
            return Err(Error::from_string(
                crate::error::ErrorKind::ConfigError,
                format!(
                    "archive group {} has neither last_val_store nor archive_store enabled",
                    self.name
                ),
            ));
        }
        Ok(())
    }
}
