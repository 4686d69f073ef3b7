// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Listener binding config. The socket/TLS/QUIC plumbing itself is an
//! external collaborator (§1 of the spec); this struct only carries the
//! address/protocol pair the core needs to report in `Session::client_address`
//! and admin queries.

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind};

/// Binding protocol types.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    #[serde(alias = "mqtt")]
    Mqtt,
    #[serde(alias = "mqtts")]
    Mqtts,
    #[serde(alias = "ws")]
    Ws,
    #[serde(alias = "wss")]
    Wss,
    #[serde(alias = "quic")]
    Quic,
}

/// A single ip/port/protocol binding.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Listener {
    #[serde(default = "Listener::default_protocol")]
    protocol: Protocol,

    /// Binding address, including host and port.
    #[serde(default = "Listener::default_address")]
    address: String,
}

impl Listener {
    #[must_use]
    pub const fn default_protocol() -> Protocol {
        Protocol::Mqtt
    }

    #[must_use]
    pub fn default_address() -> String {
        "0.0.0.0:1883".to_string()
    }

    #[must_use]
    pub fn default_listeners() -> Vec<Self> {
        vec![Self::default()]
    }

    #[must_use]
    pub const fn protocol(&self) -> Protocol {
        self.protocol
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Validate config.
    ///
    /// # Errors
    ///
    /// Returns error if `bind_address` is requested and the address fails
    /// to parse as a socket address.
    pub fn validate(&self, bind_address: bool) -> Result<(), Error> {
        if bind_address {
            use std::net::ToSocketAddrs;
            self.address.to_socket_addrs().map_err(|err| {
                Error::from_string(
                    ErrorKind::ConfigError,
                    format!("Invalid listener address {}: {err}", self.address),
                )
            })?;
        }
        Ok(())
    }
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            protocol: Self::default_protocol(),
            address: Self::default_address(),
        }
    }
}
