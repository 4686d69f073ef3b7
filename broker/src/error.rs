// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Error taxonomy for the routing core, §7.
//!
//! Within a component, errors are returned as explicit `Result`s; no
//! component throws across a boundary. The Session Handler (C7) is the
//! single place that translates an `Error` into an MQTT reason code.

use std::fmt::{self, Display};
use std::io;

use tokio::sync::mpsc;

/// Represent the types of errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Error occurred while performing I/O.
    IoError,

    /// Packet encode error.
    EncodeError,

    /// Packet decode error.
    DecodeError,

    /// Malformed packet, illegal field, forbidden topic (§7, protocol error).
    /// Never retried; surfaced via DISCONNECT reason (MQTT 5) or silent
    /// close (3.1.1).
    ProtocolError,

    /// ACL/auth refusal. Recorded and dropped; never retried.
    AuthorizationError,

    /// Config file or value is invalid.
    ConfigError,

    /// Logger initialization failed.
    LoggerError,

    /// A store (session/retained/archive) is unavailable; caller should
    /// retry with exponential backoff (§7).
    StoreError,

    /// Message bus send/recv failure (mailbox gone, channel full, timeout).
    BusError,

    /// Archive pipeline write failed; logged and the routing path must not
    /// be blocked by it (§4.7.6).
    ArchiveError,

    /// Session with this id/client was not found.
    SessionNotFound,

    /// mpsc/broadcast channel error.
    ChannelError,

    /// A persisted blob failed to decode; the record is skipped with a
    /// WARN, never treated as fatal (§7).
    DataCorruption,

    /// A programming invariant was violated (e.g. trie returned no match
    /// where the caller proved one must exist). Fatal: log and terminate
    /// the process so a supervisor can restart it (§7).
    Invariant,
}

#[derive(Clone, Debug)]
pub struct Error {
    /// Type of current error.
    kind: ErrorKind,

    /// Detail message about this error.
    message: String,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, message: &str) -> Self {
        Self {
            kind,
            message: message.to_owned(),
        }
    }

    #[must_use]
    pub const fn from_string(kind: ErrorKind, message: String) -> Self {
        Self { kind, message }
    }

    #[must_use]
    pub const fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    #[must_use]
    pub fn session_not_found(client_id: &str) -> Self {
        Self::from_string(
            ErrorKind::SessionNotFound,
            format!("Session for client {client_id} not found"),
        )
    }

    /// Whether this error class should be retried with backoff rather than
    /// surfaced to the client immediately (§7, transient I/O).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.kind, ErrorKind::StoreError | ErrorKind::BusError)
    }

    /// Whether this error represents a broken invariant that should
    /// terminate the process rather than be handled locally (§7).
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.kind, ErrorKind::Invariant)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::from_string(ErrorKind::IoError, format!("IoError {err}"))
    }
}

impl From<codec::EncodeError> for Error {
    fn from(err: codec::EncodeError) -> Self {
        Self::from_string(ErrorKind::EncodeError, format!("{err:?}"))
    }
}

impl From<codec::DecodeError> for Error {
    fn from(err: codec::DecodeError) -> Self {
        Self::from_string(ErrorKind::DecodeError, format!("{err:?}"))
    }
}

impl<T> From<mpsc::error::SendError<T>> for Error {
    fn from(err: mpsc::error::SendError<T>) -> Self {
        Self::from_string(ErrorKind::ChannelError, format!("mailbox channel closed: {err}"))
    }
}
