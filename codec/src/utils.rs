// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

use crate::{DecodeError, EncodeError};

/// Generate random string, used to assign a `clientId` when the client sent an
/// empty one under MQTT 3.1.1/5.0.
#[must_use]
pub fn random_string(len: usize) -> String {
    thread_rng().sample_iter(&Alphanumeric).map(char::from).take(len).collect()
}

#[derive(Debug, PartialEq, Eq)]
pub enum ClientIdError {
    /// No chars.
    IsEmpty,

    /// Larger than 23 chars, under MQTT 3.1.1 the server may reject this.
    TooLong,

    /// Can only contain 0-9a-zA-Z.
    InvalidChars,
}

#[derive(Debug, PartialEq, Eq)]
pub enum StringError {
    InvalidUtf8,
}

/// Validate a client identifier. A non-empty, ASCII alphanumeric id is always
/// accepted; an empty id is left to the caller (CONNECT handling decides
/// whether to assign one, per the `allow_empty_client_id` policy).
pub fn check_client_id(client_id: &str) -> Result<(), ClientIdError> {
    if client_id.is_empty() {
        return Err(ClientIdError::IsEmpty);
    }
    if client_id.len() > 23 {
        return Err(ClientIdError::TooLong);
    }
    if !client_id.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(ClientIdError::InvalidChars);
    }
    Ok(())
}

/// # Errors
///
/// Returns error if `client_id` is empty and empty ids are not permitted by the caller.
pub fn validate_client_id(client_id: &str) -> Result<(), DecodeError> {
    if client_id.is_empty() {
        return Ok(());
    }
    check_client_id(client_id).map_err(|_err| DecodeError::InvalidClientId)
}

/// # Errors
///
/// Returns error if `bytes` is not valid UTF-8.
pub fn to_utf8_string(bytes: &[u8]) -> Result<String, StringError> {
    String::from_utf8(bytes.to_vec()).map_err(|_err| StringError::InvalidUtf8)
}

/// # Errors
///
/// Returns error if `s` is not valid UTF-8 or contains control characters
/// disallowed by `MQTT-1.5.4-1`.
pub fn validate_utf8_string(s: &str) -> Result<(), StringError> {
    if s.chars().any(|c| c == '\u{0000}') {
        return Err(StringError::InvalidUtf8);
    }
    Ok(())
}

/// # Errors
///
/// Returns error if `data.len()` does not fit in a 16-bit length prefix.
pub fn validate_two_bytes_data(data: &[u8]) -> Result<(), EncodeError> {
    if data.len() > usize::from(u16::MAX) {
        Err(EncodeError::InvalidVarInt)
    } else {
        Ok(())
    }
}
