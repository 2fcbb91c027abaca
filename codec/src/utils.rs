// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

use crate::error::{DecodeError, EncodeError};

/// Generate a random alphanumeric string, used to assign a client id when a
/// CONNECT packet supplies an empty one.
#[must_use]
pub fn random_string(len: usize) -> String {
    thread_rng().sample_iter(&Alphanumeric).take(len).collect()
}

#[derive(Debug)]
pub enum ClientIdError {
    TooLong,
}

/// MQTT 3.1.1 lets the server impose any additional restriction on client
/// ids it likes; this implementation only rejects ids that cannot be
/// length-prefixed on the wire. Charset and emptiness are session-layer
/// policy, not a codec concern.
///
/// # Errors
///
/// Returns error if `client_id` is longer than 65535 bytes.
pub fn validate_client_id(client_id: &str) -> Result<(), ClientIdError> {
    if client_id.len() > usize::from(u16::MAX) {
        Err(ClientIdError::TooLong)
    } else {
        Ok(())
    }
}

/// Keep-alive is a plain 16-bit seconds count; every value is a valid wire
/// representation. Kept as a named validation step so callers have one
/// place to route a future server-side policy (e.g. a configured maximum)
/// without touching the decode path for every packet kind.
///
/// # Errors
///
/// Never currently fails.
pub fn validate_keep_alive(_keep_alive: u16) -> Result<(), DecodeError> {
    Ok(())
}

#[derive(Debug)]
pub enum StringError {
    /// Byte length of the UTF-8 encoding exceeds the 16-bit length prefix.
    TooLong,

    /// Not well-formed UTF-8.
    InvalidUtf8,

    /// Contains the null character, forbidden by MQTT-1.5.4-2.
    ContainsNul,
}

/// # Errors
///
/// Returns error if `s` is too long to be length-prefixed, or contains a
/// null character.
pub fn validate_utf8_string(s: &str) -> Result<(), StringError> {
    if s.len() > usize::from(u16::MAX) {
        return Err(StringError::TooLong);
    }
    if s.contains('\u{0000}') {
        return Err(StringError::ContainsNul);
    }
    Ok(())
}

/// # Errors
///
/// Returns error if `data` is longer than 65535 bytes.
pub fn validate_two_bytes_data(data: &[u8]) -> Result<(), EncodeError> {
    if data.len() > usize::from(u16::MAX) {
        Err(EncodeError::TooManyData)
    } else {
        Ok(())
    }
}

/// # Errors
///
/// Returns error if `bytes` is not well-formed UTF-8.
pub fn to_utf8_string(bytes: &[u8]) -> Result<String, StringError> {
    String::from_utf8(bytes.to_vec()).map_err(|_err| StringError::InvalidUtf8)
}
