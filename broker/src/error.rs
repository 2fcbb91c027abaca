// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use std::fmt::{self, Display};
use std::io;
use tokio::sync::mpsc;

use crate::commands::{DispatcherToSessionCmd, ListenerToDispatcherCmd, SessionToDispatcherCmd};

/// Represent the types of errors, matching the error-handling policy table:
/// callers match on `kind()` and react per-policy rather than on message text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Packet is structurally invalid (bad UTF-8, reserved QoS, truncated body, ...).
    MalformedPacket,

    /// First packet was not CONNECT, bad protocol name/version, reserved bits set.
    ProtocolViolation,

    /// Authenticator rejected the client.
    AuthenticationFailed,

    /// Publish/subscribe denied by the authorization descriptor.
    AuthorizationDenied,

    /// Peer closed the stream, or a network error occurred.
    StreamClosed,

    /// Keep-alive timer fired before any packet arrived.
    KeepAliveTimeout,

    /// All 65,534 packet ids are in use by a session's inflight window.
    PacketIdsDepleted,

    /// Persistence backend failed.
    PersistenceError,

    /// I/O error not covered by a more specific kind.
    IoError,

    /// TOML/JSON parse failure.
    FormatError,

    /// Invalid configuration value.
    ConfigError,

    /// TLS certificate or key material could not be loaded.
    CertError,

    /// Failed to initialize the logging backend.
    LoggerError,

    /// Invalid CLI argument.
    ParameterError,

    /// Session referenced by id is not present in the registry.
    SessionNotFound,

    /// An internal mpsc channel was closed unexpectedly.
    ChannelError,
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
    pub fn from_string(kind: ErrorKind, message: String) -> Self {
        Self { kind, message }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl Error {
    #[must_use]
    pub fn session_not_found(client_id: &str) -> Self {
        Self::from_string(
            ErrorKind::SessionNotFound,
            format!("No session registered for client id {client_id}"),
        )
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::from_string(ErrorKind::IoError, format!("IoError: {err}"))
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::from_string(ErrorKind::FormatError, format!("Invalid toml: {err}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::from_string(ErrorKind::FormatError, format!("Invalid json: {err}"))
    }
}

impl From<codec::EncodeError> for Error {
    fn from(err: codec::EncodeError) -> Self {
        Self::from_string(ErrorKind::MalformedPacket, format!("Encode error: {err:?}"))
    }
}

impl From<codec::DecodeError> for Error {
    fn from(err: codec::DecodeError) -> Self {
        Self::from_string(ErrorKind::MalformedPacket, format!("Decode error: {err:?}"))
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Self::from_string(ErrorKind::PersistenceError, format!("Redis error: {err}"))
    }
}

impl From<bcrypt::BcryptError> for Error {
    fn from(err: bcrypt::BcryptError) -> Self {
        Self::from_string(ErrorKind::ConfigError, format!("Bcrypt error: {err}"))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::from_string(
            ErrorKind::AuthenticationFailed,
            format!("webauth request failed: {err}"),
        )
    }
}

macro_rules! convert_send_error {
    ($cmd_type: ty) => {
        impl From<mpsc::error::SendError<$cmd_type>> for Error {
            fn from(err: mpsc::error::SendError<$cmd_type>) -> Self {
                Error::from_string(
                    ErrorKind::ChannelError,
                    format!("{} channel closed: {}", stringify!($cmd_type), err),
                )
            }
        }
    };
}

convert_send_error!(ListenerToDispatcherCmd);
convert_send_error!(DispatcherToSessionCmd);
convert_send_error!(SessionToDispatcherCmd);
