// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use serde::Deserialize;
use std::net::{TcpListener, ToSocketAddrs};
use std::path::{Path, PathBuf};

use crate::error::{Error, ErrorKind};

/// Binding protocol types.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Raw MQTT protocol, over plaintext TCP.
    #[serde(alias = "mqtt")]
    Mqtt,

    /// Raw MQTT protocol, over TCP with TLS encryption.
    #[serde(alias = "mqtts")]
    Mqtts,
}

/// Listener represents a unique ip/port combination and mqtt connection protocol.
#[derive(Debug, Deserialize, Clone)]
pub struct Listener {
    /// Bind the listener to a specific device interface.
    ///
    /// This is useful when an device has multiple addresses or the address may change.
    /// If used with the [ip address/host name] part of the address definition, then the
    /// bind_device option will take priority.
    /// Example: bind_device eth0
    ///
    /// Default is empty.
    #[serde(default = "Listener::default_bind_device")]
    bind_device: String,

    /// The maximum number of client connections to this listener allowed.
    ///
    /// Note that other process limits mean that unlimited connections
    /// are not really possible. Typically the default maximum number of
    /// connections possible is around 1024.
    ///
    /// Default is 0, which means unlimited connections.
    #[serde(default = "Listener::default_maximum_connections")]
    maximum_connections: usize,

    /// Binding protocol.
    ///
    /// Default is mqtt.
    #[serde(default = "Listener::default_protocol")]
    protocol: Protocol,

    /// Binding address, including domain name and port.
    ///
    /// Common addresses are:
    /// - 0.0.0.0:1883, for mqtt
    /// - 0.0.0.0:8883, for mqtts
    ///
    /// Default is 0.0.0.0:1883
    #[serde(default = "Listener::default_address")]
    address: String,

    /// Path to TLS cert file.
    ///
    /// Default is None.
    #[serde(default = "Listener::default_cert_file")]
    cert_file: Option<PathBuf>,

    /// Path to TLS private key file.
    ///
    /// Default is None.
    #[serde(default = "Listener::default_key_file")]
    key_file: Option<PathBuf>,

    /// Connection keep alive timeout in seconds.
    ///
    /// Disconnect the client if the maximium time interval is reached before
    /// receiving Control Packet from client.
    ///
    /// If client does not set keep_alive flag in ConnectPacket, this value will be
    /// used.
    ///
    /// Default is 60.
    #[serde(default = "Listener::default_keep_alive")]
    keep_alive: u16,

    /// Timeout value in seconds before receiving Connect Packet from client.
    ///
    /// The timer is triggered when client stream is connected.
    ///
    /// Default is 60s.
    #[serde(default = "Listener::default_connect_timeout")]
    connect_timeout: u16,

    /// MAY allow a Client to supply a ClientId that has a length of zero bytes.
    ///
    /// mqttd treats this as a special case and assigns a unique ClientId to
    /// that Client if this flag is true.
    ///
    /// Or send IdentifierRejected ConnectAckPacket if this flag is false.
    ///
    /// Default is false.
    #[serde(default = "Listener::default_allow_empty_client_id")]
    allow_empty_client_id: bool,
}

impl Listener {
    #[must_use]
    pub fn default_listeners() -> Vec<Self> {
        vec![Self::default()]
    }

    #[must_use]
    pub fn default_bind_device() -> String {
        String::new()
    }

    #[must_use]
    pub const fn default_maximum_connections() -> usize {
        0
    }

    #[must_use]
    pub const fn default_protocol() -> Protocol {
        Protocol::Mqtt
    }

    #[must_use]
    pub fn default_address() -> String {
        "0.0.0.0:1883".to_string()
    }

    #[must_use]
    pub const fn default_cert_file() -> Option<PathBuf> {
        None
    }

    #[must_use]
    pub const fn default_key_file() -> Option<PathBuf> {
        None
    }

    #[must_use]
    pub const fn default_keep_alive() -> u16 {
        60
    }

    #[must_use]
    pub const fn default_connect_timeout() -> u16 {
        60
    }

    #[must_use]
    pub const fn default_allow_empty_client_id() -> bool {
        false
    }

    #[must_use]
    pub fn bind_device(&self) -> &str {
        &self.bind_device
    }

    #[must_use]
    pub const fn maximum_connections(&self) -> usize {
        self.maximum_connections
    }

    #[must_use]
    pub const fn protocol(&self) -> Protocol {
        self.protocol
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn cert_file(&self) -> Option<&Path> {
        self.cert_file.as_deref()
    }

    #[must_use]
    pub fn key_file(&self) -> Option<&Path> {
        self.key_file.as_deref()
    }

    #[must_use]
    pub const fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> u16 {
        self.connect_timeout
    }

    #[must_use]
    pub const fn allow_empty_client_id(&self) -> bool {
        self.allow_empty_client_id
    }

    /// Validate config.
    ///
    /// # Errors
    ///
    /// Returns error if the socket address is invalid, already in use, or
    /// `protocol` is `mqtts` without both `cert_file` and `key_file` set.
    pub fn validate(&self, bind_address: bool) -> Result<(), Error> {
        if self.protocol == Protocol::Mqtts && (self.cert_file.is_none() || self.key_file.is_none())
        {
            return Err(Error::new(
                ErrorKind::ConfigError,
                "mqtts listener requires both cert_file and key_file",
            ));
        }

        if bind_address {
            let socket = TcpListener::bind(&self.address).map_err(|err| {
                Error::from_string(
                    ErrorKind::ConfigError,
                    format!(
                        "Failed to bind to address {} for listener, err: {:?}",
                        &self.address, err
                    ),
                )
            })?;
            drop(socket);
        } else {
            let _addr = self.address.to_socket_addrs().map_err(|err| {
                Error::from_string(
                    ErrorKind::ConfigError,
                    format!("Invalid socket address: {}, err: {:?}", &self.address, err),
                )
            })?;
        }

        Ok(())
    }
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            bind_device: Self::default_bind_device(),
            maximum_connections: Self::default_maximum_connections(),
            protocol: Self::default_protocol(),
            address: Self::default_address(),
            cert_file: Self::default_cert_file(),
            key_file: Self::default_key_file(),
            keep_alive: Self::default_keep_alive(),
            connect_timeout: Self::default_connect_timeout(),
            allow_empty_client_id: Self::default_allow_empty_client_id(),
        }
    }
}
