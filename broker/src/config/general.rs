// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

#![allow(clippy::unsafe_derive_deserialize)]

use codec::QoS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, ErrorKind};

/// General section in config.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct General {
    /// Time interval to send $SYS messages in seconds.
    ///
    /// Set to 0 to disable $SYS messages.
    ///
    /// Default is 3s.
    #[serde(default = "General::default_sys_interval")]
    sys_interval: u32,

    /// When run as root, drop privileges to this user.
    ///
    /// If mqttd is launched by non-root account, this property is ignored.
    ///
    /// Default user is "mqttd".
    #[serde(default = "General::default_user")]
    user: String,

    /// Write process id to a file. A blank string means a pid file shouldn't be written.
    ///
    /// Default is `/run/mqttd.pid` for root user,
    /// and `/run/user/UID/mqttd.pid` for non-root users.
    #[serde(default = "General::default_pid_file")]
    pid_file: PathBuf,

    /// Disable Nagle's algorithm on client sockets.
    ///
    /// This has the effect of reducing latency of individual messages
    /// at the potential cost of increasing the number of packets being sent.
    ///
    /// Default is false.
    #[serde(default = "General::default_no_delay")]
    no_delay: bool,

    /// Set maximum size for publish message payload.
    ///
    /// Received messages that exceed this size will not be accepted by the broker.
    /// MQTT imposes a maximum payload size of 268435455 bytes.
    ///
    /// Default value is 0, which means that all valid MQTT messages are accepted.
    #[serde(default = "General::default_message_size_limit")]
    message_size_limit: u32,

    /// Clients may only connect with keep_alive less than or equal to this
    /// value. The maximum allowable is 65535.
    ///
    /// Default value is 65535.
    #[serde(default = "General::default_maximum_keep_alive")]
    maximum_keep_alive: u32,

    /// Set the maximum QoS supported.
    ///
    /// Clients publishing at a QoS higher than specified here will be disconnected.
    /// Available values are 0, 1 and 2.
    ///
    /// Default is 2.
    #[serde(default = "General::default_maximum_qos")]
    maximum_qos: QoS,

    /// Maximum MQTT packet size accepted from, or sent to, a client.
    ///
    /// Applies to the full encoded packet, not just the payload.
    ///
    /// Defaults is 0, which means no limit.
    #[serde(default = "General::default_maximum_packet_size")]
    maximum_packet_size: u32,

    /// Default size of a session's outgoing in-flight window (§4.5),
    /// applied unless a listener overrides it.
    ///
    /// Default is 20.
    #[serde(default = "General::default_max_inflight")]
    max_inflight: usize,

    /// Floor, in seconds, for the redelivery interval used to retry
    /// unacknowledged QoS 1/2 publishes: `max(keep_alive, this floor)`.
    ///
    /// Default is 60.
    #[serde(default = "General::default_redelivery_interval")]
    redelivery_interval: u64,
}

impl General {
    #[must_use]
    pub const fn default_sys_interval() -> u32 {
        3
    }

    #[must_use]
    pub fn default_user() -> String {
        "mqttd".to_string()
    }

    #[cfg(not(unix))]
    #[must_use]
    pub fn default_pid_file() -> PathBuf {
        PathBuf::from("mqttd.pid")
    }

    #[cfg(unix)]
    #[must_use]
    pub fn default_pid_file() -> PathBuf {
        let uid = unsafe { nc::geteuid() };
        if uid == 0 {
            PathBuf::from("/run/mqttd.pid")
        } else {
            PathBuf::from(&format!("/run/user/{uid}/mqttd.pid"))
        }
    }

    #[must_use]
    pub const fn default_no_delay() -> bool {
        false
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
    pub const fn default_maximum_packet_size() -> u32 {
        0
    }

    #[must_use]
    pub const fn default_max_inflight() -> usize {
        20
    }

    #[must_use]
    pub const fn default_redelivery_interval() -> u64 {
        60
    }

    #[must_use]
    pub const fn sys_interval(&self) -> Duration {
        Duration::from_secs(self.sys_interval as u64)
    }

    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    #[must_use]
    pub fn pid_file(&self) -> &Path {
        self.pid_file.as_path()
    }

    #[must_use]
    pub const fn no_delay(&self) -> bool {
        self.no_delay
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
    pub const fn maximum_packet_size(&self) -> u32 {
        self.maximum_packet_size
    }

    #[must_use]
    pub const fn max_inflight(&self) -> usize {
        self.max_inflight
    }

    /// `redelivery_interval = max(keep_alive, redelivery_interval floor)`,
    /// per §4.5.
    #[must_use]
    pub fn redelivery_interval(&self, keep_alive: u16) -> Duration {
        Duration::from_secs(self.redelivery_interval.max(u64::from(keep_alive)))
    }

    /// Validate config.
    ///
    /// # Errors
    ///
    /// Returns error if username not found.
    #[cfg(not(unix))]
    pub fn validate(&self) -> Result<(), Error> {
        Ok(())
    }

    #[cfg(unix)]
    /// # Errors
    /// Returns error if specific user id does not exist.
    pub fn validate(&self) -> Result<(), Error> {
        let euid = unsafe { nc::geteuid() };
        if euid == 0 {
            // For root only.
            if users::get_user_by_name(&self.user).is_none() {
                return Err(Error::from_string(
                    ErrorKind::ConfigError,
                    format!("Failed to find user info with name: {}", &self.user),
                ));
            }
        }
        Ok(())
    }
}

impl Default for General {
    fn default() -> Self {
        Self {
            sys_interval: Self::default_sys_interval(),
            user: Self::default_user(),
            pid_file: Self::default_pid_file(),
            no_delay: Self::default_no_delay(),
            message_size_limit: Self::default_message_size_limit(),
            maximum_qos: Self::default_maximum_qos(),
            maximum_keep_alive: Self::default_maximum_keep_alive(),
            maximum_packet_size: Self::default_maximum_packet_size(),
            max_inflight: Self::default_max_inflight(),
            redelivery_interval: Self::default_redelivery_interval(),
        }
    }
}
