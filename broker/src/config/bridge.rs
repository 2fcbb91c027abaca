// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use serde::Deserialize;

use crate::error::{Error, ErrorKind};

/// Optional uplink to a remote broker (§11).
///
/// mqttd subscribes to nothing upstream; it only republishes, under
/// `client_id`, messages it has already authorized locally on the topics
/// listed in `topics`.
#[derive(Debug, Deserialize, Clone)]
pub struct Bridge {
    /// Address of the remote broker, e.g. `tcp://upstream.example.org:1883`.
    address: String,

    /// Client id presented to the remote broker.
    ///
    /// Default is "mqttd-bridge".
    #[serde(default = "Bridge::default_client_id")]
    client_id: String,

    /// Local topic filters to mirror upstream.
    topics: Vec<String>,
}

impl Bridge {
    #[must_use]
    pub fn default_client_id() -> String {
        "mqttd-bridge".to_string()
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Validate config.
    ///
    /// # Errors
    ///
    /// Returns error if `address` or `topics` is empty.
    pub fn validate(&self) -> Result<(), Error> {
        if self.address.trim().is_empty() {
            return Err(Error::new(
                ErrorKind::ConfigError,
                "bridge: address must not be empty",
            ));
        }
        if self.topics.is_empty() {
            return Err(Error::new(
                ErrorKind::ConfigError,
                "bridge: topics must not be empty",
            ));
        }
        Ok(())
    }
}
