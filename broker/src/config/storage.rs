// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use serde::Deserialize;

use crate::error::{Error, ErrorKind};

/// Which [`crate::persistence::PersistenceBackend`] to construct at startup.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    #[serde(alias = "memory")]
    Memory,

    #[serde(alias = "redis")]
    Redis,
}

#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Deserialize, Clone)]
pub struct Storage {
    /// Which persistence implementation backs sessions, retained messages
    /// and the client id set.
    ///
    /// Default is memory.
    #[serde(default = "Storage::default_backend")]
    backend: Backend,

    /// Connection URL for the `redis` backend, e.g. `redis://127.0.0.1/`.
    ///
    /// Unused for the `memory` backend.
    ///
    /// Default is "redis://127.0.0.1/".
    #[serde(default = "Storage::default_connection_url")]
    connection_url: String,

    /// Connection pool size for the `redis` backend.
    ///
    /// Default is 4.
    #[serde(default = "Storage::default_pool_size")]
    pool_size: u32,
}

impl Storage {
    #[must_use]
    pub const fn default_backend() -> Backend {
        Backend::Memory
    }

    #[must_use]
    pub fn default_connection_url() -> String {
        "redis://127.0.0.1/".to_string()
    }

    #[must_use]
    pub const fn default_pool_size() -> u32 {
        4
    }

    #[must_use]
    pub const fn backend(&self) -> Backend {
        self.backend
    }

    #[must_use]
    pub fn connection_url(&self) -> &str {
        &self.connection_url
    }

    #[must_use]
    pub const fn pool_size(&self) -> u32 {
        self.pool_size
    }

    /// Validate storage config.
    ///
    /// # Errors
    ///
    /// Returns error if the `redis` backend is selected with an empty
    /// connection url.
    pub fn validate(&self) -> Result<(), Error> {
        if self.backend == Backend::Redis && self.connection_url.trim().is_empty() {
            return Err(Error::new(
                ErrorKind::ConfigError,
                "storage: connection_url is required for the redis backend",
            ));
        }
        Ok(())
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            backend: Self::default_backend(),
            connection_url: Self::default_connection_url(),
            pool_size: Self::default_pool_size(),
        }
    }
}
