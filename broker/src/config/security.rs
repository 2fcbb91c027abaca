// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, ErrorKind};

/// Exactly one of these may be set; `None` falls back to `allow_anonymous`.
#[derive(Debug, Deserialize, Clone)]
pub struct Security {
    /// Determines whether clients that connect without providing a username
    /// are allowed to connect, when none of `authfile`/`webauth`/`password`
    /// is configured.
    ///
    /// It is highly recommended to disable this switch and configure an
    /// authorization policy.
    ///
    /// Default is true.
    #[serde(default = "Security::default_allow_anonymous")]
    allow_anonymous: bool,

    /// Control access to the broker using a JSON authfile.
    ///
    /// This file can be generated and managed using the `mqttd-passwd`
    /// utility, and holds entries
    /// `[{username, password, publish, subscribe}, ...]` with bcrypt-hashed
    /// passwords.
    ///
    /// Default is None.
    #[serde(default = "Security::default_authfile")]
    authfile: Option<PathBuf>,

    /// Delegate authentication to an HTTP endpoint that receives
    /// `{clientid, username, password}` and returns a JSON Authorization
    /// descriptor.
    ///
    /// Default is None.
    #[serde(default = "Security::default_webauth")]
    webauth: Option<String>,

    /// A single shared password required of every client, regardless of
    /// username.
    ///
    /// Default is None.
    #[serde(default = "Security::default_password")]
    password: Option<String>,
}

impl Security {
    #[must_use]
    pub const fn default_allow_anonymous() -> bool {
        true
    }

    #[must_use]
    pub const fn default_authfile() -> Option<PathBuf> {
        None
    }

    #[must_use]
    pub const fn default_webauth() -> Option<String> {
        None
    }

    #[must_use]
    pub const fn default_password() -> Option<String> {
        None
    }

    #[must_use]
    pub const fn allow_anonymous(&self) -> bool {
        self.allow_anonymous
    }

    #[must_use]
    pub fn authfile(&self) -> Option<&Path> {
        self.authfile.as_deref()
    }

    #[must_use]
    pub fn webauth(&self) -> Option<&str> {
        self.webauth.as_deref()
    }

    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Validate config.
    ///
    /// # Errors
    ///
    /// Returns error if more than one of `authfile`/`webauth`/`password` is set.
    pub fn validate(&self) -> Result<(), Error> {
        let configured = [
            self.authfile.is_some(),
            self.webauth.is_some(),
            self.password.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count();

        if configured > 1 {
            return Err(Error::new(
                ErrorKind::ConfigError,
                "security: at most one of authfile, webauth, password may be set",
            ));
        }
        Ok(())
    }
}

impl Default for Security {
    fn default() -> Self {
        Self {
            allow_anonymous: Self::default_allow_anonymous(),
            authfile: Self::default_authfile(),
            webauth: Self::default_webauth(),
            password: Self::default_password(),
        }
    }
}
