// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! JSON authfile backend: `[{username, password, publish, subscribe}, ...]`
//! with bcrypt-hashed passwords, managed by the `mqttd-passwd` utility.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::wire::AclRuleWire;
use crate::error::{Error, ErrorKind};
use crate::types::{AclRule, Authorization};

pub const DEFAULT_COST: u32 = bcrypt::DEFAULT_COST;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthEntry {
    pub username: String,
    pub password: String,
    #[serde(default = "AuthEntry::default_rule")]
    pub publish: Vec<String>,
    #[serde(default = "AuthEntry::default_rule")]
    pub subscribe: Vec<String>,
}

impl AuthEntry {
    fn default_rule() -> Vec<String> {
        vec!["ALL".to_string()]
    }

    fn default_rule_wire() -> AclRuleWire {
        AclRuleWire::All("ALL".to_string())
    }
}

#[derive(Debug, Deserialize)]
struct AuthEntryWire {
    username: String,
    password: String,
    #[serde(default = "AuthEntry::default_rule_wire")]
    publish: AclRuleWire,
    #[serde(default = "AuthEntry::default_rule_wire")]
    subscribe: AclRuleWire,
}

/// In-memory authfile, keyed by username.
#[derive(Debug)]
pub struct FileAuth {
    users: HashMap<String, (String, AclRule, AclRule)>,
}

impl FileAuth {
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is not valid JSON.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = fs::read_to_string(path).map_err(|err| {
            Error::from_string(
                ErrorKind::ConfigError,
                format!("Failed to read authfile {path:?}: {err}"),
            )
        })?;
        let entries: Vec<AuthEntryWire> = serde_json::from_str(&content)?;
        let users = entries
            .into_iter()
            .map(|entry| {
                (
                    entry.username,
                    (
                        entry.password,
                        AclRule::from(entry.publish),
                        AclRule::from(entry.subscribe),
                    ),
                )
            })
            .collect();
        Ok(Self { users })
    }

    #[must_use]
    pub fn authenticate(&self, username: Option<&str>, password: Option<&[u8]>) -> Authorization {
        let (Some(username), Some(password)) = (username, password) else {
            return Authorization::denied();
        };
        let Some((hash, publish, subscribe)) = self.users.get(username) else {
            return Authorization::denied();
        };
        match bcrypt::verify(password, hash) {
            Ok(true) => Authorization::new(publish.clone(), subscribe.clone()),
            _ => Authorization::denied(),
        }
    }

    /// Write `entries` back out as a JSON authfile, used by `mqttd-passwd`.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written or serialized.
    pub fn save(path: &Path, entries: &[AuthEntry]) -> Result<(), Error> {
        let content = serde_json::to_string_pretty(entries)?;
        fs::write(path, content).map_err(Into::into)
    }

    /// Read the raw entry list back, e.g. for add/remove/list in `mqttd-passwd`.
    ///
    /// # Errors
    ///
    /// Returns error if the file does not exist or is not valid JSON.
    pub fn load_entries(path: &Path) -> Result<Vec<AuthEntry>, Error> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(Into::into)
    }
}
