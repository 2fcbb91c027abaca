// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Authentication/authorization provider (§6): one of anonymous, JSON
//! authfile, HTTP webauth, or a single shared password, selected at startup
//! from [`crate::config::Security`] and called once per CONNECT.

pub mod file_auth;
mod webauth;
mod wire;

use crate::config::Security;
use crate::error::Error;
use crate::types::Authorization;
use file_auth::FileAuth;
use webauth::WebAuth;

enum Mode {
    /// No credential source configured; `allow_anonymous` is the whole policy.
    Anonymous { allow_anonymous: bool },
    File(FileAuth),
    Webauth(WebAuth),
    /// A single shared password; any username is accepted alongside it.
    Password(String),
}

/// Built once at startup from [`Security`] and shared (read-only) across
/// every connection's CONNECT handshake.
pub struct Authenticator {
    mode: Mode,
}

impl Authenticator {
    /// # Errors
    ///
    /// Returns error if `authfile` is set but cannot be read/parsed.
    pub fn new(security: &Security) -> Result<Self, Error> {
        let mode = if let Some(path) = security.authfile() {
            Mode::File(FileAuth::load(path)?)
        } else if let Some(url) = security.webauth() {
            Mode::Webauth(WebAuth::new(url))
        } else if let Some(password) = security.password() {
            Mode::Password(password.to_string())
        } else {
            Mode::Anonymous {
                allow_anonymous: security.allow_anonymous(),
            }
        };
        Ok(Self { mode })
    }

    /// Decide the [`Authorization`] granted to a CONNECT attempt.
    ///
    /// # Errors
    ///
    /// Returns error if the `webauth` backend cannot be reached.
    pub async fn authenticate(
        &self,
        client_id: &str,
        username: Option<&str>,
        password: Option<&[u8]>,
    ) -> Result<Authorization, Error> {
        match &self.mode {
            Mode::Anonymous { allow_anonymous } => Ok(if *allow_anonymous {
                Authorization::allow_all()
            } else {
                Authorization::denied()
            }),
            Mode::File(file_auth) => Ok(file_auth.authenticate(username, password)),
            Mode::Webauth(webauth) => webauth.authenticate(client_id, username, password).await,
            Mode::Password(expected) => {
                let matches = password.map(|pwd| pwd == expected.as_bytes()).unwrap_or(false);
                Ok(if matches {
                    Authorization::allow_all()
                } else {
                    Authorization::denied()
                })
            }
        }
    }
}
