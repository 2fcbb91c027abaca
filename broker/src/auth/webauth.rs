// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! HTTP authentication backend: delegates each CONNECT to a remote endpoint
//! that receives `{clientid, username, password}` and returns the JSON
//! Authorization shape `{publish, subscribe}`.

use serde::Serialize;

use super::wire::AclRuleWire;
use crate::error::{Error, ErrorKind};
use crate::types::Authorization;

#[derive(Debug, Serialize)]
struct AuthRequest<'a> {
    clientid: &'a str,
    username: Option<&'a str>,
    password: Option<&'a str>,
}

#[derive(Debug, serde::Deserialize)]
struct AuthResponse {
    publish: AclRuleWire,
    subscribe: AclRuleWire,
}

#[derive(Debug)]
pub struct WebAuth {
    url: String,
    client: reqwest::Client,
}

impl WebAuth {
    #[must_use]
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// # Errors
    ///
    /// Returns error if the endpoint cannot be reached or returns a body that
    /// does not match the expected Authorization shape.
    pub async fn authenticate(
        &self,
        client_id: &str,
        username: Option<&str>,
        password: Option<&[u8]>,
    ) -> Result<Authorization, Error> {
        // Password is only ever compared by the remote endpoint; lossy utf8
        // conversion is acceptable since MQTT 3.1.1 passwords are typically
        // plain credentials, not arbitrary binary blobs.
        let password = password.map(|pwd| String::from_utf8_lossy(pwd).into_owned());
        let request = AuthRequest {
            clientid: client_id,
            username,
            password: password.as_deref(),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                Error::from_string(
                    ErrorKind::AuthenticationFailed,
                    format!("webauth request failed: {err}"),
                )
            })?;

        if !response.status().is_success() {
            return Ok(Authorization::denied());
        }

        let body: AuthResponse = response.json().await.map_err(|err| {
            Error::from_string(
                ErrorKind::AuthenticationFailed,
                format!("webauth response malformed: {err}"),
            )
        })?;

        Ok(Authorization::new(body.publish.into(), body.subscribe.into()))
    }
}
