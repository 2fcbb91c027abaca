// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use std::collections::BTreeMap;

use codec::QoS;

/// Identifies a configured listener (one bound socket).
pub type ListenerId = u32;

/// Identifies one accepted TCP connection, scoped to its listener.
pub type ConnectionId = u64;

/// A client-supplied identifier, stable across reconnections.
pub type ClientId = String;

/// A concrete topic name or topic filter, stored as owned text once validated.
pub type Topic = String;

/// `ALL` or an explicit list of filters used by one direction of an
/// [`Authorization`] descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AclRule {
    /// The client may act on every topic.
    All,

    /// The client may act only on topics covered by one of these filters.
    Masks(Vec<Topic>),
}

impl From<Vec<Topic>> for AclRule {
    fn from(masks: Vec<Topic>) -> Self {
        if masks.iter().any(|mask| mask == "ALL") {
            Self::All
        } else {
            Self::Masks(masks)
        }
    }
}

impl AclRule {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Masks(masks) if masks.is_empty())
    }

    /// Decide whether `topic` is covered by this rule.
    #[must_use]
    pub fn allows(&self, topic: &str) -> bool {
        match self {
            Self::All => true,
            Self::Masks(masks) => masks
                .iter()
                .any(|mask| codec::topic::topic_matches(mask, topic)),
        }
    }
}

/// Authorization descriptor returned by the authenticator for a client.
///
/// A denied connection is signalled by both lists being empty, per the data
/// model invariant (see [`Authorization::is_denied`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub publishes_allowed: AclRule,
    pub subscribes_allowed: AclRule,
}

impl Authorization {
    #[must_use]
    pub const fn new(publishes_allowed: AclRule, subscribes_allowed: AclRule) -> Self {
        Self {
            publishes_allowed,
            subscribes_allowed,
        }
    }

    #[must_use]
    pub fn allow_all() -> Self {
        Self::new(AclRule::All, AclRule::All)
    }

    #[must_use]
    pub fn denied() -> Self {
        Self::new(AclRule::Masks(Vec::new()), AclRule::Masks(Vec::new()))
    }

    #[must_use]
    pub fn is_denied(&self) -> bool {
        self.publishes_allowed.is_empty() && self.subscribes_allowed.is_empty()
    }

    #[must_use]
    pub fn can_publish(&self, topic: &str) -> bool {
        self.publishes_allowed.allows(topic)
    }

    #[must_use]
    pub fn can_subscribe(&self, filter: &str) -> bool {
        self.subscribes_allowed.allows(filter)
    }
}

/// A client's last-will, published on the client's behalf when its
/// connection closes abruptly.
#[derive(Debug, Clone)]
pub struct LastWill {
    pub topic: Topic,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// `mask -> granted_qos` subscription map kept on a [`crate::session::Session`].
pub type SubscriptionMap = BTreeMap<Topic, QoS>;
