// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Keeps the last retained message per topic and replays matches to new
//! subscribers.

use std::collections::BTreeMap;

use crate::types::ClientId;

/// One retained message: the raw encoded PUBLISH plus the client id that
/// originally published it.
#[derive(Debug, Clone)]
pub struct RetainedMessage {
    pub packet: codec::PublishPacket,
    pub origin: ClientId,
}

/// Flat `topic -> retained message` map.
#[derive(Debug, Default)]
pub struct RetainedStore {
    messages: BTreeMap<String, RetainedMessage>,
}

impl RetainedStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a retain=true PUBLISH: deletes the entry if the payload is
    /// empty, otherwise stores/replaces it.
    pub fn apply(&mut self, topic: &str, packet: codec::PublishPacket, origin: ClientId) {
        if packet.message().is_empty() {
            self.messages.remove(topic);
        } else {
            self.messages
                .insert(topic.to_string(), RetainedMessage { packet, origin });
        }
    }

    #[must_use]
    pub fn get(&self, topic: &str) -> Option<&RetainedMessage> {
        self.messages.get(topic)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Topics whose retained message matches `filter`, for replay to a
    /// freshly-subscribed session.
    ///
    /// The flat map is scanned and matched per-topic with the same
    /// [`codec::topic::topic_matches`] rule the subscription tree uses; a
    /// trie-shaped store (walking via [`SubscriptionTree::match_topic`]
    /// semantics instead) is the allowed alternative for large retained
    /// sets, per the component design notes.
    #[must_use]
    pub fn matching(&self, filter: &str) -> Vec<&RetainedMessage> {
        let mut topics: Vec<&String> = self
            .messages
            .keys()
            .filter(|topic| codec::topic::topic_matches(filter, topic))
            .collect();
        topics.sort();
        topics
            .into_iter()
            .filter_map(|topic| self.messages.get(topic))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::QoS;

    fn publish(topic: &str, payload: &[u8], qos: QoS) -> codec::PublishPacket {
        codec::PublishPacket::new(topic, qos, payload).unwrap()
    }

    #[test]
    fn retain_empty_payload_deletes_entry() {
        let mut store = RetainedStore::new();
        store.apply(
            "status",
            publish("status", b"ok", QoS::AtLeastOnce),
            "origin".to_string(),
        );
        assert!(store.get("status").is_some());

        store.apply(
            "status",
            publish("status", b"", QoS::AtLeastOnce),
            "origin".to_string(),
        );
        assert!(store.get("status").is_none());
    }

    #[test]
    fn matching_uses_filter_semantics() {
        let mut store = RetainedStore::new();
        store.apply(
            "a/b",
            publish("a/b", b"x", QoS::AtMostOnce),
            "origin".to_string(),
        );
        store.apply(
            "a/c",
            publish("a/c", b"y", QoS::AtMostOnce),
            "origin".to_string(),
        );
        let matched = store.matching("a/+");
        assert_eq!(matched.len(), 2);
    }
}
