// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! The subscription tree: a trie keyed by topic-level strings that answers
//! "who subscribes to topic T?" in `O(depth x fanout)` instead of scanning
//! every stored mask.

use std::collections::BTreeMap;

use codec::QoS;

use crate::types::ClientId;

#[derive(Debug, Default)]
struct Node {
    children: BTreeMap<String, Node>,
    subscribers: BTreeMap<ClientId, QoS>,
}

impl Node {
    fn is_empty(&self) -> bool {
        self.children.is_empty() && self.subscribers.is_empty()
    }
}

/// Subscribers keyed by topic-pattern trie.
///
/// The root node represents the empty path; each level of a mask walks one
/// child keyed by the literal level string (`+` and `#` are levels like any
/// other as far as tree storage is concerned -- their wildcard behavior only
/// matters during [`SubscriptionTree::match_topic`]).
#[derive(Debug, Default)]
pub struct SubscriptionTree {
    root: Node,
}

impl SubscriptionTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `client_id` as a subscriber of `mask` with `qos`.
    ///
    /// Returns `true` when this is the first subscriber ever recorded at
    /// this exact mask (the bridge uses this to announce new patterns
    /// upstream).
    pub fn insert(&mut self, mask: &str, client_id: &ClientId, qos: QoS) -> bool {
        let mut node = &mut self.root;
        for level in mask.split('/') {
            node = node.children.entry(level.to_string()).or_default();
        }
        let first_subscriber = node.subscribers.is_empty();
        node.subscribers.insert(client_id.clone(), qos);
        first_subscriber
    }

    /// Remove `client_id` as a subscriber of `mask`.
    ///
    /// Returns `true` when the mask has no subscribers left after removal.
    /// Nodes are pruned bottom-up once both their children and subscribers
    /// are empty.
    pub fn remove(&mut self, mask: &str, client_id: &ClientId) -> bool {
        let levels: Vec<&str> = mask.split('/').collect();
        let became_empty = Self::remove_rec(&mut self.root, &levels, client_id);
        became_empty
    }

    fn remove_rec(node: &mut Node, levels: &[&str], client_id: &ClientId) -> bool {
        if levels.is_empty() {
            node.subscribers.remove(client_id);
            return node.subscribers.is_empty();
        }
        let (head, rest) = (levels[0], &levels[1..]);
        let became_empty = if let Some(child) = node.children.get_mut(head) {
            let empty = Self::remove_rec(child, rest, client_id);
            if child.is_empty() {
                node.children.remove(head);
            }
            empty
        } else {
            false
        };
        became_empty
    }

    /// Remove every subscription `client_id` holds, used on session teardown.
    pub fn remove_client(&mut self, masks: &[String], client_id: &ClientId) {
        for mask in masks {
            self.remove(mask, client_id);
        }
    }

    /// DFS match of a concrete topic against every stored mask, merging
    /// duplicate routes to the same subscriber at the maximum granted QoS.
    #[must_use]
    pub fn match_topic(&self, topic: &str) -> BTreeMap<ClientId, QoS> {
        let levels: Vec<&str> = topic.split('/').collect();
        let mut out = BTreeMap::new();
        // The $SYS convention only restricts the filter's *first* level: a
        // filter literally starting with "$SYS" still matches normally past
        // that point.
        Self::match_rec(&self.root, &levels, !topic.starts_with('$'), &mut out);
        out
    }

    fn merge(out: &mut BTreeMap<ClientId, QoS>, subscribers: &BTreeMap<ClientId, QoS>) {
        for (client_id, qos) in subscribers {
            out.entry(client_id.clone())
                .and_modify(|existing| {
                    if *qos > *existing {
                        *existing = *qos;
                    }
                })
                .or_insert(*qos);
        }
    }

    fn match_rec(node: &Node, levels: &[&str], allow_wildcards: bool, out: &mut BTreeMap<ClientId, QoS>) {
        // `#` terminates the search here, matching this node's remaining
        // path plus zero or more further levels.
        if allow_wildcards {
            if let Some(hash) = node.children.get("#") {
                Self::merge(out, &hash.subscribers);
            }
        }

        match levels.split_first() {
            None => {
                // Exact end of topic: this node's own subscribers match.
                Self::merge(out, &node.subscribers);
            }
            Some((head, rest)) => {
                if let Some(literal) = node.children.get(*head) {
                    Self::match_rec(literal, rest, true, out);
                }
                if allow_wildcards {
                    if let Some(plus) = node.children.get("+") {
                        Self::match_rec(plus, rest, true, out);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid(s: &str) -> ClientId {
        s.to_string()
    }

    #[test]
    fn insert_reports_first_subscriber() {
        let mut tree = SubscriptionTree::new();
        assert!(tree.insert("a/b", &cid("c1"), QoS::AtLeastOnce));
        assert!(!tree.insert("a/b", &cid("c2"), QoS::AtMostOnce));
    }

    #[test]
    fn remove_reports_emptied_mask_and_prunes() {
        let mut tree = SubscriptionTree::new();
        tree.insert("a/b", &cid("c1"), QoS::AtLeastOnce);
        assert!(tree.remove("a/b", &cid("c1")));
        assert!(tree.match_topic("a/b").is_empty());
    }

    #[test]
    fn wildcard_match_scenario_d() {
        let mut tree = SubscriptionTree::new();
        tree.insert("sport/+/player1/#", &cid("a"), QoS::ExactOnce);

        assert!(tree.match_topic("sport/tennis/player1").contains_key("a"));
        assert!(tree
            .match_topic("sport/tennis/player1/ranking")
            .contains_key("a"));
        assert!(tree
            .match_topic("sport/golf/player1/tour/2024")
            .contains_key("a"));
        assert!(!tree.match_topic("sport/player1").contains_key("a"));
    }

    #[test]
    fn duplicate_routes_keep_max_qos() {
        let mut tree = SubscriptionTree::new();
        tree.insert("a/+", &cid("c1"), QoS::AtMostOnce);
        tree.insert("a/#", &cid("c1"), QoS::ExactOnce);
        let matched = tree.match_topic("a/b");
        assert_eq!(matched.get("c1"), Some(&QoS::ExactOnce));
    }

    #[test]
    fn dollar_topics_not_matched_by_leading_wildcard() {
        let mut tree = SubscriptionTree::new();
        tree.insert("+/monitor/Clients", &cid("a"), QoS::AtMostOnce);
        tree.insert("#", &cid("b"), QoS::AtMostOnce);
        tree.insert("$SYS/#", &cid("c"), QoS::AtMostOnce);

        let matched = tree.match_topic("$SYS/monitor/Clients");
        assert!(!matched.contains_key("a"));
        assert!(!matched.contains_key("b"));
        assert!(matched.contains_key("c"));
    }

    #[test]
    fn matches_same_as_brute_force_scan() {
        use codec::topic::topic_matches;

        let masks = [
            "a/b", "a/+", "a/#", "+/+", "sport/+/player1/#", "/foo", "foo",
        ];
        let mut tree = SubscriptionTree::new();
        for (i, mask) in masks.iter().enumerate() {
            tree.insert(mask, &cid(&format!("s{i}")), QoS::AtMostOnce);
        }

        for topic in ["a/b", "a/c", "a/b/c", "/foo", "foo", "sport/tennis/player1"] {
            let tree_result: std::collections::BTreeSet<_> =
                tree.match_topic(topic).into_keys().collect();
            let brute_result: std::collections::BTreeSet<_> = masks
                .iter()
                .enumerate()
                .filter(|(_, mask)| topic_matches(mask, topic))
                .map(|(i, _)| format!("s{i}"))
                .collect();
            assert_eq!(tree_result, brute_result, "topic={topic}");
        }
    }
}
