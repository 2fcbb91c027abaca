// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! In-process persistence, backed by ordinary `HashMap`s.
//!
//! This is the default backend and the one exercised by every unit test; it
//! offers no durability across restarts, which matches a broker run with
//! `storage.backend = "memory"`.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use codec::QoS;

use super::OutgoingRecord;
use crate::error::Error;
use crate::types::ClientId;

#[derive(Debug, Default)]
struct ClientState {
    subscriptions: BTreeMap<String, QoS>,
    incoming_ids: HashSet<u16>,
    outgoing_pending: VecDeque<Vec<u8>>,
    outgoing_inflight: HashMap<u16, OutgoingRecord>,
    outgoing_sent: HashSet<u16>,
    outgoing_conf: HashSet<u16>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    clients: HashMap<ClientId, ClientState>,
    retained: HashMap<String, (Vec<u8>, ClientId)>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_uids(&mut self) -> Result<Vec<ClientId>, Error> {
        Ok(self.clients.keys().cloned().collect())
    }

    pub fn add_client(&mut self, client_id: &str) -> Result<(), Error> {
        self.clients.entry(client_id.to_string()).or_default();
        Ok(())
    }

    pub fn remove_client(&mut self, client_id: &str) -> Result<(), Error> {
        self.clients.remove(client_id);
        Ok(())
    }

    pub fn subscriptions(&mut self, client_id: &str) -> Result<Vec<(String, QoS)>, Error> {
        Ok(self
            .clients
            .get(client_id)
            .map(|state| state.subscriptions.iter().map(|(m, q)| (m.clone(), *q)).collect())
            .unwrap_or_default())
    }

    pub fn set_subscription(&mut self, client_id: &str, mask: &str, qos: QoS) -> Result<(), Error> {
        self.clients
            .entry(client_id.to_string())
            .or_default()
            .subscriptions
            .insert(mask.to_string(), qos);
        Ok(())
    }

    pub fn remove_subscription(&mut self, client_id: &str, mask: &str) -> Result<(), Error> {
        if let Some(state) = self.clients.get_mut(client_id) {
            state.subscriptions.remove(mask);
        }
        Ok(())
    }

    pub fn incoming_packet_ids(&mut self, client_id: &str) -> Result<Vec<u16>, Error> {
        Ok(self
            .clients
            .get(client_id)
            .map(|state| state.incoming_ids.iter().copied().collect())
            .unwrap_or_default())
    }

    pub fn insert_incoming_id(&mut self, client_id: &str, id: u16) -> Result<(), Error> {
        self.clients
            .entry(client_id.to_string())
            .or_default()
            .incoming_ids
            .insert(id);
        Ok(())
    }

    pub fn remove_incoming_id(&mut self, client_id: &str, id: u16) -> Result<(), Error> {
        if let Some(state) = self.clients.get_mut(client_id) {
            state.incoming_ids.remove(&id);
        }
        Ok(())
    }

    pub fn outgoing_insert(&mut self, client_id: &str, packet: Vec<u8>) -> Result<(), Error> {
        self.clients
            .entry(client_id.to_string())
            .or_default()
            .outgoing_pending
            .push_back(packet);
        Ok(())
    }

    pub fn outgoing_get_next(
        &mut self,
        client_id: &str,
        packet_id: u16,
    ) -> Result<Option<OutgoingRecord>, Error> {
        let state = self.clients.entry(client_id.to_string()).or_default();
        let Some(packet) = state.outgoing_pending.pop_front() else {
            return Ok(None);
        };
        let record = OutgoingRecord { packet_id, packet };
        state.outgoing_inflight.insert(packet_id, record.clone());
        Ok(Some(record))
    }

    pub fn is_inflight(&mut self, client_id: &str, packet_id: u16) -> Result<bool, Error> {
        Ok(self
            .clients
            .get(client_id)
            .is_some_and(|state| state.outgoing_inflight.contains_key(&packet_id)))
    }

    pub fn get_all_inflight(&mut self, client_id: &str) -> Result<Vec<OutgoingRecord>, Error> {
        Ok(self
            .clients
            .get(client_id)
            .map(|state| {
                let mut records: Vec<_> = state.outgoing_inflight.values().cloned().collect();
                records.sort_by_key(|record| record.packet_id);
                records
            })
            .unwrap_or_default())
    }

    pub fn get_inflight(
        &mut self,
        client_id: &str,
        packet_id: u16,
    ) -> Result<Option<OutgoingRecord>, Error> {
        Ok(self
            .clients
            .get(client_id)
            .and_then(|state| state.outgoing_inflight.get(&packet_id).cloned()))
    }

    pub fn set_sent(&mut self, client_id: &str, packet_id: u16) -> Result<(), Error> {
        if let Some(state) = self.clients.get_mut(client_id) {
            state.outgoing_sent.insert(packet_id);
        }
        Ok(())
    }

    pub fn is_sent(&mut self, client_id: &str, packet_id: u16) -> Result<bool, Error> {
        Ok(self
            .clients
            .get(client_id)
            .is_some_and(|state| state.outgoing_sent.contains(&packet_id)))
    }

    pub fn set_pubconf(&mut self, client_id: &str, packet_id: u16) -> Result<(), Error> {
        if let Some(state) = self.clients.get_mut(client_id) {
            state.outgoing_conf.insert(packet_id);
        }
        Ok(())
    }

    pub fn is_pubconf(&mut self, client_id: &str, packet_id: u16) -> Result<bool, Error> {
        Ok(self
            .clients
            .get(client_id)
            .is_some_and(|state| state.outgoing_conf.contains(&packet_id)))
    }

    pub fn remove_outgoing(&mut self, client_id: &str, packet_id: u16) -> Result<(), Error> {
        if let Some(state) = self.clients.get_mut(client_id) {
            state.outgoing_inflight.remove(&packet_id);
            state.outgoing_sent.remove(&packet_id);
            state.outgoing_conf.remove(&packet_id);
        }
        Ok(())
    }

    pub fn get_retained(&mut self, topic: &str) -> Result<Option<(Vec<u8>, ClientId)>, Error> {
        Ok(self.retained.get(topic).cloned())
    }

    pub fn set_retained(
        &mut self,
        topic: &str,
        packet: Vec<u8>,
        origin: ClientId,
    ) -> Result<(), Error> {
        self.retained.insert(topic.to_string(), (packet, origin));
        Ok(())
    }

    pub fn remove_retained(&mut self, topic: &str) -> Result<(), Error> {
        self.retained.remove(topic);
        Ok(())
    }

    pub fn all_retained(&mut self) -> Result<Vec<(String, Vec<u8>, ClientId)>, Error> {
        Ok(self
            .retained
            .iter()
            .map(|(topic, (packet, origin))| (topic.clone(), packet.clone(), origin.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outgoing_queue_moves_pending_to_inflight() {
        let mut store = MemoryStore::new();
        store.outgoing_insert("c1", vec![1, 2, 3]).unwrap();
        assert!(!store.is_inflight("c1", 1).unwrap());

        let record = store.outgoing_get_next("c1", 1).unwrap().unwrap();
        assert_eq!(record.packet, vec![1, 2, 3]);
        assert!(store.is_inflight("c1", 1).unwrap());

        store.remove_outgoing("c1", 1).unwrap();
        assert!(!store.is_inflight("c1", 1).unwrap());
    }

    #[test]
    fn retained_round_trips() {
        let mut store = MemoryStore::new();
        store
            .set_retained("a/b", vec![9, 9], "origin".to_string())
            .unwrap();
        assert_eq!(
            store.get_retained("a/b").unwrap(),
            Some((vec![9, 9], "origin".to_string()))
        );
        store.remove_retained("a/b").unwrap();
        assert_eq!(store.get_retained("a/b").unwrap(), None);
    }

    #[test]
    fn sent_and_pubconf_flags_are_independent() {
        let mut store = MemoryStore::new();
        store.set_sent("c1", 7).unwrap();
        assert!(store.is_sent("c1", 7).unwrap());
        assert!(!store.is_pubconf("c1", 7).unwrap());
        store.set_pubconf("c1", 7).unwrap();
        assert!(store.is_pubconf("c1", 7).unwrap());
    }
}
