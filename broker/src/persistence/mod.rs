// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Persistence interface: the narrow set of byte/int/string-keyed
//! operations a [`crate::session::Session`] needs to survive a broker
//! restart, plus the broker-wide retained-message table and client-id set.
//!
//! Two backends exist: [`memory::MemoryStore`] (the default, and the only
//! one exercised by unit tests) and [`redis::RedisStore`] (the "remote
//! hash/list/set" implementation, keyed per §6's persisted layout). Both are
//! reached through the [`PersistenceBackend`] enum rather than a trait
//! object, since the broker never needs to select a backend at anything
//! finer than process startup.

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use crate::error::Error;
use crate::types::ClientId;

/// One outgoing publish record, as tracked by §4.5's outgoing queue.
///
/// `packet` holds the raw encoded PUBLISH bytes (PUBREL retransmissions are
/// reconstructed by the session from `packet_id` rather than stored
/// separately, since a PUBREL carries nothing but the id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingRecord {
    pub packet_id: u16,
    pub packet: Vec<u8>,
}

/// Abstracts over the in-memory and Redis-backed persistence implementations.
#[derive(Debug)]
pub enum PersistenceBackend {
    Memory(MemoryStore),
    Redis(RedisStore),
}

impl PersistenceBackend {
    pub async fn client_uids(&mut self) -> Result<Vec<ClientId>, Error> {
        match self {
            Self::Memory(store) => store.client_uids(),
            Self::Redis(store) => store.client_uids().await,
        }
    }

    pub async fn add_client(&mut self, client_id: &str) -> Result<(), Error> {
        match self {
            Self::Memory(store) => store.add_client(client_id),
            Self::Redis(store) => store.add_client(client_id).await,
        }
    }

    pub async fn remove_client(&mut self, client_id: &str) -> Result<(), Error> {
        match self {
            Self::Memory(store) => store.remove_client(client_id),
            Self::Redis(store) => store.remove_client(client_id).await,
        }
    }

    pub async fn subscriptions(
        &mut self,
        client_id: &str,
    ) -> Result<Vec<(String, codec::QoS)>, Error> {
        match self {
            Self::Memory(store) => store.subscriptions(client_id),
            Self::Redis(store) => store.subscriptions(client_id).await,
        }
    }

    pub async fn set_subscription(
        &mut self,
        client_id: &str,
        mask: &str,
        qos: codec::QoS,
    ) -> Result<(), Error> {
        match self {
            Self::Memory(store) => store.set_subscription(client_id, mask, qos),
            Self::Redis(store) => store.set_subscription(client_id, mask, qos).await,
        }
    }

    pub async fn remove_subscription(&mut self, client_id: &str, mask: &str) -> Result<(), Error> {
        match self {
            Self::Memory(store) => store.remove_subscription(client_id, mask),
            Self::Redis(store) => store.remove_subscription(client_id, mask).await,
        }
    }

    pub async fn incoming_packet_ids(&mut self, client_id: &str) -> Result<Vec<u16>, Error> {
        match self {
            Self::Memory(store) => store.incoming_packet_ids(client_id),
            Self::Redis(store) => store.incoming_packet_ids(client_id).await,
        }
    }

    pub async fn insert_incoming_id(&mut self, client_id: &str, id: u16) -> Result<(), Error> {
        match self {
            Self::Memory(store) => store.insert_incoming_id(client_id, id),
            Self::Redis(store) => store.insert_incoming_id(client_id, id).await,
        }
    }

    pub async fn remove_incoming_id(&mut self, client_id: &str, id: u16) -> Result<(), Error> {
        match self {
            Self::Memory(store) => store.remove_incoming_id(client_id, id),
            Self::Redis(store) => store.remove_incoming_id(client_id, id).await,
        }
    }

    /// Append a not-yet-acknowledged outgoing publish (`pending`, no id
    /// allocated yet).
    pub async fn outgoing_insert(&mut self, client_id: &str, packet: Vec<u8>) -> Result<(), Error> {
        match self {
            Self::Memory(store) => store.outgoing_insert(client_id, packet),
            Self::Redis(store) => store.outgoing_insert(client_id, packet).await,
        }
    }

    /// Pop the oldest pending publish and allocate `packet_id` to it.
    pub async fn outgoing_get_next(
        &mut self,
        client_id: &str,
        packet_id: u16,
    ) -> Result<Option<OutgoingRecord>, Error> {
        match self {
            Self::Memory(store) => store.outgoing_get_next(client_id, packet_id),
            Self::Redis(store) => store.outgoing_get_next(client_id, packet_id).await,
        }
    }

    pub async fn is_inflight(&mut self, client_id: &str, packet_id: u16) -> Result<bool, Error> {
        match self {
            Self::Memory(store) => store.is_inflight(client_id, packet_id),
            Self::Redis(store) => store.is_inflight(client_id, packet_id).await,
        }
    }

    pub async fn get_all_inflight(&mut self, client_id: &str) -> Result<Vec<OutgoingRecord>, Error> {
        match self {
            Self::Memory(store) => store.get_all_inflight(client_id),
            Self::Redis(store) => store.get_all_inflight(client_id).await,
        }
    }

    pub async fn get_inflight(
        &mut self,
        client_id: &str,
        packet_id: u16,
    ) -> Result<Option<OutgoingRecord>, Error> {
        match self {
            Self::Memory(store) => store.get_inflight(client_id, packet_id),
            Self::Redis(store) => store.get_inflight(client_id, packet_id).await,
        }
    }

    pub async fn set_sent(&mut self, client_id: &str, packet_id: u16) -> Result<(), Error> {
        match self {
            Self::Memory(store) => store.set_sent(client_id, packet_id),
            Self::Redis(store) => store.set_sent(client_id, packet_id).await,
        }
    }

    pub async fn is_sent(&mut self, client_id: &str, packet_id: u16) -> Result<bool, Error> {
        match self {
            Self::Memory(store) => store.is_sent(client_id, packet_id),
            Self::Redis(store) => store.is_sent(client_id, packet_id).await,
        }
    }

    pub async fn set_pubconf(&mut self, client_id: &str, packet_id: u16) -> Result<(), Error> {
        match self {
            Self::Memory(store) => store.set_pubconf(client_id, packet_id),
            Self::Redis(store) => store.set_pubconf(client_id, packet_id).await,
        }
    }

    pub async fn is_pubconf(&mut self, client_id: &str, packet_id: u16) -> Result<bool, Error> {
        match self {
            Self::Memory(store) => store.is_pubconf(client_id, packet_id),
            Self::Redis(store) => store.is_pubconf(client_id, packet_id).await,
        }
    }

    pub async fn remove_outgoing(&mut self, client_id: &str, packet_id: u16) -> Result<(), Error> {
        match self {
            Self::Memory(store) => store.remove_outgoing(client_id, packet_id),
            Self::Redis(store) => store.remove_outgoing(client_id, packet_id).await,
        }
    }

    pub async fn get_retained(&mut self, topic: &str) -> Result<Option<(Vec<u8>, ClientId)>, Error> {
        match self {
            Self::Memory(store) => store.get_retained(topic),
            Self::Redis(store) => store.get_retained(topic).await,
        }
    }

    pub async fn set_retained(
        &mut self,
        topic: &str,
        packet: Vec<u8>,
        origin: ClientId,
    ) -> Result<(), Error> {
        match self {
            Self::Memory(store) => store.set_retained(topic, packet, origin),
            Self::Redis(store) => store.set_retained(topic, packet, origin).await,
        }
    }

    pub async fn remove_retained(&mut self, topic: &str) -> Result<(), Error> {
        match self {
            Self::Memory(store) => store.remove_retained(topic),
            Self::Redis(store) => store.remove_retained(topic).await,
        }
    }

    pub async fn all_retained(&mut self) -> Result<Vec<(String, Vec<u8>, ClientId)>, Error> {
        match self {
            Self::Memory(store) => store.all_retained(),
            Self::Redis(store) => store.all_retained().await,
        }
    }
}
