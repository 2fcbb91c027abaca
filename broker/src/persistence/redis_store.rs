// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Remote persistence backed by Redis, keyed per §6's persisted layout:
//!
//! - `mqtt_broker:client_uids` (set)
//! - `<uid>:subscriptions` (hash mask -> qos)
//! - `<uid>:incoming_packet_ids` (set of int)
//! - `<uid>:outgoing_queue` (list of raw packet bytes awaiting an id)
//! - `<uid>:outgoing_inflight` (hash id -> raw bytes)
//! - `<uid>:outgoing_ids` (list of ids in order)
//! - `<uid>:outgoing_sent_ids` (set)
//! - `<uid>:outgoing_conf_ids` (set)
//! - `_retained_messages` (hash topic -> bytes, with origin packed alongside)
//!
//! Operations that would need a transaction on the in-process store (ack
//! then remove) are issued as sequential Redis commands instead; each
//! individual command is idempotent on retry, which is the tradeoff this
//! backend is allowed to make.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use codec::QoS;

use super::OutgoingRecord;
use crate::error::Error;
use crate::types::ClientId;

const CLIENT_UIDS_KEY: &str = "mqtt_broker:client_uids";
const RETAINED_KEY: &str = "_retained_messages";

#[derive(Debug)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    fn subscriptions_key(client_id: &str) -> String {
        format!("{client_id}:subscriptions")
    }

    fn incoming_key(client_id: &str) -> String {
        format!("{client_id}:incoming_packet_ids")
    }

    fn queue_key(client_id: &str) -> String {
        format!("{client_id}:outgoing_queue")
    }

    fn inflight_key(client_id: &str) -> String {
        format!("{client_id}:outgoing_inflight")
    }

    fn ids_key(client_id: &str) -> String {
        format!("{client_id}:outgoing_ids")
    }

    fn sent_key(client_id: &str) -> String {
        format!("{client_id}:outgoing_sent_ids")
    }

    fn conf_key(client_id: &str) -> String {
        format!("{client_id}:outgoing_conf_ids")
    }

    pub async fn client_uids(&mut self) -> Result<Vec<ClientId>, Error> {
        Ok(self.conn.smembers(CLIENT_UIDS_KEY).await?)
    }

    pub async fn add_client(&mut self, client_id: &str) -> Result<(), Error> {
        self.conn.sadd(CLIENT_UIDS_KEY, client_id).await?;
        Ok(())
    }

    pub async fn remove_client(&mut self, client_id: &str) -> Result<(), Error> {
        self.conn.srem(CLIENT_UIDS_KEY, client_id).await?;
        let _: () = redis::pipe()
            .del(Self::subscriptions_key(client_id))
            .del(Self::incoming_key(client_id))
            .del(Self::queue_key(client_id))
            .del(Self::inflight_key(client_id))
            .del(Self::ids_key(client_id))
            .del(Self::sent_key(client_id))
            .del(Self::conf_key(client_id))
            .query_async(&mut self.conn)
            .await?;
        Ok(())
    }

    pub async fn subscriptions(&mut self, client_id: &str) -> Result<Vec<(String, QoS)>, Error> {
        let raw: Vec<(String, u8)> = self.conn.hgetall(Self::subscriptions_key(client_id)).await?;
        Ok(raw
            .into_iter()
            .filter_map(|(mask, qos)| QoS::try_from(qos).ok().map(|qos| (mask, qos)))
            .collect())
    }

    pub async fn set_subscription(
        &mut self,
        client_id: &str,
        mask: &str,
        qos: QoS,
    ) -> Result<(), Error> {
        self.conn
            .hset(Self::subscriptions_key(client_id), mask, qos as u8)
            .await?;
        Ok(())
    }

    pub async fn remove_subscription(&mut self, client_id: &str, mask: &str) -> Result<(), Error> {
        self.conn.hdel(Self::subscriptions_key(client_id), mask).await?;
        Ok(())
    }

    pub async fn incoming_packet_ids(&mut self, client_id: &str) -> Result<Vec<u16>, Error> {
        Ok(self.conn.smembers(Self::incoming_key(client_id)).await?)
    }

    pub async fn insert_incoming_id(&mut self, client_id: &str, id: u16) -> Result<(), Error> {
        self.conn.sadd(Self::incoming_key(client_id), id).await?;
        Ok(())
    }

    pub async fn remove_incoming_id(&mut self, client_id: &str, id: u16) -> Result<(), Error> {
        self.conn.srem(Self::incoming_key(client_id), id).await?;
        Ok(())
    }

    pub async fn outgoing_insert(&mut self, client_id: &str, packet: Vec<u8>) -> Result<(), Error> {
        self.conn.rpush(Self::queue_key(client_id), packet).await?;
        Ok(())
    }

    pub async fn outgoing_get_next(
        &mut self,
        client_id: &str,
        packet_id: u16,
    ) -> Result<Option<OutgoingRecord>, Error> {
        let packet: Option<Vec<u8>> = self.conn.lpop(Self::queue_key(client_id), None).await?;
        let Some(packet) = packet else {
            return Ok(None);
        };
        self.conn
            .hset(Self::inflight_key(client_id), packet_id, packet.clone())
            .await?;
        self.conn.rpush(Self::ids_key(client_id), packet_id).await?;
        Ok(Some(OutgoingRecord { packet_id, packet }))
    }

    pub async fn is_inflight(&mut self, client_id: &str, packet_id: u16) -> Result<bool, Error> {
        Ok(self
            .conn
            .hexists(Self::inflight_key(client_id), packet_id)
            .await?)
    }

    pub async fn get_all_inflight(&mut self, client_id: &str) -> Result<Vec<OutgoingRecord>, Error> {
        let ids: Vec<u16> = self.conn.lrange(Self::ids_key(client_id), 0, -1).await?;
        let mut records = Vec::with_capacity(ids.len());
        for packet_id in ids {
            if let Some(record) = self.get_inflight(client_id, packet_id).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    pub async fn get_inflight(
        &mut self,
        client_id: &str,
        packet_id: u16,
    ) -> Result<Option<OutgoingRecord>, Error> {
        let packet: Option<Vec<u8>> = self
            .conn
            .hget(Self::inflight_key(client_id), packet_id)
            .await?;
        Ok(packet.map(|packet| OutgoingRecord { packet_id, packet }))
    }

    pub async fn set_sent(&mut self, client_id: &str, packet_id: u16) -> Result<(), Error> {
        self.conn.sadd(Self::sent_key(client_id), packet_id).await?;
        Ok(())
    }

    pub async fn is_sent(&mut self, client_id: &str, packet_id: u16) -> Result<bool, Error> {
        Ok(self.conn.sismember(Self::sent_key(client_id), packet_id).await?)
    }

    pub async fn set_pubconf(&mut self, client_id: &str, packet_id: u16) -> Result<(), Error> {
        self.conn.sadd(Self::conf_key(client_id), packet_id).await?;
        Ok(())
    }

    pub async fn is_pubconf(&mut self, client_id: &str, packet_id: u16) -> Result<bool, Error> {
        Ok(self.conn.sismember(Self::conf_key(client_id), packet_id).await?)
    }

    pub async fn remove_outgoing(&mut self, client_id: &str, packet_id: u16) -> Result<(), Error> {
        let _: () = redis::pipe()
            .hdel(Self::inflight_key(client_id), packet_id)
            .lrem(Self::ids_key(client_id), 0, packet_id)
            .srem(Self::sent_key(client_id), packet_id)
            .srem(Self::conf_key(client_id), packet_id)
            .query_async(&mut self.conn)
            .await?;
        Ok(())
    }

    pub async fn get_retained(&mut self, topic: &str) -> Result<Option<(Vec<u8>, ClientId)>, Error> {
        let raw: Option<Vec<u8>> = self.conn.hget(RETAINED_KEY, topic).await?;
        Ok(raw.map(|bytes| decode_retained(&bytes)))
    }

    pub async fn set_retained(
        &mut self,
        topic: &str,
        packet: Vec<u8>,
        origin: ClientId,
    ) -> Result<(), Error> {
        self.conn
            .hset(RETAINED_KEY, topic, encode_retained(&packet, &origin))
            .await?;
        Ok(())
    }

    pub async fn remove_retained(&mut self, topic: &str) -> Result<(), Error> {
        self.conn.hdel(RETAINED_KEY, topic).await?;
        Ok(())
    }

    pub async fn all_retained(&mut self) -> Result<Vec<(String, Vec<u8>, ClientId)>, Error> {
        let raw: Vec<(String, Vec<u8>)> = self.conn.hgetall(RETAINED_KEY).await?;
        Ok(raw
            .into_iter()
            .map(|(topic, bytes)| {
                let (packet, origin) = decode_retained(&bytes);
                (topic, packet, origin)
            })
            .collect())
    }
}

/// Packs `packet` and `origin` into one Redis hash value: a 2-byte
/// big-endian origin length, the origin bytes, then the raw packet.
fn encode_retained(packet: &[u8], origin: &str) -> Vec<u8> {
    let origin = origin.as_bytes();
    let mut out = Vec::with_capacity(2 + origin.len() + packet.len());
    out.extend_from_slice(&(origin.len() as u16).to_be_bytes());
    out.extend_from_slice(origin);
    out.extend_from_slice(packet);
    out
}

fn decode_retained(bytes: &[u8]) -> (Vec<u8>, ClientId) {
    if bytes.len() < 2 {
        return (Vec::new(), String::new());
    }
    let origin_len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
    let origin = String::from_utf8_lossy(&bytes[2..2 + origin_len.min(bytes.len() - 2)]).into_owned();
    let packet = bytes[(2 + origin_len).min(bytes.len())..].to_vec();
    (packet, origin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retained_packing_round_trips() {
        let encoded = encode_retained(b"hello", "client-1");
        let (packet, origin) = decode_retained(&encoded);
        assert_eq!(packet, b"hello");
        assert_eq!(origin, "client-1");
    }
}
