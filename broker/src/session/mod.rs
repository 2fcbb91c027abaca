// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Per-client session state (§3, §4.5): subscriptions, the QoS 2 incoming
//! packet-id set, and the outgoing publish queue, plus the handle to
//! whichever connection currently owns this client id.

pub mod queue;

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use codec::{EncodePacket, PacketId, PublishReleasePacket, QoS};

use crate::commands::DispatcherToSessionCmd;
use crate::error::Error;
use crate::types::{Authorization, ClientId, LastWill, SubscriptionMap, Topic};
use queue::{Outgoing, OutgoingQueue};
pub use queue::PersistEvent;

/// State kept for one client id across connects/disconnects. Destroyed on a
/// clean-session disconnect/reconnect; otherwise outlives the socket.
pub struct Session {
    pub client_id: ClientId,
    pub clean_session: bool,
    pub keep_alive: u16,
    pub authorization: Authorization,
    pub last_will: Option<LastWill>,
    subscriptions: SubscriptionMap,
    incoming_packet_ids: HashSet<u16>,
    queue: OutgoingQueue,
    to_connection: Option<mpsc::Sender<DispatcherToSessionCmd>>,
}

impl Session {
    #[must_use]
    pub fn new(
        client_id: ClientId,
        clean_session: bool,
        keep_alive: u16,
        authorization: Authorization,
        last_will: Option<LastWill>,
        max_inflight: usize,
        redelivery_interval: Duration,
    ) -> Self {
        Self {
            client_id,
            clean_session,
            keep_alive,
            authorization,
            last_will,
            subscriptions: SubscriptionMap::new(),
            incoming_packet_ids: HashSet::new(),
            queue: OutgoingQueue::new(max_inflight, redelivery_interval),
            to_connection: None,
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.to_connection.is_some()
    }

    #[must_use]
    pub fn subscriptions(&self) -> &SubscriptionMap {
        &self.subscriptions
    }

    pub fn subscribe(&mut self, mask: Topic, qos: QoS) {
        self.subscriptions.insert(mask, qos);
    }

    pub fn unsubscribe(&mut self, mask: &str) -> bool {
        self.subscriptions.remove(mask).is_some()
    }

    #[must_use]
    pub fn is_duplicate_incoming(&self, packet_id: u16) -> bool {
        self.incoming_packet_ids.contains(&packet_id)
    }

    pub fn record_incoming(&mut self, packet_id: u16) {
        self.incoming_packet_ids.insert(packet_id);
    }

    pub fn clear_incoming(&mut self, packet_id: u16) {
        self.incoming_packet_ids.remove(&packet_id);
    }

    /// Attach a freshly accepted connection to this (possibly pre-existing)
    /// session. Per §4.5's "Session attachment": a non-clean session with
    /// inflight publishes resends them all, dup=true, in original order.
    pub fn attach(&mut self, sender: mpsc::Sender<DispatcherToSessionCmd>, now: Instant) {
        self.to_connection = Some(sender);
        if !self.clean_session && self.queue.inflight_len() > 0 {
            self.queue.requeue_all_dup(now);
        }
    }

    /// Detach the current connection, e.g. on stream close or keep-alive
    /// timeout. The session itself (and its queue) survives unless the
    /// caller separately tears it down for clean-session semantics.
    pub fn detach(&mut self) {
        self.to_connection = None;
    }

    /// Sever whatever connection currently owns this client id, e.g. because
    /// a new CONNECT with the same id just arrived (MQTT-3.1.4-3).
    pub async fn close_current_connection(&mut self) {
        if let Some(sender) = self.to_connection.take() {
            let _ = sender.send(DispatcherToSessionCmd::Close).await;
        }
    }

    pub fn enqueue_control(&mut self, bytes: Vec<u8>) {
        self.queue.push_control(bytes);
    }

    pub fn enqueue_publish(
        &mut self,
        topic: &str,
        qos: QoS,
        payload: &[u8],
        retain: bool,
        now: Instant,
    ) -> Result<(), Error> {
        self.queue.put_publish(topic, qos, payload, retain, now)
    }

    pub fn on_puback(&mut self, packet_id: u16, now: Instant) -> Result<(), Error> {
        self.queue.on_puback(packet_id, now)
    }

    pub fn on_pubrec(&mut self, packet_id: u16, now: Instant) {
        self.queue.on_pubrec(packet_id, now);
    }

    pub fn on_pubcomp(&mut self, packet_id: u16, now: Instant) -> Result<(), Error> {
        self.queue.on_pubcomp(packet_id, now)
    }

    #[must_use]
    pub fn next_wake(&self) -> Option<Instant> {
        self.queue.next_wake()
    }

    pub fn due_retries(&mut self, now: Instant) -> bool {
        self.queue.due_retries(now)
    }

    /// Drain the outgoing queue's persistence journal (see
    /// [`queue::PersistEvent`]) so the dispatcher can replay it against the
    /// persistence backend.
    pub fn drain_persist_events(&mut self) -> Vec<PersistEvent> {
        self.queue.drain_persist_events()
    }

    /// Drain as much of the outgoing queue as is ready and forward it to the
    /// attached connection's writer task. A detached session simply
    /// accumulates queue state until a connection reattaches.
    pub async fn pump(&mut self, now: Instant) -> Result<(), Error> {
        let Some(sender) = self.to_connection.clone() else {
            return Ok(());
        };
        loop {
            let Some(item) = self.queue.get_next(now)? else {
                break;
            };
            let bytes = match item {
                Outgoing::Publish(packet) => encode(&packet)?,
                Outgoing::PubRel(packet_id) => {
                    encode(&PublishReleasePacket::new(PacketId::new(packet_id)))?
                }
                Outgoing::Control(bytes) => bytes,
            };
            if sender.send(DispatcherToSessionCmd::Packet(bytes)).await.is_err() {
                // Writer went away without an explicit detach; treat it the
                // same as a stream close from the listener's perspective.
                self.to_connection = None;
                break;
            }
        }
        Ok(())
    }
}

fn encode<P: EncodePacket>(packet: &P) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    packet.encode(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Authorization;

    fn session() -> Session {
        Session::new(
            "c1".to_string(),
            true,
            60,
            Authorization::allow_all(),
            None,
            4,
            Duration::from_secs(60),
        )
    }

    #[test]
    fn subscribe_and_unsubscribe_are_tracked() {
        let mut s = session();
        s.subscribe("a/b".to_string(), QoS::AtLeastOnce);
        assert_eq!(s.subscriptions().get("a/b"), Some(&QoS::AtLeastOnce));
        assert!(s.unsubscribe("a/b"));
        assert!(s.subscriptions().is_empty());
    }

    #[test]
    fn incoming_dedup_tracks_qos2_ids() {
        let mut s = session();
        assert!(!s.is_duplicate_incoming(7));
        s.record_incoming(7);
        assert!(s.is_duplicate_incoming(7));
        s.clear_incoming(7);
        assert!(!s.is_duplicate_incoming(7));
    }

    #[tokio::test]
    async fn pump_forwards_queued_packets_to_attached_connection() {
        let mut s = session();
        let (tx, mut rx) = mpsc::channel(8);
        s.attach(tx, Instant::now());
        s.enqueue_control(vec![1, 2, 3]);
        s.pump(Instant::now()).await.unwrap();
        match rx.recv().await {
            Some(DispatcherToSessionCmd::Packet(bytes)) => assert_eq!(bytes, vec![1, 2, 3]),
            other => panic!("expected Packet, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn detached_session_buffers_without_sending() {
        let mut s = session();
        s.enqueue_control(vec![9]);
        s.pump(Instant::now()).await.unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        s.attach(tx, Instant::now());
        s.pump(Instant::now()).await.unwrap();
        match rx.recv().await {
            Some(DispatcherToSessionCmd::Packet(bytes)) => assert_eq!(bytes, vec![9]),
            other => panic!("expected Packet, got {other:?}"),
        }
    }
}
