// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! The outgoing publish queue: §4.5's "hardest state in the system".
//!
//! Kept synchronous and free of any tokio dependency so it can be unit
//! tested without a runtime; the dispatcher task drives it, using
//! [`OutgoingQueue::next_wake`] to compute how long to `sleep_until` before
//! checking [`OutgoingQueue::due_retries`] again.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use codec::{EncodePacket, PacketId, PublishPacket, QoS};

use crate::error::{Error, ErrorKind};

#[derive(Debug, Clone)]
struct PendingPublish {
    topic: String,
    qos: QoS,
    payload: Vec<u8>,
    retain: bool,
}

/// One publish using a packet id, from first send through final ack.
#[derive(Debug, Clone)]
pub struct OutgoingRecord {
    pub packet_id: u16,
    pub packet: PublishPacket,
    pub sent: bool,
    pub rec_received: bool,
    retry_deadline: Instant,
}

/// What the writer task should put on the wire next.
#[derive(Debug)]
pub enum Outgoing {
    Publish(PublishPacket),
    PubRel(u16),
    /// Pre-encoded non-PUBLISH packet (ack, SUBACK, PINGRESP, ...).
    Control(Vec<u8>),
}

/// A persistence-backend mutation mirroring a state change this queue just
/// made. The queue itself stays synchronous (see module docs); the session
/// drains these with [`OutgoingQueue::drain_persist_events`] and the
/// dispatcher -- the only place holding an async persistence handle --
/// replays them against the backend in order.
#[derive(Debug, Clone)]
pub enum PersistEvent {
    /// A QoS>0 publish was submitted and has no packet id yet: append to the
    /// backend's pending list (`outgoing_insert`).
    Insert(Vec<u8>),
    /// The oldest pending entry was promoted to `packet_id`: pop the pending
    /// list and record it as inflight (`outgoing_get_next`).
    Promote(u16),
    /// `packet_id` was (re)transmitted as a PUBLISH for the first time
    /// (`set_sent`).
    SetSent(u16),
    /// A PUBREC for `packet_id` arrived (`set_pubconf`).
    SetPubconf(u16),
    /// The QoS flow for `packet_id` finished; drop it (`remove_outgoing`).
    Remove(u16),
}

#[derive(Debug)]
pub struct OutgoingQueue {
    pending: VecDeque<PendingPublish>,
    inflight: std::collections::HashMap<u16, OutgoingRecord>,
    /// Insertion order of `inflight`, oldest first; used for resend-on-resume.
    order: Vec<u16>,
    /// Ids that need a write on the next `get_next` call.
    resend_queue: VecDeque<u16>,
    ready: VecDeque<Vec<u8>>,
    max_inflight: usize,
    next_id: u16,
    redelivery_interval: Duration,
    persist_log: Vec<PersistEvent>,
}

impl OutgoingQueue {
    #[must_use]
    pub fn new(max_inflight: usize, redelivery_interval: Duration) -> Self {
        Self {
            pending: VecDeque::new(),
            inflight: std::collections::HashMap::new(),
            order: Vec::new(),
            resend_queue: VecDeque::new(),
            ready: VecDeque::new(),
            max_inflight: max_inflight.max(1),
            next_id: 1,
            redelivery_interval,
            persist_log: Vec::new(),
        }
    }

    /// Drain every persistence mutation queued since the last drain, in the
    /// order they must be replayed against the backend.
    pub fn drain_persist_events(&mut self) -> Vec<PersistEvent> {
        std::mem::take(&mut self.persist_log)
    }

    #[must_use]
    pub fn inflight_len(&self) -> usize {
        self.inflight.len()
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
            && self.inflight.is_empty()
            && self.ready.is_empty()
            && self.resend_queue.is_empty()
    }

    /// Queue a pre-encoded control packet (PUBACK, SUBACK, PINGRESP, ...).
    pub fn push_control(&mut self, bytes: Vec<u8>) {
        self.ready.push_back(bytes);
    }

    /// Submit a publish to be delivered to this session. QoS 0 goes straight
    /// to `ready`; QoS 1/2 are queued in `pending` and immediately promoted
    /// if the inflight window has room.
    pub fn put_publish(
        &mut self,
        topic: &str,
        qos: QoS,
        payload: &[u8],
        retain: bool,
        now: Instant,
    ) -> Result<(), Error> {
        if qos == QoS::AtMostOnce {
            let mut packet = PublishPacket::new(topic, qos, payload)?;
            packet.set_retain(retain);
            self.ready.push_back(encode(&packet)?);
            return Ok(());
        }
        let mut placeholder = PublishPacket::new(topic, qos, payload)?;
        placeholder.set_retain(retain);
        self.persist_log.push(PersistEvent::Insert(encode(&placeholder)?));
        self.pending.push_back(PendingPublish {
            topic: topic.to_string(),
            qos,
            payload: payload.to_vec(),
            retain,
        });
        self.try_promote(now)
    }

    fn allocate_id(&mut self) -> Result<u16, Error> {
        for _ in 0..65535u32 {
            let id = self.next_id;
            self.next_id = if self.next_id == 65535 { 1 } else { self.next_id + 1 };
            if !self.inflight.contains_key(&id) {
                return Ok(id);
            }
        }
        Err(Error::new(
            ErrorKind::PacketIdsDepleted,
            "all 65534 packet ids are in use by this session's inflight window",
        ))
    }

    fn try_promote(&mut self, now: Instant) -> Result<(), Error> {
        while self.inflight.len() < self.max_inflight {
            let Some(pending) = self.pending.pop_front() else {
                break;
            };
            let id = match self.allocate_id() {
                Ok(id) => id,
                Err(err) => {
                    self.pending.push_front(pending);
                    return Err(err);
                }
            };
            let mut packet = PublishPacket::new(&pending.topic, pending.qos, &pending.payload)?;
            packet.set_packet_id(PacketId::new(id));
            packet.set_retain(pending.retain);
            self.inflight.insert(
                id,
                OutgoingRecord {
                    packet_id: id,
                    packet,
                    sent: false,
                    rec_received: false,
                    retry_deadline: now + self.redelivery_interval,
                },
            );
            self.order.push(id);
            self.resend_queue.push_back(id);
            self.persist_log.push(PersistEvent::Promote(id));
        }
        Ok(())
    }

    /// Scan the inflight window for retry deadlines that have passed and
    /// queue them for retransmission. Returns `true` if anything was queued.
    pub fn due_retries(&mut self, now: Instant) -> bool {
        let mut queued = false;
        for (id, record) in &mut self.inflight {
            if record.retry_deadline <= now && !self.resend_queue.contains(id) {
                self.resend_queue.push_back(*id);
                queued = true;
            }
        }
        queued
    }

    /// Earliest instant at which a retry becomes due, for the dispatcher's
    /// `sleep_until` wakeup.
    #[must_use]
    pub fn next_wake(&self) -> Option<Instant> {
        self.inflight.values().map(|record| record.retry_deadline).min()
    }

    /// Pull the next thing to hand to the writer, or `None` if the session
    /// should simply await more work.
    pub fn get_next(&mut self, now: Instant) -> Result<Option<Outgoing>, Error> {
        self.try_promote(now)?;

        while let Some(id) = self.resend_queue.pop_front() {
            let Some(record) = self.inflight.get_mut(&id) else {
                continue;
            };
            record.retry_deadline = now + self.redelivery_interval;
            if record.rec_received {
                return Ok(Some(Outgoing::PubRel(id)));
            }
            if record.sent {
                record.packet.set_dup(true)?;
            } else {
                self.persist_log.push(PersistEvent::SetSent(id));
            }
            record.sent = true;
            return Ok(Some(Outgoing::Publish(record.packet.clone())));
        }

        if let Some(bytes) = self.ready.pop_front() {
            return Ok(Some(Outgoing::Control(bytes)));
        }

        Ok(None)
    }

    /// PUBACK(id): QoS 1 flow completes.
    pub fn on_puback(&mut self, id: u16, now: Instant) -> Result<(), Error> {
        self.remove(id);
        self.try_promote(now)
    }

    /// PUBREC(id): QoS 2 flow moves from "awaiting PUBREC" to "awaiting
    /// PUBCOMP"; a PUBREL is queued for the next `get_next` call.
    pub fn on_pubrec(&mut self, id: u16, now: Instant) {
        if let Some(record) = self.inflight.get_mut(&id) {
            record.rec_received = true;
            record.retry_deadline = now + self.redelivery_interval;
            if !self.resend_queue.contains(&id) {
                self.resend_queue.push_back(id);
            }
            self.persist_log.push(PersistEvent::SetPubconf(id));
        }
    }

    /// PUBCOMP(id): QoS 2 flow completes.
    pub fn on_pubcomp(&mut self, id: u16, now: Instant) -> Result<(), Error> {
        self.remove(id);
        self.try_promote(now)
    }

    fn remove(&mut self, id: u16) {
        self.inflight.remove(&id);
        self.order.retain(|existing| *existing != id);
        self.resend_queue.retain(|existing| *existing != id);
        self.persist_log.push(PersistEvent::Remove(id));
    }

    /// Session attachment (§4.5): on reconnect of a non-clean session,
    /// re-enqueue every inflight record in its original order. Records still
    /// awaiting PUBREC are resent as a dup PUBLISH; records that already
    /// progressed past PUBREC are resent as PUBREL, since the client already
    /// received that payload.
    pub fn requeue_all_dup(&mut self, now: Instant) {
        self.resend_queue.clear();
        for id in self.order.clone() {
            if let Some(record) = self.inflight.get_mut(&id) {
                record.retry_deadline = now + self.redelivery_interval;
                if !record.rec_received && !record.sent {
                    record.sent = true;
                    self.persist_log.push(PersistEvent::SetSent(id));
                }
            }
            self.resend_queue.push_back(id);
        }
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

    fn now() -> Instant {
        Instant::now()
    }

    #[test]
    fn qos0_goes_straight_to_ready() {
        let mut queue = OutgoingQueue::new(4, Duration::from_secs(60));
        queue
            .put_publish("a/b", QoS::AtMostOnce, b"x", false, now())
            .unwrap();
        assert_eq!(queue.inflight_len(), 0);
        match queue.get_next(now()).unwrap() {
            Some(Outgoing::Control(_)) => {}
            other => panic!("expected Control, got {other:?}"),
        }
    }

    #[test]
    fn qos1_round_trip_clears_inflight() {
        let mut queue = OutgoingQueue::new(1, Duration::from_secs(60));
        queue
            .put_publish("a/b", QoS::AtLeastOnce, b"x", false, now())
            .unwrap();
        assert_eq!(queue.inflight_len(), 1);
        let id = match queue.get_next(now()).unwrap() {
            Some(Outgoing::Publish(packet)) => packet.packet_id().value(),
            other => panic!("expected Publish, got {other:?}"),
        };
        queue.on_puback(id, now()).unwrap();
        assert_eq!(queue.inflight_len(), 0);
    }

    #[test]
    fn max_inflight_bounds_promotion() {
        let mut queue = OutgoingQueue::new(1, Duration::from_secs(60));
        queue
            .put_publish("a", QoS::AtLeastOnce, b"1", false, now())
            .unwrap();
        queue
            .put_publish("b", QoS::AtLeastOnce, b"2", false, now())
            .unwrap();
        assert_eq!(queue.inflight_len(), 1);
    }

    #[test]
    fn qos2_sends_pubrel_after_pubrec() {
        let mut queue = OutgoingQueue::new(1, Duration::from_secs(60));
        queue
            .put_publish("a/b", QoS::ExactOnce, b"x", false, now())
            .unwrap();
        let id = match queue.get_next(now()).unwrap() {
            Some(Outgoing::Publish(packet)) => packet.packet_id().value(),
            other => panic!("expected Publish, got {other:?}"),
        };
        queue.on_pubrec(id, now());
        match queue.get_next(now()).unwrap() {
            Some(Outgoing::PubRel(pubrel_id)) => assert_eq!(pubrel_id, id),
            other => panic!("expected PubRel, got {other:?}"),
        }
        queue.on_pubcomp(id, now()).unwrap();
        assert_eq!(queue.inflight_len(), 0);
    }

    #[test]
    fn retry_after_deadline_sets_dup() {
        let mut queue = OutgoingQueue::new(1, Duration::from_secs(60));
        let start = now();
        queue
            .put_publish("a/b", QoS::AtLeastOnce, b"x", false, start)
            .unwrap();
        match queue.get_next(start).unwrap() {
            Some(Outgoing::Publish(packet)) => assert!(!packet.dup()),
            other => panic!("expected Publish, got {other:?}"),
        }
        let later = start + Duration::from_secs(61);
        assert!(queue.due_retries(later));
        match queue.get_next(later).unwrap() {
            Some(Outgoing::Publish(packet)) => assert!(packet.dup()),
            other => panic!("expected dup Publish, got {other:?}"),
        }
    }

    #[test]
    fn requeue_all_dup_resends_in_order() {
        let mut queue = OutgoingQueue::new(2, Duration::from_secs(60));
        let start = now();
        queue
            .put_publish("a", QoS::AtLeastOnce, b"1", false, start)
            .unwrap();
        queue
            .put_publish("b", QoS::AtLeastOnce, b"2", false, start)
            .unwrap();
        // Drain the initial sends so `sent` is true on both records.
        queue.get_next(start).unwrap();
        queue.get_next(start).unwrap();

        queue.requeue_all_dup(start);
        let first = match queue.get_next(start).unwrap() {
            Some(Outgoing::Publish(packet)) => packet,
            other => panic!("expected Publish, got {other:?}"),
        };
        assert!(first.dup());
        assert_eq!(first.topic(), "a");
    }
}
