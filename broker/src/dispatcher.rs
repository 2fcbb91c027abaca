// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! The single-threaded dispatcher task (§5, §9): owns the session registry,
//! the subscription tree and the retained-message store, and is the only
//! place that ever needs to hold all of them mutably at once. Every
//! listener and connection task reaches it through `mpsc` channels, so
//! nothing in here needs a lock.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};

use codec::{EncodePacket, PacketId, QoS, SubscribeAck, SubscribeAckPacket, UnsubscribeAckPacket};

use crate::bridge::BridgeCmd;
use crate::commands::{ConnectRequest, ConnectResponse, ListenerToDispatcherCmd, SessionToDispatcherCmd};
use crate::error::Error;
use crate::persistence::PersistenceBackend;
use crate::retained::RetainedStore;
use crate::session::{PersistEvent, Session};
use crate::topic_tree::SubscriptionTree;
use crate::types::ClientId;

/// The subset of `[General]` the dispatcher needs to size new sessions and
/// cap grants; copied out at startup so it doesn't need to hold the whole
/// config alive.
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    pub max_inflight: usize,
    pub redelivery_floor: Duration,
    pub maximum_qos: QoS,
}

pub struct Dispatcher {
    config: DispatcherConfig,
    sessions: HashMap<ClientId, Session>,
    tree: SubscriptionTree,
    retained: RetainedStore,
    persistence: PersistenceBackend,
    bridge: Option<mpsc::Sender<BridgeCmd>>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        config: DispatcherConfig,
        persistence: PersistenceBackend,
        bridge: Option<mpsc::Sender<BridgeCmd>>,
    ) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
            tree: SubscriptionTree::new(),
            retained: RetainedStore::new(),
            persistence,
            bridge,
        }
    }

    /// Rehydrate subscriptions and the retained-message table from the
    /// persistence backend, so a restarted process resumes routing for
    /// clients that haven't reconnected yet.
    ///
    /// The outgoing retransmission window (§4.5) is *not* replayed here: it
    /// is rebuilt from scratch by [`Session::attach`] the next time each
    /// client id reconnects, since `OutgoingQueue` only tracks publishes
    /// made after that point. See `DESIGN.md` for the tradeoff.
    ///
    /// # Errors
    ///
    /// Returns error if the persistence backend fails to read back.
    pub async fn restore(&mut self) -> Result<(), Error> {
        for (topic, packet, origin) in self.persistence.all_retained().await? {
            if let Ok(publish) = codec::PublishPacket::new(&topic, QoS::AtMostOnce, &packet) {
                self.retained.apply(&topic, publish, origin);
            }
        }

        for client_id in self.persistence.client_uids().await? {
            let subscriptions = self.persistence.subscriptions(&client_id).await?;
            let incoming_ids = self.persistence.incoming_packet_ids(&client_id).await?;
            if subscriptions.is_empty() && incoming_ids.is_empty() {
                continue;
            }

            let mut session = Session::new(
                client_id.clone(),
                false,
                0,
                crate::types::Authorization::denied(),
                None,
                self.config.max_inflight,
                self.config.redelivery_floor,
            );
            for (mask, qos) in subscriptions {
                self.tree.insert(&mask, &client_id, qos);
                session.subscribe(mask, qos);
            }
            for id in incoming_ids {
                session.record_incoming(id);
            }
            self.sessions.insert(client_id, session);
        }

        Ok(())
    }

    /// Drive the dispatcher until `shutdown` fires, then disconnect every
    /// session (publishing last-wills) before returning.
    ///
    /// # Errors
    ///
    /// Returns error only if a channel is unexpectedly closed in a way that
    /// leaves the dispatcher unable to make progress.
    pub async fn run(
        mut self,
        mut from_listeners: mpsc::Receiver<ListenerToDispatcherCmd>,
        mut from_sessions: mpsc::Receiver<SessionToDispatcherCmd>,
        mut shutdown: oneshot::Receiver<()>,
    ) -> Result<(), Error> {
        loop {
            let wake_at = self.sessions.values().filter_map(Session::next_wake).min();
            let sleep = async {
                match wake_at {
                    Some(instant) => tokio::time::sleep_until(instant.into()).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                cmd = from_listeners.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_listener_cmd(cmd).await?,
                        None => break,
                    }
                }
                cmd = from_sessions.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_session_cmd(cmd).await?,
                        None => break,
                    }
                }
                () = sleep => {
                    self.handle_retries(Instant::now()).await?;
                }
                _ = &mut shutdown => {
                    break;
                }
            }
        }

        self.shutdown().await
    }

    async fn handle_listener_cmd(&mut self, cmd: ListenerToDispatcherCmd) -> Result<(), Error> {
        match cmd {
            ListenerToDispatcherCmd::Connect(request) => self.handle_connect(request).await,
        }
    }

    async fn handle_session_cmd(&mut self, cmd: SessionToDispatcherCmd) -> Result<(), Error> {
        let now = Instant::now();
        match cmd {
            SessionToDispatcherCmd::Publish { client_id, packet } => {
                self.handle_publish(&client_id, packet, now).await
            }
            SessionToDispatcherCmd::PubAck { client_id, packet_id } => {
                let events = match self.sessions.get_mut(&client_id) {
                    Some(session) => {
                        session.on_puback(packet_id, now)?;
                        session.pump(now).await?;
                        session.drain_persist_events()
                    }
                    None => Vec::new(),
                };
                self.apply_persist_events(&client_id, events).await;
                Ok(())
            }
            SessionToDispatcherCmd::PubRec { client_id, packet_id } => {
                let events = match self.sessions.get_mut(&client_id) {
                    Some(session) => {
                        session.on_pubrec(packet_id, now);
                        session.pump(now).await?;
                        session.drain_persist_events()
                    }
                    None => Vec::new(),
                };
                self.apply_persist_events(&client_id, events).await;
                Ok(())
            }
            SessionToDispatcherCmd::PubRel { client_id, packet_id } => {
                // This PUBREL closes out the *incoming* QoS 2 handshake: the
                // client published to us, we PUBRECed, and this releases our
                // dedup entry. PUBCOMP back to the client was already sent
                // by the connection task.
                if let Some(session) = self.sessions.get_mut(&client_id) {
                    session.clear_incoming(packet_id);
                }
                let _ = self.persistence.remove_incoming_id(&client_id, packet_id).await;
                Ok(())
            }
            SessionToDispatcherCmd::PubComp { client_id, packet_id } => {
                let events = match self.sessions.get_mut(&client_id) {
                    Some(session) => {
                        session.on_pubcomp(packet_id, now)?;
                        session.pump(now).await?;
                        session.drain_persist_events()
                    }
                    None => Vec::new(),
                };
                self.apply_persist_events(&client_id, events).await;
                Ok(())
            }
            SessionToDispatcherCmd::Subscribe { client_id, packet_id, filters } => {
                self.handle_subscribe(&client_id, packet_id, filters, now).await
            }
            SessionToDispatcherCmd::Unsubscribe { client_id, packet_id, filters } => {
                self.handle_unsubscribe(&client_id, packet_id, filters, now).await
            }
            SessionToDispatcherCmd::PingReq { client_id: _ } => Ok(()),
            SessionToDispatcherCmd::Disconnect { client_id } => {
                self.teardown_session(&client_id, false, now).await
            }
            SessionToDispatcherCmd::Closed { client_id } => {
                self.teardown_session(&client_id, true, now).await
            }
        }
    }

    async fn handle_connect(&mut self, request: ConnectRequest) -> Result<(), Error> {
        let ConnectRequest {
            listener_id: _,
            client_id,
            clean_session,
            keep_alive,
            last_will,
            authorization,
            to_session,
            reply,
        } = request;

        if let Some(existing) = self.sessions.get_mut(&client_id) {
            existing.close_current_connection().await;
        }

        let session_present = if clean_session {
            if let Some(mut old) = self.sessions.remove(&client_id) {
                let masks: Vec<String> = old.subscriptions().keys().cloned().collect();
                self.tree.remove_client(&masks, &client_id);
                old.detach();
            }
            let _ = self.persistence.remove_client(&client_id).await;
            false
        } else {
            self.sessions.contains_key(&client_id)
        };

        let now = Instant::now();
        let session = self.sessions.entry(client_id.clone()).or_insert_with(|| {
            Session::new(
                client_id.clone(),
                clean_session,
                keep_alive,
                authorization.clone(),
                last_will.clone(),
                self.config.max_inflight,
                self.config.redelivery_floor.max(Duration::from_secs(u64::from(keep_alive))),
            )
        });
        session.clean_session = clean_session;
        session.keep_alive = keep_alive;
        session.authorization = authorization;
        session.last_will = last_will;
        session.attach(to_session, now);

        let _ = self.persistence.add_client(&client_id).await;

        let _ = reply.send(ConnectResponse { accepted: true, session_present });
        session.pump(now).await?;
        let events = session.drain_persist_events();
        self.apply_persist_events(&client_id, events).await;
        Ok(())
    }

    /// Replay the outgoing queue's persistence journal (see
    /// [`crate::session::PersistEvent`]) against the backend, in order,
    /// mirroring §4.5's pending/inflight/sent/rec-received state machine
    /// into the persisted `outgoing_*` records.
    async fn apply_persist_events(&mut self, client_id: &str, events: Vec<PersistEvent>) {
        for event in events {
            let result = match event {
                PersistEvent::Insert(packet) => self.persistence.outgoing_insert(client_id, packet).await,
                PersistEvent::Promote(id) => {
                    self.persistence.outgoing_get_next(client_id, id).await.map(|_| ())
                }
                PersistEvent::SetSent(id) => self.persistence.set_sent(client_id, id).await,
                PersistEvent::SetPubconf(id) => self.persistence.set_pubconf(client_id, id).await,
                PersistEvent::Remove(id) => self.persistence.remove_outgoing(client_id, id).await,
            };
            if let Err(err) = result {
                log::warn!("persistence: failed to apply outgoing queue event for {client_id}: {err}");
            }
        }
    }

    async fn handle_publish(
        &mut self,
        client_id: &str,
        packet: codec::PublishPacket,
        now: Instant,
    ) -> Result<(), Error> {
        let Some(session) = self.sessions.get_mut(client_id) else {
            return Ok(());
        };

        if !session.authorization.can_publish(packet.topic()) {
            log::warn!("publish from {client_id} denied on topic {}", packet.topic());
            return Ok(());
        }

        let incoming_id = if packet.qos() == QoS::ExactOnce {
            let id = packet.packet_id().value();
            if session.is_duplicate_incoming(id) {
                return Ok(());
            }
            session.record_incoming(id);
            Some(id)
        } else {
            None
        };

        let topic = packet.topic().to_string();
        let qos = packet.qos();
        let retain = packet.retain();
        let payload = packet.message().to_vec();

        if let Some(id) = incoming_id {
            let _ = self.persistence.insert_incoming_id(client_id, id).await;
        }

        self.publish_internal(&topic, qos, &payload, retain, client_id.to_string(), now)
            .await
    }

    /// Fan a payload out to every matching subscriber, update the retained
    /// table, and notify the bridge. Shared by client PUBLISH handling and
    /// last-will delivery.
    async fn publish_internal(
        &mut self,
        topic: &str,
        qos: QoS,
        payload: &[u8],
        retain: bool,
        origin: ClientId,
        now: Instant,
    ) -> Result<(), Error> {
        if retain {
            if payload.is_empty() {
                let _ = self.persistence.remove_retained(topic).await;
            } else {
                let _ = self
                    .persistence
                    .set_retained(topic, payload.to_vec(), origin.clone())
                    .await;
            }
            if let Ok(packet) = codec::PublishPacket::new(topic, qos, payload) {
                self.retained.apply(topic, packet, origin.clone());
            }
        }

        let recipients = self.tree.match_topic(topic);
        for (subscriber, granted_qos) in recipients {
            let deliver_qos = qos.min(granted_qos);
            let events = if let Some(session) = self.sessions.get_mut(&subscriber) {
                if deliver_qos == QoS::AtMostOnce && !session.is_connected() {
                    continue;
                }
                session.enqueue_publish(topic, deliver_qos, payload, false, now)?;
                session.pump(now).await?;
                session.drain_persist_events()
            } else {
                continue;
            };
            self.apply_persist_events(&subscriber, events).await;
        }

        if let Some(bridge) = &self.bridge {
            let _ = bridge
                .send(BridgeCmd::Announce {
                    topic: topic.to_string(),
                    qos,
                    payload: payload.to_vec(),
                })
                .await;
        }

        Ok(())
    }

    async fn handle_subscribe(
        &mut self,
        client_id: &str,
        packet_id: u16,
        filters: Vec<(String, QoS)>,
        now: Instant,
    ) -> Result<(), Error> {
        if !self.sessions.contains_key(client_id) {
            return Ok(());
        }

        let mut acks = Vec::with_capacity(filters.len());
        let mut replay = Vec::new();

        for (filter, requested_qos) in filters {
            let allowed = self
                .sessions
                .get(client_id)
                .is_some_and(|session| session.authorization.can_subscribe(&filter));

            if !allowed {
                acks.push(SubscribeAck::Failed);
                continue;
            }

            let granted = requested_qos.min(self.config.maximum_qos);
            self.tree.insert(&filter, &client_id.to_string(), granted);
            if let Some(session) = self.sessions.get_mut(client_id) {
                session.subscribe(filter.clone(), granted);
            }
            let _ = self.persistence.set_subscription(client_id, &filter, granted).await;

            for message in self.retained.matching(&filter) {
                let deliver_qos = message.packet.qos().min(granted);
                replay.push((message.packet.topic().to_string(), deliver_qos, message.packet.message().to_vec()));
            }

            acks.push(SubscribeAck::QoS(granted));
        }

        let events = if let Some(session) = self.sessions.get_mut(client_id) {
            for (topic, qos, payload) in replay {
                session.enqueue_publish(&topic, qos, &payload, true, now)?;
            }

            let suback = SubscribeAckPacket::with_vec(PacketId::new(packet_id), acks);
            session.enqueue_control(encode(&suback)?);
            session.pump(now).await?;
            session.drain_persist_events()
        } else {
            Vec::new()
        };
        self.apply_persist_events(client_id, events).await;

        Ok(())
    }

    async fn handle_unsubscribe(
        &mut self,
        client_id: &str,
        packet_id: u16,
        filters: Vec<String>,
        now: Instant,
    ) -> Result<(), Error> {
        if !self.sessions.contains_key(client_id) {
            return Ok(());
        }

        for filter in &filters {
            self.tree.remove(filter, &client_id.to_string());
            if let Some(session) = self.sessions.get_mut(client_id) {
                session.unsubscribe(filter);
            }
            let _ = self.persistence.remove_subscription(client_id, filter).await;
        }

        if let Some(session) = self.sessions.get_mut(client_id) {
            let unsuback = UnsubscribeAckPacket::new(PacketId::new(packet_id));
            session.enqueue_control(encode(&unsuback)?);
            session.pump(now).await?;
        }

        Ok(())
    }

    /// Common path for both an explicit DISCONNECT and an abrupt close: the
    /// only difference is whether the session's last-will fires.
    async fn teardown_session(
        &mut self,
        client_id: &str,
        abrupt: bool,
        now: Instant,
    ) -> Result<(), Error> {
        let Some(session) = self.sessions.get_mut(client_id) else {
            return Ok(());
        };
        session.detach();
        let clean_session = session.clean_session;
        let last_will = abrupt.then(|| session.last_will.clone()).flatten();

        if let Some(will) = last_will {
            self.publish_internal(
                &will.topic,
                will.qos,
                &will.payload,
                will.retain,
                client_id.to_string(),
                now,
            )
            .await?;
        }

        if clean_session {
            if let Some(session) = self.sessions.remove(client_id) {
                let masks: Vec<String> = session.subscriptions().keys().cloned().collect();
                self.tree.remove_client(&masks, &client_id.to_string());
            }
            let _ = self.persistence.remove_client(client_id).await;
        }

        Ok(())
    }

    async fn handle_retries(&mut self, now: Instant) -> Result<(), Error> {
        let due: Vec<ClientId> = self
            .sessions
            .iter_mut()
            .filter(|(_, session)| session.due_retries(now))
            .map(|(client_id, _)| client_id.clone())
            .collect();

        for client_id in due {
            let events = if let Some(session) = self.sessions.get_mut(&client_id) {
                session.pump(now).await?;
                session.drain_persist_events()
            } else {
                Vec::new()
            };
            self.apply_persist_events(&client_id, events).await;
        }
        Ok(())
    }

    /// Orderly shutdown (§10.4): every currently-connected session is told
    /// to close, and any last-will it carries fires, as if its connection
    /// had dropped abruptly.
    async fn shutdown(mut self) -> Result<(), Error> {
        let now = Instant::now();
        let client_ids: Vec<ClientId> = self.sessions.keys().cloned().collect();
        for client_id in client_ids {
            let Some(session) = self.sessions.get_mut(&client_id) else {
                continue;
            };
            let was_connected = session.is_connected();
            let last_will = session.last_will.clone();
            session.detach();

            if was_connected {
                if let Some(will) = last_will {
                    self.publish_internal(
                        &will.topic,
                        will.qos,
                        &will.payload,
                        will.retain,
                        client_id.clone(),
                        now,
                    )
                    .await?;
                }
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
