// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Command enums carried over the `mpsc` channels that connect the three
//! task kinds described in §5/§9: listener accept loops, per-connection
//! reader/writer tasks, and the single dispatcher task that owns the
//! subscription tree, retained store and session registry.
//!
//! Naming mirrors the data flow: a *listener* accepts a socket and asks the
//! dispatcher to attach or create a session; once attached, the
//! connection's reader task is the thing feeding decoded protocol actions
//! to the dispatcher (hence `SessionToDispatcherCmd`, not
//! `ReaderToDispatcherCmd` -- the reader speaks for the session front end),
//! and the dispatcher answers back to that connection's writer task with
//! `DispatcherToSessionCmd`.

use tokio::sync::{mpsc, oneshot};

use codec::QoS;

use crate::types::{Authorization, ClientId, LastWill, ListenerId};

/// Sent once per accepted connection, before any other traffic for that
/// client id is allowed to flow.
#[derive(Debug)]
pub struct ConnectRequest {
    pub listener_id: ListenerId,
    pub client_id: ClientId,
    pub clean_session: bool,
    pub keep_alive: u16,
    pub last_will: Option<LastWill>,
    pub authorization: Authorization,
    /// Channel the dispatcher uses to push outgoing packets back to this
    /// connection's writer task.
    pub to_session: mpsc::Sender<DispatcherToSessionCmd>,
    /// One-shot reply carrying the CONNACK decision.
    pub reply: oneshot::Sender<ConnectResponse>,
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectResponse {
    pub accepted: bool,
    pub session_present: bool,
}

/// Listener accept loop -> dispatcher: only the initial handshake request;
/// everything after CONNACK goes over `SessionToDispatcherCmd` instead.
#[derive(Debug)]
pub enum ListenerToDispatcherCmd {
    Connect(ConnectRequest),
}

/// Per-connection reader task -> dispatcher: one variant per client-to-broker
/// packet kind that carries dispatcher-relevant content, plus the two ways a
/// connection ends.
#[derive(Debug)]
pub enum SessionToDispatcherCmd {
    Publish {
        client_id: ClientId,
        packet: codec::PublishPacket,
    },
    PubAck {
        client_id: ClientId,
        packet_id: u16,
    },
    PubRec {
        client_id: ClientId,
        packet_id: u16,
    },
    PubRel {
        client_id: ClientId,
        packet_id: u16,
    },
    PubComp {
        client_id: ClientId,
        packet_id: u16,
    },
    Subscribe {
        client_id: ClientId,
        packet_id: u16,
        filters: Vec<(String, QoS)>,
    },
    Unsubscribe {
        client_id: ClientId,
        packet_id: u16,
        filters: Vec<String>,
    },
    PingReq {
        client_id: ClientId,
    },
    /// An explicit DISCONNECT packet was read: no last-will is published.
    Disconnect {
        client_id: ClientId,
    },
    /// The socket closed, or the keep-alive timer fired, without a prior
    /// DISCONNECT: the session's last-will (if any) is published.
    Closed {
        client_id: ClientId,
    },
}

/// Dispatcher -> per-connection writer task.
#[derive(Debug)]
pub enum DispatcherToSessionCmd {
    /// A fully encoded packet, ready to write to the socket verbatim.
    Packet(Vec<u8>),

    /// The dispatcher is severing this connection (duplicate CONNECT,
    /// administrative removal, or clean-session teardown); the writer
    /// flushes and closes the socket.
    Close,
}
