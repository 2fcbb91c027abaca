// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! One task per accepted socket (§4.7, §5): the CONNECT handshake, the
//! streaming-safe frame reader, the keep-alive timer, and the
//! `tokio::select!` loop that turns decoded packets into
//! [`SessionToDispatcherCmd`]s and writes [`DispatcherToSessionCmd`]s back
//! to the wire.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use codec::{
    ByteArray, ConnectAckPacket, ConnectPacket, ConnectReturnCode, DecodePacket, DisconnectPacket,
    EncodePacket, FixedHeader, PacketType, PingRequestPacket, PingResponsePacket,
    PublishAckPacket, PublishCompletePacket, PublishPacket, PublishReceivedPacket,
    PublishReleasePacket, QoS, SubscribePacket, UnsubscribePacket, MAX_PACKET_LEN,
};

use crate::auth::Authenticator;
use crate::commands::{
    ConnectRequest, DispatcherToSessionCmd, ListenerToDispatcherCmd, SessionToDispatcherCmd,
};
use crate::constants::CHANNEL_CAPACITY;
use crate::error::{Error, ErrorKind};
use crate::stream::Stream;
use crate::types::{ClientId, ConnectionId, LastWill, ListenerId};

/// Per-listener settings a connection task needs, copied out of
/// [`crate::config::Listener`] and [`crate::config::General`] at accept
/// time so the task doesn't need to hold a reference to the whole config.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub listener_id: ListenerId,
    pub keep_alive_default: u16,
    pub connect_timeout: Duration,
    pub allow_empty_client_id: bool,
    pub maximum_keep_alive: u32,
    pub maximum_packet_size: u32,
    pub message_size_limit: u32,
    pub maximum_qos: QoS,
}

/// Why the connection's read/write loop stopped, decided before any
/// last-will publication happens (§7's error handling policy table).
enum ExitReason {
    /// Client sent DISCONNECT: no last-will, no further notice needed (the
    /// dispatcher already got a `SessionToDispatcherCmd::Disconnect`).
    Disconnect,
    /// The dispatcher itself asked this connection to close (e.g. a newer
    /// CONNECT superseded it); the dispatcher already owns the teardown.
    DispatcherClose,
    /// Stream EOF or keep-alive timeout: an abrupt close, last-will fires.
    Abrupt,
}

/// Drive one accepted socket to completion. Never returns an error: all
/// failure modes are logged here and translated into the right cleanup
/// command (or none) sent to the dispatcher.
pub async fn handle_connection(
    mut stream: Stream,
    connection_id: ConnectionId,
    config: ConnectionConfig,
    to_dispatcher: mpsc::Sender<ListenerToDispatcherCmd>,
    to_session_dispatcher: mpsc::Sender<SessionToDispatcherCmd>,
    authenticator: Arc<Authenticator>,
) {
    let peer = stream.peer_addr_string();

    let handshake_result = handshake(
        &mut stream,
        connection_id,
        &config,
        &to_dispatcher,
        &authenticator,
    )
    .await;

    match handshake_result {
        Err(err) if matches!(err.kind(), ErrorKind::MalformedPacket | ErrorKind::ProtocolViolation) => {
            log::warn!("connection {peer} rejected: {err}");
        }
        Err(err) => {
            log::warn!("connection {peer} failed before CONNECT completed: {err}");
        }
        Ok((client_id, mut buf, keep_alive_timeout, mut to_session_rx)) => {
            match connection_loop(
                &mut stream,
                &mut buf,
                &client_id,
                &config,
                keep_alive_timeout,
                &to_session_dispatcher,
                &mut to_session_rx,
            )
            .await
            {
                Ok(ExitReason::Abrupt) => {
                    log::info!("connection {peer} ({client_id}) closed abruptly");
                    let _ = to_session_dispatcher
                        .send(SessionToDispatcherCmd::Closed { client_id })
                        .await;
                }
                Ok(ExitReason::Disconnect | ExitReason::DispatcherClose) => {
                    log::info!("connection {peer} ({client_id}) closed");
                }
                Err(err)
                    if matches!(err.kind(), ErrorKind::MalformedPacket | ErrorKind::ProtocolViolation) =>
                {
                    log::warn!("connection {peer} ({client_id}) rejected: {err}");
                }
                Err(err) => {
                    log::warn!("connection {peer} ({client_id}) failed: {err}");
                    let _ = to_session_dispatcher
                        .send(SessionToDispatcherCmd::Closed { client_id })
                        .await;
                }
            }
        }
    }
    let _ = stream.shutdown().await;
}

/// Read and validate the CONNECT packet, authenticate, and register the
/// session with the dispatcher. On success, hands back everything the main
/// read/write loop needs: the client id, any bytes already buffered past
/// the CONNECT frame, the keep-alive deadline, and the channel the
/// dispatcher will use to push packets to this connection.
async fn handshake(
    stream: &mut Stream,
    connection_id: ConnectionId,
    config: &ConnectionConfig,
    to_dispatcher: &mpsc::Sender<ListenerToDispatcherCmd>,
    authenticator: &Authenticator,
) -> Result<
    (
        ClientId,
        Vec<u8>,
        Option<Duration>,
        mpsc::Receiver<DispatcherToSessionCmd>,
    ),
    Error,
> {
    let mut buf = Vec::with_capacity(1024);

    let frame = timeout(
        config.connect_timeout,
        read_one_frame(stream, &mut buf, config.maximum_packet_size),
    )
    .await
    .map_err(|_elapsed| {
        Error::new(
            ErrorKind::ProtocolViolation,
            "CONNECT not received within connect_timeout",
        )
    })??;

    let connect = ConnectPacket::decode(&mut ByteArray::new(&frame))?;

    let mut client_id = connect.client_id().to_string();
    let clean_session = connect.connect_flags().clean_session();

    if client_id.is_empty() {
        if !config.allow_empty_client_id {
            send(stream, ConnectAckPacket::new(false, ConnectReturnCode::IdentifierRejected)).await?;
            return Err(Error::new(
                ErrorKind::ProtocolViolation,
                "empty client id not allowed on this listener",
            ));
        }
        client_id = generate_client_id();
    }

    if u32::from(connect.keep_alive()) > config.maximum_keep_alive {
        send(stream, ConnectAckPacket::new(false, ConnectReturnCode::IdentifierRejected)).await?;
        return Err(Error::new(
            ErrorKind::ProtocolViolation,
            "keep_alive exceeds configured maximum_keep_alive",
        ));
    }

    let username = connect
        .connect_flags()
        .has_username()
        .then(|| connect.username());
    let password = connect
        .connect_flags()
        .has_password()
        .then(|| connect.password());

    let authorization = authenticator
        .authenticate(&client_id, username, password)
        .await?;
    if authorization.is_denied() {
        send(stream, ConnectAckPacket::new(false, ConnectReturnCode::Unauthorized)).await?;
        return Err(Error::new(ErrorKind::AuthenticationFailed, "authorization denied"));
    }

    let last_will = connect.connect_flags().will().then(|| LastWill {
        topic: connect.will_topic().unwrap_or_default().to_string(),
        payload: connect.will_message().to_vec(),
        qos: connect.connect_flags().will_qos(),
        retain: connect.connect_flags().will_retain(),
    });

    let keep_alive = if connect.keep_alive() == 0 {
        config.keep_alive_default
    } else {
        connect.keep_alive()
    };

    let (to_session_tx, mut to_session_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (reply_tx, reply_rx) = oneshot::channel();
    to_dispatcher
        .send(ListenerToDispatcherCmd::Connect(ConnectRequest {
            listener_id: config.listener_id,
            client_id: client_id.clone(),
            clean_session,
            keep_alive,
            last_will,
            authorization,
            to_session: to_session_tx,
            reply: reply_tx,
        }))
        .await?;

    let response = reply_rx.await.map_err(|_recv_err| {
        Error::new(ErrorKind::ChannelError, "dispatcher dropped the connect reply")
    })?;

    if !response.accepted {
        send(stream, ConnectAckPacket::new(false, ConnectReturnCode::ServerUnavailable)).await?;
        return Err(Error::new(
            ErrorKind::ProtocolViolation,
            "dispatcher rejected connection",
        ));
    }

    send(
        stream,
        ConnectAckPacket::new(response.session_present, ConnectReturnCode::Accepted),
    )
    .await?;
    log::info!(
        "connection {connection_id} client_id={client_id} accepted, session_present={}",
        response.session_present
    );

    let keep_alive_timeout = (keep_alive > 0).then(|| {
        let millis = u64::from(keep_alive).saturating_mul(1500).min(3600 * 1500);
        Duration::from_millis(millis)
    });

    Ok((client_id, buf, keep_alive_timeout, to_session_rx))
}

#[allow(clippy::too_many_arguments)]
async fn connection_loop(
    stream: &mut Stream,
    buf: &mut Vec<u8>,
    client_id: &str,
    config: &ConnectionConfig,
    keep_alive_timeout: Option<Duration>,
    to_dispatcher: &mpsc::Sender<SessionToDispatcherCmd>,
    to_session_rx: &mut mpsc::Receiver<DispatcherToSessionCmd>,
) -> Result<ExitReason, Error> {
    loop {
        while let Some(len) = frame_len(buf)? {
            check_packet_size(len, config.maximum_packet_size)?;
            if buf.len() < len {
                break;
            }
            let frame: Vec<u8> = buf.drain(..len).collect();
            if handle_frame(&frame, client_id, config, stream, to_dispatcher).await? {
                return Ok(ExitReason::Disconnect);
            }
        }

        let sleep = async {
            match keep_alive_timeout {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            result = stream.read_buf(buf) => {
                if result? == 0 {
                    return Ok(ExitReason::Abrupt);
                }
            }
            () = sleep => {
                return Ok(ExitReason::Abrupt);
            }
            cmd = to_session_rx.recv() => {
                match cmd {
                    Some(DispatcherToSessionCmd::Packet(bytes)) => stream.write_all(&bytes).await?,
                    Some(DispatcherToSessionCmd::Close) | None => return Ok(ExitReason::DispatcherClose),
                }
            }
        }
    }
}

/// Handle one complete frame. Returns `true` if it was a DISCONNECT.
async fn handle_frame(
    frame: &[u8],
    client_id: &str,
    config: &ConnectionConfig,
    stream: &mut Stream,
    to_dispatcher: &mpsc::Sender<SessionToDispatcherCmd>,
) -> Result<bool, Error> {
    let fixed_header = FixedHeader::decode(&mut ByteArray::new(frame))?;

    match fixed_header.packet_type() {
        PacketType::PingRequest => {
            let _packet = PingRequestPacket::decode(&mut ByteArray::new(frame))?;
            send(stream, PingResponsePacket::new()).await?;
        }
        PacketType::Publish { qos, .. } => {
            if qos > config.maximum_qos {
                return Err(Error::new(
                    ErrorKind::ProtocolViolation,
                    "publish QoS exceeds configured maximum_qos",
                ));
            }
            let packet = PublishPacket::decode(&mut ByteArray::new(frame))?;
            if config.message_size_limit > 0
                && packet.message().len() as u32 > config.message_size_limit
            {
                return Err(Error::new(
                    ErrorKind::MalformedPacket,
                    "publish payload exceeds configured message_size_limit",
                ));
            }
            let packet_id = packet.packet_id();
            let ack_qos = packet.qos();
            to_dispatcher
                .send(SessionToDispatcherCmd::Publish {
                    client_id: client_id.to_string(),
                    packet,
                })
                .await?;
            match ack_qos {
                QoS::AtMostOnce => {}
                QoS::AtLeastOnce => send(stream, PublishAckPacket::new(packet_id)).await?,
                QoS::ExactOnce => send(stream, PublishReceivedPacket::new(packet_id)).await?,
            }
        }
        PacketType::PublishAck => {
            let packet = PublishAckPacket::decode(&mut ByteArray::new(frame))?;
            to_dispatcher
                .send(SessionToDispatcherCmd::PubAck {
                    client_id: client_id.to_string(),
                    packet_id: packet.packet_id().value(),
                })
                .await?;
        }
        PacketType::PublishReceived => {
            let packet = PublishReceivedPacket::decode(&mut ByteArray::new(frame))?;
            to_dispatcher
                .send(SessionToDispatcherCmd::PubRec {
                    client_id: client_id.to_string(),
                    packet_id: packet.packet_id().value(),
                })
                .await?;
        }
        PacketType::PublishRelease => {
            let packet = PublishReleasePacket::decode(&mut ByteArray::new(frame))?;
            to_dispatcher
                .send(SessionToDispatcherCmd::PubRel {
                    client_id: client_id.to_string(),
                    packet_id: packet.packet_id().value(),
                })
                .await?;
            send(stream, PublishCompletePacket::new(packet.packet_id())).await?;
        }
        PacketType::PublishComplete => {
            let packet = PublishCompletePacket::decode(&mut ByteArray::new(frame))?;
            to_dispatcher
                .send(SessionToDispatcherCmd::PubComp {
                    client_id: client_id.to_string(),
                    packet_id: packet.packet_id().value(),
                })
                .await?;
        }
        PacketType::Subscribe => {
            let packet = SubscribePacket::decode(&mut ByteArray::new(frame))?;
            let packet_id = packet.packet_id().value();
            let filters = packet
                .topics()
                .iter()
                .map(|topic| (topic.topic().to_string(), topic.qos()))
                .collect();
            to_dispatcher
                .send(SessionToDispatcherCmd::Subscribe {
                    client_id: client_id.to_string(),
                    packet_id,
                    filters,
                })
                .await?;
            // SUBACK depends on per-filter authorization/granted QoS, which
            // only the dispatcher knows; it replies over the session queue.
        }
        PacketType::Unsubscribe => {
            let packet = UnsubscribePacket::decode(&mut ByteArray::new(frame))?;
            let packet_id = packet.packet_id().value();
            let filters = packet
                .topics()
                .iter()
                .map(|topic| topic.as_ref().to_string())
                .collect();
            to_dispatcher
                .send(SessionToDispatcherCmd::Unsubscribe {
                    client_id: client_id.to_string(),
                    packet_id,
                    filters,
                })
                .await?;
        }
        PacketType::Disconnect => {
            let _packet = DisconnectPacket::decode(&mut ByteArray::new(frame))?;
            to_dispatcher
                .send(SessionToDispatcherCmd::Disconnect {
                    client_id: client_id.to_string(),
                })
                .await?;
            return Ok(true);
        }
        other => {
            return Err(Error::from_string(
                ErrorKind::ProtocolViolation,
                format!("unexpected packet type from client after CONNECT: {other:?}"),
            ));
        }
    }
    Ok(false)
}

async fn send<P: EncodePacket>(stream: &mut Stream, packet: P) -> Result<(), Error> {
    let mut buf = Vec::new();
    packet.encode(&mut buf)?;
    stream.write_all(&buf).await
}

fn check_packet_size(len: usize, maximum_packet_size: u32) -> Result<(), Error> {
    if maximum_packet_size > 0 && len as u32 > maximum_packet_size {
        return Err(Error::new(
            ErrorKind::MalformedPacket,
            "packet exceeds configured maximum_packet_size",
        ));
    }
    Ok(())
}

/// Block until at least one full frame is buffered, enforcing
/// `maximum_packet_size` as soon as the header reveals the frame length.
async fn read_one_frame(
    stream: &mut Stream,
    buf: &mut Vec<u8>,
    maximum_packet_size: u32,
) -> Result<Vec<u8>, Error> {
    loop {
        if let Some(len) = frame_len(buf)? {
            check_packet_size(len, maximum_packet_size)?;
            if buf.len() >= len {
                return Ok(buf.drain(..len).collect());
            }
        }
        let n = stream.read_buf(buf).await?;
        if n == 0 {
            return Err(Error::new(ErrorKind::StreamClosed, "peer closed before sending CONNECT"));
        }
    }
}

/// Determine the length of the frame at the front of `buf`, without
/// consuming it, distinguishing "not enough bytes yet" (`Ok(None)`) from a
/// genuinely malformed variable-length header (`Err`).
///
/// Mirrors `codec::VarInt`'s decode loop exactly, but operates on a raw
/// slice so running out of bytes means "wait for more", not
/// `ByteArrayError::OutOfRangeError` -- that error is used by `ByteArray`
/// for both "truncated" and "malformed" and cannot be told apart from
/// here, which is why this walk has to be hand-rolled rather than
/// attempted by speculatively calling `decode` and inspecting the error.
fn frame_len(buf: &[u8]) -> Result<Option<usize>, Error> {
    if buf.is_empty() {
        return Ok(None);
    }

    let mut remaining_length: usize = 0;
    let mut multiplier: usize = 1;
    let mut index = 1;

    loop {
        let Some(&byte) = buf.get(index) else {
            return Ok(None);
        };
        remaining_length += (byte as usize & 127) * multiplier;
        multiplier *= 128;
        index += 1;

        if multiplier > 128 * 128 * 128 * 128 {
            return Err(Error::new(
                ErrorKind::MalformedPacket,
                "variable length integer uses more than 4 bytes",
            ));
        }
        if byte & 128 == 0 {
            break;
        }
    }

    if remaining_length > MAX_PACKET_LEN {
        return Err(Error::new(
            ErrorKind::MalformedPacket,
            "packet remaining length exceeds protocol maximum",
        ));
    }

    Ok(Some(index + remaining_length))
}

fn generate_client_id() -> String {
    let suffix: u64 = rand::rng().random();
    format!("mqttd-{suffix:016x}")
}
