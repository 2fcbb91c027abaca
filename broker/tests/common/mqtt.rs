// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use codec::{
    ByteArray, ConnectAckPacket, ConnectPacket, DecodePacket, EncodePacket, PacketId,
    PublishAckPacket, PublishPacket, PublishReceivedPacket, PublishReleasePacket, QoS,
    SubscribeAckPacket, SubscribePacket, UnsubscribeAckPacket, UnsubscribePacket,
};

use super::Error;

/// Opens a TCP connection to `addr` and sends a CONNECT packet built from
/// the given fields, then reads back the CONNACK.
///
/// Returns `None` if the peer closed the connection before a full CONNACK
/// was read (the "reject without a reply" path for protocol violations and
/// listener-level limits).
pub fn connect(
    addr: &str,
    client_id: &str,
    username: Option<&str>,
    password: Option<&[u8]>,
    keep_alive: u16,
) -> Result<Option<ConnectAckPacket>, Error> {
    let mut stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(Duration::from_secs(3)))?;

    let mut connect = ConnectPacket::new(client_id)?;
    connect.set_keep_alive(keep_alive);
    if let Some(username) = username {
        connect.set_username(username)?;
    }
    if let Some(password) = password {
        connect.set_password(password)?;
    }

    let mut buf = Vec::new();
    connect.encode(&mut buf)?;
    stream.write_all(&buf)?;

    // A v3.1.1 CONNACK without properties is always exactly 4 bytes:
    // fixed header (2 bytes) + ack flags + return code.
    let mut reply = [0_u8; 4];
    if read_exact_or_eof(&mut stream, &mut reply)? {
        let mut ba = ByteArray::new(&reply);
        Ok(Some(ConnectAckPacket::decode(&mut ba)?))
    } else {
        Ok(None)
    }
}

/// A connected client, kept open across a test so it can both send and
/// receive several packets (subscribe, then wait on a fan-out, etc.).
pub struct Client {
    stream: TcpStream,
}

impl Client {
    /// Connect and expect the CONNACK to accept the session.
    pub fn connect(addr: &str, client_id: &str, clean_session: bool) -> Result<Self, Error> {
        Self::connect_with_auth(addr, client_id, clean_session, None, None)
    }

    /// Connect with credentials, expecting the CONNACK to accept the session.
    pub fn connect_with_auth(
        addr: &str,
        client_id: &str,
        clean_session: bool,
        username: Option<&str>,
        password: Option<&[u8]>,
    ) -> Result<Self, Error> {
        let mut stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(Duration::from_secs(3)))?;

        let mut connect = ConnectPacket::new(client_id)?;
        connect.set_keep_alive(30);
        let mut flags = connect.connect_flags().clone();
        flags.set_clean_session(clean_session);
        connect.set_connect_flags(flags);
        if let Some(username) = username {
            connect.set_username(username)?;
        }
        if let Some(password) = password {
            connect.set_password(password)?;
        }

        let mut buf = Vec::new();
        connect.encode(&mut buf)?;
        stream.write_all(&buf)?;

        let frame = read_frame(&mut stream)?.ok_or_else(|| {
            Error::from(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "peer closed before CONNACK",
            ))
        })?;
        let ack = ConnectAckPacket::decode(&mut ByteArray::new(&frame))?;
        if ack.return_code() != codec::ConnectReturnCode::Accepted {
            return Err(Error::from(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("CONNECT rejected: {:?}", ack.return_code()),
            )));
        }
        Ok(Self { stream })
    }

    pub fn subscribe(&mut self, packet_id: u16, topic: &str, qos: QoS) -> Result<SubscribeAckPacket, Error> {
        let packet = SubscribePacket::new(topic, qos, PacketId::new(packet_id))?;
        self.send(&packet)?;
        let frame = self.read_frame_expect("SUBACK")?;
        Ok(SubscribeAckPacket::decode(&mut ByteArray::new(&frame))?)
    }

    pub fn unsubscribe(&mut self, packet_id: u16, topic: &str) -> Result<UnsubscribeAckPacket, Error> {
        let packet = UnsubscribePacket::new(topic, PacketId::new(packet_id))?;
        self.send(&packet)?;
        let frame = self.read_frame_expect("UNSUBACK")?;
        Ok(UnsubscribeAckPacket::decode(&mut ByteArray::new(&frame))?)
    }

    pub fn publish(
        &mut self,
        topic: &str,
        qos: QoS,
        payload: &[u8],
        retain: bool,
        packet_id: u16,
    ) -> Result<(), Error> {
        let mut packet = PublishPacket::new(topic, qos, payload)?;
        packet.set_retain(retain);
        if qos != QoS::AtMostOnce {
            packet.set_packet_id(PacketId::new(packet_id));
        }
        self.send(&packet)
    }

    /// Resend the same PUBLISH with `dup=true`, simulating a reconnect-time
    /// retransmission from the client side.
    pub fn publish_dup(
        &mut self,
        topic: &str,
        qos: QoS,
        payload: &[u8],
        packet_id: u16,
    ) -> Result<(), Error> {
        let mut packet = PublishPacket::new(topic, qos, payload)?;
        packet.set_packet_id(PacketId::new(packet_id));
        packet.set_dup(true)?;
        self.send(&packet)
    }

    pub fn expect_puback(&mut self, packet_id: u16) -> Result<(), Error> {
        let frame = self.read_frame_expect("PUBACK")?;
        let ack = PublishAckPacket::decode(&mut ByteArray::new(&frame))?;
        assert_eq!(ack.packet_id().value(), packet_id, "unexpected PUBACK packet id");
        Ok(())
    }

    pub fn expect_pubrec(&mut self, packet_id: u16) -> Result<(), Error> {
        let frame = self.read_frame_expect("PUBREC")?;
        let ack = PublishReceivedPacket::decode(&mut ByteArray::new(&frame))?;
        assert_eq!(ack.packet_id().value(), packet_id, "unexpected PUBREC packet id");
        Ok(())
    }

    pub fn send_pubrel(&mut self, packet_id: u16) -> Result<(), Error> {
        let packet = PublishReleasePacket::new(PacketId::new(packet_id));
        self.send(&packet)
    }

    /// Read the next full frame and decode it as a PUBLISH, for asserting on
    /// fanned-out or retained messages. Returns `None` on a read timeout.
    pub fn recv_publish(&mut self) -> Result<Option<PublishPacket>, Error> {
        match read_frame(&mut self.stream)? {
            Some(frame) => Ok(Some(PublishPacket::decode(&mut ByteArray::new(&frame))?)),
            None => Ok(None),
        }
    }

    pub fn disconnect(mut self) -> Result<(), Error> {
        let packet = codec::DisconnectPacket::new();
        self.send(&packet)
    }

    fn send<P: EncodePacket>(&mut self, packet: &P) -> Result<(), Error> {
        let mut buf = Vec::new();
        packet.encode(&mut buf)?;
        self.stream.write_all(&buf)?;
        Ok(())
    }

    fn read_frame_expect(&mut self, what: &str) -> Result<Vec<u8>, Error> {
        read_frame(&mut self.stream)?.ok_or_else(|| {
            Error::from(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("peer closed while waiting for {what}"),
            ))
        })
    }
}

/// Read one full MQTT frame (fixed header + remaining-length body) off a
/// blocking socket. Returns `None` on EOF before any byte arrives, matching
/// [`read_exact_or_eof`]'s contract.
fn read_frame(stream: &mut TcpStream) -> Result<Option<Vec<u8>>, Error> {
    let mut first_byte = [0_u8; 1];
    if !read_exact_or_eof(stream, &mut first_byte)? {
        return Ok(None);
    }

    let mut frame = vec![first_byte[0]];
    let mut remaining_length: usize = 0;
    let mut multiplier: usize = 1;
    loop {
        let mut byte = [0_u8; 1];
        stream.read_exact(&mut byte)?;
        frame.push(byte[0]);
        remaining_length += (byte[0] as usize & 0x7f) * multiplier;
        multiplier *= 128;
        if byte[0] & 0x80 == 0 {
            break;
        }
    }

    let mut body = vec![0_u8; remaining_length];
    stream.read_exact(&mut body)?;
    frame.extend_from_slice(&body);
    Ok(Some(frame))
}

/// Like [`std::io::Read::read_exact`] but returns `Ok(false)` instead of
/// erroring when the peer closes the connection, or the read times out,
/// before any byte arrives -- both mean "nothing more was sent" for a test
/// asserting a message was *not* delivered.
fn read_exact_or_eof(stream: &mut TcpStream, buf: &mut [u8]) -> Result<bool, Error> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "peer closed mid-frame",
                )
                .into())
            }
            Ok(n) => filled += n,
            Err(err)
                if filled == 0
                    && matches!(
                        err.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
            {
                return Ok(false)
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(true)
}
