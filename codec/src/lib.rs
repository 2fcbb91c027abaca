// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Wire codec for the MQTT 3.1/3.1.1 control packets.
//!
//! Every packet type implements [`DecodePacket`]/[`EncodePacket`] over a
//! [`ByteArray`] cursor and a `Vec<u8>` sink respectively, plus the
//! [`Packet`] trait used by callers that only need the packet kind and its
//! encoded length without decoding the body.

mod binary_data;
mod byte_array;
mod codec;
mod connect_flags;
mod error;
mod header;
mod packet_id;
mod protocol_level;
mod qos;
mod string_data;
pub mod topic;
mod u16_data;
mod utils;
mod v3;
mod var_int;

pub use binary_data::BinaryData;
pub use byte_array::{ByteArray, ByteArrayError};
pub use codec::{DecodePacket, EncodePacket};
pub use connect_flags::ConnectFlags;
pub use error::{DecodeError, EncodeError};
pub use header::{FixedHeader, Packet, PacketType};
pub use packet_id::PacketId;
pub use protocol_level::ProtocolLevel;
pub use qos::QoS;
pub use string_data::StringData;
pub use topic::{PubTopic, SubTopic, TopicError};
pub use u16_data::U16Data;
pub use utils::{ClientIdError, StringError};
pub use var_int::{VarInt, VarIntError, MAX_PACKET_LEN};

pub use v3::{
    ConnectAckPacket, ConnectPacket, ConnectReturnCode, DisconnectPacket, PingRequestPacket,
    PingResponsePacket, PublishAckPacket, PublishCompletePacket, PublishPacket,
    PublishReceivedPacket, PublishReleasePacket, SubscribeAck, SubscribeAckPacket,
    SubscribePacket, SubscribeTopic, UnsubscribeAckPacket, UnsubscribePacket,
};

/// Literal protocol name field carried in a 3.1.1 CONNECT packet.
pub const PROTOCOL_NAME: &str = "MQTT";

/// Literal protocol name field carried in a 3.1 CONNECT packet.
pub const PROTOCOL_NAME_V3: &str = "MQIsdp";
