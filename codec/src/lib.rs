// Copyright (c) 2024 Mqttd Contributors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Wire codec for the MQTT 3.1.1 protocol: framing, packet encode/decode and
//! topic filter matching. Contains no networking or broker state.

mod ack;
mod base;
mod byte_array;
mod connect;
mod connect_ack;
mod error;
mod packet;
mod publish;
mod subscribe;
mod topic;
mod utils;
mod var_int;

pub use ack::{
    DisconnectPacket, PingRequestPacket, PingResponsePacket, PublishAckPacket,
    PublishCompletePacket, PublishReceivedPacket, PublishReleasePacket, UnsubscribeAckPacket,
};
pub use base::{PacketId, ProtocolLevel, QoS};
pub use byte_array::ByteArray;
pub use connect::{ConnectFlags, ConnectPacket, LastWill};
pub use connect_ack::{ConnectAckPacket, ConnectReturnCode};
pub use error::{DecodeError, EncodeError};
pub use packet::{DecodePacket, EncodePacket, FixedHeader, PacketType};
pub use publish::PublishPacket;
pub use subscribe::{
    SubscribeAckPacket, SubscribePacket, SubscribeReturnCode, SubscribeTopic, UnsubscribePacket,
};
pub use topic::{TopicFilter, TopicName};
pub use utils::random_client_id;
pub use var_int::{VarInt, MAX_VAR_INT};

/// Maximum number of bytes a single MQTT control packet may occupy on the
/// wire: the four-byte variable byte integer upper bound plus the largest
/// possible fixed + variable header.
pub const MAX_PACKET_SIZE: usize = MAX_VAR_INT + 5;

/// A fully decoded control packet, tagged by type. This is what the
/// connection layer works with; it owns no socket or session state.
#[derive(Clone, Debug, PartialEq)]
pub enum MqttPacket {
    Connect(ConnectPacket),
    ConnectAck(ConnectAckPacket),
    Publish(PublishPacket),
    PublishAck(PublishAckPacket),
    PublishReceived(PublishReceivedPacket),
    PublishRelease(PublishReleasePacket),
    PublishComplete(PublishCompletePacket),
    Subscribe(SubscribePacket),
    SubscribeAck(SubscribeAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubscribeAck(UnsubscribeAckPacket),
    PingRequest(PingRequestPacket),
    PingResponse(PingResponsePacket),
    Disconnect(DisconnectPacket),
}

impl MqttPacket {
    /// Decode one complete packet (fixed header + body) from the front of
    /// `buf`, returning the packet and the number of bytes it consumed.
    ///
    /// Returns `Ok(None)` when `buf` does not yet hold a full packet; the
    /// caller should keep buffering and retry once more bytes arrive. Any
    /// other error is a protocol violation and the connection MUST be
    /// closed \[MQTT-4.8\].
    pub fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>, DecodeError> {
        let mut header_ba = ByteArray::new(buf);
        let fixed_header = match FixedHeader::decode(&mut header_ba) {
            Ok(header) => header,
            Err(DecodeError::OutOfRange) => return Ok(None),
            Err(e) => return Err(e),
        };

        let header_len = header_ba.offset();
        let body_len = fixed_header.remaining_length();
        let total_len = header_len + body_len;
        if buf.len() < total_len {
            return Ok(None);
        }

        let mut body_ba = ByteArray::new(&buf[header_len..total_len]);
        let packet = match fixed_header.packet_type() {
            PacketType::Connect => Self::Connect(ConnectPacket::decode(&mut body_ba)?),
            PacketType::ConnectAck => Self::ConnectAck(ConnectAckPacket::decode(&mut body_ba)?),
            PacketType::Publish { dup, qos, retain } => {
                Self::Publish(PublishPacket::decode_with_flags(&mut body_ba, dup, qos, retain)?)
            }
            PacketType::PublishAck => Self::PublishAck(PublishAckPacket::decode(&mut body_ba)?),
            PacketType::PublishReceived => {
                Self::PublishReceived(PublishReceivedPacket::decode(&mut body_ba)?)
            }
            PacketType::PublishRelease => {
                Self::PublishRelease(PublishReleasePacket::decode(&mut body_ba)?)
            }
            PacketType::PublishComplete => {
                Self::PublishComplete(PublishCompletePacket::decode(&mut body_ba)?)
            }
            PacketType::Subscribe => Self::Subscribe(SubscribePacket::decode(&mut body_ba)?),
            PacketType::SubscribeAck => {
                Self::SubscribeAck(SubscribeAckPacket::decode(&mut body_ba)?)
            }
            PacketType::Unsubscribe => Self::Unsubscribe(UnsubscribePacket::decode(&mut body_ba)?),
            PacketType::UnsubscribeAck => {
                Self::UnsubscribeAck(UnsubscribeAckPacket::decode(&mut body_ba)?)
            }
            PacketType::PingRequest => Self::PingRequest(PingRequestPacket::decode(&mut body_ba)?),
            PacketType::PingResponse => {
                Self::PingResponse(PingResponsePacket::decode(&mut body_ba)?)
            }
            PacketType::Disconnect => Self::Disconnect(DisconnectPacket::decode(&mut body_ba)?),
        };

        // The body must be consumed exactly; leftover bytes mean the
        // remaining-length field lied about the packet's true size.
        if body_ba.remaining_bytes() != 0 {
            return Err(DecodeError::InvalidRemainingLength);
        }

        Ok(Some((packet, total_len)))
    }

    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Connect(_) => PacketType::Connect,
            Self::ConnectAck(_) => PacketType::ConnectAck,
            Self::Publish(p) => PacketType::Publish {
                dup: p.dup,
                qos: p.qos,
                retain: p.retain,
            },
            Self::PublishAck(_) => PacketType::PublishAck,
            Self::PublishReceived(_) => PacketType::PublishReceived,
            Self::PublishRelease(_) => PacketType::PublishRelease,
            Self::PublishComplete(_) => PacketType::PublishComplete,
            Self::Subscribe(_) => PacketType::Subscribe,
            Self::SubscribeAck(_) => PacketType::SubscribeAck,
            Self::Unsubscribe(_) => PacketType::Unsubscribe,
            Self::UnsubscribeAck(_) => PacketType::UnsubscribeAck,
            Self::PingRequest(_) => PacketType::PingRequest,
            Self::PingResponse(_) => PacketType::PingResponse,
            Self::Disconnect(_) => PacketType::Disconnect,
        }
    }

    /// Encode this packet, fixed header included, appending to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let mut body = Vec::new();
        match self {
            Self::Connect(p) => p.encode(&mut body)?,
            Self::ConnectAck(p) => p.encode(&mut body)?,
            Self::Publish(p) => p.encode(&mut body)?,
            Self::PublishAck(p) => p.encode(&mut body)?,
            Self::PublishReceived(p) => p.encode(&mut body)?,
            Self::PublishRelease(p) => p.encode(&mut body)?,
            Self::PublishComplete(p) => p.encode(&mut body)?,
            Self::Subscribe(p) => p.encode(&mut body)?,
            Self::SubscribeAck(p) => p.encode(&mut body)?,
            Self::Unsubscribe(p) => p.encode(&mut body)?,
            Self::UnsubscribeAck(p) => p.encode(&mut body)?,
            Self::PingRequest(p) => p.encode(&mut body)?,
            Self::PingResponse(p) => p.encode(&mut body)?,
            Self::Disconnect(p) => p.encode(&mut body)?,
        };

        let fixed_header = FixedHeader::new(self.packet_type(), body.len())?;
        let header_start = buf.len();
        fixed_header.encode(buf)?;
        buf.extend_from_slice(&body);
        Ok(buf.len() - header_start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_waits_for_full_body() {
        let mut full = Vec::new();
        MqttPacket::PingRequest(PingRequestPacket).encode(&mut full).unwrap();

        // Fixed header only is not enough for packets with a body; for
        // PINGREQ the fixed header alone is already complete.
        assert!(MqttPacket::decode(&full).unwrap().is_some());
        assert!(MqttPacket::decode(&full[..1]).unwrap().is_none());
    }

    #[test]
    fn test_encode_decode_publish_round_trip() {
        let packet = MqttPacket::Publish(PublishPacket {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: TopicName::parse("a/b").unwrap(),
            packet_id: Some(5),
            payload: b"payload".to_vec(),
        });
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let (decoded, consumed) = MqttPacket::decode(&buf).unwrap().unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_decode_rejects_trailing_garbage_as_length_mismatch() {
        let mut buf = Vec::new();
        MqttPacket::PingRequest(PingRequestPacket).encode(&mut buf).unwrap();
        // Force a nonzero remaining-length with no matching body bytes.
        buf[1] = 0x01;
        buf.push(0x00);
        assert_eq!(
            MqttPacket::decode(&buf),
            Err(DecodeError::InvalidRemainingLength)
        );
    }
}
