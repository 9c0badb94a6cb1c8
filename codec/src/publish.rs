// Copyright (c) 2024 Mqttd Contributors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::base::{encode_mqtt_string, PacketId, QoS};
use crate::byte_array::ByteArray;
use crate::error::{DecodeError, EncodeError};
use crate::packet::{DecodePacket, EncodePacket};
use crate::topic::TopicName;

/// Transports an application message, either client-to-server or
/// server-to-client. `packet_id` is only present on the wire for QoS 1/2.
#[derive(Clone, Debug, PartialEq)]
pub struct PublishPacket {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: TopicName,
    pub packet_id: Option<PacketId>,
    pub payload: Vec<u8>,
}

impl PublishPacket {
    /// Decode the variable header + payload given the flags already parsed
    /// out of the fixed header by [`crate::packet::PacketType`].
    pub fn decode_with_flags(
        ba: &mut ByteArray,
        dup: bool,
        qos: QoS,
        retain: bool,
    ) -> Result<Self, DecodeError> {
        let topic = TopicName::parse(&ba.read_string()?)?;
        let packet_id = if qos == QoS::AtMostOnce {
            // The DUP flag MUST be 0 for all QoS 0 messages [MQTT-3.3.1-2].
            if dup {
                return Err(DecodeError::InvalidPacketFlags);
            }
            None
        } else {
            Some(ba.read_u16()?)
        };
        let payload = ba.read_bytes(ba.remaining_bytes())?.to_vec();

        Ok(Self {
            dup,
            qos,
            retain,
            topic,
            packet_id,
            payload,
        })
    }
}

impl EncodePacket for PublishPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let mut n = encode_mqtt_string(self.topic.as_str(), buf)?;
        if let Some(packet_id) = self.packet_id {
            buf.extend_from_slice(&packet_id.to_be_bytes());
            n += 2;
        }
        buf.extend_from_slice(&self.payload);
        n += self.payload.len();
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_qos0_round_trip() {
        let packet = PublishPacket {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: TopicName::parse("a/b").unwrap(),
            packet_id: None,
            payload: b"hello".to_vec(),
        };
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded =
            PublishPacket::decode_with_flags(&mut ba, false, QoS::AtMostOnce, false).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_publish_qos1_round_trip() {
        let packet = PublishPacket {
            dup: true,
            qos: QoS::AtLeastOnce,
            retain: true,
            topic: TopicName::parse("a/b").unwrap(),
            packet_id: Some(42),
            payload: vec![],
        };
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded =
            PublishPacket::decode_with_flags(&mut ba, true, QoS::AtLeastOnce, true).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_publish_qos0_rejects_dup() {
        let buf = [0x00, 0x01, b'a'];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            PublishPacket::decode_with_flags(&mut ba, true, QoS::AtMostOnce, false),
            Err(DecodeError::InvalidPacketFlags)
        );
    }

    #[test]
    fn test_publish_rejects_wildcard_topic() {
        let mut buf = Vec::new();
        encode_mqtt_string("a/+", &mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            PublishPacket::decode_with_flags(&mut ba, false, QoS::AtMostOnce, false),
            Err(DecodeError::InvalidTopicName)
        );
    }
}
