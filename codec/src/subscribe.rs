// Copyright (c) 2024 Mqttd Contributors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::base::{PacketId, QoS};
use crate::byte_array::ByteArray;
use crate::error::{DecodeError, EncodeError};
use crate::packet::{DecodePacket, EncodePacket};
use crate::topic::TopicFilter;

#[derive(Clone, Debug, PartialEq)]
pub struct SubscribeTopic {
    pub filter: TopicFilter,
    pub qos: QoS,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubscribePacket {
    pub packet_id: PacketId,
    pub topics: Vec<SubscribeTopic>,
}

impl DecodePacket for SubscribePacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let packet_id = ba.read_u16()?;
        let mut topics = Vec::new();
        while !ba.is_empty() {
            let filter = TopicFilter::parse(&ba.read_string()?)?;
            let qos_byte = ba.read_byte()?;
            if qos_byte & 0b1111_1100 != 0 {
                return Err(DecodeError::InvalidQoS);
            }
            let qos = QoS::try_from(qos_byte)?;
            topics.push(SubscribeTopic { filter, qos });
        }

        // The payload MUST contain at least one topic filter [MQTT-3.8.3-3].
        if topics.is_empty() {
            return Err(DecodeError::EmptyTopicFilter);
        }

        Ok(Self { packet_id, topics })
    }
}

impl EncodePacket for SubscribePacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let mut n = 2;
        buf.extend_from_slice(&self.packet_id.to_be_bytes());
        for topic in &self.topics {
            n += crate::base::encode_mqtt_string(topic.filter.as_str(), buf)?;
            buf.push(topic.qos as u8);
            n += 1;
        }
        Ok(n)
    }
}

/// Per-topic outcome reported in SUBACK.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubscribeReturnCode {
    MaximumQoS(QoS),
    Failure,
}

impl From<SubscribeReturnCode> for u8 {
    fn from(code: SubscribeReturnCode) -> Self {
        match code {
            SubscribeReturnCode::MaximumQoS(qos) => qos as u8,
            SubscribeReturnCode::Failure => 0x80,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubscribeAckPacket {
    pub packet_id: PacketId,
    pub return_codes: Vec<SubscribeReturnCode>,
}

impl DecodePacket for SubscribeAckPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let packet_id = ba.read_u16()?;
        let mut return_codes = Vec::new();
        while !ba.is_empty() {
            let byte = ba.read_byte()?;
            let code = if byte == 0x80 {
                SubscribeReturnCode::Failure
            } else {
                SubscribeReturnCode::MaximumQoS(QoS::try_from(byte)?)
            };
            return_codes.push(code);
        }
        Ok(Self {
            packet_id,
            return_codes,
        })
    }
}

impl EncodePacket for SubscribeAckPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.extend_from_slice(&self.packet_id.to_be_bytes());
        for code in &self.return_codes {
            buf.push((*code).into());
        }
        Ok(2 + self.return_codes.len())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct UnsubscribePacket {
    pub packet_id: PacketId,
    pub filters: Vec<TopicFilter>,
}

impl DecodePacket for UnsubscribePacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let packet_id = ba.read_u16()?;
        let mut filters = Vec::new();
        while !ba.is_empty() {
            filters.push(TopicFilter::parse(&ba.read_string()?)?);
        }

        // The payload MUST contain at least one topic filter [MQTT-3.10.3-2].
        if filters.is_empty() {
            return Err(DecodeError::EmptyTopicFilter);
        }

        Ok(Self { packet_id, filters })
    }
}

impl EncodePacket for UnsubscribePacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let mut n = 2;
        buf.extend_from_slice(&self.packet_id.to_be_bytes());
        for filter in &self.filters {
            n += crate::base::encode_mqtt_string(filter.as_str(), buf)?;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_round_trip() {
        let packet = SubscribePacket {
            packet_id: 10,
            topics: vec![
                SubscribeTopic {
                    filter: TopicFilter::parse("a/b").unwrap(),
                    qos: QoS::AtLeastOnce,
                },
                SubscribeTopic {
                    filter: TopicFilter::parse("c/#").unwrap(),
                    qos: QoS::ExactlyOnce,
                },
            ],
        };
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        assert_eq!(SubscribePacket::decode(&mut ba).unwrap(), packet);
    }

    #[test]
    fn test_subscribe_rejects_empty_payload() {
        let buf = [0x00, 0x0a];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            SubscribePacket::decode(&mut ba),
            Err(DecodeError::EmptyTopicFilter)
        );
    }

    #[test]
    fn test_subscribe_ack_round_trip() {
        let packet = SubscribeAckPacket {
            packet_id: 10,
            return_codes: vec![
                SubscribeReturnCode::MaximumQoS(QoS::AtLeastOnce),
                SubscribeReturnCode::Failure,
            ],
        };
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        assert_eq!(SubscribeAckPacket::decode(&mut ba).unwrap(), packet);
    }

    #[test]
    fn test_unsubscribe_round_trip() {
        let packet = UnsubscribePacket {
            packet_id: 11,
            filters: vec![TopicFilter::parse("a/+").unwrap()],
        };
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        assert_eq!(UnsubscribePacket::decode(&mut ba).unwrap(), packet);
    }
}
