// Copyright (c) 2024 Mqttd Contributors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::base::PacketId;
use crate::byte_array::ByteArray;
use crate::error::{DecodeError, EncodeError};
use crate::packet::{DecodePacket, EncodePacket};

/// Shared wire shape for PUBACK, PUBREC, PUBREL, PUBCOMP and UNSUBACK: two
/// bytes of variable header holding the acknowledged packet id, no payload.
macro_rules! packet_id_only_packet {
    ($name:ident) => {
        #[derive(Clone, Copy, Debug, Eq, PartialEq)]
        pub struct $name {
            pub packet_id: PacketId,
        }

        impl $name {
            #[must_use]
            pub const fn new(packet_id: PacketId) -> Self {
                Self { packet_id }
            }
        }

        impl DecodePacket for $name {
            fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
                Ok(Self {
                    packet_id: ba.read_u16()?,
                })
            }
        }

        impl EncodePacket for $name {
            fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
                buf.extend_from_slice(&self.packet_id.to_be_bytes());
                Ok(2)
            }
        }
    };
}

packet_id_only_packet!(PublishAckPacket);
packet_id_only_packet!(PublishReceivedPacket);
packet_id_only_packet!(PublishReleasePacket);
packet_id_only_packet!(PublishCompletePacket);
packet_id_only_packet!(UnsubscribeAckPacket);

/// PINGREQ, PINGRESP and DISCONNECT all have empty variable headers and
/// payloads; the fixed header alone carries all information.
macro_rules! empty_packet {
    ($name:ident) => {
        #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
        pub struct $name;

        impl DecodePacket for $name {
            fn decode(_ba: &mut ByteArray) -> Result<Self, DecodeError> {
                Ok(Self)
            }
        }

        impl EncodePacket for $name {
            fn encode(&self, _buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
                Ok(0)
            }
        }
    };
}

empty_packet!(PingRequestPacket);
empty_packet!(PingResponsePacket);
empty_packet!(DisconnectPacket);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_ack_round_trip() {
        let packet = PublishAckPacket::new(7);
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        assert_eq!(PublishAckPacket::decode(&mut ba).unwrap(), packet);
    }

    #[test]
    fn test_ping_request_has_no_body() {
        let mut buf = Vec::new();
        assert_eq!(PingRequestPacket.encode(&mut buf).unwrap(), 0);
        assert!(buf.is_empty());
    }
}
