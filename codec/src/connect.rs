// Copyright (c) 2024 Mqttd Contributors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::base::{self, decode_protocol_header, encode_mqtt_string, QoS};
use crate::byte_array::ByteArray;
use crate::error::{DecodeError, EncodeError};
use crate::packet::{DecodePacket, EncodePacket};

/// Bit layout of the CONNECT flags byte:
/// ```txt
///   7        6        5       4-3       2         1           0
/// +------+--------+--------+--------+--------+-------------+----------+
/// | User | Passwd | WillRT | WillQoS| Will   | CleanSession| Reserved |
/// +------+--------+--------+--------+--------+-------------+----------+
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConnectFlags {
    pub username: bool,
    pub password: bool,
    pub will_retain: bool,
    pub will_qos: QoS,
    pub will: bool,
    pub clean_session: bool,
}

impl ConnectFlags {
    fn decode(byte: u8) -> Result<Self, DecodeError> {
        if byte & 0b0000_0001 != 0 {
            return Err(DecodeError::InvalidConnectFlags);
        }
        let username = byte & 0b1000_0000 != 0;
        let password = byte & 0b0100_0000 != 0;
        let will_retain = byte & 0b0010_0000 != 0;
        let will_qos = match (byte & 0b0001_1000) >> 3 {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            2 => QoS::ExactlyOnce,
            _ => return Err(DecodeError::InvalidConnectFlags),
        };
        let will = byte & 0b0000_0100 != 0;
        let clean_session = byte & 0b0000_0010 != 0;

        // If Will is unset, WillQoS and WillRetain MUST be zero [MQTT-3.1.2-13][MQTT-3.1.2-15].
        if !will && (will_qos as u8 != 0 || will_retain) {
            return Err(DecodeError::InvalidConnectFlags);
        }
        // Password is only meaningful when Username is set [MQTT-3.1.2-22].
        if password && !username {
            return Err(DecodeError::InvalidConnectFlags);
        }

        Ok(Self {
            username,
            password,
            will_retain,
            will_qos,
            will,
            clean_session,
        })
    }

    fn encode(self) -> u8 {
        let username = if self.username { 0b1000_0000 } else { 0 };
        let password = if self.password { 0b0100_0000 } else { 0 };
        let will_retain = if self.will_retain { 0b0010_0000 } else { 0 };
        let will_qos = (self.will_qos as u8) << 3;
        let will = if self.will { 0b0000_0100 } else { 0 };
        let clean_session = if self.clean_session { 0b0000_0010 } else { 0 };
        username | password | will_retain | will_qos | will | clean_session
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LastWill {
    pub topic: String,
    pub message: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConnectPacket {
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: String,
    pub last_will: Option<LastWill>,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
}

impl DecodePacket for ConnectPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        decode_protocol_header(ba)?;
        let flags = ConnectFlags::decode(ba.read_byte()?)?;
        let keep_alive = ba.read_u16()?;
        let client_id = ba.read_string()?;

        // An empty client id is only permitted together with clean_session
        // [MQTT-3.1.3-7] [MQTT-3.1.3-8].
        if client_id.is_empty() && !flags.clean_session {
            return Err(DecodeError::InvalidClientId);
        }

        let last_will = if flags.will {
            let topic = ba.read_string()?;
            let message = ba.read_binary()?;
            Some(LastWill {
                topic,
                message,
                qos: flags.will_qos,
                retain: flags.will_retain,
            })
        } else {
            None
        };

        let username = if flags.username {
            Some(ba.read_string()?)
        } else {
            None
        };

        let password = if flags.password {
            Some(ba.read_binary()?)
        } else {
            None
        };

        Ok(Self {
            clean_session: flags.clean_session,
            keep_alive,
            client_id,
            last_will,
            username,
            password,
        })
    }
}

impl EncodePacket for ConnectPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let mut n = 0;
        n += base::encode_protocol_header(buf)?;

        let flags = ConnectFlags {
            username: self.username.is_some(),
            password: self.password.is_some(),
            will_retain: self.last_will.as_ref().is_some_and(|w| w.retain),
            will_qos: self.last_will.as_ref().map_or(QoS::AtMostOnce, |w| w.qos),
            will: self.last_will.is_some(),
            clean_session: self.clean_session,
        };
        buf.push(flags.encode());
        n += 1;

        buf.extend_from_slice(&self.keep_alive.to_be_bytes());
        n += 2;

        n += encode_mqtt_string(&self.client_id, buf)?;

        if let Some(will) = &self.last_will {
            n += encode_mqtt_string(&will.topic, buf)?;
            n += base::encode_binary(&will.message, buf)?;
        }
        if let Some(username) = &self.username {
            n += encode_mqtt_string(username, buf)?;
        }
        if let Some(password) = &self.password {
            n += base::encode_binary(password, buf)?;
        }

        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConnectPacket {
        ConnectPacket {
            clean_session: true,
            keep_alive: 60,
            client_id: "client-1".to_string(),
            last_will: Some(LastWill {
                topic: "will/topic".to_string(),
                message: b"bye".to_vec(),
                qos: QoS::AtLeastOnce,
                retain: true,
            }),
            username: Some("alice".to_string()),
            password: Some(b"secret".to_vec()),
        }
    }

    #[test]
    fn test_connect_round_trip() {
        let packet = sample();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = ConnectPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_connect_rejects_empty_client_id_without_clean_session() {
        let mut packet = sample();
        packet.client_id = String::new();
        packet.clean_session = false;
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            ConnectPacket::decode(&mut ba),
            Err(DecodeError::InvalidClientId)
        );
    }

    #[test]
    fn test_connect_flags_rejects_password_without_username() {
        assert_eq!(
            ConnectFlags::decode(0b0100_0010),
            Err(DecodeError::InvalidConnectFlags)
        );
    }

    #[test]
    fn test_connect_flags_rejects_reserved_bit() {
        assert_eq!(
            ConnectFlags::decode(0b0000_0011),
            Err(DecodeError::InvalidConnectFlags)
        );
    }

    #[test]
    fn test_connect_rejects_bad_protocol_name() {
        let buf = [0x00, 0x03, b'M', b'Q', b'X', 0x04, 0x00, 0x00, 0x00, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            ConnectPacket::decode(&mut ba),
            Err(DecodeError::InvalidProtocolName)
        );
    }
}
