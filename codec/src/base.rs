// Copyright (c) 2024 Mqttd Contributors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::byte_array::ByteArray;
use crate::error::{DecodeError, EncodeError};

/// 16-bit non-zero identifier used to correlate QoS 1/2 exchanges.
pub type PacketId = u16;

#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    /// Number of bytes a `QoS` value takes when embedded in a fixed field
    /// (e.g. one ack byte per topic filter in SUBACK).
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }

    #[must_use]
    pub const fn min(self, other: Self) -> Self {
        if (self as u8) < (other as u8) {
            self
        } else {
            other
        }
    }

    #[must_use]
    pub const fn max(self, other: Self) -> Self {
        if (self as u8) > (other as u8) {
            self
        } else {
            other
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            _ => Err(DecodeError::InvalidQoS),
        }
    }
}

/// MQTT protocol revision number carried in CONNECT. This broker only
/// accepts `V311`; other values are decoded so the connection layer can
/// reply with the correct CONNACK reason before closing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProtocolLevel {
    V31,
    V311,
    V5,
    Other(u8),
}

impl From<u8> for ProtocolLevel {
    fn from(v: u8) -> Self {
        match v {
            3 => Self::V31,
            4 => Self::V311,
            5 => Self::V5,
            other => Self::Other(other),
        }
    }
}

impl From<ProtocolLevel> for u8 {
    fn from(level: ProtocolLevel) -> Self {
        match level {
            ProtocolLevel::V31 => 3,
            ProtocolLevel::V311 => 4,
            ProtocolLevel::V5 => 5,
            ProtocolLevel::Other(v) => v,
        }
    }
}

pub const PROTOCOL_NAME: &str = "MQTT";

/// Decode and validate the `protocol name` + `protocol level` pair that
/// opens every CONNECT packet's variable header.
pub fn decode_protocol_header(ba: &mut ByteArray) -> Result<ProtocolLevel, DecodeError> {
    let name = ba.read_string()?;
    if name != PROTOCOL_NAME {
        return Err(DecodeError::InvalidProtocolName);
    }
    let level = ProtocolLevel::from(ba.read_byte()?);
    if level != ProtocolLevel::V311 {
        return Err(DecodeError::InvalidProtocolLevel);
    }
    Ok(level)
}

pub fn encode_protocol_header(buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
    let mut n = 0;
    n += encode_mqtt_string(PROTOCOL_NAME, buf)?;
    buf.push(u8::from(ProtocolLevel::V311));
    n += 1;
    Ok(n)
}

/// Encode a length-prefixed MQTT UTF-8 string field.
pub fn encode_mqtt_string(s: &str, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
    if s.len() > u16::MAX as usize {
        return Err(EncodeError::FieldTooLarge);
    }
    #[allow(clippy::cast_possible_truncation)]
    let len = s.len() as u16;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(2 + s.len())
}

/// Encode a length-prefixed binary field.
pub fn encode_binary(data: &[u8], buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
    if data.len() > u16::MAX as usize {
        return Err(EncodeError::FieldTooLarge);
    }
    #[allow(clippy::cast_possible_truncation)]
    let len = data.len() as u16;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(data);
    Ok(2 + data.len())
}
