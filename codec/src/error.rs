// Copyright (c) 2024 Mqttd Contributors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::fmt;

/// Errors raised while parsing bytes off the wire into a packet.
///
/// Every variant corresponds to a "MUST" clause in the MQTT 3.1.1 spec; on any
/// of these the caller is required to close the network connection without a
/// reply (section 4.8).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DecodeError {
    /// Variable byte integer used a fifth continuation byte.
    InvalidVarInt,

    /// Fixed header flag bits did not match the fixed value required for this
    /// packet type.
    InvalidPacketFlags,

    /// Top nibble of the first header byte is not a known packet type.
    InvalidPacketType,

    /// `remaining-length` does not match the body actually present.
    InvalidRemainingLength,

    /// CONNECT protocol name was not exactly `MQTT`.
    InvalidProtocolName,

    /// CONNECT protocol level was not `4`.
    InvalidProtocolLevel,

    /// Reserved bit in the CONNECT flags byte was not zero, or a flag
    /// combination that is only valid together was inconsistent
    /// (e.g. password present without username).
    InvalidConnectFlags,

    /// Client identifier violated the accepted encoding (only empty ids with
    /// `clean_session = false` are rejected at the codec level; longer
    /// validation is left to the connection state machine).
    InvalidClientId,

    /// QoS bits decoded to the reserved value `3`.
    InvalidQoS,

    /// A UTF-8 string field contained an embedded NUL or invalid UTF-8.
    InvalidString,

    /// SUBSCRIBE/UNSUBSCRIBE payload contained zero topic filters.
    EmptyTopicFilter,

    /// PUBLISH topic name contained a wildcard character.
    InvalidTopicName,

    /// Ran past the end of the supplied byte slice.
    OutOfRange,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for DecodeError {}

/// Errors raised while serializing a packet to bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EncodeError {
    /// Remaining length would exceed the protocol maximum of 268,435,455 bytes.
    PacketTooLarge,

    /// A string or binary field exceeded the 16-bit length prefix.
    FieldTooLarge,

    /// Client identifier was rejected at construction time.
    InvalidClientId,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for EncodeError {}
