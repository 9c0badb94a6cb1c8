// Copyright (c) 2024 Mqttd Contributors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Packet sender abstraction (C3): the narrow surface the dispatcher uses
//! to reach a connection without ever touching a socket directly.

use codec::MqttPacket;

/// Why a connection is being stopped; carried through to the log line the
/// connection task emits right before it closes the socket.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StopReason {
    /// Another connection authenticated with the same client id.
    Takeover,
    /// Client sent a malformed packet or violated the protocol state machine.
    ProtocolViolation,
    /// No CONNECT arrived within the connect-timeout window.
    ConnectTimeout,
    /// No packet arrived within `1.5 * keep_alive`.
    KeepAliveTimeout,
    /// Client sent DISCONNECT.
    Graceful,
    /// Broker is shutting down.
    Shutdown,
}

impl StopReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Takeover => "takeover",
            Self::ProtocolViolation => "protocol violation",
            Self::ConnectTimeout => "connect timeout",
            Self::KeepAliveTimeout => "keep-alive timeout",
            Self::Graceful => "graceful disconnect",
            Self::Shutdown => "broker shutdown",
        }
    }
}

/// Implemented by whatever owns the outbound half of a connection. The
/// dispatcher and session manager hold this as `Arc<dyn PacketSender>` and
/// never reach for a raw socket.
pub trait PacketSender: Send + Sync {
    fn client_id(&self) -> &str;

    /// Enqueue `packet` for delivery. Returns `false` if the outbound queue
    /// was full and the packet was dropped (only tolerated for QoS0).
    fn send(&self, packet: MqttPacket) -> bool;

    /// Ask the connection task to close, logging `reason`.
    fn stop(&self, reason: StopReason);
}
