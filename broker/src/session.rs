// Copyright (c) 2024 Mqttd Contributors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Client session (C5): per-authenticated-client state that outlives any
//! single TCP connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use codec::{LastWill, MqttPacket, PacketId, PublishPacket, QoS};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::sender::PacketSender;

/// Default retry cap for outstanding QoS1/2 publishes (§4.5).
pub const DEFAULT_PUB_MAX_RETRIES: u32 = 5;
/// Default per-attempt ack timeout in milliseconds (§4.5).
pub const DEFAULT_PUB_ACK_TIMEOUT_MS: u64 = 1000;

/// State of an outbound QoS2 publish this session is waiting on the
/// far end to acknowledge.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutboundQos2State {
    AwaitingPubRec,
    AwaitingPubComp,
}

#[derive(Clone, Debug)]
struct OutboundQos1 {
    packet: PublishPacket,
    attempts: u32,
    sent_at: Instant,
    /// Whether this publish has ever actually reached a live connection.
    /// `record_outbound` can run with no connection bound (the subscriber is
    /// offline); the eventual first delivery must still carry `dup=0`.
    delivered: bool,
}

#[derive(Clone, Debug)]
struct OutboundQos2 {
    packet: PublishPacket,
    state: OutboundQos2State,
    attempts: u32,
    sent_at: Instant,
    delivered: bool,
}

/// A retransmission [`ClientSession::take_due_retries`] needs the caller to
/// perform; the session itself never touches a socket.
#[derive(Clone, Debug)]
pub enum RetryAction {
    ResendPublish(PublishPacket),
    ResendPubRel(PacketId),
}

/// Mutable in-flight bookkeeping for one client session. Guarded by its own
/// lock so the dispatcher and the reconnect path never race each other.
#[derive(Debug, Default)]
struct Inner {
    next_packet_id: u16,
    outbound_qos1: HashMap<PacketId, OutboundQos1>,
    outbound_qos2: HashMap<PacketId, OutboundQos2>,
    /// QoS2 PUBLISH packets received but not yet released, keyed by packet
    /// id. Held here rather than forwarded immediately: the dispatcher only
    /// hands the application message to subscribers once, on PUBREL.
    inbound_qos2: HashMap<PacketId, PublishPacket>,
    /// Non-owning handle to the connection currently serving this session.
    connection: Option<Arc<dyn PacketSender>>,
    /// Will of the currently bound connection; cleared on graceful
    /// DISCONNECT and replaced on every fresh CONNECT.
    will: Option<LastWill>,
}

pub struct ClientSession {
    pub client_id: String,
    pub clean_session: bool,
    inner: Mutex<Inner>,
}

impl ClientSession {
    #[must_use]
    pub fn new(client_id: String, clean_session: bool) -> Self {
        Self {
            client_id,
            clean_session,
            inner: Mutex::new(Inner {
                next_packet_id: 1,
                ..Inner::default()
            }),
        }
    }

    /// Bind (or re-bind after takeover/reconnect) the connection currently
    /// serving this session.
    pub async fn bind_connection(&self, connection: Arc<dyn PacketSender>) {
        self.inner.lock().await.connection = Some(connection);
    }

    pub async fn connection(&self) -> Option<Arc<dyn PacketSender>> {
        self.inner.lock().await.connection.clone()
    }

    pub async fn clear_connection(&self) {
        self.inner.lock().await.connection = None;
    }

    pub async fn set_will(&self, will: Option<LastWill>) {
        self.inner.lock().await.will = will;
    }

    /// Remove and return the will, if any, consuming it so it can only be
    /// published once per abnormal disconnect.
    pub async fn take_will(&self) -> Option<LastWill> {
        self.inner.lock().await.will.take()
    }

    /// Clear the will without publishing it, per a graceful DISCONNECT
    /// [MQTT-3.1.2-10].
    pub async fn clear_will(&self) {
        self.inner.lock().await.will = None;
    }

    /// Allocate a fresh, currently-unused packet identifier. Monotone with
    /// wraparound at 65535 -> 1; fails only if every identifier is in flight.
    pub async fn allocate_packet_id(&self) -> Option<PacketId> {
        let mut inner = self.inner.lock().await;
        let start = inner.next_packet_id;
        loop {
            let candidate = inner.next_packet_id;
            inner.next_packet_id = if candidate == u16::MAX { 1 } else { candidate + 1 };

            let in_use = inner.outbound_qos1.contains_key(&candidate)
                || inner.outbound_qos2.contains_key(&candidate);
            if !in_use {
                return Some(candidate);
            }
            if inner.next_packet_id == start {
                return None;
            }
        }
    }

    /// Record a freshly sent outbound QoS1/2 publish so it can be replayed
    /// with `dup=true` on reconnect or retried on ack timeout.
    pub async fn record_outbound(&self, packet: PublishPacket) {
        let Some(packet_id) = packet.packet_id else {
            return;
        };
        let mut inner = self.inner.lock().await;
        let sent_at = Instant::now();
        match packet.qos {
            QoS::AtLeastOnce => {
                inner.outbound_qos1.insert(
                    packet_id,
                    OutboundQos1 { packet, attempts: 1, sent_at, delivered: false },
                );
            }
            QoS::ExactlyOnce => {
                inner.outbound_qos2.insert(
                    packet_id,
                    OutboundQos2 {
                        packet,
                        state: OutboundQos2State::AwaitingPubRec,
                        attempts: 1,
                        sent_at,
                        delivered: false,
                    },
                );
            }
            QoS::AtMostOnce => {}
        }
    }

    /// Mark a recorded outbound publish as having actually reached a live
    /// connection at least once, so a later replay sends it with `dup=1`
    /// rather than `dup=0`.
    pub async fn mark_delivered(&self, packet_id: PacketId) {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.outbound_qos1.get_mut(&packet_id) {
            entry.delivered = true;
        }
        if let Some(entry) = inner.outbound_qos2.get_mut(&packet_id) {
            entry.delivered = true;
        }
    }

    /// Handle an inbound PUBACK: clears the matching QoS1 in-flight entry.
    pub async fn on_puback(&self, packet_id: PacketId) {
        self.inner.lock().await.outbound_qos1.remove(&packet_id);
    }

    /// Handle an inbound PUBREC: transitions QoS2 state and returns the
    /// packet id so the caller can send PUBREL.
    pub async fn on_pubrec(&self, packet_id: PacketId) -> bool {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.outbound_qos2.get_mut(&packet_id) {
            entry.state = OutboundQos2State::AwaitingPubComp;
            entry.attempts = 1;
            entry.sent_at = Instant::now();
            true
        } else {
            false
        }
    }

    /// Handle an inbound PUBCOMP: clears the matching QoS2 in-flight entry.
    pub async fn on_pubcomp(&self, packet_id: PacketId) {
        self.inner.lock().await.outbound_qos2.remove(&packet_id);
    }

    /// Sweep in-flight QoS1/2 entries for `ack_timeout`-expired ones: bump
    /// and retransmit those still under `max_retries`, drop the rest. Returns
    /// the retransmissions to send plus how many entries were dropped, so
    /// the caller (which owns the socket) can log and write.
    pub async fn take_due_retries(
        &self,
        ack_timeout: Duration,
        max_retries: u32,
    ) -> (Vec<RetryAction>, u32) {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let mut actions = Vec::new();
        let mut dropped = 0;

        let mut expired_qos1 = Vec::new();
        for (id, entry) in &inner.outbound_qos1 {
            if now.saturating_duration_since(entry.sent_at) >= ack_timeout {
                expired_qos1.push(*id);
            }
        }
        for id in expired_qos1 {
            let entry = inner.outbound_qos1.get_mut(&id).expect("just looked up");
            if entry.attempts >= max_retries {
                inner.outbound_qos1.remove(&id);
                dropped += 1;
            } else {
                entry.attempts += 1;
                entry.sent_at = now;
                let mut packet = entry.packet.clone();
                packet.dup = true;
                actions.push(RetryAction::ResendPublish(packet));
            }
        }

        let mut expired_qos2 = Vec::new();
        for (id, entry) in &inner.outbound_qos2 {
            if now.saturating_duration_since(entry.sent_at) >= ack_timeout {
                expired_qos2.push(*id);
            }
        }
        for id in expired_qos2 {
            let entry = inner.outbound_qos2.get_mut(&id).expect("just looked up");
            if entry.attempts >= max_retries {
                inner.outbound_qos2.remove(&id);
                dropped += 1;
            } else {
                entry.attempts += 1;
                entry.sent_at = now;
                match entry.state {
                    OutboundQos2State::AwaitingPubRec => {
                        let mut packet = entry.packet.clone();
                        packet.dup = true;
                        actions.push(RetryAction::ResendPublish(packet));
                    }
                    OutboundQos2State::AwaitingPubComp => {
                        actions.push(RetryAction::ResendPubRel(id));
                    }
                }
            }
        }

        (actions, dropped)
    }

    /// Returns `true` if `packet_id` is already recorded as an in-flight
    /// inbound QoS2 exchange (i.e. this PUBLISH is a duplicate).
    pub async fn is_duplicate_inbound_qos2(&self, packet_id: PacketId) -> bool {
        self.inner.lock().await.inbound_qos2.contains_key(&packet_id)
    }

    pub async fn record_inbound_qos2(&self, packet_id: PacketId, publish: PublishPacket) {
        self.inner.lock().await.inbound_qos2.insert(packet_id, publish);
    }

    /// Handle an inbound PUBREL: removes and returns the stored message so
    /// the dispatcher can forward it exactly once (the caller still sends
    /// PUBCOMP unconditionally, even if this returns `None`).
    pub async fn on_pubrel(&self, packet_id: PacketId) -> Option<PublishPacket> {
        self.inner.lock().await.inbound_qos2.remove(&packet_id)
    }

    /// Outstanding outbound publishes (QoS1 first, then QoS2), in the order
    /// they were originally sent, for replay on reconnect. An entry already
    /// delivered at least once replays with `dup=1`; one recorded while the
    /// session had no live connection is reaching the wire for the first
    /// time here and replays with `dup=0` [MQTT-3.3.1-1].
    pub async fn replay_outbound(&self) -> Vec<MqttPacket> {
        let mut inner = self.inner.lock().await;
        let mut packets: Vec<(PacketId, PublishPacket, bool)> = Vec::new();

        for (id, entry) in inner.outbound_qos1.iter_mut() {
            packets.push((*id, entry.packet.clone(), entry.delivered));
            entry.delivered = true;
        }
        for (id, entry) in inner.outbound_qos2.iter_mut() {
            // A PUBREL already in flight means the original PUBLISH was
            // fully acknowledged by PUBREC; nothing to resend there, but
            // QoS2 entries awaiting PUBREC still need the PUBLISH replayed.
            if entry.state == OutboundQos2State::AwaitingPubRec {
                packets.push((*id, entry.packet.clone(), entry.delivered));
                entry.delivered = true;
            }
        }

        packets.sort_by_key(|(id, _, _)| *id);
        packets
            .into_iter()
            .map(|(_, mut packet, was_delivered)| {
                packet.dup = was_delivered;
                MqttPacket::Publish(packet)
            })
            .collect()
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("client_id", &self.client_id)
            .field("clean_session", &self.clean_session)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::TopicName;

    fn publish(qos: QoS, packet_id: Option<PacketId>) -> PublishPacket {
        PublishPacket {
            dup: false,
            qos,
            retain: false,
            topic: TopicName::parse("a/b").unwrap(),
            packet_id,
            payload: b"hi".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_packet_id_allocation_is_monotone_and_skips_in_flight() {
        let session = ClientSession::new("c1".to_string(), true);
        let first = session.allocate_packet_id().await.unwrap();
        assert_eq!(first, 1);
        session.record_outbound(publish(QoS::AtLeastOnce, Some(first))).await;

        let second = session.allocate_packet_id().await.unwrap();
        assert_eq!(second, 2);
    }

    #[tokio::test]
    async fn test_puback_clears_in_flight_entry() {
        let session = ClientSession::new("c1".to_string(), true);
        session.record_outbound(publish(QoS::AtLeastOnce, Some(7))).await;
        session.on_puback(7).await;
        assert!(session.replay_outbound().await.is_empty());
    }

    #[tokio::test]
    async fn test_inbound_qos2_duplicate_detection() {
        let session = ClientSession::new("c1".to_string(), true);
        assert!(!session.is_duplicate_inbound_qos2(3).await);
        session.record_inbound_qos2(3, publish(QoS::ExactlyOnce, Some(3))).await;
        assert!(session.is_duplicate_inbound_qos2(3).await);
        assert!(session.on_pubrel(3).await.is_some());
        assert!(!session.is_duplicate_inbound_qos2(3).await);
    }

    #[tokio::test]
    async fn test_replay_outbound_sends_dup_zero_when_never_delivered() {
        // Recorded while the client had no live connection: this replay is
        // the first time it actually reaches the wire.
        let session = ClientSession::new("c1".to_string(), false);
        session.record_outbound(publish(QoS::AtLeastOnce, Some(1))).await;
        let replayed = session.replay_outbound().await;
        assert_eq!(replayed.len(), 1);
        match &replayed[0] {
            MqttPacket::Publish(p) => assert!(!p.dup),
            _ => panic!("expected publish"),
        }
    }

    #[tokio::test]
    async fn test_replay_outbound_sends_dup_one_once_delivered() {
        let session = ClientSession::new("c1".to_string(), false);
        session.record_outbound(publish(QoS::AtLeastOnce, Some(1))).await;
        session.mark_delivered(1).await;
        let replayed = session.replay_outbound().await;
        match &replayed[0] {
            MqttPacket::Publish(p) => assert!(p.dup),
            _ => panic!("expected publish"),
        }
    }

    #[tokio::test]
    async fn test_take_due_retries_resends_until_max_then_drops() {
        let session = ClientSession::new("c1".to_string(), true);
        session.record_outbound(publish(QoS::AtLeastOnce, Some(1))).await;

        let (actions, dropped) = session.take_due_retries(Duration::from_millis(0), 2).await;
        assert_eq!(actions.len(), 1);
        assert_eq!(dropped, 0);
        assert!(matches!(&actions[0], RetryAction::ResendPublish(p) if p.dup));

        let (actions, dropped) = session.take_due_retries(Duration::from_millis(0), 2).await;
        assert_eq!(actions.len(), 1);
        assert_eq!(dropped, 0);

        let (actions, dropped) = session.take_due_retries(Duration::from_millis(0), 2).await;
        assert!(actions.is_empty());
        assert_eq!(dropped, 1);
        assert!(session.replay_outbound().await.is_empty());
    }

    #[tokio::test]
    async fn test_take_due_retries_resends_pubrel_while_awaiting_pubcomp() {
        let session = ClientSession::new("c1".to_string(), true);
        session.record_outbound(publish(QoS::ExactlyOnce, Some(5))).await;
        assert!(session.on_pubrec(5).await);

        let (actions, _) = session.take_due_retries(Duration::from_millis(0), 5).await;
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], RetryAction::ResendPubRel(5)));
    }
}
