// Copyright (c) 2024 Mqttd Contributors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Dispatcher (C9): routes packets that have already passed the connection
//! state machine's handshake/keep-alive checks across C5 (sessions), C6
//! (session manager), C7 (subscriptions) and C8 (retained messages).

use std::sync::Arc;

use codec::{
    LastWill, MqttPacket, PingResponsePacket, PublishAckPacket, PublishCompletePacket,
    PublishPacket, PublishReceivedPacket, PublishReleasePacket, QoS, SubscribeAckPacket,
    SubscribePacket, SubscribeTopic, TopicFilter, TopicName, UnsubscribeAckPacket,
    UnsubscribePacket,
};

use crate::sender::PacketSender;
use crate::session::ClientSession;
use crate::state::BrokerState;

/// Dispatch one packet already known to be something other than
/// CONNECT/CONNACK/DISCONNECT, which the connection state machine (C4)
/// handles itself.
pub async fn dispatch(
    state: &Arc<BrokerState>,
    session: &Arc<ClientSession>,
    handle: &dyn PacketSender,
    packet: MqttPacket,
) {
    match packet {
        MqttPacket::Publish(publish) => handle_publish(state, session, handle, publish).await,
        MqttPacket::PublishAck(ack) => session.on_puback(ack.packet_id).await,
        MqttPacket::PublishReceived(rec) => {
            if session.on_pubrec(rec.packet_id).await {
                handle.send(MqttPacket::PublishRelease(PublishReleasePacket::new(
                    rec.packet_id,
                )));
            }
        }
        MqttPacket::PublishRelease(rel) => {
            if let Some(publish) = session.on_pubrel(rel.packet_id).await {
                if publish.retain {
                    state.retained.retain(&publish).await;
                }
                fan_out(state, &publish).await;
            }
            handle.send(MqttPacket::PublishComplete(PublishCompletePacket::new(
                rel.packet_id,
            )));
        }
        MqttPacket::PublishComplete(comp) => session.on_pubcomp(comp.packet_id).await,
        MqttPacket::Subscribe(subscribe) => handle_subscribe(state, session, handle, subscribe).await,
        MqttPacket::Unsubscribe(unsubscribe) => {
            handle_unsubscribe(state, session, handle, unsubscribe).await;
        }
        MqttPacket::PingRequest(_) => {
            handle.send(MqttPacket::PingResponse(PingResponsePacket));
        }
        // The connection state machine intercepts these before they ever
        // reach the dispatcher.
        MqttPacket::Connect(_) | MqttPacket::Disconnect(_) => {}
        // A well-behaved client never sends these; a malformed one would
        // have already been rejected by the codec or by C4.
        MqttPacket::ConnectAck(_)
        | MqttPacket::SubscribeAck(_)
        | MqttPacket::UnsubscribeAck(_)
        | MqttPacket::PingResponse(_) => {}
    }
}

async fn handle_publish(
    state: &Arc<BrokerState>,
    session: &Arc<ClientSession>,
    handle: &dyn PacketSender,
    publish: PublishPacket,
) {
    // QoS2 forwards the application message exactly once, on PUBREL
    // (handled above), not here; a duplicate PUBLISH still gets a PUBREC.
    if publish.qos == QoS::ExactlyOnce {
        if let Some(packet_id) = publish.packet_id {
            if !session.is_duplicate_inbound_qos2(packet_id).await {
                session.record_inbound_qos2(packet_id, publish).await;
            }
            handle.send(MqttPacket::PublishReceived(PublishReceivedPacket::new(
                packet_id,
            )));
        }
        return;
    }

    if publish.retain {
        state.retained.retain(&publish).await;
    }
    fan_out(state, &publish).await;

    match publish.qos {
        QoS::AtMostOnce => {}
        QoS::AtLeastOnce => {
            if let Some(packet_id) = publish.packet_id {
                handle.send(MqttPacket::PublishAck(PublishAckPacket::new(packet_id)));
            }
        }
        QoS::ExactlyOnce => unreachable!("handled above"),
    }
}

async fn handle_subscribe(
    state: &Arc<BrokerState>,
    session: &Arc<ClientSession>,
    handle: &dyn PacketSender,
    subscribe: SubscribePacket,
) {
    let filters: Vec<(TopicFilter, QoS)> = subscribe
        .topics
        .iter()
        .map(|SubscribeTopic { filter, qos }| (filter.clone(), *qos))
        .collect();
    let return_codes = state.subscriptions.subscribe(&session.client_id, &filters).await;

    handle.send(MqttPacket::SubscribeAck(SubscribeAckPacket {
        packet_id: subscribe.packet_id,
        return_codes,
    }));

    for (filter, qos) in &filters {
        for retained in state.retained.messages_for(filter, *qos).await {
            let effective_qos = retained.qos;
            deliver_to_subscriber(session, &retained, effective_qos, true).await;
        }
    }
}

async fn handle_unsubscribe(
    state: &Arc<BrokerState>,
    session: &Arc<ClientSession>,
    handle: &dyn PacketSender,
    unsubscribe: UnsubscribePacket,
) {
    state
        .subscriptions
        .unsubscribe(&session.client_id, &unsubscribe.filters)
        .await;
    handle.send(MqttPacket::UnsubscribeAck(UnsubscribeAckPacket::new(
        unsubscribe.packet_id,
    )));
}

/// Resolve `publish.topic` against every live subscription and deliver a
/// copy to each matched session, downgrading to the subscriber's effective
/// QoS and allocating/recording in-flight state for QoS>0 deliveries.
async fn fan_out(state: &Arc<BrokerState>, publish: &PublishPacket) {
    let subscribers = state
        .subscriptions
        .resolve(publish.topic.as_str(), publish.qos)
        .await;

    for (client_id, effective_qos) in subscribers {
        if let Some(subscriber) = state.sessions.get(&client_id).await {
            deliver_to_subscriber(&subscriber, publish, effective_qos, false).await;
        }
    }
}

/// Deliver one copy of `publish` to `session` at `qos`, allocating a fresh
/// packet identifier on `session` and recording outbound in-flight state for
/// QoS>0 so PUBACK/PUBREC/retry can find it — used for both live fan-out and
/// retained-message replay (C4, C8), which differ only in `retain_flag`.
async fn deliver_to_subscriber(
    session: &Arc<ClientSession>,
    publish: &PublishPacket,
    qos: QoS,
    retain_flag: bool,
) {
    let mut outgoing = publish.clone();
    outgoing.qos = qos;
    outgoing.dup = false;
    outgoing.retain = retain_flag;

    if qos == QoS::AtMostOnce {
        outgoing.packet_id = None;
        if let Some(connection) = session.connection().await {
            connection.send(MqttPacket::Publish(outgoing));
        }
        return;
    }

    let Some(packet_id) = session.allocate_packet_id().await else {
        log::warn!(
            "{}: packet identifier space exhausted, dropping publish to {}",
            session.client_id,
            publish.topic.as_str()
        );
        return;
    };
    outgoing.packet_id = Some(packet_id);
    session.record_outbound(outgoing.clone()).await;
    if let Some(connection) = session.connection().await {
        connection.send(MqttPacket::Publish(outgoing));
        session.mark_delivered(packet_id).await;
    }
}

/// Publish a CONNECT's will message on behalf of a client whose connection
/// ended abnormally (§4.4, §4.6). Called by the connection state machine
/// after it has removed its session registration.
pub async fn publish_will(state: &Arc<BrokerState>, will: LastWill) {
    let topic = match TopicName::parse(&will.topic) {
        Ok(topic) => topic,
        Err(err) => {
            log::warn!("dropping will with invalid topic {:?}: {err}", will.topic);
            return;
        }
    };
    let publish = PublishPacket {
        dup: false,
        qos: will.qos,
        retain: will.retain,
        topic,
        packet_id: None,
        payload: will.message,
    };
    if publish.retain {
        state.retained.retain(&publish).await;
    }
    fan_out(state, &publish).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::QoS;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use crate::auth::AcceptAll;
    use crate::config::Config;
    use crate::sender::StopReason;

    struct RecordingSender {
        id: String,
        sent: StdMutex<Vec<MqttPacket>>,
        send_count: AtomicUsize,
    }

    impl PacketSender for RecordingSender {
        fn client_id(&self) -> &str {
            &self.id
        }
        fn send(&self, packet: MqttPacket) -> bool {
            self.send_count.fetch_add(1, Ordering::SeqCst);
            self.sent.lock().unwrap().push(packet);
            true
        }
        fn stop(&self, _reason: StopReason) {}
    }

    fn recording(id: &str) -> Arc<RecordingSender> {
        Arc::new(RecordingSender {
            id: id.to_string(),
            sent: StdMutex::new(Vec::new()),
            send_count: AtomicUsize::new(0),
        })
    }

    fn state() -> Arc<BrokerState> {
        BrokerState::new(Config::default(), Box::new(AcceptAll))
    }

    fn publish(topic: &str, qos: QoS, packet_id: Option<u16>) -> PublishPacket {
        PublishPacket {
            dup: false,
            qos,
            retain: false,
            topic: TopicName::parse(topic).unwrap(),
            packet_id,
            payload: b"payload".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_qos1_publish_fans_out_and_acks_publisher() {
        let state = state();
        let publisher = recording("pub");
        let subscriber_handle = recording("sub");
        state
            .sessions
            .client_connected("sub", true, subscriber_handle, &state.subscriptions)
            .await;
        state
            .subscriptions
            .subscribe("sub", &[(TopicFilter::parse("a/+").unwrap(), QoS::AtLeastOnce)])
            .await;

        dispatch(
            &state,
            &Arc::new(ClientSession::new("pub".to_string(), true)),
            publisher.as_ref(),
            MqttPacket::Publish(publish("a/b", QoS::AtLeastOnce, Some(0x1234))),
        )
        .await;

        let publisher_sent = publisher.sent.lock().unwrap();
        assert_eq!(publisher_sent.len(), 1);
        assert!(matches!(publisher_sent[0], MqttPacket::PublishAck(ref a) if a.packet_id == 0x1234));
    }

    #[tokio::test]
    async fn test_qos2_publish_forwards_only_on_pubrel() {
        let state = state();
        let publisher = recording("pub");
        let session = Arc::new(ClientSession::new("pub".to_string(), true));

        dispatch(
            &state,
            &session,
            publisher.as_ref(),
            MqttPacket::Publish(publish("t", QoS::ExactlyOnce, Some(9))),
        )
        .await;
        {
            let sent = publisher.sent.lock().unwrap();
            assert_eq!(sent.len(), 1);
            assert!(matches!(sent[0], MqttPacket::PublishReceived(ref r) if r.packet_id == 9));
        }
        assert!(state.subscriptions.resolve("t", QoS::ExactlyOnce).await.is_empty());

        dispatch(
            &state,
            &session,
            publisher.as_ref(),
            MqttPacket::PublishRelease(codec::PublishReleasePacket::new(9)),
        )
        .await;
        let sent = publisher.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(matches!(sent[1], MqttPacket::PublishComplete(ref c) if c.packet_id == 9));
    }

    #[tokio::test]
    async fn test_subscribe_replays_retained_message() {
        let state = state();
        state
            .retained
            .retain(&publish("t", QoS::AtMostOnce, None))
            .await;

        let session = Arc::new(ClientSession::new("sub".to_string(), true));
        let handle = recording("sub");
        session.bind_connection(handle.clone()).await;
        dispatch(
            &state,
            &session,
            handle.as_ref(),
            MqttPacket::Subscribe(SubscribePacket {
                packet_id: 1,
                topics: vec![SubscribeTopic {
                    filter: TopicFilter::parse("t").unwrap(),
                    qos: QoS::AtMostOnce,
                }],
            }),
        )
        .await;

        let sent = handle.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(matches!(sent[0], MqttPacket::SubscribeAck(_)));
        assert!(matches!(sent[1], MqttPacket::Publish(ref p) if p.retain));
    }

    #[tokio::test]
    async fn test_qos_retained_replay_allocates_and_tracks_its_own_packet_id() {
        let state = state();
        state
            .retained
            .retain(&publish("t", QoS::AtLeastOnce, None))
            .await;

        let session = Arc::new(ClientSession::new("sub".to_string(), true));
        let handle = recording("sub");
        session.bind_connection(handle.clone()).await;
        dispatch(
            &state,
            &session,
            handle.as_ref(),
            MqttPacket::Subscribe(SubscribePacket {
                packet_id: 42,
                topics: vec![SubscribeTopic {
                    filter: TopicFilter::parse("t").unwrap(),
                    qos: QoS::AtLeastOnce,
                }],
            }),
        )
        .await;

        let retained_packet_id = {
            let sent = handle.sent.lock().unwrap();
            assert_eq!(sent.len(), 2);
            match &sent[1] {
                MqttPacket::Publish(p) => {
                    assert!(p.retain);
                    assert_eq!(p.qos, QoS::AtLeastOnce);
                    p.packet_id.unwrap()
                }
                _ => panic!("expected publish"),
            }
        };
        // Distinct from the SUBSCRIBE's own packet id; never collides with a
        // concurrently fanned-out delivery since it comes from the session's
        // own allocator.
        assert_ne!(retained_packet_id, 42);

        session.on_puback(retained_packet_id).await;
        assert!(session.replay_outbound().await.is_empty());
    }
}
