// Copyright (c) 2024 Mqttd Contributors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Connection state machine (C4): one tokio task per accepted TCP
//! connection, carrying it through `INITIAL -> CONNECTING -> CONNECTED ->
//! DISCONNECTING -> DISCONNECTED`.
//!
//! Only this task ever writes to its own socket. Other tasks reach it
//! exclusively through the bounded channel backing [`ConnectionHandle`],
//! which is what they hold as `Arc<dyn PacketSender>`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use codec::{ConnectAckPacket, ConnectReturnCode, DecodeError, MqttPacket, PublishReleasePacket};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant, MissedTickBehavior};

use crate::dispatcher;
use crate::error::Error;
use crate::sender::{PacketSender, StopReason};
use crate::session::{ClientSession, RetryAction};
use crate::state::BrokerState;

/// Message enqueued on a connection's outbound channel: either a packet to
/// encode and write, or a request that the connection task close itself.
enum OutboundMessage {
    Packet(MqttPacket),
    Stop(StopReason),
}

/// The `Arc<dyn PacketSender>` every other task holds to reach this
/// connection. Cloning the sender is cheap; only the owning task ever
/// drains the receiving half.
struct ConnectionHandle {
    client_id: String,
    tx: mpsc::Sender<OutboundMessage>,
}

impl PacketSender for ConnectionHandle {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn send(&self, packet: MqttPacket) -> bool {
        self.tx.try_send(OutboundMessage::Packet(packet)).is_ok()
    }

    fn stop(&self, reason: StopReason) {
        let _ = self.tx.try_send(OutboundMessage::Stop(reason));
    }
}

/// Outcome of decoding and handling one buffered packet, driving the
/// connection loop's control flow.
enum PacketOutcome {
    Continue,
    Graceful,
    Violation,
}

/// Accept-loop entry point (called by C12 once per accepted socket).
pub async fn handle(stream: TcpStream, peer_addr: SocketAddr, state: Arc<BrokerState>) {
    if let Err(err) = run(stream, peer_addr, state).await {
        log::error!("{peer_addr}: connection ended with error: {err}");
    }
}

async fn run(stream: TcpStream, peer_addr: SocketAddr, state: Arc<BrokerState>) -> Result<(), Error> {
    stream.set_nodelay(true).ok();
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(state.config.general.write_buf);

    let mut read_buf = vec![0u8; state.config.general.read_buf];
    let mut pending = Vec::new();

    let connect_deadline =
        Instant::now() + Duration::from_millis(state.config.general.connect_timeout_ms);
    let connect_packet = 'handshake: loop {
        tokio::select! {
            result = reader.read(&mut read_buf) => {
                let n = result?;
                if n == 0 {
                    return Ok(());
                }
                pending.extend_from_slice(&read_buf[..n]);
                match MqttPacket::decode(&pending) {
                    Ok(Some((MqttPacket::Connect(connect), consumed))) => {
                        pending.drain(..consumed);
                        break 'handshake connect;
                    }
                    // The very first packet on a connection MUST be CONNECT
                    // [MQTT-3.1.0-1]; anything else, drop without reply.
                    Ok(Some(_)) => return Ok(()),
                    Ok(None) => continue,
                    Err(DecodeError::InvalidProtocolName | DecodeError::InvalidProtocolLevel) => {
                        send_connack_and_close(&mut writer, ConnectReturnCode::UnacceptableProtocolVersion).await.ok();
                        return Ok(());
                    }
                    Err(DecodeError::InvalidClientId) => {
                        send_connack_and_close(&mut writer, ConnectReturnCode::IdentifierRejected).await.ok();
                        return Ok(());
                    }
                    Err(_) => return Ok(()),
                }
            }
            () = sleep_until(connect_deadline) => {
                log::debug!("{peer_addr}: {}", StopReason::ConnectTimeout.as_str());
                return Ok(());
            }
        }
    };

    let client_id = if connect_packet.client_id.is_empty() {
        codec::random_client_id()
    } else {
        connect_packet.client_id.clone()
    };

    if connect_packet.username.is_none() && !state.config.security.allow_anonymous {
        send_connack_and_close(&mut writer, ConnectReturnCode::NotAuthorized).await.ok();
        return Ok(());
    }
    let authorized = state.authenticator.authenticate(
        &peer_addr.ip().to_string(),
        connect_packet.username.as_deref(),
        connect_packet.password.as_deref(),
    );
    if !authorized {
        let reason = if connect_packet.username.is_some() {
            ConnectReturnCode::BadUsernameOrPassword
        } else {
            ConnectReturnCode::NotAuthorized
        };
        send_connack_and_close(&mut writer, reason).await.ok();
        return Ok(());
    }

    let handle = Arc::new(ConnectionHandle {
        client_id: client_id.clone(),
        tx: tx.clone(),
    });
    let (session, session_present) = state
        .sessions
        .client_connected(&client_id, connect_packet.clean_session, handle.clone(), &state.subscriptions)
        .await;
    session.set_will(connect_packet.last_will.clone()).await;

    send_connack(&mut writer, session_present, ConnectReturnCode::Accepted).await?;
    log::info!("{peer_addr}: client {client_id} connected (session_present={session_present})");

    for packet in session.replay_outbound().await {
        handle.send(packet);
    }

    let watchdog_enabled = connect_packet.keep_alive > 0;
    let watchdog_duration = Duration::from_secs_f64(1.5 * f64::from(connect_packet.keep_alive))
        .max(Duration::from_secs(1));
    let mut watchdog_deadline = Instant::now() + watchdog_duration;

    let ack_timeout = Duration::from_millis(state.config.general.pub_ack_timeout_ms);
    let max_retries = state.config.general.pub_max_retries;
    let mut retry_ticker = tokio::time::interval(ack_timeout);
    retry_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    retry_ticker.tick().await;

    let mut stop_reason: Option<StopReason> = None;

    match drain_pending(&mut pending, &state, &session, handle.as_ref()).await {
        PacketOutcome::Continue => {}
        PacketOutcome::Graceful => stop_reason = Some(StopReason::Graceful),
        PacketOutcome::Violation => stop_reason = Some(StopReason::ProtocolViolation),
    }

    'conn: while stop_reason.is_none() {
        tokio::select! {
            result = reader.read(&mut read_buf) => {
                match result {
                    Ok(0) => break 'conn,
                    Ok(n) => {
                        pending.extend_from_slice(&read_buf[..n]);
                        if watchdog_enabled {
                            watchdog_deadline = Instant::now() + watchdog_duration;
                        }
                        match drain_pending(&mut pending, &state, &session, handle.as_ref()).await {
                            PacketOutcome::Continue => {}
                            PacketOutcome::Graceful => {
                                stop_reason = Some(StopReason::Graceful);
                                break 'conn;
                            }
                            PacketOutcome::Violation => {
                                stop_reason = Some(StopReason::ProtocolViolation);
                                break 'conn;
                            }
                        }
                    }
                    Err(err) => {
                        log::debug!("{peer_addr}: read error: {err}");
                        break 'conn;
                    }
                }
            }
            msg = rx.recv() => {
                match msg {
                    Some(OutboundMessage::Packet(packet)) => {
                        if write_packet(&mut writer, &packet).await.is_err() {
                            break 'conn;
                        }
                    }
                    Some(OutboundMessage::Stop(reason)) => {
                        stop_reason = Some(reason);
                        break 'conn;
                    }
                    None => break 'conn,
                }
            }
            () = sleep_until(watchdog_deadline), if watchdog_enabled => {
                stop_reason = Some(StopReason::KeepAliveTimeout);
                break 'conn;
            }
            _ = retry_ticker.tick() => {
                let (actions, dropped) = session.take_due_retries(ack_timeout, max_retries).await;
                if dropped > 0 {
                    log::warn!(
                        "{peer_addr}: client {client_id} dropped {dropped} in-flight publish(es) after exceeding the retry limit"
                    );
                }
                for action in actions {
                    let packet = match action {
                        RetryAction::ResendPublish(publish) => MqttPacket::Publish(publish),
                        RetryAction::ResendPubRel(packet_id) => {
                            MqttPacket::PublishRelease(PublishReleasePacket::new(packet_id))
                        }
                    };
                    if write_packet(&mut writer, &packet).await.is_err() {
                        break 'conn;
                    }
                }
            }
        }
    }

    // Best-effort drain of whatever is already queued (e.g. a SUBACK racing
    // a takeover Stop); this is not allowed to block indefinitely.
    while let Ok(msg) = rx.try_recv() {
        if let OutboundMessage::Packet(packet) = msg {
            write_packet(&mut writer, &packet).await.ok();
        }
    }
    writer.shutdown().await.ok();

    match stop_reason {
        Some(reason) => log::info!("{peer_addr}: client {client_id} disconnected: {}", reason.as_str()),
        None => log::info!("{peer_addr}: client {client_id} closed the connection"),
    }

    // A takeover means another connection already re-bound this session;
    // unregistering here would tear down that new connection's state.
    if stop_reason != Some(StopReason::Takeover) {
        state.sessions.client_disconnected(&session).await;
        if stop_reason != Some(StopReason::Graceful) {
            if let Some(will) = session.take_will().await {
                dispatcher::publish_will(&state, will).await;
            }
        }
    }

    Ok(())
}

/// Decode and dispatch every complete packet currently buffered in
/// `pending`, leaving any trailing partial frame for the next read.
async fn drain_pending(
    pending: &mut Vec<u8>,
    state: &Arc<BrokerState>,
    session: &Arc<ClientSession>,
    handle: &dyn PacketSender,
) -> PacketOutcome {
    loop {
        match MqttPacket::decode(pending) {
            Ok(Some((packet, consumed))) => {
                pending.drain(..consumed);
                match packet {
                    // A second CONNECT on an already-established connection
                    // is a protocol violation [MQTT-3.1.0-2].
                    MqttPacket::Connect(_) => return PacketOutcome::Violation,
                    MqttPacket::Disconnect(_) => {
                        session.clear_will().await;
                        return PacketOutcome::Graceful;
                    }
                    other => dispatcher::dispatch(state, session, handle, other).await,
                }
            }
            Ok(None) => return PacketOutcome::Continue,
            Err(_) => return PacketOutcome::Violation,
        }
    }
}

async fn write_packet(writer: &mut OwnedWriteHalf, packet: &MqttPacket) -> Result<(), Error> {
    let mut buf = Vec::new();
    packet.encode(&mut buf)?;
    writer.write_all(&buf).await?;
    Ok(())
}

async fn send_connack(
    writer: &mut OwnedWriteHalf,
    session_present: bool,
    reason: ConnectReturnCode,
) -> Result<(), Error> {
    write_packet(
        writer,
        &MqttPacket::ConnectAck(ConnectAckPacket::new(session_present, reason)),
    )
    .await
}

async fn send_connack_and_close(
    writer: &mut OwnedWriteHalf,
    reason: ConnectReturnCode,
) -> Result<(), Error> {
    send_connack(writer, false, reason).await?;
    writer.shutdown().await.ok();
    Ok(())
}
