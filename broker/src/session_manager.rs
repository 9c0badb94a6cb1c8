// Copyright (c) 2024 Mqttd Contributors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Session manager (C6): the global registry keyed by client id, owning
//! every [`ClientSession`] and deciding takeover / clean-vs-persistent
//! lifecycle.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::sender::{PacketSender, StopReason};
use crate::session::ClientSession;
use crate::subscriptions::SubscriptionIndex;

pub struct SessionManager {
    sessions: Mutex<HashMap<String, Arc<ClientSession>>>,
}

impl SessionManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Register `connection` as serving `client_id`. Implements the
    /// takeover + clean-session rules of §4.6 and returns (session,
    /// `session_present`) where `session_present` is what CONNACK must
    /// carry.
    pub async fn client_connected(
        &self,
        client_id: &str,
        clean_session: bool,
        connection: Arc<dyn PacketSender>,
        subscriptions: &SubscriptionIndex,
    ) -> (Arc<ClientSession>, bool) {
        let mut sessions = self.sessions.lock().await;

        if let Some(existing) = sessions.get(client_id) {
            // A second connection authenticating with the same client id
            // takes over; the old connection is stopped, never the session.
            if let Some(old_connection) = existing.connection().await {
                old_connection.stop(StopReason::Takeover);
            }

            if clean_session {
                subscriptions.clear_client(client_id).await;
                let session = Arc::new(ClientSession::new(client_id.to_string(), true));
                session.bind_connection(connection).await;
                sessions.insert(client_id.to_string(), session.clone());
                return (session, false);
            }

            existing.bind_connection(connection).await;
            return (existing.clone(), true);
        }

        let session = Arc::new(ClientSession::new(client_id.to_string(), clean_session));
        session.bind_connection(connection).await;
        sessions.insert(client_id.to_string(), session.clone());
        (session, false)
    }

    /// A connection ended. If the session is clean or ended abnormally with
    /// `clean_session = true`, it is dropped from the registry; otherwise it
    /// is kept for a future reconnect.
    pub async fn client_disconnected(&self, session: &Arc<ClientSession>) {
        session.clear_connection().await;
        if session.clean_session {
            self.sessions.lock().await.remove(&session.client_id);
        }
    }

    pub async fn get(&self, client_id: &str) -> Option<Arc<ClientSession>> {
        self.sessions.lock().await.get(client_id).cloned()
    }

    /// Stop every live connection and clear the registry. Only called once,
    /// at process shutdown.
    pub async fn stop_all(&self) {
        let mut sessions = self.sessions.lock().await;
        for session in sessions.values() {
            if let Some(connection) = session.connection().await {
                connection.stop(StopReason::Shutdown);
            }
        }
        sessions.clear();
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::MqttPacket;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeSender {
        id: String,
        stopped: AtomicBool,
    }

    impl PacketSender for FakeSender {
        fn client_id(&self) -> &str {
            &self.id
        }
        fn send(&self, _packet: MqttPacket) -> bool {
            true
        }
        fn stop(&self, _reason: StopReason) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    fn fake(id: &str) -> Arc<FakeSender> {
        Arc::new(FakeSender {
            id: id.to_string(),
            stopped: AtomicBool::new(false),
        })
    }

    #[tokio::test]
    async fn test_fresh_connect_creates_session_without_session_present() {
        let manager = SessionManager::new();
        let subs = SubscriptionIndex::new();
        let (_, session_present) = manager
            .client_connected("c1", false, fake("c1"), &subs)
            .await;
        assert!(!session_present);
    }

    #[tokio::test]
    async fn test_persistent_reconnect_reports_session_present() {
        let manager = SessionManager::new();
        let subs = SubscriptionIndex::new();
        manager.client_connected("c1", false, fake("c1"), &subs).await;
        let (_, session_present) = manager
            .client_connected("c1", false, fake("c1-again"), &subs)
            .await;
        assert!(session_present);
    }

    #[tokio::test]
    async fn test_takeover_stops_old_connection() {
        let manager = SessionManager::new();
        let subs = SubscriptionIndex::new();
        let old = fake("c1");
        manager.client_connected("c1", false, old.clone(), &subs).await;
        manager.client_connected("c1", false, fake("c1-new"), &subs).await;
        assert!(old.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_clean_session_reconnect_discards_state() {
        let manager = SessionManager::new();
        let subs = SubscriptionIndex::new();
        manager.client_connected("c1", false, fake("c1"), &subs).await;
        let (_, session_present) = manager
            .client_connected("c1", true, fake("c1-clean"), &subs)
            .await;
        assert!(!session_present);
    }

    #[tokio::test]
    async fn test_client_disconnected_removes_clean_sessions_only() {
        let manager = SessionManager::new();
        let subs = SubscriptionIndex::new();
        let (clean, _) = manager.client_connected("clean", true, fake("clean"), &subs).await;
        let (persistent, _) = manager
            .client_connected("persist", false, fake("persist"), &subs)
            .await;

        manager.client_disconnected(&clean).await;
        manager.client_disconnected(&persistent).await;

        assert!(manager.get("clean").await.is_none());
        assert!(manager.get("persist").await.is_some());
    }
}
