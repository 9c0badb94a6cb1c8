// Copyright (c) 2024 Mqttd Contributors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Retained messages (C8): per-topic last-retained PUBLISH, replayed to
//! new subscribers.

use std::collections::HashMap;

use codec::{PublishPacket, QoS, TopicFilter};
use tokio::sync::RwLock;

pub struct RetainedStore {
    by_topic: RwLock<HashMap<String, PublishPacket>>,
}

impl RetainedStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_topic: RwLock::new(HashMap::new()),
        }
    }

    /// Record or clear a retained message for `publish.topic`.
    ///
    /// A zero-length payload deletes any existing retention for that topic
    /// instead of storing an empty message.
    pub async fn retain(&self, publish: &PublishPacket) {
        let mut by_topic = self.by_topic.write().await;
        if publish.payload.is_empty() {
            by_topic.remove(publish.topic.as_str());
        } else {
            by_topic.insert(publish.topic.as_str().to_string(), publish.clone());
        }
    }

    /// Every retained message whose topic matches `filter`, delivered at
    /// `min(original_qos, requested_qos)` with `retain = true`.
    pub async fn messages_for(&self, filter: &TopicFilter, requested_qos: QoS) -> Vec<PublishPacket> {
        let by_topic = self.by_topic.read().await;
        by_topic
            .values()
            .filter(|publish| filter.matches(publish.topic.as_str()))
            .map(|publish| {
                let mut delivered = publish.clone();
                delivered.qos = delivered.qos.min(requested_qos);
                delivered.retain = true;
                delivered.dup = false;
                delivered
            })
            .collect()
    }
}

impl Default for RetainedStore {
    fn default() -> Self {
        Self::new()
    }
}
