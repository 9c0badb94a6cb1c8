// Copyright (c) 2024 Mqttd Contributors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Topic subscriptions (C7): subscription index and match engine.

use std::collections::HashMap;

use codec::{QoS, SubscribeReturnCode, TopicFilter};
use tokio::sync::RwLock;

/// A single client's subscribed filters, keyed by the filter's original
/// string so UNSUBSCRIBE's exact-string match (§4.7) is a simple lookup.
type ClientSubscriptions = HashMap<String, (TopicFilter, QoS)>;

#[derive(Default)]
struct Inner {
    by_client: HashMap<String, ClientSubscriptions>,
}

/// Concurrent readers for `resolve`/retained-replay, a single writer for
/// mutation, per the resolved concurrency model (§5, §9).
pub struct SubscriptionIndex {
    inner: RwLock<Inner>,
}

impl SubscriptionIndex {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Add `filters` to `client_id`'s subscription set, returning the
    /// per-filter SUBACK return codes in request order.
    pub async fn subscribe(
        &self,
        client_id: &str,
        filters: &[(TopicFilter, QoS)],
    ) -> Vec<SubscribeReturnCode> {
        let mut inner = self.inner.write().await;
        let entry = inner.by_client.entry(client_id.to_string()).or_default();

        filters
            .iter()
            .map(|(filter, qos)| {
                entry.insert(filter.as_str().to_string(), (filter.clone(), *qos));
                SubscribeReturnCode::MaximumQoS(*qos)
            })
            .collect()
    }

    /// Remove subscriptions matching `filters` by exact string.
    pub async fn unsubscribe(&self, client_id: &str, filters: &[TopicFilter]) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.by_client.get_mut(client_id) {
            for filter in filters {
                entry.remove(filter.as_str());
            }
        }
    }

    /// Drop every subscription owned by `client_id`, used on a
    /// clean-session reconnect.
    pub async fn clear_client(&self, client_id: &str) {
        self.inner.write().await.by_client.remove(client_id);
    }

    /// Resolve `topic` to the list of subscribers and their effective QoS.
    /// When more than one of a client's own filters match, the deliveries
    /// are merged into one at the max effective QoS (§4.7, resolved in §9).
    pub async fn resolve(&self, topic: &str, publish_qos: QoS) -> Vec<(String, QoS)> {
        let inner = self.inner.read().await;
        let mut out = Vec::new();

        for (client_id, filters) in &inner.by_client {
            let mut best: Option<QoS> = None;
            for (filter, sub_qos) in filters.values() {
                if filter.matches(topic) {
                    let effective = publish_qos.min(*sub_qos);
                    best = Some(best.map_or(effective, |b| b.max(effective)));
                }
            }
            if let Some(qos) = best {
                out.push((client_id.clone(), qos));
            }
        }

        out
    }
}

impl Default for SubscriptionIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(s: &str) -> TopicFilter {
        TopicFilter::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_resolve_matches_wildcard_subscription() {
        let index = SubscriptionIndex::new();
        index
            .subscribe("c1", &[(filter("sport/+"), QoS::AtLeastOnce)])
            .await;

        let resolved = index.resolve("sport/tennis", QoS::AtLeastOnce).await;
        assert_eq!(resolved, vec![("c1".to_string(), QoS::AtLeastOnce)]);
    }

    #[tokio::test]
    async fn test_resolve_downgrades_to_min_qos() {
        let index = SubscriptionIndex::new();
        index
            .subscribe("c1", &[(filter("a/b"), QoS::AtMostOnce)])
            .await;

        let resolved = index.resolve("a/b", QoS::ExactlyOnce).await;
        assert_eq!(resolved, vec![("c1".to_string(), QoS::AtMostOnce)]);
    }

    #[tokio::test]
    async fn test_resolve_merges_multiple_matches_at_max_qos() {
        let index = SubscriptionIndex::new();
        index
            .subscribe(
                "c1",
                &[
                    (filter("a/+"), QoS::AtMostOnce),
                    (filter("a/b"), QoS::ExactlyOnce),
                ],
            )
            .await;

        let resolved = index.resolve("a/b", QoS::ExactlyOnce).await;
        assert_eq!(resolved, vec![("c1".to_string(), QoS::ExactlyOnce)]);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_exact_filter() {
        let index = SubscriptionIndex::new();
        index.subscribe("c1", &[(filter("a/b"), QoS::AtMostOnce)]).await;
        index.unsubscribe("c1", &[filter("a/b")]).await;

        assert!(index.resolve("a/b", QoS::AtMostOnce).await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_client_drops_all_subscriptions() {
        let index = SubscriptionIndex::new();
        index.subscribe("c1", &[(filter("#"), QoS::AtMostOnce)]).await;
        index.clear_client("c1").await;

        assert!(index.resolve("any/topic", QoS::AtMostOnce).await.is_empty());
    }
}
