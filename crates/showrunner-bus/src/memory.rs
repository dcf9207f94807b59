use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;

use showrunner_core::bus::{BusError, BusMessage, BusPublisher};

/// One recorded publish.
#[derive(Debug, Clone)]
pub struct PublishRecord {
    pub topic: String,
    pub payload: Value,
    pub retained: bool,
}

/// In-memory bus for tests: records every publish in order and loops
/// publishes matching a subscription back on the message channel, so test
/// code can observe both the wire and the inbound path.
pub struct MemoryBus {
    records: Mutex<Vec<PublishRecord>>,
    subscriptions: Mutex<Vec<String>>,
    tx: mpsc::UnboundedSender<BusMessage>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<BusMessage>>>,
}

impl MemoryBus {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            records: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            tx,
            rx: Mutex::new(Some(rx)),
        })
    }

    /// Take the inbound message channel. Returns `None` after the first call.
    pub fn receiver(&self) -> Option<mpsc::UnboundedReceiver<BusMessage>> {
        self.rx.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    pub fn subscribe(&self, topic: &str) {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(topic.to_string());
    }

    /// Simulate an inbound message from the broker.
    pub fn inject(&self, topic: &str, payload: Value) {
        let _ = self.tx.send(BusMessage {
            topic: topic.to_string(),
            payload,
        });
    }

    /// Every publish so far, in order.
    pub fn published(&self) -> Vec<PublishRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Payloads published to one topic, in order.
    pub fn published_to(&self, topic: &str) -> Vec<Value> {
        self.published()
            .into_iter()
            .filter(|r| r.topic == topic)
            .map(|r| r.payload)
            .collect()
    }

    /// Drain the record log.
    pub fn take(&self) -> Vec<PublishRecord> {
        std::mem::take(&mut *self.records.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn record(&self, topic: &str, payload: Value, retained: bool) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(PublishRecord {
                topic: topic.to_string(),
                payload: payload.clone(),
                retained,
            });
        let matched = {
            let subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
            subs.iter().any(|sub| topic_matches(sub, topic))
        };
        if matched {
            let _ = self.tx.send(BusMessage {
                topic: topic.to_string(),
                payload,
            });
        }
    }
}

/// MQTT-style topic filter match supporting `+` and a trailing `#`.
fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');
    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {},
            (Some(f), Some(t)) if f == t => {},
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[async_trait::async_trait]
impl BusPublisher for MemoryBus {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), BusError> {
        self.record(topic, payload, false);
        Ok(())
    }

    async fn publish_retained(&self, topic: &str, payload: Value) -> Result<(), BusError> {
        self.record(topic, payload, true);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn topic_filter_matching() {
        assert!(topic_matches("a/b/c", "a/b/c"));
        assert!(topic_matches("a/+/c", "a/b/c"));
        assert!(topic_matches("a/#", "a/b/c"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(!topic_matches("a/b", "a/b/c"));
        assert!(!topic_matches("a/+/c", "a/b/d"));
    }

    #[tokio::test]
    async fn records_publishes_in_order() {
        let bus = MemoryBus::new();
        bus.publish("t/one", json!({"n": 1})).await.unwrap();
        bus.publish_retained("t/two", json!({"n": 2})).await.unwrap();

        let records = bus.published();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].topic, "t/one");
        assert!(!records[0].retained);
        assert_eq!(records[1].topic, "t/two");
        assert!(records[1].retained);
    }

    #[tokio::test]
    async fn loops_back_subscribed_topics() {
        let bus = MemoryBus::new();
        let mut rx = bus.receiver().unwrap();
        bus.subscribe("game/commands");

        bus.publish("game/commands", json!({"command": "start"}))
            .await
            .unwrap();
        bus.publish("game/other", json!({"ignored": true}))
            .await
            .unwrap();

        let message = rx.recv().await.unwrap();
        assert_eq!(message.topic, "game/commands");
        assert_eq!(message.payload["command"], "start");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn inject_bypasses_subscriptions() {
        let bus = MemoryBus::new();
        let mut rx = bus.receiver().unwrap();
        bus.inject("zone/state", json!({"file": "a.jpg"}));
        let message = rx.recv().await.unwrap();
        assert_eq!(message.topic, "zone/state");
    }

    #[test]
    fn receiver_is_single_take() {
        let bus = MemoryBus::new();
        assert!(bus.receiver().is_some());
        assert!(bus.receiver().is_none());
    }
}
