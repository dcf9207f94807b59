use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use showrunner_core::bus::{BusError, BusMessage, BusPublisher, decode_payload, encode_payload};

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct MqttBusConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
}

impl Default for MqttBusConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "showrunner".to_string(),
            keep_alive_secs: 30,
        }
    }
}

/// MQTT-backed bus client.
///
/// Inbound publishes are JSON-decoded and forwarded on the channel returned
/// by [`MqttBus::connect`]; payloads that fail to decode arrive as raw
/// strings. On every reconnect the client re-subscribes each topic
/// subscribed so far.
pub struct MqttBus {
    client: AsyncClient,
    subscriptions: Arc<Mutex<BTreeSet<String>>>,
}

impl MqttBus {
    /// Open the connection and spawn the event-loop driver task.
    pub fn connect(
        config: MqttBusConfig,
    ) -> (
        Arc<Self>,
        mpsc::UnboundedReceiver<BusMessage>,
        JoinHandle<()>,
    ) {
        let mut options = MqttOptions::new(config.client_id, config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

        let (client, mut eventloop) = AsyncClient::new(options, 64);
        let subscriptions: Arc<Mutex<BTreeSet<String>>> = Arc::new(Mutex::new(BTreeSet::new()));
        let (tx, rx) = mpsc::unbounded_channel();

        let bus = Arc::new(Self {
            client: client.clone(),
            subscriptions: Arc::clone(&subscriptions),
        });

        let handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let message = BusMessage {
                            topic: publish.topic.clone(),
                            payload: decode_payload(&publish.payload),
                        };
                        if tx.send(message).is_err() {
                            break;
                        }
                    },
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        let topics: Vec<String> = {
                            let subs = subscriptions.lock().unwrap_or_else(|e| e.into_inner());
                            subs.iter().cloned().collect()
                        };
                        for topic in topics {
                            if let Err(e) = client.subscribe(topic.as_str(), QoS::AtLeastOnce).await {
                                tracing::warn!(%topic, error = %e, "re-subscribe failed");
                            }
                        }
                    },
                    Ok(_) => {},
                    Err(e) => {
                        tracing::warn!(error = %e, "bus connection error, retrying");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    },
                }
            }
        });

        (bus, rx, handle)
    }

    /// Subscribe a topic, remembering it for reconnect re-subscription.
    /// Failures are logged and surfaced as warnings, never panics.
    pub async fn subscribe(&self, topic: &str) -> Result<(), BusError> {
        {
            let mut subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
            subs.insert(topic.to_string());
        }
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| {
                tracing::warn!(%topic, error = %e, "subscribe failed");
                BusError::Subscribe {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                }
            })
    }

    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            tracing::warn!(error = %e, "bus disconnect failed");
        }
    }

    async fn publish_inner(&self, topic: &str, payload: Value, retain: bool) -> Result<(), BusError> {
        let body = encode_payload(&payload);
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, body)
            .await
            .map_err(|e| {
                tracing::warn!(%topic, error = %e, "publish failed");
                BusError::Publish {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                }
            })
    }
}

#[async_trait::async_trait]
impl BusPublisher for MqttBus {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), BusError> {
        self.publish_inner(topic, payload, false).await
    }

    async fn publish_retained(&self, topic: &str, payload: Value) -> Result<(), BusError> {
        self.publish_inner(topic, payload, true).await
    }
}
