use serde_json::Value;

/// A message received from the bus: topic plus the JSON-decoded payload.
/// Payloads that fail to decode arrive as `Value::String` with the raw text.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Value,
}

/// Bus transport failure. Every call site logs and continues; transport
/// errors never unwind the caller's control flow.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
    #[error("subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },
}

/// Outbound half of the message bus, shared by adapters and the engine.
///
/// Payloads are auto-serialized to JSON unless the value is already a string,
/// in which case the string is published verbatim (see [`encode_payload`]).
#[async_trait::async_trait]
pub trait BusPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), BusError>;

    async fn publish_retained(&self, topic: &str, payload: Value) -> Result<(), BusError>;
}

/// Serialize an outbound payload: strings pass through raw, everything else
/// becomes compact JSON.
pub fn encode_payload(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Decode an inbound payload: JSON when it parses, otherwise the raw text as
/// a string value.
pub fn decode_payload(bytes: &[u8]) -> Value {
    let text = String::from_utf8_lossy(bytes);
    serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text.into_owned()))
}
