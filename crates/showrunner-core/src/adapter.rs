use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bus::{BusError, BusPublisher};
use crate::time::seconds_to_mmss;
use crate::topics::{GameTopics, ZoneTopics};
use crate::verb::Verb;

/// Options map attached to a verb execution.
pub type JsonMap = serde_json::Map<String, Value>;

/// The adapter variant a zone is configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneKind {
    Media,
    Lights,
    Clock,
}

impl ZoneKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Media => "media",
            Self::Lights => "lights",
            Self::Clock => "clock",
        }
    }
}

impl fmt::Display for ZoneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time reading handed to adapters that derive display values from
/// the running game (the clock's `MM:SS` argument when none is given).
#[derive(Debug, Clone)]
pub struct ClockReading {
    pub phase: String,
    pub remaining_secs: u32,
}

impl ClockReading {
    pub fn mmss(&self) -> String {
        seconds_to_mmss(self.remaining_secs)
    }
}

/// Shared callback producing the current [`ClockReading`].
pub type ClockProvider = Arc<dyn Fn() -> ClockReading + Send + Sync>;

/// Per-execution context built by the zone registry and passed to
/// [`ZoneAdapter::execute`].
#[derive(Clone)]
pub struct AdapterContext {
    pub bus: Arc<dyn BusPublisher>,
    pub game_topics: GameTopics,
    pub clock: ClockProvider,
    pub default_fade_ms: u64,
    /// Monotonic per-process correlation id for tracing an execution.
    pub correlation: u64,
}

/// Failure surfaced by an adapter execution. The registry wraps this with
/// the zone and verb before re-surfacing.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("verb {verb} is not supported")]
    UnsupportedVerb { verb: Verb },
    #[error("invalid options for {verb}: {reason}")]
    InvalidOptions { verb: Verb, reason: String },
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Translator from engine verbs to device wire payloads.
///
/// The engine owns routing, scheduling, and state; an adapter only turns a
/// verb into bus traffic for its zone and keeps the latest retained state
/// snapshot for verification polls.
#[async_trait::async_trait]
pub trait ZoneAdapter: Send + Sync {
    fn kind(&self) -> ZoneKind;

    /// The verbs this adapter accepts.
    fn capabilities(&self) -> &'static [Verb];

    fn topics(&self) -> &ZoneTopics;

    /// Execute one verb. The returned value is adapter-specific (verification
    /// verbs return structured reports, most verbs return a small ack).
    async fn execute(
        &self,
        verb: Verb,
        options: &JsonMap,
        ctx: &AdapterContext,
    ) -> Result<Value, AdapterError>;

    /// Record the latest retained state snapshot from the zone's state topic.
    fn observe_state(&self, value: &Value);

    /// The latest snapshot recorded by [`ZoneAdapter::observe_state`].
    fn snapshot(&self) -> Option<Value>;

    /// Called once at engine shutdown.
    async fn cleanup(&self) {}

    fn supports(&self, verb: Verb) -> bool {
        self.capabilities().contains(&verb)
    }
}
