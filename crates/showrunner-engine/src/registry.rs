//! The zone registry: constructs typed adapters from zone configuration and
//! routes `(zone, verb, options)` invocations to them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use showrunner_core::adapter::{
    AdapterContext, AdapterError, ClockProvider, JsonMap, ZoneAdapter, ZoneKind,
};
use showrunner_core::bus::BusPublisher;
use showrunner_core::config::GameDefinition;
use showrunner_core::topics::GameTopics;
use showrunner_core::verb::Verb;

/// Zone routing failure, carrying the zone and verb for diagnostics.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown zone {zone}")]
    UnknownZone { zone: String },
    #[error("unknown verb {verb} for zone {zone}")]
    UnknownVerb { zone: String, verb: String },
    #[error("zone {zone} does not support {verb}")]
    UnsupportedVerb { zone: String, verb: Verb },
    #[error("no adapter built for zone kind {kind} (feature disabled)")]
    AdapterUnavailable { kind: ZoneKind },
    #[error("{verb} on {zone} failed: {source}")]
    Execution {
        zone: String,
        verb: Verb,
        #[source]
        source: AdapterError,
    },
}

struct ZoneEntry {
    kind: ZoneKind,
    adapter: Box<dyn ZoneAdapter>,
}

/// Owns every adapter for the process lifetime; zones are never recreated
/// mid-game.
pub struct ZoneRegistry {
    zones: BTreeMap<String, ZoneEntry>,
    bus: Arc<dyn BusPublisher>,
    game_topics: GameTopics,
    clock: ClockProvider,
    default_fade_ms: u64,
    correlation: AtomicU64,
}

impl ZoneRegistry {
    /// Instantiate one adapter per configured zone. Unknown zone kinds are
    /// impossible past config parse; a kind whose adapter crate is compiled
    /// out is fatal here.
    pub fn new(
        bus: Arc<dyn BusPublisher>,
        def: &GameDefinition,
        clock: ClockProvider,
    ) -> Result<Self, RegistryError> {
        let mut zones = BTreeMap::new();
        for (name, zone) in &def.zones {
            let adapter: Box<dyn ZoneAdapter> = match zone.kind {
                #[cfg(feature = "media")]
                ZoneKind::Media => Box::new(showrunner_media::MediaAdapter::new(&zone.base_topic)),
                #[cfg(feature = "lights")]
                ZoneKind::Lights => {
                    Box::new(showrunner_lights::LightsAdapter::new(&zone.base_topic))
                },
                #[cfg(feature = "clock")]
                ZoneKind::Clock => Box::new(showrunner_clock::ClockAdapter::new(
                    &zone.base_topic,
                    def.mirror_ui,
                )),
                #[allow(unreachable_patterns)]
                kind => return Err(RegistryError::AdapterUnavailable { kind }),
            };
            zones.insert(
                name.clone(),
                ZoneEntry {
                    kind: zone.kind,
                    adapter,
                },
            );
        }
        Ok(Self {
            zones,
            bus,
            game_topics: GameTopics::new(&def.game_topic),
            clock,
            default_fade_ms: def.default_fade_ms,
            correlation: AtomicU64::new(1),
        })
    }

    /// Route one verb invocation. Errors are wrapped to carry zone and verb;
    /// an unknown verb warns and errors without panicking.
    pub async fn execute(
        &self,
        zone: &str,
        verb_name: &str,
        options: &JsonMap,
    ) -> Result<Value, RegistryError> {
        let entry = self.zones.get(zone).ok_or_else(|| RegistryError::UnknownZone {
            zone: zone.to_string(),
        })?;
        let Some(verb) = Verb::from_str_opt(verb_name) else {
            tracing::warn!(zone, verb = verb_name, "unknown verb");
            return Err(RegistryError::UnknownVerb {
                zone: zone.to_string(),
                verb: verb_name.to_string(),
            });
        };
        if !entry.adapter.supports(verb) {
            return Err(RegistryError::UnsupportedVerb {
                zone: zone.to_string(),
                verb,
            });
        }

        let correlation = self.correlation.fetch_add(1, Ordering::Relaxed);
        let ctx = AdapterContext {
            bus: Arc::clone(&self.bus),
            game_topics: self.game_topics.clone(),
            clock: Arc::clone(&self.clock),
            default_fade_ms: self.default_fade_ms,
            correlation,
        };
        tracing::debug!(zone, %verb, correlation, "executing verb");
        entry
            .adapter
            .execute(verb, options, &ctx)
            .await
            .map_err(|source| RegistryError::Execution {
                zone: zone.to_string(),
                verb,
                source,
            })
    }

    /// Whether `zone` exists and accepts `verb`.
    pub fn can_execute(&self, zone: &str, verb_name: &str) -> bool {
        let Some(entry) = self.zones.get(zone) else {
            return false;
        };
        Verb::from_str_opt(verb_name).is_some_and(|verb| entry.adapter.supports(verb))
    }

    pub fn zone_names(&self) -> Vec<String> {
        self.zones.keys().cloned().collect()
    }

    pub fn zones_by_type(&self, kind: ZoneKind) -> Vec<String> {
        self.zones
            .iter()
            .filter(|(_, e)| e.kind == kind)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// State topics to subscribe for adapter snapshots.
    pub fn state_topics(&self) -> Vec<String> {
        self.zones
            .values()
            .map(|e| e.adapter.topics().state())
            .collect()
    }

    /// Diagnostic topics (events + warnings) across all zones.
    pub fn event_topics(&self) -> Vec<String> {
        self.zones
            .values()
            .flat_map(|e| [e.adapter.topics().events(), e.adapter.topics().warnings()])
            .collect()
    }

    /// Route a retained state message to the owning adapter. Returns false
    /// when no zone claims the topic.
    pub fn observe_state(&self, topic: &str, value: &Value) -> bool {
        for entry in self.zones.values() {
            if entry.adapter.topics().state() == topic {
                entry.adapter.observe_state(value);
                return true;
            }
        }
        false
    }

    /// Latest retained snapshot for a zone.
    pub fn snapshot(&self, zone: &str) -> Option<Value> {
        self.zones.get(zone).and_then(|e| e.adapter.snapshot())
    }

    pub async fn cleanup_all(&self) {
        for entry in self.zones.values() {
            entry.adapter.cleanup().await;
        }
    }
}
