//! Countdown clock adapter. Time arguments omitted by the caller are derived
//! from the engine's clock provider; with UI mirroring enabled every action
//! is also published on the game's clock topic.

use std::sync::Mutex;

use serde_json::{Value, json};

use showrunner_core::adapter::{AdapterContext, AdapterError, JsonMap, ZoneAdapter, ZoneKind};
use showrunner_core::topics::ZoneTopics;
use showrunner_core::verb::Verb;

const CAPABILITIES: &[Verb] = &[
    Verb::Start,
    Verb::Pause,
    Verb::Resume,
    Verb::FadeIn,
    Verb::FadeOut,
    Verb::SetTime,
    Verb::Hint,
];

pub struct ClockAdapter {
    topics: ZoneTopics,
    mirror_ui: bool,
    state: Mutex<Option<Value>>,
}

impl ClockAdapter {
    pub fn new(base_topic: &str, mirror_ui: bool) -> Self {
        Self {
            topics: ZoneTopics::new(base_topic),
            mirror_ui,
            state: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl ZoneAdapter for ClockAdapter {
    fn kind(&self) -> ZoneKind {
        ZoneKind::Clock
    }

    fn capabilities(&self) -> &'static [Verb] {
        CAPABILITIES
    }

    fn topics(&self) -> &ZoneTopics {
        &self.topics
    }

    async fn execute(
        &self,
        verb: Verb,
        options: &JsonMap,
        ctx: &AdapterContext,
    ) -> Result<Value, AdapterError> {
        if !self.supports(verb) {
            return Err(AdapterError::UnsupportedVerb { verb });
        }

        let mut payload = serde_json::Map::new();
        payload.insert("command".to_string(), json!(verb.as_str()));

        match verb {
            Verb::Start | Verb::SetTime => {
                let time = options
                    .get("time")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| (ctx.clock)().mmss());
                payload.insert("time".to_string(), json!(time));
            },
            Verb::FadeIn | Verb::FadeOut => {
                let duration = options
                    .get("duration")
                    .and_then(Value::as_u64)
                    .unwrap_or(ctx.default_fade_ms);
                payload.insert("duration".to_string(), json!(duration));
            },
            Verb::Hint => {
                if let Some(text) = options.get("text") {
                    payload.insert("text".to_string(), text.clone());
                }
                if let Some(duration) = options.get("duration") {
                    payload.insert("duration".to_string(), duration.clone());
                }
            },
            _ => {},
        }

        let payload = Value::Object(payload);
        ctx.bus.publish(&self.topics.commands(), payload.clone()).await?;
        if self.mirror_ui {
            ctx.bus
                .publish(&ctx.game_topics.clock_mirror(), payload.clone())
                .await?;
        }
        Ok(payload)
    }

    fn observe_state(&self, value: &Value) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = Some(value.clone());
    }

    fn snapshot(&self) -> Option<Value> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
