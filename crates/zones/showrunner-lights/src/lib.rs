//! Lighting controller adapter. One capability: scene selection, with
//! consecutive-duplicate suppression so repeated schedule entries don't spam
//! the fixture controller.

use std::sync::Mutex;

use serde_json::{Value, json};

use showrunner_core::adapter::{AdapterContext, AdapterError, JsonMap, ZoneAdapter, ZoneKind};
use showrunner_core::topics::ZoneTopics;
use showrunner_core::verb::Verb;

const CAPABILITIES: &[Verb] = &[Verb::SetColorScene];

pub struct LightsAdapter {
    topics: ZoneTopics,
    last_scene: Mutex<Option<String>>,
    state: Mutex<Option<Value>>,
}

impl LightsAdapter {
    pub fn new(base_topic: &str) -> Self {
        Self {
            topics: ZoneTopics::new(base_topic),
            last_scene: Mutex::new(None),
            state: Mutex::new(None),
        }
    }

    fn scene_name(options: &JsonMap) -> Option<String> {
        options
            .get("scene")
            .or_else(|| options.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

#[async_trait::async_trait]
impl ZoneAdapter for LightsAdapter {
    fn kind(&self) -> ZoneKind {
        ZoneKind::Lights
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
        if verb != Verb::SetColorScene {
            return Err(AdapterError::UnsupportedVerb { verb });
        }
        let scene = Self::scene_name(options).ok_or(AdapterError::InvalidOptions {
            verb,
            reason: "missing scene name".to_string(),
        })?;

        let duplicate = {
            let mut last = self.last_scene.lock().unwrap_or_else(|e| e.into_inner());
            if last.as_deref() == Some(scene.as_str()) {
                true
            } else {
                *last = Some(scene.clone());
                false
            }
        };
        if duplicate {
            tracing::debug!(%scene, "scene unchanged, skipping publish");
            return Ok(json!({ "scene": scene, "deduped": true }));
        }

        ctx.bus
            .publish(
                &self.topics.commands(),
                json!({ "command": Verb::SetColorScene.as_str(), "scene": scene }),
            )
            .await?;
        Ok(json!({ "scene": scene, "deduped": false }))
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
