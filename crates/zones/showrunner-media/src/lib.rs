//! Media player adapter: playback, browser control, volume, host control,
//! and the polling verification verbs.

mod verify;

use std::sync::Mutex;

use serde_json::{Value, json};

use showrunner_core::adapter::{AdapterContext, AdapterError, JsonMap, ZoneAdapter, ZoneKind};
use showrunner_core::topics::ZoneTopics;
use showrunner_core::verb::Verb;

const CAPABILITIES: &[Verb] = &[
    Verb::PlayVideo,
    Verb::PlayBackground,
    Verb::PlayAudioFx,
    Verb::PlaySpeech,
    Verb::StopAll,
    Verb::StopBackground,
    Verb::StopSpeech,
    Verb::StopAudio,
    Verb::StopVideo,
    Verb::SetImage,
    Verb::SetVolume,
    Verb::EnableBrowser,
    Verb::DisableBrowser,
    Verb::ShowBrowser,
    Verb::HideBrowser,
    Verb::SleepBrowser,
    Verb::WakeBrowser,
    Verb::SetBrowserUrl,
    Verb::SetColor,
    Verb::SetColorScene,
    Verb::Shutdown,
    Verb::Reboot,
    Verb::Poweroff,
    Verb::Kill,
    Verb::Restart,
    Verb::RequestState,
    Verb::VerifyBrowser,
    Verb::VerifyImage,
];

pub struct MediaAdapter {
    topics: ZoneTopics,
    state: Mutex<Option<Value>>,
}

impl MediaAdapter {
    pub fn new(base_topic: &str) -> Self {
        Self {
            topics: ZoneTopics::new(base_topic),
            state: Mutex::new(None),
        }
    }

    /// Publish `{command, ...options}` on the zone's command topic.
    pub(crate) async fn send(
        &self,
        ctx: &AdapterContext,
        verb: Verb,
        options: JsonMap,
    ) -> Result<(), AdapterError> {
        let mut payload = options;
        payload.insert("command".to_string(), json!(verb.as_str()));
        ctx.bus
            .publish(&self.topics.commands(), Value::Object(payload))
            .await?;
        Ok(())
    }

    /// Absolute volume beats a relative adjustment when both are present.
    fn normalize_volume(options: &JsonMap) -> JsonMap {
        let mut options = options.clone();
        if options.contains_key("volume") {
            options.remove("volumeAdjust");
        }
        options
    }
}

#[async_trait::async_trait]
impl ZoneAdapter for MediaAdapter {
    fn kind(&self) -> ZoneKind {
        ZoneKind::Media
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

        match verb {
            Verb::VerifyBrowser => verify::verify_browser(self, ctx, options).await,
            Verb::VerifyImage => verify::verify_image(self, ctx, options).await,
            Verb::SetVolume => {
                let options = Self::normalize_volume(options);
                self.send(ctx, verb, options).await?;
                Ok(json!({ "sent": true }))
            },
            Verb::PlayBackground => {
                let mut options = options.clone();
                options
                    .entry("loop".to_string())
                    .or_insert(Value::Bool(true));
                self.send(ctx, verb, options).await?;
                Ok(json!({ "sent": true }))
            },
            _ => {
                self.send(ctx, verb, options.clone()).await?;
                Ok(json!({ "sent": true }))
            },
        }
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
