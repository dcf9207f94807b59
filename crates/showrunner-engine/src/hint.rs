//! The hint subsystem: lookup against the mode's combined hint list, typed
//! dispatch, and the suppression set that squelches a scheduled duplicate
//! right after an early or manual fire.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::time::{Duration, Instant};

use showrunner_core::adapter::ZoneKind;
use showrunner_core::config::HintKind;
use showrunner_core::events::{EngineEvent, Warning};

use crate::ctx::{ExecCtx, SharedState};
use crate::sequence::{self, base_vars};

/// How long an early/manual fire suppresses a scheduled duplicate.
pub const SUPPRESSION_TTL: Duration = Duration::from_secs(2);

/// Where a hint fire originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintSource {
    Scheduled,
    Early,
    Manual,
    Sequence,
}

impl HintSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Early => "early",
            Self::Manual => "manual",
            Self::Sequence => "sequence",
        }
    }

    /// Sources that stamp the suppression set.
    pub fn suppresses(&self) -> bool {
        matches!(self, Self::Early | Self::Manual)
    }
}

/// One hint fire: by id, by ad-hoc text, or both (text overrides).
#[derive(Debug, Clone)]
pub struct HintRequest {
    pub id: Option<String>,
    pub text: Option<String>,
    pub source: HintSource,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum HintError {
    #[error("hint {0} not found")]
    Unknown(String),
    #[error("hint fire needs an id or text")]
    Empty,
}

/// Stamp `id` into the suppression set. First stamp wins: a stamp inside a
/// live window does not extend it.
pub fn stamp_suppression(shared: &SharedState, id: &str) {
    let mut map = shared.suppression.lock().unwrap_or_else(|e| e.into_inner());
    let now = Instant::now();
    let live = map
        .get(id)
        .is_some_and(|stamped| now.duration_since(*stamped) < SUPPRESSION_TTL);
    if !live {
        map.insert(id.to_string(), now);
    }
}

/// Whether `id` was stamped within the TTL.
pub fn is_suppressed(shared: &SharedState, id: &str) -> bool {
    let map = shared.suppression.lock().unwrap_or_else(|e| e.into_inner());
    map.get(id)
        .is_some_and(|stamped| Instant::now().duration_since(*stamped) < SUPPRESSION_TTL)
}

/// Purge expired suppression entries.
pub fn sweep_suppression(shared: &SharedState) {
    let mut map = shared.suppression.lock().unwrap_or_else(|e| e.into_inner());
    let now = Instant::now();
    map.retain(|_, stamped| now.duration_since(*stamped) < SUPPRESSION_TTL);
}

/// Fire a hint. Failures are reported to the caller but never fail the
/// enclosing phase; device traffic lands via the registry.
pub async fn fire_hint(ctx: &Arc<ExecCtx>, req: HintRequest) -> Result<(), HintError> {
    let mode = ctx.current_mode();
    let def = req
        .id
        .as_deref()
        .and_then(|id| ctx.def.find_hint(id, mode.as_deref()).cloned());

    if let Some(id) = &req.id
        && def.is_none()
        && req.text.is_none()
    {
        ctx.warn(Warning::new("unknown_hint", format!("no hint with id {id}")))
            .await;
        return Err(HintError::Unknown(id.clone()));
    }
    if req.id.is_none() && req.text.is_none() {
        return Err(HintError::Empty);
    }

    if req.source.suppresses()
        && let Some(id) = &req.id
    {
        stamp_suppression(&ctx.shared, id);
    }

    let kind = def.as_ref().map_or(HintKind::Text, |d| d.kind);
    match kind {
        HintKind::Text => {
            let text = req
                .text
                .clone()
                .or_else(|| def.as_ref().and_then(|d| d.text.clone()))
                .unwrap_or_default();
            let mut vars = base_vars(ctx);
            vars.insert("hintText".to_string(), text);
            if let Some(id) = &req.id {
                vars.insert("hintId".to_string(), id.clone());
            }
            if let Err(e) =
                sequence::run_sequence(Arc::clone(ctx), "hint-text-seq".to_string(), vars, Vec::new())
                    .await
            {
                tracing::warn!(error = %e, "hint text sequence failed");
            }
        },
        HintKind::Speech | HintKind::Audio => {
            if let Some(hint) = def.as_ref() {
                let verb = if kind == HintKind::Speech {
                    "playSpeech"
                } else {
                    "playAudioFX"
                };
                let zone = hint.zone.clone().unwrap_or_else(|| "audio".to_string());
                let mut options = serde_json::Map::new();
                if let Some(file) = &hint.file {
                    options.insert("file".to_string(), json!(file));
                }
                if let Err(e) = ctx.registry.execute(&zone, verb, &options).await {
                    tracing::warn!(error = %e, %zone, "hint playback failed");
                }
                publish_record(ctx, &req).await;
            }
        },
        HintKind::Video => {
            if let Some(hint) = def.as_ref() {
                let zone = hint.zone.clone().unwrap_or_else(|| "mirror".to_string());
                let mut options = serde_json::Map::new();
                if let Some(file) = &hint.file {
                    options.insert("file".to_string(), json!(file));
                }
                if let Err(e) = ctx.registry.execute(&zone, "playVideo", &options).await {
                    tracing::warn!(error = %e, %zone, "hint video failed");
                }
                publish_record(ctx, &req).await;
            }
        },
        HintKind::Action => {
            if let Some(hint) = def.as_ref() {
                let mut options = serde_json::Map::new();
                if let Some(text) = req.text.as_ref().or(hint.text.as_ref()) {
                    options.insert("text".to_string(), json!(text));
                }
                if let Some(duration) = hint.duration {
                    options.insert("duration".to_string(), json!(duration));
                }
                // An unzoned action lands on every clock zone.
                let zones = match &hint.zone {
                    Some(zone) => vec![zone.clone()],
                    None => ctx.registry.zones_by_type(ZoneKind::Clock),
                };
                for zone in &zones {
                    if let Err(e) = ctx.registry.execute(zone, "hint", &options).await {
                        tracing::warn!(error = %e, %zone, "hint action failed");
                    }
                }
                publish_record(ctx, &req).await;
            }
        },
    }

    ctx.emit(EngineEvent::HintFired {
        id: req.id.clone(),
        source: req.source.as_str().to_string(),
    })
    .await;
    Ok(())
}

/// Publish the `{id?, text?}` execution record on the hints topic. Text
/// hints publish through `hint-text-seq` instead.
async fn publish_record(ctx: &Arc<ExecCtx>, req: &HintRequest) {
    let mut record = serde_json::Map::new();
    if let Some(id) = &req.id {
        record.insert("id".to_string(), json!(id));
    }
    if let Some(text) = &req.text {
        record.insert("text".to_string(), json!(text));
    }
    if let Err(e) = ctx
        .bus
        .publish(&ctx.topics.hints(), Value::Object(record))
        .await
    {
        tracing::warn!(error = %e, "failed to publish hint record");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_support::{demo_ctx, demo_ctx_with_mode};

    #[tokio::test(start_paused = true)]
    async fn suppression_expires_after_ttl() {
        let (ctx, _bus, _rx) = demo_ctx();
        stamp_suppression(&ctx.shared, "box1");
        assert!(is_suppressed(&ctx.shared, "box1"));

        tokio::time::advance(Duration::from_millis(2_100)).await;
        assert!(!is_suppressed(&ctx.shared, "box1"));
    }

    #[tokio::test(start_paused = true)]
    async fn first_stamp_wins_within_window() {
        let (ctx, _bus, _rx) = demo_ctx();
        stamp_suppression(&ctx.shared, "box1");
        tokio::time::advance(Duration::from_millis(1_500)).await;
        // A second stamp inside the window must not extend it.
        stamp_suppression(&ctx.shared, "box1");
        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(!is_suppressed(&ctx.shared, "box1"));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_purges_expired_entries() {
        let (ctx, _bus, _rx) = demo_ctx();
        stamp_suppression(&ctx.shared, "old");
        tokio::time::advance(Duration::from_millis(2_500)).await;
        stamp_suppression(&ctx.shared, "fresh");
        sweep_suppression(&ctx.shared);

        let map = ctx.shared.suppression.lock().unwrap();
        assert!(!map.contains_key("old"));
        assert!(map.contains_key("fresh"));
    }

    #[tokio::test]
    async fn text_hint_runs_hint_text_seq() {
        let (ctx, bus, _rx) = demo_ctx_with_mode("hc-demo");
        fire_hint(
            &ctx,
            HintRequest {
                id: Some("box1".to_string()),
                text: None,
                source: HintSource::Manual,
            },
        )
        .await
        .unwrap();

        // The built-in hint-text-seq publishes the bound text.
        let records = bus.published_to("paradox/houdini/hints");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["text"], "check the box");
        assert!(is_suppressed(&ctx.shared, "box1"));
    }

    #[tokio::test]
    async fn text_override_replaces_definition_text() {
        let (ctx, bus, _rx) = demo_ctx_with_mode("hc-demo");
        fire_hint(
            &ctx,
            HintRequest {
                id: Some("box1".to_string()),
                text: Some("try the drawer".to_string()),
                source: HintSource::Sequence,
            },
        )
        .await
        .unwrap();

        let records = bus.published_to("paradox/houdini/hints");
        assert_eq!(records[0]["text"], "try the drawer");
        // Sequence-sourced fires do not stamp suppression.
        assert!(!is_suppressed(&ctx.shared, "box1"));
    }

    #[tokio::test]
    async fn audio_hint_plays_on_default_zone() {
        let (ctx, bus, _rx) = demo_ctx_with_mode("hc-demo");
        fire_hint(
            &ctx,
            HintRequest {
                id: Some("chime".to_string()),
                text: None,
                source: HintSource::Scheduled,
            },
        )
        .await
        .unwrap();

        let commands = bus.published_to("paradox/audio/commands");
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0]["command"], "playAudioFX");
        assert_eq!(commands[0]["file"], "chime.wav");
        // Non-text hints publish the execution record directly.
        assert_eq!(bus.published_to("paradox/houdini/hints").len(), 1);
    }

    #[tokio::test]
    async fn action_hint_defaults_to_clock_zones() {
        let (ctx, bus, _rx) = demo_ctx_with_mode("hc-demo");
        fire_hint(
            &ctx,
            HintRequest {
                id: Some("push".to_string()),
                text: None,
                source: HintSource::Manual,
            },
        )
        .await
        .unwrap();

        let commands = bus.published_to("paradox/clock/commands");
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0]["command"], "hint");

        let records = bus.published_to("paradox/houdini/hints");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["id"], "push");
    }

    #[tokio::test]
    async fn zoned_action_hint_carries_its_text() {
        let (ctx, bus, _rx) = demo_ctx_with_mode("hc-demo");
        fire_hint(
            &ctx,
            HintRequest {
                id: Some("maglock".to_string()),
                text: None,
                source: HintSource::Scheduled,
            },
        )
        .await
        .unwrap();

        let commands = bus.published_to("paradox/clock/commands");
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0]["command"], "hint");
        assert_eq!(commands[0]["text"], "release");
        assert_eq!(bus.published_to("paradox/houdini/hints").len(), 1);
    }

    #[tokio::test]
    async fn unknown_hint_warns_and_errors() {
        let (ctx, bus, _rx) = demo_ctx_with_mode("hc-demo");
        let err = fire_hint(
            &ctx,
            HintRequest {
                id: Some("nope".to_string()),
                text: None,
                source: HintSource::Manual,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HintError::Unknown(_)));

        let warnings = bus.published_to("paradox/houdini/warnings");
        assert_eq!(warnings[0]["warning"], "unknown_hint");
    }

    #[tokio::test]
    async fn ad_hoc_text_hint_is_permitted() {
        let (ctx, bus, _rx) = demo_ctx_with_mode("hc-demo");
        fire_hint(
            &ctx,
            HintRequest {
                id: None,
                text: Some("operator says hi".to_string()),
                source: HintSource::Manual,
            },
        )
        .await
        .unwrap();

        let records = bus.published_to("paradox/houdini/hints");
        assert_eq!(records[0]["text"], "operator says hi");
    }

    #[tokio::test]
    async fn empty_request_is_rejected() {
        let (ctx, _bus, _rx) = demo_ctx();
        let err = fire_hint(
            &ctx,
            HintRequest {
                id: None,
                text: None,
                source: HintSource::Manual,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HintError::Empty));
    }
}
