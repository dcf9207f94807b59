//! The cue dispatcher: fire-and-forget bundles resolved per-mode → global →
//! legacy actions, classified by shape at load and executed here.

use std::sync::Arc;

#[cfg(test)]
use serde_json::Value;
use serde_json::json;
use tokio::time::Duration;

use showrunner_core::adapter::JsonMap;
use showrunner_core::events::{EngineEvent, Warning};
use showrunner_core::script::{Action, ActionKind, CueDef};

use crate::ctx::ExecCtx;
use crate::sequence::{VarMap, substitute, substitute_value};

/// Fold config shorthand into wire options: `mm`/`ss` become one `MM:SS`
/// `time` argument, `ms`/`seconds` become a millisecond `duration`.
pub fn normalize_options(options: &JsonMap) -> JsonMap {
    let mut out = options.clone();
    let mm = out.remove("mm").and_then(|v| v.as_u64());
    let ss = out.remove("ss").and_then(|v| v.as_u64());
    if mm.is_some() || ss.is_some() {
        let time = format!("{:02}:{:02}", mm.unwrap_or(0), ss.unwrap_or(0));
        out.entry("time".to_string()).or_insert(json!(time));
    }
    if let Some(ms) = out.remove("ms").and_then(|v| v.as_u64()) {
        out.entry("duration".to_string()).or_insert(json!(ms));
    }
    if let Some(secs) = out.remove("seconds").and_then(|v| v.as_f64()) {
        out.entry("duration".to_string())
            .or_insert(json!((secs * 1000.0).round() as u64));
    }
    out
}

/// Resolve a cue and dispatch it without blocking the caller. Execution
/// errors land on the events and warnings topics.
pub async fn fire_cue_by_name(ctx: &Arc<ExecCtx>, name: &str, vars: &VarMap) {
    let mode = ctx.current_mode();
    let Some(cue) = ctx.def.resolve_cue(name, mode.as_deref()).cloned() else {
        ctx.emit(EngineEvent::CueMissing {
            name: name.to_string(),
        })
        .await;
        ctx.warn(Warning::new("cue_missing", format!("no cue named {name}")))
            .await;
        return;
    };
    ctx.emit(EngineEvent::CueFired {
        name: name.to_string(),
    })
    .await;

    let ctx = Arc::clone(ctx);
    let name = name.to_string();
    let vars = vars.clone();
    tokio::spawn(async move {
        run_cue(ctx, name, cue, vars).await;
    });
}

/// Execute one cue to completion (list elements await each other; timeline
/// frames are scheduled relative to dispatch).
pub async fn run_cue(ctx: Arc<ExecCtx>, name: String, cue: CueDef, vars: VarMap) {
    match cue {
        CueDef::Single(action) => {
            execute_action(&ctx, &action, &vars).await;
        },
        CueDef::List(actions) => {
            for action in &actions {
                execute_action(&ctx, action, &vars).await;
            }
        },
        CueDef::Legacy(actions) => {
            ctx.warn(Warning::new(
                "deprecated_cue_form",
                format!("cue {name} uses a legacy commands/actions list"),
            ))
            .await;
            for action in &actions {
                execute_action(&ctx, action, &vars).await;
            }
        },
        CueDef::Timeline { duration, frames } => {
            run_timeline(ctx, name, duration, frames, vars).await;
        },
    }
}

async fn run_timeline(
    ctx: Arc<ExecCtx>,
    name: String,
    duration: u32,
    frames: Vec<showrunner_core::script::CueFrame>,
    vars: VarMap,
) {
    if duration == 0 {
        ctx.warn(Warning::new(
            "invalid_cue",
            format!("timeline cue {name} needs a positive duration"),
        ))
        .await;
        return;
    }
    let mut valid = Vec::new();
    for frame in frames {
        if frame.at > duration {
            ctx.warn(
                Warning::new(
                    "invalid_cue",
                    format!("timeline cue {name} has at={} beyond duration {duration}", frame.at),
                )
                .with("at", json!(frame.at)),
            )
            .await;
            continue;
        }
        valid.push(frame);
    }
    if !valid.iter().any(|f| f.at == duration) {
        tracing::warn!(cue = %name, "timeline has no at-start frame");
    }
    if !valid.iter().any(|f| f.at == 0) {
        tracing::warn!(cue = %name, "timeline has no at-end frame");
    }

    valid.sort_by(|a, b| b.at.cmp(&a.at));
    for frame in valid {
        let delay = duration - frame.at;
        if delay == 0 {
            // At-start frames fire synchronously with dispatch.
            for action in &frame.actions {
                execute_action(&ctx, action, &vars).await;
            }
        } else {
            let ctx = Arc::clone(&ctx);
            let vars = vars.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(u64::from(delay))).await;
                for action in &frame.actions {
                    execute_action(&ctx, action, &vars).await;
                }
            });
        }
    }
}

/// Execute one action record, fanning out across its zones. Per-zone
/// failures are logged and warned, never raised.
pub async fn execute_action(ctx: &Arc<ExecCtx>, action: &Action, vars: &VarMap) {
    match &action.kind {
        ActionKind::Publish(spec) => {
            let topic = substitute(&spec.topic, vars);
            let payload = substitute_value(&spec.payload, vars);
            if let Err(e) = ctx.bus.publish(&topic, payload).await {
                tracing::warn!(error = %e, %topic, "cue publish failed");
            }
            return;
        },
        _ => {},
    }

    let (verb, options) = match &action.kind {
        ActionKind::Play(spec) => match spec.verb_and_options() {
            Ok((verb, mut options)) => {
                for (key, value) in normalize_options(&substitute_map(&action.options, vars)) {
                    options.insert(key, value);
                }
                (verb.as_str().to_string(), options)
            },
            Err(e) => {
                ctx.warn(Warning::new("invalid_cue", e.to_string())).await;
                return;
            },
        },
        ActionKind::Command(verb) => (
            verb.clone(),
            normalize_options(&substitute_map(&action.options, vars)),
        ),
        ActionKind::Scene(scene) => {
            let mut options = normalize_options(&substitute_map(&action.options, vars));
            options.insert("scene".to_string(), json!(substitute(scene, vars)));
            ("setColorScene".to_string(), options)
        },
        ActionKind::Publish(_) => unreachable!("handled above"),
    };

    if action.zones.is_empty() {
        ctx.warn(
            Warning::new("invalid_cue", format!("{verb} action has no zone target"))
                .with("verb", json!(verb)),
        )
        .await;
        return;
    }
    for zone in &action.zones {
        if let Err(e) = ctx.registry.execute(zone, &verb, &options).await {
            ctx.warn(
                Warning::new("zone_command_failed", e.to_string())
                    .with("zone", json!(zone))
                    .with("verb", json!(verb.clone())),
            )
            .await;
        }
    }
}

fn substitute_map(map: &JsonMap, vars: &VarMap) -> JsonMap {
    map.iter()
        .map(|(k, v)| (k.clone(), substitute_value(v, vars)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use showrunner_core::config::GameDefinition;

    use crate::test_support::{ctx_for, demo_ctx, event_names};

    #[test]
    fn mm_ss_fold_to_time() {
        let mut options = JsonMap::new();
        options.insert("mm".to_string(), json!(2));
        options.insert("ss".to_string(), json!(5));
        let out = normalize_options(&options);
        assert_eq!(out["time"], "02:05");
        assert!(out.get("mm").is_none());
        assert!(out.get("ss").is_none());
    }

    #[test]
    fn ms_and_seconds_fold_to_duration() {
        let mut options = JsonMap::new();
        options.insert("ms".to_string(), json!(1500));
        assert_eq!(normalize_options(&options)["duration"], 1500);

        let mut options = JsonMap::new();
        options.insert("seconds".to_string(), json!(2));
        assert_eq!(normalize_options(&options)["duration"], 2000);
    }

    #[test]
    fn explicit_duration_is_not_overridden() {
        let mut options = JsonMap::new();
        options.insert("duration".to_string(), json!(900));
        options.insert("ms".to_string(), json!(1500));
        assert_eq!(normalize_options(&options)["duration"], 900);
    }

    #[tokio::test]
    async fn list_cue_executes_in_order() {
        let (ctx, bus, _rx) = demo_ctx();
        let cue = ctx.def.resolve_cue("fanfare", None).unwrap().clone();
        run_cue(ctx, "fanfare".to_string(), cue, VarMap::new()).await;

        let wire: Vec<(String, Value)> = bus
            .published()
            .into_iter()
            .filter(|r| r.topic.ends_with("/commands"))
            .map(|r| (r.topic, r.payload))
            .collect();
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0].0, "paradox/lights/commands");
        assert_eq!(wire[0].1["command"], "setColorScene");
        assert_eq!(wire[0].1["scene"], "red");
        assert_eq!(wire[1].0, "paradox/mirror/commands");
        assert_eq!(wire[1].1["command"], "playVideo");
        assert_eq!(wire[1].1["file"], "a.mp4");
    }

    #[tokio::test(start_paused = true)]
    async fn timeline_cue_schedules_countdown_frames() {
        let (ctx, bus, _rx) = demo_ctx();
        let cue = ctx.def.resolve_cue("countdown", None).unwrap().clone();
        run_cue(Arc::clone(&ctx), "countdown".to_string(), cue, VarMap::new()).await;

        // The at-start frame fired synchronously with dispatch.
        assert_eq!(bus.published_to("paradox/mirror/commands").len(), 1);
        assert!(bus.published_to("t/A").is_empty());

        tokio::time::sleep(Duration::from_millis(3_100)).await;
        assert_eq!(bus.published_to("t/A"), vec![json!("A")]);
        assert!(bus.published_to("paradox/lights/commands").is_empty());

        tokio::time::sleep(Duration::from_secs(7)).await;
        let lights = bus.published_to("paradox/lights/commands");
        assert_eq!(lights.len(), 1);
        assert_eq!(lights[0]["scene"], "green");
    }

    #[tokio::test]
    async fn legacy_cue_warns_and_still_runs() {
        let (ctx, bus, _rx) = demo_ctx();
        let cue = ctx.def.resolve_cue("old-style", None).unwrap().clone();
        run_cue(Arc::clone(&ctx), "old-style".to_string(), cue, VarMap::new()).await;

        let warnings = bus.published_to("paradox/houdini/warnings");
        assert!(warnings.iter().any(|w| w["warning"] == "deprecated_cue_form"));
        assert_eq!(
            bus.published_to("paradox/lights/commands")[0]["scene"],
            "amber"
        );
    }

    #[tokio::test]
    async fn unknown_cue_emits_missing() {
        let (ctx, bus, _rx) = demo_ctx();
        fire_cue_by_name(&ctx, "no-such-cue", &VarMap::new()).await;
        assert!(event_names(&bus, "paradox/houdini").contains(&"cue_missing".to_string()));
    }

    #[tokio::test]
    async fn zero_duration_timeline_is_rejected() {
        let def = GameDefinition::from_json_str(
            r#"{
                "game-topic": "g",
                "zones": {"lights": {"type": "lights", "base-topic": "z/lights"}},
                "cues": {
                    "bad": {"duration": 0, "timeline": [
                        {"at": 0, "actions": [{"zone": "lights", "scene": "x"}]}
                    ]}
                }
            }"#,
        )
        .unwrap();
        let (ctx, bus, _rx) = ctx_for(def);
        let cue = ctx.def.resolve_cue("bad", None).unwrap().clone();
        run_cue(Arc::clone(&ctx), "bad".to_string(), cue, VarMap::new()).await;

        assert!(
            bus.published_to("g/warnings")
                .iter()
                .any(|w| w["warning"] == "invalid_cue")
        );
        assert!(bus.published_to("z/lights/commands").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_frames_are_skipped() {
        let def = GameDefinition::from_json_str(
            r#"{
                "game-topic": "g",
                "zones": {"lights": {"type": "lights", "base-topic": "z/lights"}},
                "cues": {
                    "partial": {"duration": 2, "timeline": [
                        {"at": 9, "actions": [{"zone": "lights", "scene": "never"}]},
                        {"at": 2, "actions": [{"zone": "lights", "scene": "now"}]}
                    ]}
                }
            }"#,
        )
        .unwrap();
        let (ctx, bus, _rx) = ctx_for(def);
        let cue = ctx.def.resolve_cue("partial", None).unwrap().clone();
        run_cue(Arc::clone(&ctx), "partial".to_string(), cue, VarMap::new()).await;
        tokio::time::sleep(Duration::from_secs(3)).await;

        let published = bus.published_to("z/lights/commands");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0]["scene"], "now");
    }
}
