//! The sequence executor: namespace resolution, ordered and timeline
//! execution, `{{var}}` substitution, depth/cycle protection, and the
//! running-sequence token that keeps lifecycle sequences mutually exclusive.

use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::{Value, json};
use tokio::time::Duration;

use showrunner_core::events::{EngineEvent, Warning};
use showrunner_core::script::{AfterWait, SequenceBody, SequenceDef, Step, StepBody};
use showrunner_core::time::seconds_to_mmss;

use crate::classify::{NameKind, classify};
use crate::ctx::{ExecCtx, SharedState};
use crate::cue;
use crate::hint::{HintRequest, HintSource, fire_hint};

/// Substitution context carried down the call stack.
pub type VarMap = HashMap<String, String>;

/// Lifecycle sequences gated by the running-sequence token.
pub const EXCLUSIVE_SEQUENCES: &[&str] = &[
    "reset-sequence",
    "pause-sequence",
    "resume-sequence",
    "shutdown-sequence",
    "reboot-sequence",
    "halt-sequence",
    "machine-shutdown-sequence",
];

#[derive(Debug, Clone, thiserror::Error)]
pub enum SeqError {
    #[error("sequence {0} not found")]
    Missing(String),
    #[error("sequence cycle: {0} is already on the call stack")]
    Cycle(String),
    #[error("sequence {0} exceeded max call depth {1}")]
    DepthExceeded(String, usize),
    #[error("sequence {0} rejected: {1} is already running")]
    RejectedBusy(String, String),
    #[error("sequence {sequence} step {index} failed: {reason}")]
    StepFailed {
        sequence: String,
        index: usize,
        reason: String,
    },
}

/// The variables every sequence starts from.
pub fn base_vars(ctx: &Arc<ExecCtx>) -> VarMap {
    let reading = ctx.reading();
    let game = ctx.shared.game();
    let mut vars = VarMap::new();
    vars.insert("gameTopic".to_string(), ctx.topics.base().to_string());
    vars.insert("timeLeft".to_string(), seconds_to_mmss(reading.remaining_secs));
    if let Some(mode) = game.mode {
        vars.insert("mode".to_string(), mode);
    }
    vars
}

/// Replace `{{var}}` placeholders; unknown variables are left intact.
pub fn substitute(input: &str, vars: &VarMap) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                match vars.get(key) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[start..start + 2 + end + 2]),
                }
                rest = &rest[start + 2 + end + 2..];
            },
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            },
        }
    }
    out.push_str(rest);
    out
}

/// Substitute every string value in a JSON tree.
pub fn substitute_value(value: &Value, vars: &VarMap) -> Value {
    match value {
        Value::String(s) => Value::String(substitute(s, vars)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| substitute_value(v, vars)).collect())
        },
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_value(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn substitute_map(
    map: &serde_json::Map<String, Value>,
    vars: &VarMap,
) -> serde_json::Map<String, Value> {
    map.iter()
        .map(|(k, v)| (k.clone(), substitute_value(v, vars)))
        .collect()
}

/// Resolve and run a sequence by name, blocking the caller until it
/// finishes. The returned future is `'static` so fire-and-forget callers can
/// spawn it.
pub fn run_sequence(
    ctx: Arc<ExecCtx>,
    name: String,
    vars: VarMap,
    stack: Vec<String>,
) -> BoxFuture<'static, Result<(), SeqError>> {
    async move {
        let mode = ctx.current_mode();
        let resolved = ctx
            .def
            .resolve_sequence(&name, mode.as_deref())
            .map(|(resolved, def)| (resolved, def.clone()));
        let Some((resolved, def)) = resolved else {
            ctx.emit(EngineEvent::SequenceMissing { name: name.clone() }).await;
            ctx.warn(Warning::new(
                "sequence_missing",
                format!("no sequence named {name}"),
            ))
            .await;
            return Err(SeqError::Missing(name));
        };
        run_named(ctx, resolved, def, vars, stack).await
    }
    .boxed()
}

/// Run an already-resolved definition under `name` (also the entry point for
/// inline phase sequences).
pub async fn run_named(
    ctx: Arc<ExecCtx>,
    name: String,
    def: SequenceDef,
    vars: VarMap,
    mut stack: Vec<String>,
) -> Result<(), SeqError> {
    if stack.iter().any(|n| n == &name) {
        ctx.emit(EngineEvent::SequenceCycleDetected { name: name.clone() })
            .await;
        ctx.warn(Warning::new(
            "sequence_cycle",
            format!("{name} recursed into itself"),
        ))
        .await;
        return Err(SeqError::Cycle(name));
    }
    if stack.len() >= def.meta.max_depth {
        ctx.emit(EngineEvent::SequenceDepthExceeded {
            name: name.clone(),
            depth: stack.len(),
        })
        .await;
        return Err(SeqError::DepthExceeded(name, def.meta.max_depth));
    }
    stack.push(name.clone());

    let estimate = def.estimated_duration();
    let mut deadline = None;
    if let Some(declared) = def.meta.duration
        && (declared - estimate).abs() > 0.5
    {
        ctx.emit(EngineEvent::SequenceDurationMismatch {
            name: name.clone(),
            declared,
            estimated: estimate,
        })
        .await;
        ctx.warn(
            Warning::new(
                "sequence_duration_mismatch",
                format!("{name} declares {declared}s but steps run {estimate}s"),
            )
            .with("declared", json!(declared))
            .with("estimated", json!(estimate)),
        )
        .await;
        deadline = Some(declared.max(0.0));
    }

    ctx.emit(EngineEvent::SequenceStart { name: name.clone() }).await;

    let body = run_body(&ctx, &name, &def, &vars, &stack);
    let result = match deadline {
        Some(secs) => match tokio::time::timeout(Duration::from_secs_f64(secs), body).await {
            Ok(result) => result.map(|()| false),
            // Deadline elapsed: execution truncates at the declared length.
            Err(_) => Ok(true),
        },
        None => body.await.map(|()| false),
    };

    match result {
        Ok(truncated) => {
            ctx.emit(EngineEvent::SequenceComplete {
                name: name.clone(),
                truncated,
            })
            .await;
            Ok(())
        },
        Err(e) => {
            ctx.emit(EngineEvent::SequenceFailed {
                name: name.clone(),
                reason: e.to_string(),
            })
            .await;
            Err(e)
        },
    }
}

async fn run_body(
    ctx: &Arc<ExecCtx>,
    name: &str,
    def: &SequenceDef,
    vars: &VarMap,
    stack: &[String],
) -> Result<(), SeqError> {
    match &def.body {
        SequenceBody::Ordered(steps) => {
            for (index, step) in steps.iter().enumerate() {
                ctx.emit(EngineEvent::SequenceStepStart {
                    sequence: name.to_string(),
                    index,
                })
                .await;
                if let Some(log) = &step.log {
                    tracing::info!(sequence = %name, index, "{}", substitute(log, vars));
                }
                match run_step(ctx, step, vars, stack).await {
                    Ok(()) => {
                        ctx.emit(EngineEvent::SequenceStepComplete {
                            sequence: name.to_string(),
                            index,
                        })
                        .await;
                    },
                    Err(e) => {
                        ctx.emit(EngineEvent::SequenceStepFailed {
                            sequence: name.to_string(),
                            index,
                            reason: e.to_string(),
                        })
                        .await;
                        return Err(match e {
                            StepError::Propagate(inner) => inner,
                            StepError::Fatal(reason) => SeqError::StepFailed {
                                sequence: name.to_string(),
                                index,
                                reason,
                            },
                        });
                    },
                }
            }
            Ok(())
        },
        SequenceBody::Timeline { duration, entries } => {
            let mut ordered: Vec<_> = entries.iter().collect();
            ordered.sort_by(|a, b| b.at.cmp(&a.at));
            let mut elapsed = 0u32;
            for entry in ordered {
                let target = duration.saturating_sub(entry.at);
                if target > elapsed {
                    tokio::time::sleep(Duration::from_secs(u64::from(target - elapsed))).await;
                    elapsed = target;
                }
                cue::execute_action(ctx, &entry.action, vars).await;
            }
            Ok(())
        },
    }
}

enum StepError {
    /// Abort the containing sequence with this reason.
    Fatal(String),
    /// Surface a nested structural error (cycle, depth) to the caller as-is.
    Propagate(SeqError),
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepError::Fatal(reason) => write!(f, "{reason}"),
            StepError::Propagate(err) => write!(f, "{err}"),
        }
    }
}

async fn run_step(
    ctx: &Arc<ExecCtx>,
    step: &Step,
    vars: &VarMap,
    stack: &[String],
) -> Result<(), StepError> {
    match &step.body {
        StepBody::Wait(secs) => {
            tokio::time::sleep(Duration::from_secs_f64(secs.max(0.0))).await;
        },
        StepBody::Hint { id, text } => {
            let request = HintRequest {
                id: id.clone(),
                text: text.as_deref().map(|t| substitute(t, vars)),
                source: HintSource::Sequence,
            };
            if let Err(e) = fire_hint(ctx, request).await {
                tracing::warn!(error = %e, "hint step failed");
            }
        },
        StepBody::Fire(name) => {
            let name = substitute(name, vars);
            let ctx = Arc::clone(ctx);
            let vars = vars.clone();
            tokio::spawn(async move {
                fire_by_name(ctx, name, vars, HintSource::Sequence).await;
            });
        },
        StepBody::FireCue(name) => {
            let name = substitute(name, vars);
            cue::fire_cue_by_name(ctx, &name, vars).await;
        },
        StepBody::FireSeq(name) => {
            let name = substitute(name, vars);
            let nested = run_sequence(
                Arc::clone(ctx),
                name.clone(),
                vars.clone(),
                stack.to_vec(),
            )
            .await;
            match nested {
                Ok(()) => {},
                // A dangling reference warns at fire time but does not abort.
                Err(SeqError::Missing(_)) => {},
                Err(e @ (SeqError::Cycle(_) | SeqError::DepthExceeded(..))) => {
                    return Err(StepError::Propagate(e));
                },
                Err(e) => return Err(StepError::Fatal(e.to_string())),
            }
        },
        StepBody::Command {
            zones,
            verb,
            options,
        } => {
            let options = cue::normalize_options(&substitute_map(options, vars));
            for zone in zones {
                if let Err(e) = ctx.registry.execute(zone, verb, &options).await {
                    ctx.warn(
                        Warning::new("zone_command_failed", e.to_string())
                            .with("zone", json!(zone))
                            .with("verb", json!(verb)),
                    )
                    .await;
                }
            }
        },
        StepBody::Publish(spec) => {
            let topic = substitute(&spec.topic, vars);
            let payload = substitute_value(&spec.payload, vars);
            if let Err(e) = ctx.bus.publish(&topic, payload).await {
                tracing::warn!(error = %e, %topic, "publish step failed");
            }
        },
        StepBody::VerifyBrowser { zones, spec } => {
            let mut options = serde_json::Map::new();
            options.insert("url".to_string(), json!(substitute(&spec.url, vars)));
            options.insert("visible".to_string(), json!(spec.visible));
            if let Some(timeout) = spec.timeout {
                options.insert("timeout".to_string(), json!(timeout));
            }
            for zone in zones {
                match ctx.registry.execute(zone, "verifyBrowser", &options).await {
                    Ok(report) if report["success"] == json!(true) => {},
                    Ok(report) => {
                        ctx.warn(
                            Warning::new(
                                "browser_verification_failed",
                                format!("browser on {zone} did not reach {}", spec.url),
                            )
                            .with("zone", json!(zone))
                            .with("report", report),
                        )
                        .await;
                        return Err(StepError::Fatal(format!(
                            "browser verification failed on {zone}"
                        )));
                    },
                    Err(e) => {
                        return Err(StepError::Fatal(e.to_string()));
                    },
                }
            }
        },
        StepBody::VerifyImage { zones, spec } => {
            let mut options = serde_json::Map::new();
            options.insert("file".to_string(), json!(substitute(&spec.file, vars)));
            if let Some(timeout) = spec.timeout {
                options.insert("timeout".to_string(), json!(timeout));
            }
            for zone in zones {
                match ctx.registry.execute(zone, "verifyImage", &options).await {
                    Ok(report) if report["success"] == json!(true) => {},
                    Ok(_) => {
                        // The adapter already warned on its zone topic; image
                        // mismatches do not abort the sequence.
                        ctx.warn(
                            Warning::new(
                                "media_verification_error",
                                format!("image {} not confirmed on {zone}", spec.file),
                            )
                            .with("zone", json!(zone)),
                        )
                        .await;
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, %zone, "image verification errored");
                    },
                }
            }
        },
    }

    match step.after_wait {
        Some(AfterWait::Secs(secs)) => {
            tokio::time::sleep(Duration::from_secs_f64(secs.max(0.0))).await;
        },
        Some(AfterWait::OwnDuration) => {
            if let Some(secs) = step.duration {
                tokio::time::sleep(Duration::from_secs_f64(secs.max(0.0))).await;
            }
        },
        None => {},
    }
    Ok(())
}

/// The unified `fire` path: classify the name, then delegate. Hint-via-fire
/// is deprecated and warns.
pub async fn fire_by_name(ctx: Arc<ExecCtx>, name: String, vars: VarMap, hint_source: HintSource) {
    let mode = ctx.current_mode();
    match classify(&ctx.def, mode.as_deref(), &name) {
        Some(NameKind::Hint) => {
            ctx.warn(Warning::new(
                "deprecated_fire_hint",
                format!("firing hint {name} via `fire`; use `hint` or `play-hint`"),
            ))
            .await;
            let request = HintRequest {
                id: Some(name),
                text: None,
                source: hint_source,
            };
            if let Err(e) = fire_hint(&ctx, request).await {
                tracing::warn!(error = %e, "fired hint failed");
            }
        },
        Some(NameKind::Cue) => {
            cue::fire_cue_by_name(&ctx, &name, &vars).await;
        },
        Some(NameKind::Sequence) => {
            if let Err(e) = run_sequence(Arc::clone(&ctx), name, vars, Vec::new()).await {
                tracing::warn!(error = %e, "fired sequence failed");
            }
        },
        None => {
            ctx.warn(Warning::new(
                "unknown_fire_target",
                format!("{name} is not a hint, cue, or sequence"),
            ))
            .await;
        },
    }
}

struct RunningGuard {
    shared: Arc<SharedState>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        let mut token = self
            .shared
            .running_sequence
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *token = None;
    }
}

/// Run a lifecycle sequence under the running-sequence token. A second
/// exclusive call while one is in flight is rejected busy.
pub async fn run_exclusive(ctx: Arc<ExecCtx>, name: String) -> Result<(), SeqError> {
    let guard = {
        let mut token = ctx
            .shared
            .running_sequence
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        match token.as_ref() {
            Some(running) => Err(running.clone()),
            None => {
                *token = Some(name.clone());
                Ok(RunningGuard {
                    shared: Arc::clone(&ctx.shared),
                })
            },
        }
    };
    let _guard = match guard {
        Ok(guard) => guard,
        Err(running) => {
            ctx.emit(EngineEvent::SequenceRejectedBusy {
                name: name.clone(),
                running: running.clone(),
            })
            .await;
            return Err(SeqError::RejectedBusy(name, running));
        },
    };
    let vars = base_vars(&ctx);
    run_sequence(ctx, name, vars, Vec::new()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_support::{demo_ctx, demo_ctx_with_mode, event_names};

    #[test]
    fn substitution_replaces_known_vars() {
        let mut vars = VarMap::new();
        vars.insert("hintText".to_string(), "look up".to_string());
        assert_eq!(substitute("say: {{hintText}}!", &vars), "say: look up!");
        assert_eq!(substitute("{{ hintText }}", &vars), "look up");
        assert_eq!(substitute("{{unknown}} stays", &vars), "{{unknown}} stays");
        assert_eq!(substitute("no vars", &vars), "no vars");
    }

    #[test]
    fn substitution_descends_into_json() {
        let mut vars = VarMap::new();
        vars.insert("mode".to_string(), "hc-demo".to_string());
        let value = json!({"a": "{{mode}}", "b": [{"c": "{{mode}}-x"}], "n": 3});
        let out = substitute_value(&value, &vars);
        assert_eq!(out["a"], "hc-demo");
        assert_eq!(out["b"][0]["c"], "hc-demo-x");
        assert_eq!(out["n"], 3);
    }

    #[tokio::test(start_paused = true)]
    async fn ordered_steps_run_in_order_with_waits() {
        let (ctx, bus, _rx) = demo_ctx();
        let started = tokio::time::Instant::now();
        run_sequence(Arc::clone(&ctx), "two-step".to_string(), VarMap::new(), Vec::new())
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_secs(2));
        let records = bus.published();
        let wire: Vec<&str> = records
            .iter()
            .filter(|r| r.topic.ends_with("/commands"))
            .map(|r| r.topic.as_str())
            .collect();
        assert_eq!(wire, vec!["paradox/lights/commands", "paradox/mirror/commands"]);
    }

    #[tokio::test]
    async fn missing_sequence_reports_and_errors() {
        let (ctx, bus, _rx) = demo_ctx();
        let err = run_sequence(ctx, "nothing-here".to_string(), VarMap::new(), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SeqError::Missing(_)));
        assert!(
            event_names(&bus, "paradox/houdini").contains(&"sequence_missing".to_string())
        );
    }

    #[tokio::test]
    async fn self_recursion_is_a_cycle() {
        let (ctx, bus, _rx) = demo_ctx();
        let err = run_sequence(ctx, "self-loop".to_string(), VarMap::new(), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SeqError::Cycle(_)));

        // No device traffic leaks out of a refused call.
        assert!(
            bus.published()
                .iter()
                .all(|r| !r.topic.ends_with("/commands"))
        );
        assert!(
            event_names(&bus, "paradox/houdini")
                .contains(&"sequence_cycle_detected".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn nesting_past_max_depth_fails() {
        let (ctx, bus, _rx) = demo_ctx();
        // nest-1 → nest-2 → nest-3 → two-step exceeds the default cap of 3.
        let err = run_sequence(ctx, "nest-1".to_string(), VarMap::new(), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SeqError::DepthExceeded(..)));
        assert!(
            event_names(&bus, "paradox/houdini")
                .contains(&"sequence_depth_exceeded".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn duration_mismatch_truncates_at_declared_length() {
        let (ctx, bus, _rx) = demo_ctx();
        let started = tokio::time::Instant::now();
        // Steps run 4s but meta declares 1s; execution stops at 1s.
        run_sequence(Arc::clone(&ctx), "mismatched".to_string(), VarMap::new(), Vec::new())
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));

        let names = event_names(&bus, "paradox/houdini");
        assert!(names.contains(&"sequence_duration_mismatch".to_string()));
        assert!(names.contains(&"sequence_complete".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn timeline_sequence_fires_in_descending_at_order() {
        let (ctx, bus, _rx) = demo_ctx();
        run_sequence(Arc::clone(&ctx), "ten-line".to_string(), VarMap::new(), Vec::new())
            .await
            .unwrap();

        let records = bus.published();
        let relevant: Vec<&str> = records
            .iter()
            .filter(|r| r.topic.ends_with("/commands") || r.topic == "t/A")
            .map(|r| r.topic.as_str())
            .collect();
        assert_eq!(
            relevant,
            vec!["paradox/mirror/commands", "t/A", "paradox/lights/commands"]
        );
        // The raw string payload passes through unwrapped.
        assert_eq!(bus.published_to("t/A")[0], json!("A"));
    }

    #[tokio::test]
    async fn exclusive_token_rejects_second_caller() {
        let (ctx, _bus, _rx) = demo_ctx();
        {
            let mut token = ctx.shared.running_sequence.lock().unwrap();
            *token = Some("reset-sequence".to_string());
        }
        let err = run_exclusive(Arc::clone(&ctx), "pause-sequence".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, SeqError::RejectedBusy(..)));
    }

    #[tokio::test(start_paused = true)]
    async fn exclusive_token_clears_after_completion() {
        let (ctx, _bus, _rx) = demo_ctx();
        // two-step is not a lifecycle sequence, but the token mechanics are
        // the same.
        run_exclusive(Arc::clone(&ctx), "two-step".to_string())
            .await
            .unwrap();
        assert!(ctx.shared.running_sequence.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn fire_by_name_warns_on_hint_path() {
        let (ctx, bus, _rx) = demo_ctx_with_mode("hc-demo");
        fire_by_name(
            Arc::clone(&ctx),
            "box1".to_string(),
            VarMap::new(),
            HintSource::Scheduled,
        )
        .await;

        let warnings = bus.published_to("paradox/houdini/warnings");
        assert!(
            warnings
                .iter()
                .any(|w| w["warning"] == "deprecated_fire_hint")
        );
        assert!(event_names(&bus, "paradox/houdini").contains(&"hint_fired".to_string()));
    }

    #[tokio::test]
    async fn fire_by_name_unknown_warns() {
        let (ctx, bus, _rx) = demo_ctx();
        fire_by_name(
            Arc::clone(&ctx),
            "mystery".to_string(),
            VarMap::new(),
            HintSource::Scheduled,
        )
        .await;
        let warnings = bus.published_to("paradox/houdini/warnings");
        assert!(warnings.iter().any(|w| w["warning"] == "unknown_fire_target"));
    }
}
