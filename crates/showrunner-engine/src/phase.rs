//! The phase engine: mode start, transitions, phase bodies, and end
//! triggering. Transitions clear every phase-scoped schedule before the new
//! phase begins; in-flight sequences are never preempted, their completions
//! are simply ignored via the generation counter.

use std::sync::Arc;

use tokio::time::Duration;

use showrunner_core::config::{ModeConfig, Outcome, Phase, PhaseConfig, ScheduleEntry, SequenceRef};
use showrunner_core::events::{EngineEvent, Warning};

use crate::ctx::{EngineSignal, ExecCtx};
use crate::scheduler;
use crate::sequence::{self, SeqError, base_vars};

/// Start a mode from the external `ready` phase.
pub async fn start_mode(ctx: &Arc<ExecCtx>, mode_id: &str) -> bool {
    let phase = ctx.shared.game().phase;
    if phase != Phase::Ready {
        ctx.warn(Warning::new(
            "invalid_command",
            format!("start ignored while {phase}"),
        ))
        .await;
        return false;
    }
    if !ctx.def.modes.contains_key(mode_id) {
        ctx.warn(Warning::new(
            "unknown_mode",
            format!("no mode named {mode_id}"),
        ))
        .await;
        return false;
    }
    ctx.shared.with_game(|game| {
        game.mode = Some(mode_id.to_string());
        game.marked_actions.clear();
    });
    ctx.publish_hints_registry().await;
    transition(ctx, Phase::Intro).await;
    true
}

fn mode_config<'a>(ctx: &'a ExecCtx, mode: Option<&str>) -> Option<&'a ModeConfig> {
    mode.and_then(|m| ctx.def.mode(m))
}

/// Effective phase duration: explicit `duration` > `seconds` > sequence
/// estimate > 0.
fn phase_duration(ctx: &ExecCtx, cfg: Option<&PhaseConfig>, mode: Option<&str>) -> u32 {
    let Some(cfg) = cfg else { return 0 };
    if let Some(duration) = cfg.explicit_duration() {
        return duration;
    }
    match &cfg.sequence {
        Some(SequenceRef::Inline(def)) => def.estimated_duration().ceil() as u32,
        Some(SequenceRef::Name(name)) => ctx
            .def
            .resolve_sequence(name, mode)
            .map(|(_, def)| def.estimated_duration().ceil() as u32)
            .unwrap_or(0),
        None => 0,
    }
}

/// Transition to `to`: clear schedules, set countdowns, publish, then spawn
/// the phase body.
///
/// Returns a boxed future (rather than being declared `async fn`) because
/// this function re-enters itself through the scheduler and end entries;
/// naming the return type breaks that recursive-opaque-type cycle for the
/// `Send` check.
pub fn transition<'a>(
    ctx: &'a Arc<ExecCtx>,
    to: Phase,
) -> futures::future::BoxFuture<'a, ()> {
    Box::pin(async move {
        let generation = ctx.shared.bump_generation();
        ctx.shared.clear_schedules();

        let mode = ctx.current_mode();
        let cfg = mode_config(ctx, mode.as_deref())
            .and_then(|m| m.phases.get(&to))
            .cloned();
        let duration = phase_duration(ctx, cfg.as_ref(), mode.as_deref());

        let from = ctx.shared.with_game(|game| {
            let from = game.phase;
            game.phase = to;
            match to {
                Phase::Intro | Phase::Gameplay => game.remaining = duration,
                Phase::Solved | Phase::Failed => {
                    game.reset_remaining = duration;
                    game.reset_timer_paused = false;
                },
                Phase::Ready => {
                    game.idle_elapsed = 0;
                    game.resume_phase = None;
                },
                _ => {},
            }
            from
        });

        ctx.publish_state().await;
        ctx.emit(EngineEvent::PhaseTransition {
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
            duration,
        })
        .await;

        // Boxed: the body re-enters the scheduler and, through end entries,
        // this function; erasing the future type here keeps the call graph
        // finite.
        let body: futures::future::BoxFuture<'static, ()> =
            Box::pin(run_phase_body(Arc::clone(ctx), to, cfg, duration, generation));
        tokio::spawn(body);
    })
}

/// Execute one phase: await its sequence fully, register its schedule, and
/// for duration-driven phases sleep out the countdown. Completion is
/// reported back to the actor, which applies post-conditions unless a newer
/// transition superseded this body.
async fn run_phase_body(
    ctx: Arc<ExecCtx>,
    phase: Phase,
    cfg: Option<PhaseConfig>,
    duration: u32,
    generation: u64,
) {
    if let Some(cfg) = &cfg {
        if let Some(seq) = &cfg.sequence {
            let vars = base_vars(&ctx);
            let result = match seq {
                SequenceRef::Name(name) => {
                    sequence::run_sequence(Arc::clone(&ctx), name.clone(), vars, Vec::new()).await
                },
                SequenceRef::Inline(def) => {
                    sequence::run_named(
                        Arc::clone(&ctx),
                        format!("{}-phase-sequence", phase.as_str()),
                        def.clone(),
                        vars,
                        Vec::new(),
                    )
                    .await
                },
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, %phase, "phase sequence failed");
            }
        }

        if ctx.shared.current_generation() != generation {
            return;
        }
        if !cfg.schedule.is_empty() {
            register_phase_schedule(&ctx, phase, cfg.schedule.clone()).await;
        }

        // Gameplay and the closing phases are tick-driven; elsewhere a bare
        // duration (or a schedule) plays out here.
        let countdown_here = duration > 0
            && phase != Phase::Gameplay
            && !phase.is_closing()
            && (!cfg.schedule.is_empty() || cfg.sequence.is_none());
        if countdown_here {
            tokio::time::sleep(Duration::from_secs(u64::from(duration))).await;
        }
    }

    if ctx.shared.current_generation() != generation {
        return;
    }
    let _ = ctx.signals.send(EngineSignal::PhaseBodyDone { phase, generation });
}

/// Register a phase's schedule. Entries anchored at the current remaining
/// time fire synchronously with registration; everything else waits for the
/// tick.
pub async fn register_phase_schedule(
    ctx: &Arc<ExecCtx>,
    phase: Phase,
    entries: Vec<ScheduleEntry>,
) {
    let remaining = {
        let game = ctx.shared.game();
        if phase.is_closing() {
            game.reset_remaining
        } else {
            game.remaining
        }
    };
    for entry in entries.iter().filter(|e| e.at == remaining) {
        scheduler::fire_entry(ctx, entry.clone(), phase.is_closing()).await;
    }
    ctx.shared.register_schedule(phase, entries);
}

/// Post-conditions applied when a phase body completes.
pub async fn handle_phase_done(ctx: &Arc<ExecCtx>, phase: Phase, generation: u64) {
    if ctx.shared.current_generation() != generation {
        return;
    }
    match phase {
        Phase::Intro => transition(ctx, Phase::Gameplay).await,
        Phase::Reset => transition(ctx, Phase::Ready).await,
        _ => {},
    }
}

/// Route a win/fail end trigger to its closing phase. Duplicate triggers in
/// a closing phase are ignored.
pub async fn trigger_end(ctx: &Arc<ExecCtx>, outcome: Outcome) {
    let phase = ctx.shared.game().phase;
    if phase.is_closing() || matches!(phase, Phase::Reset | Phase::Resetting | Phase::Ready) {
        tracing::debug!(outcome = outcome.as_str(), %phase, "end trigger ignored");
        return;
    }
    ctx.emit(EngineEvent::GameEndTrigger {
        outcome: outcome.as_str().to_string(),
    })
    .await;
    transition(ctx, outcome.closing_phase()).await;
}

/// Leave a closing (or any) phase toward ready: through the mode's `reset`
/// phase when one is defined, otherwise through the reset sequence.
pub fn spawn_reset_flow(ctx: &Arc<ExecCtx>) {
    let mode = ctx.current_mode();
    let has_reset_phase = mode_config(ctx, mode.as_deref())
        .is_some_and(|m| m.phases.contains_key(&Phase::Reset));
    if has_reset_phase {
        let _ = ctx.signals.send(EngineSignal::TransitionTo(Phase::Reset));
        return;
    }
    let ctx = Arc::clone(ctx);
    tokio::spawn(async move {
        match sequence::run_exclusive(Arc::clone(&ctx), "reset-sequence".to_string()).await {
            Ok(()) => {},
            Err(SeqError::Missing(_)) => {
                tracing::debug!("no reset sequence defined");
            },
            Err(e) => {
                tracing::warn!(error = %e, "reset sequence failed");
            },
        }
        let _ = ctx.signals.send(EngineSignal::TransitionTo(Phase::Ready));
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    use showrunner_core::config::GameDefinition;

    use crate::test_support::{ctx_for, demo_ctx, demo_ctx_with_mode, event_names};

    #[tokio::test]
    async fn start_requires_ready_phase() {
        let (ctx, bus, _rx) = demo_ctx();
        ctx.shared.with_game(|g| g.phase = Phase::Gameplay);
        assert!(!start_mode(&ctx, "hc-demo").await);
        assert!(
            bus.published_to("paradox/houdini/warnings")
                .iter()
                .any(|w| w["warning"] == "invalid_command")
        );
    }

    #[tokio::test]
    async fn start_rejects_unknown_mode() {
        let (ctx, bus, _rx) = demo_ctx();
        assert!(!start_mode(&ctx, "missing-mode").await);
        assert!(
            bus.published_to("paradox/houdini/warnings")
                .iter()
                .any(|w| w["warning"] == "unknown_mode")
        );
    }

    #[tokio::test]
    async fn start_enters_intro_and_publishes_registry() {
        let (ctx, bus, _rx) = demo_ctx();
        assert!(start_mode(&ctx, "hc-demo").await);

        assert_eq!(ctx.shared.game().phase, Phase::Intro);
        let registry = bus.published_to("paradox/houdini/hints/registry");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry[0]["mode"], "hc-demo");
        assert!(registry[0]["entries"].as_u64().unwrap() >= 4);
        assert!(
            event_names(&bus, "paradox/houdini").contains(&"phase_transition".to_string())
        );
    }

    #[tokio::test]
    async fn transition_sets_gameplay_countdown() {
        let (ctx, bus, _rx) = demo_ctx_with_mode("hc-demo");
        transition(&ctx, Phase::Gameplay).await;

        let game = ctx.shared.game();
        assert_eq!(game.phase, Phase::Gameplay);
        assert_eq!(game.remaining, 7);

        let states = bus.published_to("paradox/houdini/state");
        assert_eq!(states[0]["gameState"], "gameplay");
        assert_eq!(states[0]["timeLeft"], "00:07");
        assert_eq!(states[0]["currentGameMode"], "hc-demo");
    }

    #[tokio::test]
    async fn transition_clears_previous_schedules() {
        let (ctx, _bus, _rx) = demo_ctx_with_mode("hc-demo");
        ctx.shared.register_schedule(
            Phase::Gameplay,
            vec![serde_json::from_value(serde_json::json!({"at": 5, "play-hint": "box1"})).unwrap()],
        );
        transition(&ctx, Phase::Failed).await;
        assert!(ctx.shared.entries_at(Phase::Gameplay, 5).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn gameplay_schedule_registers_after_transition() {
        let (ctx, _bus, _rx) = demo_ctx_with_mode("hc-demo");
        transition(&ctx, Phase::Gameplay).await;
        // Let the spawned phase body run.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(ctx.shared.entries_at(Phase::Gameplay, 5).len(), 1);
    }

    #[tokio::test]
    async fn end_trigger_routes_to_closing_phase() {
        let (ctx, bus, _rx) = demo_ctx_with_mode("hc-demo");
        ctx.shared.with_game(|g| g.phase = Phase::Gameplay);
        trigger_end(&ctx, Outcome::Win).await;
        assert_eq!(ctx.shared.game().phase, Phase::Solved);

        let names = event_names(&bus, "paradox/houdini");
        assert!(names.contains(&"game_end_trigger".to_string()));
    }

    #[tokio::test]
    async fn duplicate_end_trigger_is_ignored() {
        let (ctx, bus, _rx) = demo_ctx_with_mode("hc-demo");
        ctx.shared.with_game(|g| g.phase = Phase::Gameplay);
        trigger_end(&ctx, Outcome::Fail).await;
        trigger_end(&ctx, Outcome::Win).await;

        assert_eq!(ctx.shared.game().phase, Phase::Failed);
        let triggers = event_names(&bus, "paradox/houdini")
            .into_iter()
            .filter(|n| n == "game_end_trigger")
            .count();
        assert_eq!(triggers, 1);
    }

    #[tokio::test]
    async fn stale_phase_body_does_not_transition() {
        let (ctx, _bus, _rx) = demo_ctx_with_mode("hc-demo");
        ctx.shared.with_game(|g| g.phase = Phase::Intro);
        let stale = ctx.shared.current_generation();
        ctx.shared.bump_generation();
        handle_phase_done(&ctx, Phase::Intro, stale).await;
        assert_eq!(ctx.shared.game().phase, Phase::Intro);
    }

    #[tokio::test]
    async fn intro_completion_enters_gameplay() {
        let (ctx, _bus, _rx) = demo_ctx_with_mode("hc-demo");
        transition(&ctx, Phase::Intro).await;
        let generation = ctx.shared.current_generation();
        handle_phase_done(&ctx, Phase::Intro, generation).await;
        assert_eq!(ctx.shared.game().phase, Phase::Gameplay);
        assert_eq!(ctx.shared.game().remaining, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_flow_without_reset_phase_settles_ready() {
        let (ctx, _bus, mut rx) = demo_ctx_with_mode("hc-demo");
        ctx.shared.with_game(|g| g.phase = Phase::Failed);
        spawn_reset_flow(&ctx);

        let signal = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("reset flow signals")
            .expect("channel open");
        assert!(matches!(signal, EngineSignal::TransitionTo(Phase::Ready)));
    }

    #[tokio::test]
    async fn reset_flow_prefers_reset_phase() {
        let def = GameDefinition::from_json_str(
            r#"{
                "game-topic": "g",
                "zones": {},
                "modes": {
                    "m": {
                        "phases": {
                            "reset": {"duration": 2}
                        }
                    }
                }
            }"#,
        )
        .unwrap();
        let (ctx, _bus, mut rx) = ctx_for(def);
        ctx.shared.with_game(|g| {
            g.mode = Some("m".to_string());
            g.phase = Phase::Solved;
        });
        spawn_reset_flow(&ctx);
        let signal = rx.recv().await.unwrap();
        assert!(matches!(signal, EngineSignal::TransitionTo(Phase::Reset)));
    }

    #[tokio::test]
    async fn sequence_estimate_backs_phase_duration() {
        let def = GameDefinition::from_json_str(
            r#"{
                "game-topic": "g",
                "zones": {},
                "modes": {
                    "m": {
                        "phases": {
                            "intro": {"sequence": "warmup"}
                        }
                    }
                },
                "sequences": {"warmup": [{"wait": 4}]}
            }"#,
        )
        .unwrap();
        let (ctx, _bus, _rx) = ctx_for(def);
        ctx.shared.with_game(|g| g.mode = Some("m".to_string()));
        transition(&ctx, Phase::Intro).await;
        assert_eq!(ctx.shared.game().remaining, 4);
    }
}
