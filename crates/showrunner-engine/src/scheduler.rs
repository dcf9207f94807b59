//! The unified 1 Hz tick: one cadence drives the gameplay countdown, the
//! closing-phase reset countdown, phase-scoped schedule firing, and the idle
//! attract loop.

use std::sync::Arc;

use showrunner_core::config::{Phase, ScheduleAction, ScheduleEntry};
use showrunner_core::events::EngineEvent;

use crate::ctx::ExecCtx;
use crate::cue;
use crate::hint::{self, HintRequest, HintSource};
use crate::phase;
use crate::sequence::{self, base_vars};

/// One tick. Called at 1 Hz by the engine actor while it runs.
pub async fn tick(ctx: &Arc<ExecCtx>) {
    let (phase_now, countdown, idle_due) = ctx.shared.with_game(|game| match game.phase {
        Phase::Intro | Phase::Gameplay => {
            game.remaining = game.remaining.saturating_sub(1);
            (game.phase, Some(game.remaining), false)
        },
        Phase::Solved | Phase::Failed => {
            if game.reset_timer_paused {
                (game.phase, None, false)
            } else {
                game.reset_remaining = game.reset_remaining.saturating_sub(1);
                (game.phase, Some(game.reset_remaining), false)
            }
        },
        Phase::Ready => {
            let mut due = false;
            if ctx.def.idle.enabled {
                game.idle_elapsed += 1;
                if game.idle_elapsed >= ctx.def.idle.interval_secs {
                    game.idle_elapsed = 0;
                    due = true;
                }
            }
            (game.phase, None, due)
        },
        // Paused and the remaining phases neither count down nor fire.
        _ => (game.phase, None, false),
    });

    let Some(remaining) = countdown else {
        if idle_due {
            let idle_ctx = Arc::clone(ctx);
            let name = ctx.def.idle.sequence.clone();
            tokio::spawn(async move {
                let vars = base_vars(&idle_ctx);
                if let Err(e) = sequence::run_sequence(idle_ctx, name, vars, Vec::new()).await {
                    tracing::warn!(error = %e, "idle sequence failed");
                }
            });
        }
        return;
    };

    ctx.publish_state().await;

    let entries = ctx.shared.entries_at(phase_now, remaining);
    for entry in entries {
        fire_entry(ctx, entry, phase_now.is_closing()).await;
    }

    if phase_now == Phase::Gameplay && remaining == 0 {
        phase::trigger_end(ctx, showrunner_core::config::Outcome::Fail).await;
    } else if phase_now.is_closing() && remaining == 0 {
        phase::spawn_reset_flow(ctx);
    }
}

/// Fire one schedule entry. Everything except end triggers is
/// fire-and-forget; hint entries honor the suppression set and marked
/// actions unless the closing phases bypass them.
pub async fn fire_entry(ctx: &Arc<ExecCtx>, entry: ScheduleEntry, bypass_suppression: bool) {
    if let Some(log) = &entry.log {
        tracing::info!(at = entry.at, "{log}");
    }
    match entry.action {
        ScheduleAction::Fire(name) => {
            let ctx = Arc::clone(ctx);
            tokio::spawn(async move {
                let vars = base_vars(&ctx);
                sequence::fire_by_name(ctx, name, vars, HintSource::Scheduled).await;
            });
        },
        ScheduleAction::FireCue(name) => {
            let vars = base_vars(ctx);
            cue::fire_cue_by_name(ctx, &name, &vars).await;
        },
        ScheduleAction::FireSeq(name) => {
            let ctx = Arc::clone(ctx);
            tokio::spawn(async move {
                let vars = base_vars(&ctx);
                if let Err(e) = sequence::run_sequence(ctx, name, vars, Vec::new()).await {
                    tracing::warn!(error = %e, "scheduled sequence failed");
                }
            });
        },
        ScheduleAction::Hint { id, text } => {
            fire_scheduled_hint(ctx, id, text, bypass_suppression).await;
        },
        ScheduleAction::PlayHint(id) => {
            fire_scheduled_hint(ctx, id, None, bypass_suppression).await;
        },
        ScheduleAction::ZoneCommand {
            zones,
            verb,
            options,
        } => {
            let ctx = Arc::clone(ctx);
            tokio::spawn(async move {
                let options = cue::normalize_options(&options);
                for zone in &zones {
                    if let Err(e) = ctx.registry.execute(zone, &verb, &options).await {
                        tracing::warn!(error = %e, %zone, %verb, "scheduled command failed");
                    }
                }
            });
        },
        ScheduleAction::End(outcome) => {
            phase::trigger_end(ctx, outcome).await;
        },
    }
}

async fn fire_scheduled_hint(
    ctx: &Arc<ExecCtx>,
    id: String,
    text: Option<String>,
    bypass_suppression: bool,
) {
    let marked = ctx.shared.game().marked_actions.contains(&id);
    if marked || (!bypass_suppression && hint::is_suppressed(&ctx.shared, &id)) {
        ctx.emit(EngineEvent::HintSuppressed { id }).await;
        return;
    }
    let ctx = Arc::clone(ctx);
    tokio::spawn(async move {
        let request = HintRequest {
            id: Some(id),
            text,
            source: HintSource::Scheduled,
        };
        if let Err(e) = hint::fire_hint(&ctx, request).await {
            tracing::warn!(error = %e, "scheduled hint failed");
        }
    });
}
