//! The engine actor: one task owning the 1 Hz tick, the operator command
//! channel, and internal signals, plus the heartbeat that republishes state.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use showrunner_core::adapter::{ClockProvider, ClockReading};
use showrunner_core::bus::BusPublisher;
use showrunner_core::config::GameDefinition;
use showrunner_core::topics::GameTopics;

use crate::command;
use crate::ctx::{EngineSignal, ExecCtx, SharedState};
use crate::phase;
use crate::registry::{RegistryError, ZoneRegistry};
use crate::scheduler;

/// Build the execution context: shared state, the clock provider derived
/// from it, the zone registry, and the signal channel.
pub fn build_ctx(
    def: Arc<GameDefinition>,
    bus: Arc<dyn BusPublisher>,
) -> Result<(Arc<ExecCtx>, mpsc::UnboundedReceiver<EngineSignal>), RegistryError> {
    let shared = SharedState::new();

    let clock_shared = Arc::clone(&shared);
    let clock: ClockProvider = Arc::new(move || {
        let game = clock_shared.game();
        let remaining = if game.phase.is_closing() {
            game.reset_remaining
        } else {
            game.remaining
        };
        ClockReading {
            phase: game.phase.as_str().to_string(),
            remaining_secs: remaining,
        }
    });

    let registry = Arc::new(ZoneRegistry::new(Arc::clone(&bus), &def, clock)?);
    let (signal_tx, signal_rx) = mpsc::unbounded_channel();

    let ctx = Arc::new(ExecCtx {
        topics: GameTopics::new(&def.game_topic),
        def,
        bus,
        registry,
        shared,
        signals: signal_tx,
    });
    Ok((ctx, signal_rx))
}

/// A constructed engine, ready to spawn.
pub struct Engine {
    ctx: Arc<ExecCtx>,
    signals: mpsc::UnboundedReceiver<EngineSignal>,
}

/// Handle to a running engine.
pub struct EngineHandle {
    pub ctx: Arc<ExecCtx>,
    /// Operator command payloads (decoded from the command topic).
    pub commands: mpsc::UnboundedSender<Value>,
    pub cancel: CancellationToken,
    pub task: JoinHandle<()>,
    pub heartbeat: JoinHandle<()>,
}

impl Engine {
    pub fn new(
        def: Arc<GameDefinition>,
        bus: Arc<dyn BusPublisher>,
    ) -> Result<Self, RegistryError> {
        let (ctx, signals) = build_ctx(def, bus)?;
        Ok(Self { ctx, signals })
    }

    pub fn ctx(&self) -> &Arc<ExecCtx> {
        &self.ctx
    }

    /// Spawn the actor and heartbeat. The engine publishes its retained
    /// config and initial state on the way up.
    pub fn spawn(self) -> EngineHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let ctx = Arc::clone(&self.ctx);
        let task = tokio::spawn(run_actor(
            Arc::clone(&ctx),
            cmd_rx,
            self.signals,
            cancel.clone(),
        ));
        let heartbeat = tokio::spawn(run_heartbeat(Arc::clone(&ctx), cancel.clone()));

        EngineHandle {
            ctx,
            commands: cmd_tx,
            cancel,
            task,
            heartbeat,
        }
    }
}

async fn run_actor(
    ctx: Arc<ExecCtx>,
    mut cmd_rx: mpsc::UnboundedReceiver<Value>,
    mut signals: mpsc::UnboundedReceiver<EngineSignal>,
    cancel: CancellationToken,
) {
    ctx.publish_config().await;
    ctx.publish_hints_registry().await;
    ctx.publish_state().await;

    let mut interval = tokio::time::interval_at(
        Instant::now() + Duration::from_secs(1),
        Duration::from_secs(1),
    );
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                scheduler::tick(&ctx).await;
            },
            payload = cmd_rx.recv() => {
                match payload {
                    Some(payload) => command::handle_command(&ctx, payload).await,
                    None => break,
                }
            },
            signal = signals.recv() => {
                match signal {
                    Some(EngineSignal::PhaseBodyDone { phase, generation }) => {
                        phase::handle_phase_done(&ctx, phase, generation).await;
                    },
                    Some(EngineSignal::TriggerEnd(outcome)) => {
                        phase::trigger_end(&ctx, outcome).await;
                    },
                    Some(EngineSignal::TransitionTo(to)) => {
                        phase::transition(&ctx, to).await;
                    },
                    None => break,
                }
            },
        }
    }

    ctx.registry.cleanup_all().await;
    tracing::info!("engine stopped");
}

/// Republish state at the configured heartbeat and sweep expired hint
/// suppressions.
async fn run_heartbeat(ctx: Arc<ExecCtx>, cancel: CancellationToken) {
    let period = Duration::from_millis(ctx.def.effective_heartbeat_ms());
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                ctx.publish_state().await;
                crate::hint::sweep_suppression(&ctx.shared);
            },
        }
    }
}
