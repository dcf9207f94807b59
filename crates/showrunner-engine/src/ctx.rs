//! Shared engine state and the execution context handed to every dispatch
//! path. All mutable state is owned here; modules operate through an
//! `Arc<ExecCtx>` and never through module-level globals.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::Instant;

use showrunner_core::adapter::ClockReading;
use showrunner_core::bus::BusPublisher;
use showrunner_core::config::{GameDefinition, Outcome, Phase, ScheduleEntry};
use showrunner_core::events::{EngineEvent, Warning};
use showrunner_core::time::{now_millis, seconds_to_mmss};
use showrunner_core::topics::GameTopics;

use crate::registry::ZoneRegistry;

/// The engine-observable game state.
#[derive(Debug, Clone)]
pub struct GameState {
    pub phase: Phase,
    pub mode: Option<String>,
    /// Gameplay/intro countdown, seconds.
    pub remaining: u32,
    /// Closing-phase countdown, seconds.
    pub reset_remaining: u32,
    pub reset_timer_paused: bool,
    /// Phase to return to after `resume`.
    pub resume_phase: Option<Phase>,
    /// Seconds spent idle in `ready` since the last idle fire.
    pub idle_elapsed: u64,
    /// Domain events that suppress related scheduled hints.
    pub marked_actions: HashSet<String>,
}

impl Default for GameState {
    fn default() -> Self {
        Self {
            phase: Phase::Ready,
            mode: None,
            remaining: 0,
            reset_remaining: 0,
            reset_timer_paused: false,
            resume_phase: None,
            idle_elapsed: 0,
            marked_actions: HashSet::new(),
        }
    }
}

/// A phase-scoped schedule, registered at phase entry and freed on
/// transition.
#[derive(Debug, Clone)]
pub struct PhaseSchedule {
    pub phase: Phase,
    pub entries: Vec<ScheduleEntry>,
}

/// Internal signals back into the engine actor, from phase bodies and
/// fire-and-forget tasks.
#[derive(Debug)]
pub enum EngineSignal {
    /// A phase body finished; stale generations are ignored.
    PhaseBodyDone { phase: Phase, generation: u64 },
    TriggerEnd(Outcome),
    TransitionTo(Phase),
}

/// Mutable engine state shared across tasks. Lock order: one lock at a time,
/// never held across an await.
pub struct SharedState {
    pub game: Mutex<GameState>,
    pub schedules: Mutex<Vec<PhaseSchedule>>,
    pub suppression: Mutex<std::collections::HashMap<String, Instant>>,
    pub running_sequence: Mutex<Option<String>>,
    /// Bumped on every phase transition; stale phase bodies check it.
    pub generation: AtomicU64,
}

impl SharedState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            game: Mutex::new(GameState::default()),
            schedules: Mutex::new(Vec::new()),
            suppression: Mutex::new(std::collections::HashMap::new()),
            running_sequence: Mutex::new(None),
            generation: AtomicU64::new(0),
        })
    }

    pub fn game(&self) -> GameState {
        self.game.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn with_game<T>(&self, f: impl FnOnce(&mut GameState) -> T) -> T {
        let mut game = self.game.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut game)
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn clear_schedules(&self) {
        self.schedules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn register_schedule(&self, phase: Phase, entries: Vec<ScheduleEntry>) {
        self.schedules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(PhaseSchedule { phase, entries });
    }

    /// Entries registered under `phase` whose `at` equals `remaining`, in
    /// registration order.
    pub fn entries_at(&self, phase: Phase, remaining: u32) -> Vec<ScheduleEntry> {
        let schedules = self.schedules.lock().unwrap_or_else(|e| e.into_inner());
        schedules
            .iter()
            .filter(|s| s.phase == phase)
            .flat_map(|s| s.entries.iter())
            .filter(|e| e.at == remaining)
            .cloned()
            .collect()
    }
}

/// Everything a dispatch path needs: the definition, the wire, the zone
/// registry, shared state, and the signal channel back to the actor.
pub struct ExecCtx {
    pub def: Arc<GameDefinition>,
    pub topics: GameTopics,
    pub bus: Arc<dyn BusPublisher>,
    pub registry: Arc<ZoneRegistry>,
    pub shared: Arc<SharedState>,
    pub signals: mpsc::UnboundedSender<EngineSignal>,
}

impl ExecCtx {
    /// Publish a lifecycle event; failures are logged, never raised.
    pub async fn emit(&self, event: EngineEvent) {
        tracing::debug!(event = event.event_type(), "engine event");
        if let Err(e) = self.bus.publish(&self.topics.events(), event.envelope()).await {
            tracing::warn!(error = %e, "failed to publish event");
        }
    }

    /// Publish a warning and log it.
    pub async fn warn(&self, warning: Warning) {
        tracing::warn!(kind = %warning.warning, "{}", warning.message);
        if let Err(e) = self
            .bus
            .publish(&self.topics.warnings(), warning.payload())
            .await
        {
            tracing::warn!(error = %e, "failed to publish warning");
        }
    }

    pub fn current_mode(&self) -> Option<String> {
        self.shared.game().mode
    }

    /// The countdown the current phase displays.
    pub fn reading(&self) -> ClockReading {
        let game = self.shared.game();
        let remaining = if game.phase.is_closing() {
            game.reset_remaining
        } else {
            game.remaining
        };
        ClockReading {
            phase: game.phase.as_str().to_string(),
            remaining_secs: remaining,
        }
    }

    /// The `{gameState, timeLeft, gameType, currentGameMode}` state payload.
    pub fn state_payload(&self) -> Value {
        let reading = self.reading();
        let game = self.shared.game();
        json!({
            "gameState": game.phase.as_str(),
            "timeLeft": seconds_to_mmss(reading.remaining_secs),
            "gameType": self.def.game_type,
            "currentGameMode": game.mode,
        })
    }

    pub async fn publish_state(&self) {
        if let Err(e) = self
            .bus
            .publish(&self.topics.state(), self.state_payload())
            .await
        {
            tracing::warn!(error = %e, "failed to publish state");
        }
    }

    /// Retained `{mode, entries, hints, ts}` hints registry for the active
    /// mode.
    pub async fn publish_hints_registry(&self) {
        let mode = self.current_mode();
        let hints: Vec<_> = self.def.combined_hints(mode.as_deref());
        let payload = json!({
            "mode": mode,
            "entries": hints.len(),
            "hints": hints,
            "ts": now_millis(),
        });
        if let Err(e) = self
            .bus
            .publish_retained(&self.topics.hints_registry(), payload)
            .await
        {
            tracing::warn!(error = %e, "failed to publish hints registry");
        }
    }

    /// Retained config summary.
    pub async fn publish_config(&self) {
        if let Err(e) = self
            .bus
            .publish_retained(&self.topics.config(), self.def.config_summary())
            .await
        {
            tracing::warn!(error = %e, "failed to publish config");
        }
    }
}
