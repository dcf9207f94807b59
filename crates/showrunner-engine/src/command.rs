//! The operator command surface: JSON `{command, ...}` payloads from the
//! game's command topic, parsed into typed commands and executed against the
//! engine.

use std::sync::Arc;

use serde_json::{Value, json};

use showrunner_core::adapter::ZoneKind;
use showrunner_core::config::{Outcome, Phase};
use showrunner_core::events::{EngineEvent, Warning};

use crate::ctx::ExecCtx;
use crate::hint::{HintRequest, HintSource, fire_hint};
use crate::phase;
use crate::sequence::{self, SeqError, base_vars};

/// A validated operator command.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    Reset,
    Start { mode: Option<String> },
    Solve,
    Fail,
    Pause,
    Resume,
    Shutdown,
    Reboot,
    Halt,
    MachineShutdown,
    Sleep,
    Wake,
    Resetting,
    AdjustTime { seconds: i64 },
    PlayHint { id: String },
    SendHint { text: String, duration: Option<f64> },
    MarkAction { action: String },
    PauseResetTimer,
    ResumeResetTimer,
    GetState,
    StopAll,
    ListModes,
    SetGameMode { mode: String },
    DebugLog { message: String, tag: Option<String> },
    ListHints,
    GetConfig,
}

impl OperatorCommand {
    /// The wire name echoed in command events.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Reset => "reset",
            Self::Start { .. } => "start",
            Self::Solve => "solve",
            Self::Fail => "fail",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Shutdown => "shutdown",
            Self::Reboot => "reboot",
            Self::Halt => "halt",
            Self::MachineShutdown => "machineShutdown",
            Self::Sleep => "sleep",
            Self::Wake => "wake",
            Self::Resetting => "resetting",
            Self::AdjustTime { .. } => "adjustTime",
            Self::PlayHint { .. } => "playHint",
            Self::SendHint { .. } => "sendHint",
            Self::MarkAction { .. } => "markAction",
            Self::PauseResetTimer => "pauseResetTimer",
            Self::ResumeResetTimer => "resumeResetTimer",
            Self::GetState => "getState",
            Self::StopAll => "stopAll",
            Self::ListModes => "listModes",
            Self::SetGameMode { .. } => "setGameMode",
            Self::DebugLog { .. } => "debugLog",
            Self::ListHints => "listHints",
            Self::GetConfig => "getConfig",
        }
    }
}

/// Why a payload was rejected.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CommandError {
    #[error("payload is not valid JSON")]
    Malformed,
    #[error("invalid command payload: {0}")]
    Invalid(String),
    #[error("unknown command: {0}")]
    Unknown(String),
}

impl CommandError {
    fn warning_kind(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed_command",
            Self::Invalid(_) => "invalid_command",
            Self::Unknown(_) => "unknown_command",
        }
    }
}

fn str_field(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| obj.get(*k))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Parse a command payload. Raw strings (JSON that failed to decode at the
/// bus) are malformed; non-objects and missing fields are invalid; anything
/// unrecognized is unknown.
pub fn parse_command(payload: &Value) -> Result<OperatorCommand, CommandError> {
    let obj = match payload {
        Value::Object(obj) => obj,
        Value::String(_) => return Err(CommandError::Malformed),
        _ => return Err(CommandError::Invalid("payload must be an object".to_string())),
    };
    let Some(name) = obj.get("command").and_then(Value::as_str) else {
        return Err(CommandError::Invalid("missing command field".to_string()));
    };

    if let Some(mode) = name.strip_prefix("start:") {
        if mode.is_empty() {
            return Err(CommandError::Invalid("start: needs a mode".to_string()));
        }
        return Ok(OperatorCommand::Start {
            mode: Some(mode.to_string()),
        });
    }

    let command = match name {
        "reset" => OperatorCommand::Reset,
        "start" => OperatorCommand::Start {
            mode: str_field(obj, &["mode"]),
        },
        "startMode" => OperatorCommand::Start {
            mode: Some(
                str_field(obj, &["mode"])
                    .ok_or_else(|| CommandError::Invalid("startMode needs a mode".to_string()))?,
            ),
        },
        "solve" | "win" => OperatorCommand::Solve,
        "fail" => OperatorCommand::Fail,
        "pause" => OperatorCommand::Pause,
        "resume" => OperatorCommand::Resume,
        "shutdown" => OperatorCommand::Shutdown,
        "reboot" => OperatorCommand::Reboot,
        "halt" => OperatorCommand::Halt,
        "machineShutdown" => OperatorCommand::MachineShutdown,
        "sleep" => OperatorCommand::Sleep,
        "wake" => OperatorCommand::Wake,
        "resetting" => OperatorCommand::Resetting,
        "adjustTime" => OperatorCommand::AdjustTime {
            seconds: obj
                .get("seconds")
                .and_then(Value::as_i64)
                .ok_or_else(|| CommandError::Invalid("adjustTime needs seconds".to_string()))?,
        },
        "playHint" => OperatorCommand::PlayHint {
            id: str_field(obj, &["id", "hintId", "hint"])
                .ok_or_else(|| CommandError::Invalid("playHint needs an id".to_string()))?,
        },
        "executeHint" => OperatorCommand::PlayHint {
            id: str_field(obj, &["id", "hintId", "hint"])
                .ok_or_else(|| CommandError::Invalid("executeHint needs an id".to_string()))?,
        },
        "sendHint" => OperatorCommand::SendHint {
            text: str_field(obj, &["text"])
                .ok_or_else(|| CommandError::Invalid("sendHint needs text".to_string()))?,
            duration: obj.get("duration").and_then(Value::as_f64),
        },
        "markAction" => OperatorCommand::MarkAction {
            action: str_field(obj, &["action"])
                .ok_or_else(|| CommandError::Invalid("markAction needs an action".to_string()))?,
        },
        "pauseResetTimer" => OperatorCommand::PauseResetTimer,
        "resumeResetTimer" => OperatorCommand::ResumeResetTimer,
        "getState" => OperatorCommand::GetState,
        "stopAll" => OperatorCommand::StopAll,
        "listModes" => OperatorCommand::ListModes,
        "setGameMode" => OperatorCommand::SetGameMode {
            mode: str_field(obj, &["mode"])
                .ok_or_else(|| CommandError::Invalid("setGameMode needs a mode".to_string()))?,
        },
        "debugLog" => OperatorCommand::DebugLog {
            message: str_field(obj, &["message"])
                .ok_or_else(|| CommandError::Invalid("debugLog needs a message".to_string()))?,
            tag: str_field(obj, &["tag"]),
        },
        "listHints" | "getHints" | "hints" => OperatorCommand::ListHints,
        "getConfig" | "config" => OperatorCommand::GetConfig,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(command)
}

/// Parse and execute one command payload; validation failures produce a
/// `command_validation_failed` event plus a warning and change no state.
pub async fn handle_command(ctx: &Arc<ExecCtx>, payload: Value) {
    let command = match parse_command(&payload) {
        Ok(command) => command,
        Err(e) => {
            ctx.emit(EngineEvent::CommandValidationFailed {
                reason: e.to_string(),
            })
            .await;
            ctx.warn(Warning::new(e.warning_kind(), e.to_string())).await;
            return;
        },
    };

    ctx.emit(EngineEvent::CommandReceived {
        command: command.name().to_string(),
    })
    .await;
    let name = command.name();
    let data = execute(ctx, command).await;
    ctx.emit(EngineEvent::CommandCompleted {
        command: name.to_string(),
        data,
    })
    .await;
}

fn spawn_lifecycle_sequence(ctx: &Arc<ExecCtx>, name: &str) {
    let ctx = Arc::clone(ctx);
    let name = name.to_string();
    tokio::spawn(async move {
        match sequence::run_exclusive(ctx, name.clone()).await {
            Ok(()) | Err(SeqError::Missing(_)) => {},
            Err(e) => tracing::warn!(error = %e, sequence = %name, "lifecycle sequence failed"),
        }
    });
}

fn spawn_plain_sequence(ctx: &Arc<ExecCtx>, name: &str) {
    let ctx = Arc::clone(ctx);
    let name = name.to_string();
    tokio::spawn(async move {
        let vars = base_vars(&ctx);
        match sequence::run_sequence(Arc::clone(&ctx), name.clone(), vars, Vec::new()).await {
            Ok(()) | Err(SeqError::Missing(_)) => {},
            Err(e) => tracing::warn!(error = %e, sequence = %name, "sequence failed"),
        }
    });
}

async fn execute(ctx: &Arc<ExecCtx>, command: OperatorCommand) -> Option<Value> {
    match command {
        OperatorCommand::Reset => {
            phase::spawn_reset_flow(ctx);
        },
        OperatorCommand::Start { mode } => {
            let mode = mode
                .or_else(|| ctx.current_mode())
                .or_else(|| {
                    // A single-mode game can start without naming it.
                    let mut modes = ctx.def.modes.keys();
                    match (modes.next(), modes.next()) {
                        (Some(only), None) => Some(only.clone()),
                        _ => None,
                    }
                });
            match mode {
                Some(mode) => {
                    phase::start_mode(ctx, &mode).await;
                },
                None => {
                    ctx.warn(Warning::new(
                        "invalid_command",
                        "start needs a mode and none is selected",
                    ))
                    .await;
                },
            }
        },
        OperatorCommand::Solve => phase::trigger_end(ctx, Outcome::Win).await,
        OperatorCommand::Fail => phase::trigger_end(ctx, Outcome::Fail).await,
        OperatorCommand::Pause => {
            let paused = ctx.shared.with_game(|game| {
                if matches!(game.phase, Phase::Intro | Phase::Gameplay) {
                    game.resume_phase = Some(game.phase);
                    game.phase = Phase::Paused;
                    true
                } else {
                    false
                }
            });
            if paused {
                ctx.publish_state().await;
                spawn_lifecycle_sequence(ctx, "pause-sequence");
            } else {
                ctx.warn(Warning::new("invalid_command", "nothing to pause")).await;
            }
        },
        OperatorCommand::Resume => {
            let resumed = ctx.shared.with_game(|game| {
                if game.phase == Phase::Paused {
                    game.phase = game.resume_phase.take().unwrap_or(Phase::Gameplay);
                    true
                } else {
                    false
                }
            });
            if resumed {
                ctx.publish_state().await;
                spawn_lifecycle_sequence(ctx, "resume-sequence");
            } else {
                ctx.warn(Warning::new("invalid_command", "nothing to resume")).await;
            }
        },
        OperatorCommand::Shutdown => spawn_lifecycle_sequence(ctx, "shutdown-sequence"),
        OperatorCommand::Reboot => spawn_lifecycle_sequence(ctx, "reboot-sequence"),
        OperatorCommand::Halt => spawn_lifecycle_sequence(ctx, "halt-sequence"),
        OperatorCommand::MachineShutdown => {
            spawn_lifecycle_sequence(ctx, "machine-shutdown-sequence");
        },
        OperatorCommand::Sleep => spawn_plain_sequence(ctx, "sleep-sequence"),
        OperatorCommand::Wake => spawn_plain_sequence(ctx, "wake-sequence"),
        OperatorCommand::Resetting => phase::transition(ctx, Phase::Resetting).await,
        OperatorCommand::AdjustTime { seconds } => {
            ctx.shared.with_game(|game| {
                if game.phase.is_closing() {
                    game.reset_remaining =
                        (i64::from(game.reset_remaining) + seconds).max(0) as u32;
                } else {
                    game.remaining = (i64::from(game.remaining) + seconds).max(0) as u32;
                }
            });
            ctx.publish_state().await;
        },
        OperatorCommand::PlayHint { id } => {
            let ctx = Arc::clone(ctx);
            tokio::spawn(async move {
                let request = HintRequest {
                    id: Some(id),
                    text: None,
                    source: HintSource::Manual,
                };
                if let Err(e) = fire_hint(&ctx, request).await {
                    tracing::warn!(error = %e, "manual hint failed");
                }
            });
        },
        OperatorCommand::SendHint { text, duration: _ } => {
            let ctx = Arc::clone(ctx);
            tokio::spawn(async move {
                let request = HintRequest {
                    id: None,
                    text: Some(text),
                    source: HintSource::Manual,
                };
                if let Err(e) = fire_hint(&ctx, request).await {
                    tracing::warn!(error = %e, "sent hint failed");
                }
            });
        },
        OperatorCommand::MarkAction { action } => {
            ctx.shared.with_game(|game| {
                game.marked_actions.insert(action);
            });
        },
        OperatorCommand::PauseResetTimer => {
            ctx.shared.with_game(|game| game.reset_timer_paused = true);
        },
        OperatorCommand::ResumeResetTimer => {
            ctx.shared.with_game(|game| game.reset_timer_paused = false);
        },
        OperatorCommand::GetState => ctx.publish_state().await,
        OperatorCommand::StopAll => {
            for zone in ctx.registry.zones_by_type(ZoneKind::Media) {
                if let Err(e) = ctx
                    .registry
                    .execute(&zone, "stopAll", &serde_json::Map::new())
                    .await
                {
                    tracing::warn!(error = %e, %zone, "stopAll failed");
                }
            }
        },
        OperatorCommand::ListModes => {
            let modes: Vec<&String> = ctx.def.modes.keys().collect();
            return Some(json!({ "modes": modes }));
        },
        OperatorCommand::SetGameMode { mode } => {
            if ctx.def.modes.contains_key(&mode) {
                ctx.shared.with_game(|game| game.mode = Some(mode));
                ctx.publish_hints_registry().await;
                ctx.publish_config().await;
                ctx.publish_state().await;
            } else {
                ctx.warn(Warning::new("unknown_mode", format!("no mode named {mode}")))
                    .await;
            }
        },
        OperatorCommand::DebugLog { message, tag } => {
            tracing::info!(tag = tag.as_deref().unwrap_or("operator"), "{message}");
        },
        OperatorCommand::ListHints => ctx.publish_hints_registry().await,
        OperatorCommand::GetConfig => ctx.publish_config().await,
    }
    None
}
