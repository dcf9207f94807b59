//! Shared fixtures for the engine's unit tests: a representative game
//! definition and a ready-made execution context over the in-memory bus.

use std::sync::Arc;

use tokio::sync::mpsc;

use showrunner_bus::MemoryBus;
use showrunner_core::bus::BusPublisher;
use showrunner_core::config::GameDefinition;

use crate::ctx::{EngineSignal, ExecCtx};
use crate::engine;

pub const DEMO_JSON: &str = r#"{
    "game-topic": "paradox/houdini",
    "zones": {
        "mirror": {"type": "media", "base-topic": "paradox/mirror"},
        "audio": {"type": "media", "base-topic": "paradox/audio"},
        "lights": {"type": "lights", "base-topic": "paradox/lights"},
        "clock": {"type": "clock", "base-topic": "paradox/clock"}
    },
    "modes": {
        "hc-demo": {
            "short-label": "Demo",
            "game-label": "Houdini Demo",
            "description": "Three-second demo room",
            "phases": {
                "gameplay": {
                    "duration": 7,
                    "schedule": [
                        {"at": 5, "play-hint": "box1"}
                    ]
                }
            },
            "hints": [
                {"id": "box1", "type": "text", "text": "check the box"},
                {"id": "chime", "type": "audio", "file": "chime.wav"},
                {"id": "ghost", "type": "video", "file": "ghost.mp4", "zone": "mirror"},
                {"id": "push", "type": "action"},
                {"id": "maglock", "type": "action", "zone": "clock", "text": "release"}
            ]
        }
    },
    "sequences": {
        "two-step": [
            {"zone": "lights", "command": "scene", "name": "red"},
            {"wait": 2},
            {"zone": "mirror", "command": "playVideo", "file": "a.mp4"}
        ],
        "self-loop": [
            {"fire-seq": "self-loop"}
        ],
        "nest-1": [{"fire-seq": "nest-2"}],
        "nest-2": [{"fire-seq": "nest-3"}],
        "nest-3": [{"fire-seq": "two-step"}],
        "mismatched": {
            "steps": [{"wait": 4}],
            "meta": {"duration": 1.0}
        },
        "ten-line": {
            "duration": 10,
            "timeline": [
                {"at": 10, "zone": "mirror", "play": {"video": "s.mp4"}},
                {"at": 7, "publish": {"topic": "t/A", "payload": "A"}},
                {"at": 0, "zone": "lights", "scene": "green"}
            ]
        }
    },
    "cues": {
        "fanfare": [
            {"zone": "lights", "command": "scene", "name": "red"},
            {"zone": "mirror", "command": "playVideo", "file": "a.mp4"}
        ],
        "countdown": {
            "duration": 10,
            "timeline": [
                {"at": 10, "actions": [{"zone": "mirror", "play": {"video": "s.mp4"}}]},
                {"at": 7, "actions": [{"publish": {"topic": "t/A", "payload": "A"}}]},
                {"at": 0, "actions": [{"zone": "lights", "scene": "green"}]}
            ]
        },
        "old-style": {
            "commands": [{"zone": "lights", "scene": "amber"}]
        }
    },
    "hints": [
        {"id": "global1", "type": "text", "text": "global help"}
    ]
}"#;

pub fn demo_def() -> GameDefinition {
    GameDefinition::from_json_str(DEMO_JSON).expect("demo definition parses")
}

pub fn ctx_for(
    def: GameDefinition,
) -> (
    Arc<ExecCtx>,
    Arc<MemoryBus>,
    mpsc::UnboundedReceiver<EngineSignal>,
) {
    let bus = MemoryBus::new();
    let (ctx, signals) = engine::build_ctx(
        Arc::new(def),
        Arc::clone(&bus) as Arc<dyn BusPublisher>,
    )
    .expect("context builds");
    (ctx, bus, signals)
}

pub fn demo_ctx() -> (
    Arc<ExecCtx>,
    Arc<MemoryBus>,
    mpsc::UnboundedReceiver<EngineSignal>,
) {
    ctx_for(demo_def())
}

pub fn demo_ctx_with_mode(
    mode: &str,
) -> (
    Arc<ExecCtx>,
    Arc<MemoryBus>,
    mpsc::UnboundedReceiver<EngineSignal>,
) {
    let (ctx, bus, signals) = demo_ctx();
    ctx.shared.with_game(|game| game.mode = Some(mode.to_string()));
    (ctx, bus, signals)
}

/// Event names published on the events topic so far.
pub fn event_names(bus: &MemoryBus, game_topic: &str) -> Vec<String> {
    bus.published_to(&format!("{game_topic}/events"))
        .into_iter()
        .filter_map(|v| v["event"].as_str().map(str::to_string))
        .collect()
}
