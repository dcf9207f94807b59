//! The declarative game definition the engine consumes.
//!
//! Loading and template pre-expansion happen at the server boundary; by the
//! time a [`GameDefinition`] exists, every schedule is flat and every step
//! carries exactly one action.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::adapter::{JsonMap, ZoneKind};
use crate::script::{
    CueDef, PublishSpec, ScriptError, SequenceBody, SequenceDef, SequenceMeta, Step, StepBody,
};

/// Structural error in the game definition.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error("schedule entry at={at}: expected exactly one action, found: {found}")]
    AmbiguousScheduleEntry { at: u32, found: String },
    #[error("schedule entry at={at} has no action")]
    EmptyScheduleEntry { at: u32 },
    #[error("schedule entry at={at}: command needs a zone or zones target")]
    ScheduleCommandWithoutZone { at: u32 },
}

/// Named stage of the game lifecycle.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Resetting,
    #[default]
    Ready,
    Intro,
    Gameplay,
    Paused,
    Solved,
    Failed,
    Reset,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resetting => "resetting",
            Self::Ready => "ready",
            Self::Intro => "intro",
            Self::Gameplay => "gameplay",
            Self::Paused => "paused",
            Self::Solved => "solved",
            Self::Failed => "failed",
            Self::Reset => "reset",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "resetting" => Some(Self::Resetting),
            "ready" => Some(Self::Ready),
            "intro" => Some(Self::Intro),
            "gameplay" => Some(Self::Gameplay),
            "paused" => Some(Self::Paused),
            "solved" => Some(Self::Solved),
            "failed" => Some(Self::Failed),
            "reset" => Some(Self::Reset),
            _ => None,
        }
    }

    /// Phases whose countdown is driven by the unified scheduler.
    pub fn is_scheduled(&self) -> bool {
        matches!(self, Self::Intro | Self::Gameplay | Self::Solved | Self::Failed)
    }

    /// Phases entered after the game has ended.
    pub fn is_closing(&self) -> bool {
        matches!(self, Self::Solved | Self::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Game outcome reached from gameplay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Win,
    Fail,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Win => "win",
            Self::Fail => "fail",
        }
    }

    pub fn closing_phase(&self) -> Phase {
        match self {
            Self::Win => Phase::Solved,
            Self::Fail => Phase::Failed,
        }
    }
}

/// One zone's wiring: the adapter variant and its wire prefix.
#[derive(Debug, Clone, Deserialize)]
pub struct ZoneConfig {
    #[serde(rename = "type")]
    pub kind: ZoneKind,
    #[serde(rename = "base-topic", alias = "base_topic")]
    pub base_topic: String,
}

/// Inline sequence or a reference to a named one.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SequenceRef {
    Name(String),
    Inline(SequenceDef),
}

/// One phase of a mode: optional duration, optional sequence, optional
/// schedule. A phase with none of the three is a no-op (startup warning).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PhaseConfig {
    pub duration: Option<u32>,
    pub seconds: Option<u32>,
    pub sequence: Option<SequenceRef>,
    #[serde(default)]
    pub schedule: Vec<ScheduleEntry>,
}

impl PhaseConfig {
    /// Explicit duration: `duration` beats `seconds`.
    pub fn explicit_duration(&self) -> Option<u32> {
        self.duration.or(self.seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawScheduleEntry {
    at: u32,
    fire: Option<String>,
    #[serde(rename = "fire-cue", alias = "fire_cue")]
    fire_cue: Option<String>,
    #[serde(rename = "fire-seq", alias = "fire_seq")]
    fire_seq: Option<String>,
    hint: Option<String>,
    text: Option<String>,
    #[serde(rename = "play-hint", alias = "play_hint")]
    play_hint: Option<String>,
    zone: Option<String>,
    zones: Option<Vec<String>>,
    command: Option<String>,
    end: Option<Outcome>,
    log: Option<String>,
    #[serde(flatten)]
    options: JsonMap,
}

/// A time-anchored action in a phase schedule; `at` is seconds remaining.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawScheduleEntry")]
pub struct ScheduleEntry {
    pub at: u32,
    pub action: ScheduleAction,
    pub log: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ScheduleAction {
    Fire(String),
    FireCue(String),
    FireSeq(String),
    Hint { id: String, text: Option<String> },
    PlayHint(String),
    ZoneCommand {
        zones: Vec<String>,
        verb: String,
        options: JsonMap,
    },
    End(Outcome),
}

impl TryFrom<RawScheduleEntry> for ScheduleEntry {
    type Error = ConfigError;

    fn try_from(raw: RawScheduleEntry) -> Result<Self, Self::Error> {
        let mut found: Vec<&'static str> = Vec::new();
        if raw.fire.is_some() {
            found.push("fire");
        }
        if raw.fire_cue.is_some() {
            found.push("fire-cue");
        }
        if raw.fire_seq.is_some() {
            found.push("fire-seq");
        }
        if raw.hint.is_some() {
            found.push("hint");
        }
        if raw.play_hint.is_some() {
            found.push("play-hint");
        }
        if raw.command.is_some() {
            found.push("command");
        }
        if raw.end.is_some() {
            found.push("end");
        }
        if found.len() > 1 {
            return Err(ConfigError::AmbiguousScheduleEntry {
                at: raw.at,
                found: found.join(", "),
            });
        }

        let action = if let Some(name) = raw.fire {
            ScheduleAction::Fire(name)
        } else if let Some(name) = raw.fire_cue {
            ScheduleAction::FireCue(name)
        } else if let Some(name) = raw.fire_seq {
            ScheduleAction::FireSeq(name)
        } else if let Some(id) = raw.hint {
            ScheduleAction::Hint { id, text: raw.text }
        } else if let Some(id) = raw.play_hint {
            ScheduleAction::PlayHint(id)
        } else if let Some(verb) = raw.command {
            let zones = match (raw.zone, raw.zones) {
                (Some(z), None) => vec![z],
                (None, Some(zs)) if !zs.is_empty() => zs,
                (Some(z), Some(mut zs)) => {
                    zs.insert(0, z);
                    zs
                },
                _ => return Err(ConfigError::ScheduleCommandWithoutZone { at: raw.at }),
            };
            ScheduleAction::ZoneCommand {
                zones,
                verb,
                options: raw.options,
            }
        } else if let Some(outcome) = raw.end {
            ScheduleAction::End(outcome)
        } else {
            return Err(ConfigError::EmptyScheduleEntry { at: raw.at });
        };

        Ok(Self {
            at: raw.at,
            action,
            log: raw.log,
        })
    }
}

/// The kind of effect a hint produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HintKind {
    Text,
    Speech,
    Audio,
    Video,
    Action,
}

/// One hint available to operators in a mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HintDef {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: HintKind,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
}

impl HintDef {
    /// The text shown to operators; also the dedup key when mode and global
    /// hint lists are combined.
    pub fn display_text(&self) -> &str {
        self.text
            .as_deref()
            .or(self.description.as_deref())
            .unwrap_or(&self.id)
    }
}

/// A selectable game configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModeConfig {
    #[serde(rename = "short-label", alias = "short_label", default)]
    pub short_label: String,
    #[serde(rename = "game-label", alias = "game_label", default)]
    pub game_label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub phases: BTreeMap<Phase, PhaseConfig>,
    #[serde(default)]
    pub sequences: BTreeMap<String, SequenceDef>,
    #[serde(default)]
    pub cues: BTreeMap<String, CueDef>,
    #[serde(default)]
    pub hints: Vec<HintDef>,
}

/// Idle attract behavior while the engine sits in `ready`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdleConfig {
    pub enabled: bool,
    #[serde(rename = "interval-secs", alias = "interval_secs")]
    pub interval_secs: u64,
    pub sequence: String,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 300,
            sequence: "idle-sequence".to_string(),
        }
    }
}

/// Legacy sequence names mapped to their current spelling before resolution.
pub const LEGACY_SEQUENCE_ALIASES: &[(&str, &str)] =
    &[("start-sequence", "gameplay-start-sequence")];

/// Minimum heartbeat interval.
pub const HEARTBEAT_FLOOR_MS: u64 = 50;

fn default_heartbeat_ms() -> u64 {
    1000
}

fn default_fade_ms() -> u64 {
    500
}

fn default_game_type() -> String {
    "escapeRoom".to_string()
}

/// The whole declarative game: zones, modes, and the global namespaces.
/// Read-only after load.
#[derive(Debug, Clone, Deserialize)]
pub struct GameDefinition {
    #[serde(rename = "game-topic", alias = "game_topic")]
    pub game_topic: String,
    #[serde(
        rename = "game-type",
        alias = "game_type",
        default = "default_game_type"
    )]
    pub game_type: String,
    #[serde(default)]
    pub zones: BTreeMap<String, ZoneConfig>,
    #[serde(default)]
    pub modes: BTreeMap<String, ModeConfig>,
    /// Global sequence namespace (also serves command sequences).
    #[serde(default)]
    pub sequences: BTreeMap<String, SequenceDef>,
    #[serde(default)]
    pub cues: BTreeMap<String, CueDef>,
    /// Legacy cue namespace, consulted last.
    #[serde(default)]
    pub actions: BTreeMap<String, CueDef>,
    #[serde(default)]
    pub hints: Vec<HintDef>,
    #[serde(
        rename = "heartbeat-ms",
        alias = "heartbeat_ms",
        alias = "gameHeartbeatMs",
        default = "default_heartbeat_ms"
    )]
    pub heartbeat_ms: u64,
    #[serde(
        rename = "default-fade-ms",
        alias = "default_fade_ms",
        default = "default_fade_ms"
    )]
    pub default_fade_ms: u64,
    #[serde(rename = "mirror-ui", alias = "mirror_ui", alias = "mirrorUI", default)]
    pub mirror_ui: bool,
    #[serde(default)]
    pub idle: IdleConfig,
    /// Built-in system sequences, never read from config.
    #[serde(skip, default = "builtin_system_sequences")]
    pub system_sequences: BTreeMap<String, SequenceDef>,
}

/// System-namespace sequences every game carries. `hint-text-seq` publishes
/// the bound hint text on the game's hints topic; games override it (global
/// or per-mode) to route text to their own devices.
fn builtin_system_sequences() -> BTreeMap<String, SequenceDef> {
    let mut map = BTreeMap::new();
    map.insert(
        "hint-text-seq".to_string(),
        SequenceDef {
            body: SequenceBody::Ordered(vec![Step {
                body: StepBody::Publish(PublishSpec {
                    topic: "{{gameTopic}}/hints".to_string(),
                    payload: json!({ "text": "{{hintText}}" }),
                }),
                after_wait: None,
                duration: None,
                log: None,
            }]),
            meta: SequenceMeta::default(),
        },
    );
    map
}

fn name_variants(name: &str) -> Vec<String> {
    let mut variants = vec![name.to_string(), format!("{name}-sequence")];
    if let Some(base) = name.strip_suffix("-sequence") {
        variants.push(base.to_string());
    }
    variants.dedup();
    variants
}

impl GameDefinition {
    /// Parse from a JSON document (the TOML path goes through the same serde
    /// model at the server boundary).
    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Heartbeat interval with the floor applied.
    pub fn effective_heartbeat_ms(&self) -> u64 {
        self.heartbeat_ms.max(HEARTBEAT_FLOOR_MS)
    }

    pub fn mode(&self, id: &str) -> Option<&ModeConfig> {
        self.modes.get(id)
    }

    /// Resolve a sequence name across namespaces: per-mode overrides →
    /// global → system, trying the raw name, `name-sequence`, and the
    /// `-sequence`-stripped base in each. Legacy aliases map first.
    /// Returns the resolved name alongside the definition.
    pub fn resolve_sequence(
        &self,
        name: &str,
        mode: Option<&str>,
    ) -> Option<(String, &SequenceDef)> {
        let name = LEGACY_SEQUENCE_ALIASES
            .iter()
            .find(|(old, _)| *old == name)
            .map_or(name, |(_, new)| *new);

        let mode_sequences = mode
            .and_then(|m| self.modes.get(m))
            .map(|m| &m.sequences);

        let namespaces: [Option<&BTreeMap<String, SequenceDef>>; 3] = [
            mode_sequences,
            Some(&self.sequences),
            Some(&self.system_sequences),
        ];
        for namespace in namespaces.into_iter().flatten() {
            for candidate in name_variants(name) {
                if let Some(def) = namespace.get(&candidate) {
                    return Some((candidate, def));
                }
            }
        }
        None
    }

    /// Resolve a cue name: per-mode cues → global cues → legacy actions.
    pub fn resolve_cue(&self, name: &str, mode: Option<&str>) -> Option<&CueDef> {
        if let Some(cue) = mode
            .and_then(|m| self.modes.get(m))
            .and_then(|m| m.cues.get(name))
        {
            return Some(cue);
        }
        self.cues.get(name).or_else(|| self.actions.get(name))
    }

    /// The hint list for a mode: mode hints first, then global hints,
    /// deduplicated by display text.
    pub fn combined_hints(&self, mode: Option<&str>) -> Vec<&HintDef> {
        let mut seen: Vec<&str> = Vec::new();
        let mut combined: Vec<&HintDef> = Vec::new();
        let mode_hints = mode
            .and_then(|m| self.modes.get(m))
            .map(|m| m.hints.as_slice())
            .unwrap_or_default();
        for hint in mode_hints.iter().chain(self.hints.iter()) {
            let text = hint.display_text();
            if seen.contains(&text) {
                continue;
            }
            seen.push(text);
            combined.push(hint);
        }
        combined
    }

    /// Find a hint by id in the mode's combined list.
    pub fn find_hint(&self, id: &str, mode: Option<&str>) -> Option<&HintDef> {
        self.combined_hints(mode)
            .into_iter()
            .find(|hint| hint.id == id)
    }

    /// Summary published on the retained config topic:
    /// `{games: {id: {shortLabel, gameLabel, description, hints, combinedHints}}}`.
    pub fn config_summary(&self) -> Value {
        let mut games = serde_json::Map::new();
        for (id, mode) in &self.modes {
            let combined: Vec<&HintDef> = self.combined_hints(Some(id));
            games.insert(
                id.clone(),
                json!({
                    "shortLabel": mode.short_label,
                    "gameLabel": mode.game_label,
                    "description": mode.description,
                    "hints": mode.hints,
                    "combinedHints": combined,
                }),
            );
        }
        json!({ "games": games })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_definition() -> GameDefinition {
        GameDefinition::from_json_str(
            r#"{
                "game-topic": "paradox/houdini",
                "zones": {
                    "mirror": {"type": "media", "base-topic": "paradox/mirror"},
                    "lights": {"type": "lights", "base-topic": "paradox/lights"},
                    "clock": {"type": "clock", "base-topic": "paradox/clock"}
                },
                "modes": {
                    "hc-demo": {
                        "short-label": "Demo",
                        "game-label": "Houdini Demo",
                        "phases": {
                            "gameplay": {
                                "duration": 3,
                                "schedule": [
                                    {"at": 2, "play-hint": "box1"}
                                ]
                            }
                        },
                        "sequences": {
                            "finale-sequence": [{"wait": 1}]
                        },
                        "hints": [
                            {"id": "box1", "type": "text", "text": "check the box"}
                        ]
                    }
                },
                "sequences": {
                    "gameplay-start-sequence": [{"wait": 2}],
                    "finale-sequence": [{"wait": 9}]
                },
                "cues": {
                    "fanfare": [
                        {"zone": "lights", "command": "scene", "name": "red"},
                        {"zone": "mirror", "command": "playVideo", "file": "a.mp4"}
                    ]
                },
                "hints": [
                    {"id": "global1", "type": "text", "text": "global help"},
                    {"id": "dup", "type": "text", "text": "check the box"}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn phase_names_round_trip() {
        for phase in [
            Phase::Resetting,
            Phase::Ready,
            Phase::Intro,
            Phase::Gameplay,
            Phase::Paused,
            Phase::Solved,
            Phase::Failed,
            Phase::Reset,
        ] {
            assert_eq!(Phase::from_str_opt(phase.as_str()), Some(phase));
        }
        assert_eq!(Phase::from_str_opt("warmup"), None);
    }

    #[test]
    fn scheduled_and_closing_phase_sets() {
        assert!(Phase::Intro.is_scheduled());
        assert!(Phase::Gameplay.is_scheduled());
        assert!(Phase::Solved.is_scheduled());
        assert!(Phase::Failed.is_scheduled());
        assert!(!Phase::Ready.is_scheduled());
        assert!(!Phase::Paused.is_scheduled());
        assert!(Phase::Solved.is_closing());
        assert!(!Phase::Gameplay.is_closing());
    }

    #[test]
    fn schedule_entry_single_discriminator() {
        let entry: ScheduleEntry =
            serde_json::from_str(r#"{"at": 5, "play-hint": "box1"}"#).unwrap();
        assert_eq!(entry.at, 5);
        assert!(matches!(entry.action, ScheduleAction::PlayHint(ref id) if id == "box1"));

        let err =
            serde_json::from_str::<ScheduleEntry>(r#"{"at": 5, "fire": "a", "hint": "b"}"#)
                .unwrap_err();
        assert!(err.to_string().contains("exactly one"));

        assert!(serde_json::from_str::<ScheduleEntry>(r#"{"at": 5}"#).is_err());
    }

    #[test]
    fn schedule_zone_command_needs_zones() {
        let entry: ScheduleEntry = serde_json::from_str(
            r#"{"at": 0, "zone": "lights", "command": "scene", "name": "dark"}"#,
        )
        .unwrap();
        match entry.action {
            ScheduleAction::ZoneCommand { zones, verb, options } => {
                assert_eq!(zones, vec!["lights".to_string()]);
                assert_eq!(verb, "scene");
                assert_eq!(options["name"], "dark");
            },
            other => panic!("expected zone command, got {other:?}"),
        }

        assert!(
            serde_json::from_str::<ScheduleEntry>(r#"{"at": 0, "command": "scene"}"#).is_err()
        );
    }

    #[test]
    fn schedule_end_entry() {
        let entry: ScheduleEntry = serde_json::from_str(r#"{"at": 0, "end": "fail"}"#).unwrap();
        assert!(matches!(entry.action, ScheduleAction::End(Outcome::Fail)));
    }

    #[test]
    fn mode_sequences_shadow_global() {
        let def = demo_definition();
        let (name, seq) = def.resolve_sequence("finale", Some("hc-demo")).unwrap();
        assert_eq!(name, "finale-sequence");
        assert!((seq.estimated_duration() - 1.0).abs() < f64::EPSILON);

        let (_, seq) = def.resolve_sequence("finale", None).unwrap();
        assert!((seq.estimated_duration() - 9.0).abs() < f64::EPSILON);
    }

    #[test]
    fn legacy_alias_maps_start_sequence() {
        let def = demo_definition();
        let (name, _) = def.resolve_sequence("start-sequence", None).unwrap();
        assert_eq!(name, "gameplay-start-sequence");
    }

    #[test]
    fn system_namespace_provides_hint_text_seq() {
        let def = demo_definition();
        let (name, _) = def.resolve_sequence("hint-text-seq", None).unwrap();
        assert_eq!(name, "hint-text-seq");
    }

    #[test]
    fn unknown_sequence_is_none() {
        let def = demo_definition();
        assert!(def.resolve_sequence("no-such", Some("hc-demo")).is_none());
    }

    #[test]
    fn combined_hints_dedup_by_text() {
        let def = demo_definition();
        let hints = def.combined_hints(Some("hc-demo"));
        let ids: Vec<&str> = hints.iter().map(|h| h.id.as_str()).collect();
        // Mode hints first; the global "dup" entry shares its display text
        // with the mode's "box1" and is dropped.
        assert_eq!(ids, vec!["box1", "global1"]);
    }

    #[test]
    fn find_hint_searches_combined_list() {
        let def = demo_definition();
        assert!(def.find_hint("box1", Some("hc-demo")).is_some());
        assert!(def.find_hint("global1", Some("hc-demo")).is_some());
        assert!(def.find_hint("nope", Some("hc-demo")).is_none());
    }

    #[test]
    fn resolve_cue_priority() {
        let def = demo_definition();
        assert!(def.resolve_cue("fanfare", Some("hc-demo")).is_some());
        assert!(def.resolve_cue("missing", Some("hc-demo")).is_none());
    }

    #[test]
    fn heartbeat_floor_applies() {
        let mut def = demo_definition();
        def.heartbeat_ms = 10;
        assert_eq!(def.effective_heartbeat_ms(), 50);
        def.heartbeat_ms = 2000;
        assert_eq!(def.effective_heartbeat_ms(), 2000);
    }

    #[test]
    fn config_summary_shape() {
        let def = demo_definition();
        let summary = def.config_summary();
        let game = &summary["games"]["hc-demo"];
        assert_eq!(game["shortLabel"], "Demo");
        assert_eq!(game["gameLabel"], "Houdini Demo");
        assert_eq!(game["hints"].as_array().unwrap().len(), 1);
        assert_eq!(game["combinedHints"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn definition_parses_from_toml() {
        let def: GameDefinition = toml::from_str(
            r#"
game-topic = "paradox/houdini"

[zones.mirror]
type = "media"
base-topic = "paradox/mirror"

[modes.hc-demo]
short-label = "Demo"

[modes.hc-demo.phases.gameplay]
duration = 3

[[modes.hc-demo.phases.gameplay.schedule]]
at = 2
play-hint = "box1"

[[modes.hc-demo.hints]]
id = "box1"
type = "text"
text = "check the box"
"#,
        )
        .unwrap();
        assert_eq!(def.game_topic, "paradox/houdini");
        let mode = def.mode("hc-demo").unwrap();
        let gameplay = mode.phases.get(&Phase::Gameplay).unwrap();
        assert_eq!(gameplay.explicit_duration(), Some(3));
        assert_eq!(gameplay.schedule.len(), 1);
    }
}
