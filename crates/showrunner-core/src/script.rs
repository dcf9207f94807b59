//! The scripting model: sequences, cues, steps, and actions as parsed from
//! the game definition.
//!
//! Config rows for steps and actions are permissive maps in the source
//! format; the raw mirrors here accept that shape and the typed conversions
//! enforce the one-discriminator rule so the executors only ever see tagged
//! variants.

use serde::Deserialize;
use serde_json::Value;

use crate::adapter::JsonMap;
use crate::verb::Verb;

/// Structural error in a sequence, cue, step, or action definition.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ScriptError {
    #[error("step has no action and no wait")]
    EmptyStep,
    #[error("step must have exactly one action, found: {0}")]
    AmbiguousStep(String),
    #[error("step `wait: true` needs an action with a duration")]
    BareWaitFlag,
    #[error("hint step needs an id or text")]
    HintWithoutTarget,
    #[error("{0} step needs a zone or zones target")]
    MissingZones(&'static str),
    #[error("action has none of play/command/scene/publish")]
    EmptyAction,
    #[error("action must have exactly one of play/command/scene/publish, found: {0}")]
    AmbiguousAction(String),
    #[error("play spec must name exactly one of file/video/speech/fx/background/image")]
    InvalidPlaySpec,
}

fn zone_list(zone: Option<String>, zones: Option<Vec<String>>) -> Vec<String> {
    match (zone, zones) {
        (Some(z), None) => vec![z],
        (None, Some(zs)) => zs,
        (Some(z), Some(mut zs)) => {
            zs.insert(0, z);
            zs
        },
        (None, None) => Vec::new(),
    }
}

/// Raw `wait` value: a second count or the trailing `wait: true` flag.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum WaitSpec {
    Secs(f64),
    Flag(bool),
}

/// A raw `publish` step/action body.
#[derive(Debug, Clone, Deserialize)]
pub struct PublishSpec {
    pub topic: String,
    pub payload: Value,
}

/// A raw `verifyBrowser` request.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyBrowserSpec {
    pub url: String,
    #[serde(default = "default_true")]
    pub visible: bool,
    /// Milliseconds; the adapter default applies when absent.
    pub timeout: Option<u64>,
}

/// A raw `verifyImage` request.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyImageSpec {
    pub file: String,
    /// Milliseconds; the adapter default applies when absent.
    pub timeout: Option<u64>,
}

fn default_true() -> bool {
    true
}

/// The media selector attached to a `play` action.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaySpec {
    pub file: Option<String>,
    pub video: Option<String>,
    pub speech: Option<String>,
    pub fx: Option<String>,
    pub background: Option<String>,
    pub image: Option<String>,
    #[serde(rename = "loop")]
    pub looped: Option<bool>,
    pub volume: Option<f64>,
}

impl PlaySpec {
    /// Resolve the selector to a media verb and its wire options.
    /// `loop` defaults to true for background playback.
    pub fn verb_and_options(&self) -> Result<(Verb, JsonMap), ScriptError> {
        let keys: [(Verb, &Option<String>); 6] = [
            (Verb::PlayVideo, &self.file),
            (Verb::PlayVideo, &self.video),
            (Verb::PlaySpeech, &self.speech),
            (Verb::PlayAudioFx, &self.fx),
            (Verb::PlayBackground, &self.background),
            (Verb::SetImage, &self.image),
        ];
        let mut hit: Option<(Verb, &str)> = None;
        for (verb, value) in keys {
            if let Some(v) = value {
                if hit.is_some() {
                    return Err(ScriptError::InvalidPlaySpec);
                }
                hit = Some((verb, v.as_str()));
            }
        }
        let Some((verb, file)) = hit else {
            return Err(ScriptError::InvalidPlaySpec);
        };
        let mut options = JsonMap::new();
        options.insert("file".to_string(), Value::String(file.to_string()));
        if verb == Verb::PlayBackground {
            options.insert("loop".to_string(), Value::Bool(self.looped.unwrap_or(true)));
        } else if let Some(looped) = self.looped {
            options.insert("loop".to_string(), Value::Bool(looped));
        }
        if let Some(volume) = self.volume {
            options.insert("volume".to_string(), Value::from(volume));
        }
        Ok((verb, options))
    }
}

// ---------------------------------------------------------------------------
// Steps (ordered sequences)
// ---------------------------------------------------------------------------

/// Raw config row for a sequence step. Every field optional; the conversion
/// to [`Step`] enforces the one-discriminator rule.
#[derive(Debug, Clone, Deserialize)]
pub struct RawStep {
    pub wait: Option<WaitSpec>,
    pub hint: Option<String>,
    pub text: Option<String>,
    pub fire: Option<String>,
    #[serde(rename = "fire-cue", alias = "fire_cue")]
    pub fire_cue: Option<String>,
    #[serde(rename = "fire-seq", alias = "fire_seq")]
    pub fire_seq: Option<String>,
    pub command: Option<String>,
    pub zone: Option<String>,
    pub zones: Option<Vec<String>>,
    pub publish: Option<PublishSpec>,
    #[serde(rename = "verifyBrowser", alias = "verify-browser")]
    pub verify_browser: Option<VerifyBrowserSpec>,
    #[serde(rename = "verifyImage", alias = "verify-image")]
    pub verify_image: Option<VerifyImageSpec>,
    pub duration: Option<f64>,
    pub log: Option<String>,
    #[serde(flatten)]
    pub options: JsonMap,
}

/// Trailing suspension after a step's action completes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AfterWait {
    Secs(f64),
    /// `wait: true` — use the step's own `duration`.
    OwnDuration,
}

/// One step of an ordered sequence.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawStep")]
pub struct Step {
    pub body: StepBody,
    pub after_wait: Option<AfterWait>,
    pub duration: Option<f64>,
    pub log: Option<String>,
}

#[derive(Debug, Clone)]
pub enum StepBody {
    Wait(f64),
    Hint {
        id: Option<String>,
        text: Option<String>,
    },
    Fire(String),
    FireCue(String),
    FireSeq(String),
    Command {
        zones: Vec<String>,
        verb: String,
        options: JsonMap,
    },
    Publish(PublishSpec),
    VerifyBrowser {
        zones: Vec<String>,
        spec: VerifyBrowserSpec,
    },
    VerifyImage {
        zones: Vec<String>,
        spec: VerifyImageSpec,
    },
}

impl TryFrom<RawStep> for Step {
    type Error = ScriptError;

    fn try_from(raw: RawStep) -> Result<Self, Self::Error> {
        let mut found: Vec<&'static str> = Vec::new();
        if raw.hint.is_some() {
            found.push("hint");
        }
        if raw.fire.is_some() {
            found.push("fire");
        }
        if raw.fire_cue.is_some() {
            found.push("fire-cue");
        }
        if raw.fire_seq.is_some() {
            found.push("fire-seq");
        }
        if raw.command.is_some() {
            found.push("command");
        }
        if raw.publish.is_some() {
            found.push("publish");
        }
        if raw.verify_browser.is_some() {
            found.push("verifyBrowser");
        }
        if raw.verify_image.is_some() {
            found.push("verifyImage");
        }
        if found.len() > 1 {
            return Err(ScriptError::AmbiguousStep(found.join(", ")));
        }

        let zones = zone_list(raw.zone, raw.zones);

        if found.is_empty() {
            // A bare wait step.
            return match raw.wait {
                Some(WaitSpec::Secs(secs)) => Ok(Self {
                    body: StepBody::Wait(secs),
                    after_wait: None,
                    duration: raw.duration,
                    log: raw.log,
                }),
                Some(WaitSpec::Flag(_)) => Err(ScriptError::BareWaitFlag),
                None => Err(ScriptError::EmptyStep),
            };
        }

        let body = if let Some(id) = raw.hint {
            StepBody::Hint {
                id: Some(id),
                text: raw.text,
            }
        } else if let Some(name) = raw.fire {
            StepBody::Fire(name)
        } else if let Some(name) = raw.fire_cue {
            StepBody::FireCue(name)
        } else if let Some(name) = raw.fire_seq {
            StepBody::FireSeq(name)
        } else if let Some(verb) = raw.command {
            if zones.is_empty() {
                return Err(ScriptError::MissingZones("command"));
            }
            StepBody::Command {
                zones,
                verb,
                options: raw.options,
            }
        } else if let Some(publish) = raw.publish {
            StepBody::Publish(publish)
        } else if let Some(spec) = raw.verify_browser {
            if zones.is_empty() {
                return Err(ScriptError::MissingZones("verifyBrowser"));
            }
            StepBody::VerifyBrowser { zones, spec }
        } else if let Some(spec) = raw.verify_image {
            if zones.is_empty() {
                return Err(ScriptError::MissingZones("verifyImage"));
            }
            StepBody::VerifyImage { zones, spec }
        } else {
            return Err(ScriptError::EmptyStep);
        };

        let after_wait = match raw.wait {
            Some(WaitSpec::Secs(secs)) => Some(AfterWait::Secs(secs)),
            Some(WaitSpec::Flag(true)) => Some(AfterWait::OwnDuration),
            Some(WaitSpec::Flag(false)) | None => None,
        };

        Ok(Self {
            body,
            after_wait,
            duration: raw.duration,
            log: raw.log,
        })
    }
}

// ---------------------------------------------------------------------------
// Actions (cues, timelines)
// ---------------------------------------------------------------------------

/// Raw config row for a cue/timeline action.
#[derive(Debug, Clone, Deserialize)]
pub struct RawAction {
    pub zone: Option<String>,
    pub zones: Option<Vec<String>>,
    pub play: Option<PlaySpec>,
    pub command: Option<String>,
    pub scene: Option<String>,
    pub publish: Option<PublishSpec>,
    #[serde(flatten)]
    pub options: JsonMap,
}

/// A single device-facing action inside a cue or timeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawAction")]
pub struct Action {
    pub zones: Vec<String>,
    pub kind: ActionKind,
    pub options: JsonMap,
}

#[derive(Debug, Clone)]
pub enum ActionKind {
    Play(PlaySpec),
    Command(String),
    Scene(String),
    Publish(PublishSpec),
}

impl TryFrom<RawAction> for Action {
    type Error = ScriptError;

    fn try_from(raw: RawAction) -> Result<Self, Self::Error> {
        let mut found: Vec<&'static str> = Vec::new();
        if raw.play.is_some() {
            found.push("play");
        }
        if raw.command.is_some() {
            found.push("command");
        }
        if raw.scene.is_some() {
            found.push("scene");
        }
        if raw.publish.is_some() {
            found.push("publish");
        }
        if found.is_empty() {
            return Err(ScriptError::EmptyAction);
        }
        if found.len() > 1 {
            return Err(ScriptError::AmbiguousAction(found.join(", ")));
        }

        let kind = if let Some(play) = raw.play {
            // Validate the selector eagerly so a bad play spec fails at load.
            play.verb_and_options()?;
            ActionKind::Play(play)
        } else if let Some(verb) = raw.command {
            ActionKind::Command(verb)
        } else if let Some(scene) = raw.scene {
            ActionKind::Scene(scene)
        } else if let Some(publish) = raw.publish {
            ActionKind::Publish(publish)
        } else {
            return Err(ScriptError::EmptyAction);
        };

        Ok(Self {
            zones: zone_list(raw.zone, raw.zones),
            kind,
            options: raw.options,
        })
    }
}

// ---------------------------------------------------------------------------
// Sequences
// ---------------------------------------------------------------------------

/// Nominal-length and nesting metadata on a sequence definition.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SequenceMeta {
    pub duration: Option<f64>,
    #[serde(alias = "max-depth")]
    pub max_depth: usize,
}

/// Default nesting cap for sequence invocations.
pub const DEFAULT_MAX_DEPTH: usize = 3;

impl Default for SequenceMeta {
    fn default() -> Self {
        Self {
            duration: None,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawTimelineSeq {
    duration: u32,
    timeline: Vec<RawTimelineEntry>,
    #[serde(default)]
    meta: SequenceMeta,
}

#[derive(Debug, Clone, Deserialize)]
struct RawTimelineEntry {
    at: u32,
    #[serde(flatten)]
    action: RawAction,
}

#[derive(Debug, Clone, Deserialize)]
struct RawStepsSeq {
    steps: Vec<RawStep>,
    #[serde(default)]
    meta: SequenceMeta,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawSequenceDef {
    Timeline(RawTimelineSeq),
    Named(RawStepsSeq),
    Bare(Vec<RawStep>),
}

/// A named sequence: an ordered step program or a timeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawSequenceDef")]
pub struct SequenceDef {
    pub body: SequenceBody,
    pub meta: SequenceMeta,
}

#[derive(Debug, Clone)]
pub enum SequenceBody {
    Ordered(Vec<Step>),
    Timeline {
        duration: u32,
        entries: Vec<TimelineEntry>,
    },
}

/// One timeline row: fires `action` once `duration - at` seconds have
/// elapsed from sequence start (`at` is seconds remaining).
#[derive(Debug, Clone)]
pub struct TimelineEntry {
    pub at: u32,
    pub action: Action,
}

impl SequenceDef {
    pub fn ordered(steps: Vec<Step>) -> Self {
        Self {
            body: SequenceBody::Ordered(steps),
            meta: SequenceMeta::default(),
        }
    }

    /// Estimated run length: the sum of waits for ordered sequences, the
    /// declared duration for timelines.
    pub fn estimated_duration(&self) -> f64 {
        match &self.body {
            SequenceBody::Ordered(steps) => steps
                .iter()
                .map(|step| {
                    let body = match step.body {
                        StepBody::Wait(secs) => secs,
                        _ => 0.0,
                    };
                    let after = match step.after_wait {
                        Some(AfterWait::Secs(secs)) => secs,
                        Some(AfterWait::OwnDuration) => step.duration.unwrap_or(0.0),
                        None => 0.0,
                    };
                    body + after
                })
                .sum(),
            SequenceBody::Timeline { duration, .. } => f64::from(*duration),
        }
    }
}

impl TryFrom<RawSequenceDef> for SequenceDef {
    type Error = ScriptError;

    fn try_from(raw: RawSequenceDef) -> Result<Self, Self::Error> {
        match raw {
            RawSequenceDef::Timeline(t) => {
                let entries = t
                    .timeline
                    .into_iter()
                    .map(|entry| {
                        Ok(TimelineEntry {
                            at: entry.at,
                            action: Action::try_from(entry.action)?,
                        })
                    })
                    .collect::<Result<Vec<_>, ScriptError>>()?;
                Ok(Self {
                    body: SequenceBody::Timeline {
                        duration: t.duration,
                        entries,
                    },
                    meta: t.meta,
                })
            },
            RawSequenceDef::Named(s) => Ok(Self {
                body: SequenceBody::Ordered(
                    s.steps
                        .into_iter()
                        .map(Step::try_from)
                        .collect::<Result<Vec<_>, _>>()?,
                ),
                meta: s.meta,
            }),
            RawSequenceDef::Bare(steps) => Ok(Self {
                body: SequenceBody::Ordered(
                    steps
                        .into_iter()
                        .map(Step::try_from)
                        .collect::<Result<Vec<_>, _>>()?,
                ),
                meta: SequenceMeta::default(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Cues
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct RawCueFrame {
    at: u32,
    actions: Vec<RawAction>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawCueDef {
    Timeline {
        duration: u32,
        timeline: Vec<RawCueFrame>,
    },
    Commands {
        commands: Vec<RawAction>,
    },
    Actions {
        actions: Vec<RawAction>,
    },
    List(Vec<RawAction>),
    Single(RawAction),
}

/// A named cue, classified structurally at load. Legacy forms survive as
/// [`CueDef::Legacy`] and warn when fired.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawCueDef")]
pub enum CueDef {
    Single(Action),
    List(Vec<Action>),
    Timeline { duration: u32, frames: Vec<CueFrame> },
    Legacy(Vec<Action>),
}

/// One timeline frame: `actions` fire together once `duration - at` seconds
/// have elapsed from cue dispatch.
#[derive(Debug, Clone)]
pub struct CueFrame {
    pub at: u32,
    pub actions: Vec<Action>,
}

fn convert_actions(raws: Vec<RawAction>) -> Result<Vec<Action>, ScriptError> {
    raws.into_iter().map(Action::try_from).collect()
}

impl TryFrom<RawCueDef> for CueDef {
    type Error = ScriptError;

    fn try_from(raw: RawCueDef) -> Result<Self, Self::Error> {
        match raw {
            RawCueDef::Timeline { duration, timeline } => {
                let frames = timeline
                    .into_iter()
                    .map(|frame| {
                        Ok(CueFrame {
                            at: frame.at,
                            actions: convert_actions(frame.actions)?,
                        })
                    })
                    .collect::<Result<Vec<_>, ScriptError>>()?;
                Ok(Self::Timeline { duration, frames })
            },
            RawCueDef::Commands { commands } => Ok(Self::Legacy(convert_actions(commands)?)),
            RawCueDef::Actions { actions } => Ok(Self::Legacy(convert_actions(actions)?)),
            RawCueDef::List(actions) => Ok(Self::List(convert_actions(actions)?)),
            RawCueDef::Single(action) => Ok(Self::Single(Action::try_from(action)?)),
        }
    }
}
