use serde::Serialize;
use serde_json::{Value, json};

use crate::adapter::JsonMap;
use crate::time::now_millis;

/// Engine lifecycle event published on the events topic as
/// `{event, t, data}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum EngineEvent {
    PhaseTransition {
        from: String,
        to: String,
        duration: u32,
    },
    GameEndTrigger {
        outcome: String,
    },
    SequenceStart {
        name: String,
    },
    SequenceStepStart {
        sequence: String,
        index: usize,
    },
    SequenceStepComplete {
        sequence: String,
        index: usize,
    },
    SequenceStepFailed {
        sequence: String,
        index: usize,
        reason: String,
    },
    SequenceComplete {
        name: String,
        truncated: bool,
    },
    SequenceFailed {
        name: String,
        reason: String,
    },
    SequenceMissing {
        name: String,
    },
    SequenceCycleDetected {
        name: String,
    },
    SequenceDepthExceeded {
        name: String,
        depth: usize,
    },
    SequenceDurationMismatch {
        name: String,
        declared: f64,
        estimated: f64,
    },
    SequenceRejectedBusy {
        name: String,
        running: String,
    },
    CueFired {
        name: String,
    },
    CueMissing {
        name: String,
    },
    HintFired {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        source: String,
    },
    HintSuppressed {
        id: String,
    },
    CommandReceived {
        command: String,
    },
    CommandCompleted {
        command: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    CommandValidationFailed {
        reason: String,
    },
}

impl EngineEvent {
    /// The wire name of this event (the `event` field).
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PhaseTransition { .. } => "phase_transition",
            Self::GameEndTrigger { .. } => "game_end_trigger",
            Self::SequenceStart { .. } => "sequence_start",
            Self::SequenceStepStart { .. } => "sequence_step_start",
            Self::SequenceStepComplete { .. } => "sequence_step_complete",
            Self::SequenceStepFailed { .. } => "sequence_step_failed",
            Self::SequenceComplete { .. } => "sequence_complete",
            Self::SequenceFailed { .. } => "sequence_failed",
            Self::SequenceMissing { .. } => "sequence_missing",
            Self::SequenceCycleDetected { .. } => "sequence_cycle_detected",
            Self::SequenceDepthExceeded { .. } => "sequence_depth_exceeded",
            Self::SequenceDurationMismatch { .. } => "sequence_duration_mismatch",
            Self::SequenceRejectedBusy { .. } => "sequence_rejected_busy",
            Self::CueFired { .. } => "cue_fired",
            Self::CueMissing { .. } => "cue_missing",
            Self::HintFired { .. } => "hint_fired",
            Self::HintSuppressed { .. } => "hint_suppressed",
            Self::CommandReceived { .. } => "command_received",
            Self::CommandCompleted { .. } => "command_completed",
            Self::CommandValidationFailed { .. } => "command_validation_failed",
        }
    }

    /// The full `{event, t, data}` envelope published on the events topic.
    pub fn envelope(&self) -> Value {
        let mut value = serde_json::to_value(self)
            .unwrap_or_else(|_| json!({ "event": self.event_type() }));
        if let Value::Object(map) = &mut value {
            map.insert("t".to_string(), json!(now_millis()));
        }
        value
    }
}

/// Structured warning published on the warnings topic.
#[derive(Debug, Clone)]
pub struct Warning {
    pub warning: String,
    pub message: String,
    pub extra: JsonMap,
}

impl Warning {
    pub fn new(warning: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            warning: warning.into(),
            message: message.into(),
            extra: JsonMap::new(),
        }
    }

    /// Attach an extra field to the payload.
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// The `{warning, message, timestamp, ...extra}` payload.
    pub fn payload(&self) -> Value {
        let mut map = self.extra.clone();
        map.insert("warning".to_string(), json!(self.warning));
        map.insert("message".to_string(), json!(self.message));
        map.insert("timestamp".to_string(), json!(now_millis()));
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_event_t_and_data() {
        let event = EngineEvent::PhaseTransition {
            from: "intro".to_string(),
            to: "gameplay".to_string(),
            duration: 90,
        };
        let env = event.envelope();
        assert_eq!(env["event"], "phase_transition");
        assert!(env["t"].as_u64().is_some());
        assert_eq!(env["data"]["from"], "intro");
        assert_eq!(env["data"]["to"], "gameplay");
        assert_eq!(env["data"]["duration"], 90);
    }

    #[test]
    fn event_type_matches_serialized_tag() {
        let events = [
            EngineEvent::GameEndTrigger {
                outcome: "fail".to_string(),
            },
            EngineEvent::SequenceCycleDetected {
                name: "a".to_string(),
            },
            EngineEvent::HintSuppressed {
                id: "box1".to_string(),
            },
            EngineEvent::CommandValidationFailed {
                reason: "unknown".to_string(),
            },
        ];
        for event in events {
            assert_eq!(event.envelope()["event"], event.event_type());
        }
    }

    #[test]
    fn hint_fired_omits_missing_id() {
        let event = EngineEvent::HintFired {
            id: None,
            source: "manual".to_string(),
        };
        assert!(event.envelope()["data"].get("id").is_none());
    }

    #[test]
    fn warning_payload_shape() {
        let warning = Warning::new("unknown_command", "no such command: warp")
            .with("command", json!("warp"));
        let payload = warning.payload();
        assert_eq!(payload["warning"], "unknown_command");
        assert_eq!(payload["message"], "no such command: warp");
        assert_eq!(payload["command"], "warp");
        assert!(payload["timestamp"].as_u64().is_some());
    }
}
