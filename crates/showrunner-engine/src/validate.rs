//! Startup validation: walks every mode, phase, schedule, and sequence and
//! reports structural problems before the engine goes live. Errors are fatal
//! at startup; warnings are logged and the game runs anyway.

use showrunner_core::config::{
    GameDefinition, ModeConfig, Phase, ScheduleAction, ScheduleEntry, SequenceRef,
};
use showrunner_core::script::{SequenceBody, StepBody};

use crate::classify::classify;

/// Findings from a validation pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_fatal(&self) -> bool {
        !self.errors.is_empty()
    }

    fn error(&mut self, message: String) {
        self.errors.push(message);
    }

    fn warn(&mut self, message: String) {
        self.warnings.push(message);
    }

    /// Log every finding through tracing.
    pub fn log(&self) {
        for warning in &self.warnings {
            tracing::warn!("{warning}");
        }
        for error in &self.errors {
            tracing::error!("{error}");
        }
    }
}

/// Validate the whole definition.
pub fn validate(def: &GameDefinition) -> ValidationReport {
    let mut report = ValidationReport::default();

    if def.zones.is_empty() {
        report.warn("no zones configured; device commands will all fail".to_string());
    }
    if def.modes.is_empty() {
        report.error("no modes configured".to_string());
    }

    for (mode_id, mode) in &def.modes {
        validate_mode(def, mode_id, mode, &mut report);
    }

    for name in def.sequences.keys() {
        validate_sequence_body(def, None, &format!("sequence {name}"), name, &mut report);
    }

    if def.idle.enabled {
        if def.idle.interval_secs == 0 {
            report.error("idle.interval-secs must be > 0 when idle is enabled".to_string());
        }
        if def.resolve_sequence(&def.idle.sequence, None).is_none() {
            report.error(format!(
                "idle sequence {} does not resolve",
                def.idle.sequence
            ));
        }
    }

    report
}

fn validate_mode(
    def: &GameDefinition,
    mode_id: &str,
    mode: &ModeConfig,
    report: &mut ValidationReport,
) {
    if mode.phases.is_empty() {
        report.warn(format!("mode {mode_id}: no phases defined"));
    }
    for (phase, cfg) in &mode.phases {
        let where_ = format!("mode {mode_id} phase {phase}");
        let has_sequence = cfg.sequence.is_some();
        let has_schedule = !cfg.schedule.is_empty();
        if has_sequence && has_schedule {
            report.warn(format!(
                "{where_}: both sequence and schedule; the sequence runs first"
            ));
        }
        if !has_sequence && !has_schedule && cfg.explicit_duration().is_none() {
            report.warn(format!("{where_}: no duration, sequence, or schedule (no-op)"));
        }
        if *phase == Phase::Intro && has_schedule && cfg.explicit_duration().is_none() {
            report.warn(format!(
                "{where_}: schedule without a duration never gets ticks"
            ));
        }

        if let Some(seq) = &cfg.sequence {
            match seq {
                SequenceRef::Name(name) => {
                    if def.resolve_sequence(name, Some(mode_id)).is_none() {
                        report.error(format!("{where_}: sequence {name} does not resolve"));
                    } else {
                        validate_sequence_body(def, Some(mode_id), &where_, name, report);
                    }
                },
                SequenceRef::Inline(inline) => {
                    validate_body(def, Some(mode_id), &where_, &inline.body, report);
                },
            }
        }
        for entry in &cfg.schedule {
            validate_entry(def, Some(mode_id), &where_, entry, report);
        }
    }

    for name in mode.sequences.keys() {
        validate_sequence_body(
            def,
            Some(mode_id),
            &format!("mode {mode_id} sequence {name}"),
            name,
            report,
        );
    }
}

fn validate_entry(
    def: &GameDefinition,
    mode: Option<&str>,
    where_: &str,
    entry: &ScheduleEntry,
    report: &mut ValidationReport,
) {
    match &entry.action {
        ScheduleAction::FireSeq(name) => {
            if def.resolve_sequence(name, mode).is_none() {
                report.error(format!(
                    "{where_}: schedule at={} fires missing sequence {name}",
                    entry.at
                ));
            }
        },
        ScheduleAction::FireCue(name) => {
            if def.resolve_cue(name, mode).is_none() {
                report.warn(format!(
                    "{where_}: schedule at={} fires missing cue {name}",
                    entry.at
                ));
            }
        },
        ScheduleAction::Fire(name) => {
            if classify(def, mode, name).is_none() {
                report.warn(format!(
                    "{where_}: schedule at={} fires unknown name {name}",
                    entry.at
                ));
            }
        },
        ScheduleAction::Hint { id, .. } | ScheduleAction::PlayHint(id) => {
            if def.find_hint(id, mode).is_none() {
                report.warn(format!(
                    "{where_}: schedule at={} plays unknown hint {id}",
                    entry.at
                ));
            }
        },
        ScheduleAction::ZoneCommand { zones, .. } => {
            for zone in zones {
                if !def.zones.contains_key(zone) {
                    report.warn(format!(
                        "{where_}: schedule at={} targets unknown zone {zone}",
                        entry.at
                    ));
                }
            }
        },
        ScheduleAction::End(_) => {},
    }
}

/// Resolve a sequence and walk its steps for dangling references.
fn validate_sequence_body(
    def: &GameDefinition,
    mode: Option<&str>,
    where_: &str,
    name: &str,
    report: &mut ValidationReport,
) {
    let Some((_, seq)) = def.resolve_sequence(name, mode) else {
        return;
    };
    validate_body(def, mode, where_, &seq.body, report);
}

fn validate_body(
    def: &GameDefinition,
    mode: Option<&str>,
    where_: &str,
    body: &SequenceBody,
    report: &mut ValidationReport,
) {
    let SequenceBody::Ordered(steps) = body else {
        return;
    };
    for (index, step) in steps.iter().enumerate() {
        match &step.body {
            StepBody::FireSeq(name) => {
                if def.resolve_sequence(name, mode).is_none() {
                    report.error(format!(
                        "{where_} step {index}: fire-seq {name} does not resolve"
                    ));
                }
            },
            StepBody::FireCue(name) => {
                if def.resolve_cue(name, mode).is_none() {
                    report.warn(format!("{where_} step {index}: fire-cue {name} missing"));
                }
            },
            StepBody::Fire(name) => {
                if !name.contains("{{") && classify(def, mode, name).is_none() {
                    report.warn(format!("{where_} step {index}: fire {name} unknown"));
                }
            },
            StepBody::Command { zones, .. }
            | StepBody::VerifyBrowser { zones, .. }
            | StepBody::VerifyImage { zones, .. } => {
                for zone in zones {
                    if !def.zones.contains_key(zone) {
                        report.warn(format!("{where_} step {index}: unknown zone {zone}"));
                    }
                }
            },
            _ => {},
        }
    }
}
