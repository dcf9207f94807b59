//! Name classification for the unified `fire` path: is the name a hint, a
//! cue, or a sequence? Registries are consulted in that fixed priority.

use showrunner_core::config::GameDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    Hint,
    Cue,
    Sequence,
}

/// Classify a fired name against the active mode's registries.
pub fn classify(def: &GameDefinition, mode: Option<&str>, name: &str) -> Option<NameKind> {
    if def.find_hint(name, mode).is_some() {
        return Some(NameKind::Hint);
    }
    if def.resolve_cue(name, mode).is_some() {
        return Some(NameKind::Cue);
    }
    if def.resolve_sequence(name, mode).is_some() {
        return Some(NameKind::Sequence);
    }
    None
}
