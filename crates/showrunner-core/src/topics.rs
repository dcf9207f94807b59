/// Topic surfaces the engine publishes and listens on, all derived from the
/// configured game topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameTopics {
    base: String,
}

impl GameTopics {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Inbound operator commands.
    pub fn commands(&self) -> String {
        format!("{}/commands", self.base)
    }

    /// Engine state snapshots (`gameState`, `timeLeft`, ...).
    pub fn state(&self) -> String {
        format!("{}/state", self.base)
    }

    /// Structured lifecycle events (`{event, t, data}`).
    pub fn events(&self) -> String {
        format!("{}/events", self.base)
    }

    /// Structured warnings (`{warning, message, timestamp, ...}`).
    pub fn warnings(&self) -> String {
        format!("{}/warnings", self.base)
    }

    /// Hint executions (`{id?, text?}`).
    pub fn hints(&self) -> String {
        format!("{}/hints", self.base)
    }

    /// Retained registry of the active mode's hints.
    pub fn hints_registry(&self) -> String {
        format!("{}/hints/registry", self.base)
    }

    /// Retained game configuration summary.
    pub fn config(&self) -> String {
        format!("{}/config", self.base)
    }

    /// Mirror of clock actions for a watching UI.
    pub fn clock_mirror(&self) -> String {
        format!("{}/clock", self.base)
    }
}

/// Per-zone topic surfaces derived from the zone's base topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneTopics {
    base: String,
}

impl ZoneTopics {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Verb payloads published by the engine.
    pub fn commands(&self) -> String {
        format!("{}/commands", self.base)
    }

    /// Retained device state consumed by adapters.
    pub fn state(&self) -> String {
        format!("{}/state", self.base)
    }

    pub fn events(&self) -> String {
        format!("{}/events", self.base)
    }

    pub fn warnings(&self) -> String {
        format!("{}/warnings", self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn game_topics_derive_from_base() {
        let t = GameTopics::new("paradox/houdini");
        assert_eq!(t.commands(), "paradox/houdini/commands");
        assert_eq!(t.state(), "paradox/houdini/state");
        assert_eq!(t.events(), "paradox/houdini/events");
        assert_eq!(t.warnings(), "paradox/houdini/warnings");
        assert_eq!(t.hints(), "paradox/houdini/hints");
        assert_eq!(t.hints_registry(), "paradox/houdini/hints/registry");
        assert_eq!(t.config(), "paradox/houdini/config");
        assert_eq!(t.clock_mirror(), "paradox/houdini/clock");
    }

    #[test]
    fn trailing_slash_is_normalized() {
        let t = ZoneTopics::new("paradox/mirror/");
        assert_eq!(t.commands(), "paradox/mirror/commands");
        assert_eq!(t.state(), "paradox/mirror/state");
    }
}
