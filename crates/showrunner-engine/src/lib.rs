//! The orchestration core: zone registry, sequence executor, cue dispatcher,
//! hint subsystem, and the phase engine with its unified 1 Hz scheduler.

pub mod classify;
pub mod command;
pub mod ctx;
pub mod cue;
pub mod engine;
pub mod hint;
pub mod phase;
pub mod registry;
pub mod scheduler;
pub mod sequence;
pub mod validate;

#[cfg(test)]
pub(crate) mod test_support;

pub use ctx::{EngineSignal, ExecCtx, GameState, SharedState};
pub use engine::{Engine, EngineHandle};
pub use registry::{RegistryError, ZoneRegistry};
