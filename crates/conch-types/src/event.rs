//! Engine lifecycle events and instance identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one engine instance within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EngineId(pub u64);

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine-{}", self.0)
    }
}

/// Identifies one session (local or remote) within an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Lifecycle notifications delivered to engine observers.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A command was added to the registry.
    CommandRegistered { name: String },
    /// An invocation completed successfully.
    CommandExecuted { command: String },
    /// An invocation completed with an error.
    CommandError { command: String, message: String },
    /// An invocation was cancelled mid-flight.
    CommandCancelled { command: String },
    /// A session entered a mode command's sub-REPL.
    ModeEntered { command: String },
    /// A session left a mode.
    ModeExited { command: String },
}
