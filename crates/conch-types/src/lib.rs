//! Foundation types for the conch framework.
//!
//! Everything here is shared by the core engine and the host adapters:
//! the error enum, the parsed-argument model handed to actions, keypress
//! types, engine lifecycle events, and the engine config.

pub mod args;
pub mod config;
pub mod error;
pub mod event;
pub mod input;

/// Parsed arguments delivered to a command action.
pub use args::{ArgValue, Args, OptionValue};
/// Engine construction settings.
pub use config::EngineConfig;
/// Framework-wide error enum and result alias.
pub use error::{ConchError, Result};
/// Lifecycle events and instance ids.
pub use event::{EngineEvent, EngineId, SessionId};
/// Keypress contract between terminal adapters and the engine.
pub use input::{Key, KeypressOutcome};
