//! conch core framework.
//!
//! Embeddable interactive-shell engine: command templates with typed
//! arguments and options, a strict FIFO execution queue, pipe chains,
//! mode sub-REPLs, tab completion, and cancellation. This crate does no
//! real I/O of its own; hosts plug terminals and relays in through
//! `conch-io`.

// Re-exports from conch-types (argument, error, event, and config types).
pub use conch_types::{
    ArgValue, Args, ConchError, EngineConfig, EngineEvent, EngineId, Key, KeypressOutcome,
    OptionValue, Result, SessionId,
};

mod builtins;
pub mod command;
pub mod complete;
pub mod context;
pub mod engine;
pub mod parser;
pub mod registry;
pub mod session;

pub use command::{
    ActionFn, ArgSpec, CancelFn, Command, CommandKind, DoneFn, OptionSpec, ParseFn, ValidateFn,
    ValueMode,
};
pub use complete::{Completer, Completion, MatchResult, match_candidates};
pub use context::{ActionFlow, CancelToken, ExecContext};
pub use engine::Engine;
pub use parser::{ParseError, ParsedLine, ParsedStage, parse_line, split_pipes, tokenize};
pub use registry::Registry;
pub use session::Session;
