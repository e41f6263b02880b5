//! Error types for conch.

use std::io;

/// Errors produced by the conch framework.
#[derive(Debug, thiserror::Error)]
pub enum ConchError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("missing required argument <{0}>")]
    MissingRequiredArg(String),

    #[error("missing required value for option --{0}")]
    MissingOptionValue(String),

    #[error("invalid option: '{0}'")]
    UnknownOption(String),

    #[error("duplicate alias \"{alias}\" for command \"{command}\"")]
    DuplicateAlias { alias: String, command: String },

    #[error("registration error: {0}")]
    Registration(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("command error: {0}")]
    Action(String),

    #[error("command cancelled")]
    Cancelled,

    #[error("usage error: {0}")]
    Usage(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ConchError>;
