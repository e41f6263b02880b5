//! Parsed-argument model shared by the parser, the execution engine, and
//! command actions.
//!
//! An [`Args`] serializes to the shape actions conventionally inspect:
//! `options` as a nested object, positional slots flattened to top-level
//! keys, and the unlabeled leftover-token list (commands with zero declared
//! argument slots) under `args`.

use std::collections::BTreeMap;

use serde::Serialize;

/// Value bound to one positional argument slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ArgValue {
    /// A single token.
    Str(String),
    /// A variadic slot: all remaining tokens, in order.
    List(Vec<String>),
}

impl ArgValue {
    /// The token, when this is a single-token slot.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Str(s) => Some(s),
            ArgValue::List(_) => None,
        }
    }

    /// The token list, when this is a variadic slot.
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            ArgValue::Str(_) => None,
            ArgValue::List(items) => Some(items),
        }
    }
}

/// Value bound to one option flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OptionValue {
    /// Present without a value (`--flag`), or negated (`--no-flag` gives
    /// `false`, and its implicit default gives `true`).
    Bool(bool),
    /// Present with a value (`--flag value`, `--flag=value`).
    Str(String),
}

impl OptionValue {
    /// Whether the option counts as "switched on".
    pub fn is_truthy(&self) -> bool {
        match self {
            OptionValue::Bool(b) => *b,
            OptionValue::Str(s) => !s.is_empty(),
        }
    }

    /// The value string, when one was given.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::Bool(_) => None,
            OptionValue::Str(s) => Some(s),
        }
    }
}

/// Parsed arguments for one command invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Args {
    /// Parsed option flags, keyed by the option's result-field name.
    pub options: BTreeMap<String, OptionValue>,

    /// Positional slots, keyed by their declared names.
    #[serde(flatten)]
    positional: BTreeMap<String, ArgValue>,

    /// Leftover tokens for commands that declare zero argument slots.
    #[serde(rename = "args", skip_serializing_if = "Vec::is_empty")]
    rest: Vec<String>,

    /// The raw line, set only for mode-redirected invocations where the
    /// whole input becomes the action's argument.
    #[serde(skip)]
    raw: Option<String>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arguments for a mode-redirected line: no parsing, just the raw text.
    pub fn from_raw(line: &str) -> Self {
        Args {
            raw: Some(line.to_string()),
            ..Args::default()
        }
    }

    pub fn insert_arg(&mut self, name: &str, value: ArgValue) {
        self.positional.insert(name.to_string(), value);
    }

    pub fn insert_option(&mut self, field: &str, value: OptionValue) {
        self.options.insert(field.to_string(), value);
    }

    pub fn set_rest(&mut self, tokens: Vec<String>) {
        self.rest = tokens;
    }

    pub fn arg(&self, name: &str) -> Option<&ArgValue> {
        self.positional.get(name)
    }

    pub fn arg_str(&self, name: &str) -> Option<&str> {
        self.positional.get(name).and_then(ArgValue::as_str)
    }

    pub fn arg_list(&self, name: &str) -> Option<&[String]> {
        self.positional.get(name).and_then(ArgValue::as_list)
    }

    pub fn option(&self, field: &str) -> Option<&OptionValue> {
        self.options.get(field)
    }

    pub fn option_bool(&self, field: &str) -> Option<bool> {
        match self.options.get(field) {
            Some(OptionValue::Bool(b)) => Some(*b),
            Some(OptionValue::Str(_)) => Some(true),
            None => None,
        }
    }

    pub fn option_str(&self, field: &str) -> Option<&str> {
        self.options.get(field).and_then(OptionValue::as_str)
    }

    /// Leftover tokens (zero-slot commands only).
    pub fn rest(&self) -> &[String] {
        &self.rest
    }

    /// The raw mode-redirected line, if this invocation came from a mode.
    pub fn raw(&self) -> Option<&str> {
        self.raw.as_deref()
    }

    /// Whether a `--help`-style option was passed.
    pub fn help_requested(&self) -> bool {
        self.options.get("help").is_some_and(OptionValue::is_truthy)
    }
}
