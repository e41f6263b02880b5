//! Host-agnostic keypress types.
//!
//! Terminal adapters map their native key events to these enums. The engine
//! only distinguishes history navigation and tab completion; everything else
//! is [`Key::Other`] and merely resets the tab counter.

use serde::{Deserialize, Serialize};

/// A key the engine reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Key {
    /// History: previous entry.
    Up,
    /// History: next entry.
    Down,
    /// Autocomplete.
    Tab,
    /// Any other key.
    Other,
}

/// What the host should do with the prompt after a keypress.
#[derive(Debug, Clone, PartialEq)]
pub enum KeypressOutcome {
    /// Replace the whole prompt line with this text.
    ReplaceLine(String),
    /// Print this candidate list below the prompt, leaving the line as-is.
    Candidates(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_comparable() {
        assert_eq!(Key::Up, Key::Up);
        assert_ne!(Key::Up, Key::Down);
    }

    #[test]
    fn replace_line_outcome_carries_text() {
        let o = KeypressOutcome::ReplaceLine("help ".into());
        if let KeypressOutcome::ReplaceLine(text) = o {
            assert_eq!(text, "help ");
        } else {
            panic!("wrong variant");
        }
    }

    #[test]
    fn candidates_outcome_carries_list() {
        let o = KeypressOutcome::Candidates(vec!["ced".into(), "cmd".into()]);
        if let KeypressOutcome::Candidates(list) = o {
            assert_eq!(list, vec!["ced".to_string(), "cmd".to_string()]);
        } else {
            panic!("wrong variant");
        }
    }
}
