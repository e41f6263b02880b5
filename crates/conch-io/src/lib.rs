//! Host adapters for the conch framework.
//!
//! The engine core stays free of real I/O. This crate supplies the pieces
//! that touch the outside world: the terminal surface and the wire engines
//! share it through, persistent command history, and per-instance local
//! storage.

pub mod history;
pub mod storage;
pub mod terminal;

pub use history::History;
pub use storage::LocalStorage;
pub use terminal::{
    CapturedRelay, CapturedTerminal, SessionRelay, StdTerminal, Terminal, TerminalWire,
};

/// Make an instance id safe to embed in a file name.
pub(crate) fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
