//! Terminal abstraction and the wire that connects engines to a surface.
//!
//! The engine never talks to a concrete screen. It renders through a
//! [`Terminal`] implementation behind a [`TerminalWire`], so the same engine
//! can drive process stdout, a test capture, or a remote relay. The wire has
//! a single owner at a time: `show()` on one engine steals the surface from
//! whichever engine held it before.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use conch_types::{EngineId, SessionId};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Terminal trait
// ---------------------------------------------------------------------------

/// Abstraction over the surface an engine renders to.
///
/// Only [`render`](Terminal::render) is required. Line editing and the
/// pause/resume hooks default to no-ops so output-only surfaces stay trivial.
pub trait Terminal: Send + Sync {
    /// Write one chunk of output to the surface.
    fn render(&self, text: &str);

    /// Replace the in-progress input line.
    fn set_line(&self, _line: &str) {}

    /// Read the in-progress input line.
    fn get_line(&self) -> String {
        String::new()
    }

    /// Hand the surface to another writer, returning the in-flight line.
    fn pause(&self) -> Option<String> {
        None
    }

    /// Take the surface back, restoring the given line.
    fn resume(&self, _line: &str) {}

    /// Abort any pending prompt.
    fn cancel_prompt(&self) {}
}

/// Terminal that writes to process stdout.
#[derive(Debug, Default)]
pub struct StdTerminal;

impl Terminal for StdTerminal {
    fn render(&self, text: &str) {
        println!("{text}");
    }
}

// ---------------------------------------------------------------------------
// Captured terminal
// ---------------------------------------------------------------------------

/// Terminal that records output in memory.
///
/// Used by tests and by hosts that post-process output before display.
#[derive(Debug, Default)]
pub struct CapturedTerminal {
    lines: Mutex<Vec<String>>,
    buffer: Mutex<String>,
}

impl CapturedTerminal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything rendered so far, in order.
    pub fn output(&self) -> Vec<String> {
        lock(&self.lines).clone()
    }

    /// The most recently rendered chunk, if any.
    pub fn last(&self) -> Option<String> {
        lock(&self.lines).last().cloned()
    }

    /// Drop all recorded output.
    pub fn clear(&self) {
        lock(&self.lines).clear();
    }
}

impl Terminal for CapturedTerminal {
    fn render(&self, text: &str) {
        lock(&self.lines).push(text.to_string());
    }

    fn set_line(&self, line: &str) {
        *lock(&self.buffer) = line.to_string();
    }

    fn get_line(&self) -> String {
        lock(&self.buffer).clone()
    }

    fn pause(&self) -> Option<String> {
        Some(std::mem::take(&mut *lock(&self.buffer)))
    }

    fn resume(&self, line: &str) {
        *lock(&self.buffer) = line.to_string();
    }
}

// ---------------------------------------------------------------------------
// Terminal wire
// ---------------------------------------------------------------------------

struct WireState {
    terminal: Arc<dyn Terminal>,
    owner: Option<EngineId>,
}

/// Shared hand-off point between engines and one terminal surface.
///
/// Any engine may render through the wire at any time. Line access and the
/// pause/resume pair are reserved for the current owner: attaching claims
/// ownership unconditionally (stealing it from the previous holder), while
/// detaching succeeds only for the engine that currently holds it.
pub struct TerminalWire {
    state: Mutex<WireState>,
}

impl TerminalWire {
    pub fn new(terminal: Arc<dyn Terminal>) -> Self {
        Self {
            state: Mutex::new(WireState {
                terminal,
                owner: None,
            }),
        }
    }

    /// Claim the surface for `engine`, displacing any previous owner.
    pub fn attach(&self, engine: EngineId) {
        let mut state = lock(&self.state);
        if let Some(prev) = state.owner
            && prev != engine
        {
            log::debug!("terminal wire moved from {prev} to {engine}");
        }
        state.owner = Some(engine);
    }

    /// Release the surface. No-op unless `engine` is the current owner.
    pub fn detach(&self, engine: EngineId) {
        let mut state = lock(&self.state);
        if state.owner == Some(engine) {
            state.owner = None;
        }
    }

    /// Engine currently holding the surface, if any.
    pub fn owner(&self) -> Option<EngineId> {
        lock(&self.state).owner
    }

    /// Whether `engine` currently holds the surface.
    pub fn is_owner(&self, engine: EngineId) -> bool {
        lock(&self.state).owner == Some(engine)
    }

    /// Write output. Allowed regardless of ownership.
    pub fn render(&self, text: &str) {
        let terminal = Arc::clone(&lock(&self.state).terminal);
        terminal.render(text);
    }

    /// Replace the input line. Owner only.
    pub fn set_line(&self, engine: EngineId, line: &str) {
        let terminal = {
            let state = lock(&self.state);
            if state.owner != Some(engine) {
                return;
            }
            Arc::clone(&state.terminal)
        };
        terminal.set_line(line);
    }

    /// Read the input line. Owner only.
    pub fn get_line(&self, engine: EngineId) -> Option<String> {
        let terminal = {
            let state = lock(&self.state);
            if state.owner != Some(engine) {
                return None;
            }
            Arc::clone(&state.terminal)
        };
        Some(terminal.get_line())
    }

    /// Pause the surface, yielding the in-flight line. Owner only.
    pub fn pause(&self, engine: EngineId) -> Option<String> {
        let terminal = {
            let state = lock(&self.state);
            if state.owner != Some(engine) {
                return None;
            }
            Arc::clone(&state.terminal)
        };
        terminal.pause()
    }

    /// Resume the surface with a restored line. Owner only.
    pub fn resume(&self, engine: EngineId, line: &str) {
        let terminal = {
            let state = lock(&self.state);
            if state.owner != Some(engine) {
                return;
            }
            Arc::clone(&state.terminal)
        };
        terminal.resume(line);
    }

    /// Abort a pending prompt. Owner only.
    pub fn cancel_prompt(&self, engine: EngineId) {
        let terminal = {
            let state = lock(&self.state);
            if state.owner != Some(engine) {
                return;
            }
            Arc::clone(&state.terminal)
        };
        terminal.cancel_prompt();
    }
}

// ---------------------------------------------------------------------------
// Session relay
// ---------------------------------------------------------------------------

/// Transport for output addressed to a remote session.
///
/// When a downstream engine executes work on behalf of an upstream one, the
/// upstream session's output is forwarded here instead of being rendered on
/// the local surface.
pub trait SessionRelay: Send + Sync {
    /// Deliver one chunk of output to the given session.
    fn forward(&self, session: SessionId, text: &str);
}

/// Relay that records forwarded output in memory.
#[derive(Debug, Default)]
pub struct CapturedRelay {
    forwarded: Mutex<Vec<(SessionId, String)>>,
}

impl CapturedRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every forwarded chunk so far, in order.
    pub fn output(&self) -> Vec<(SessionId, String)> {
        lock(&self.forwarded).clone()
    }
}

impl SessionRelay for CapturedRelay {
    fn forward(&self, session: SessionId, text: &str) {
        lock(&self.forwarded).push((session, text.to_string()));
    }
}

// ---------------------------------------------------------------------------
// In-module tests
// ---------------------------------------------------------------------------
