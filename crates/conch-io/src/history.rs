//! Command history with per-mode scopes.
//!
//! Root-level input and input typed inside a mode live in separate scopes.
//! Mode scopes are keyed by the mode command's name and persist alongside the
//! root scope, so re-entering the same mode in a later run restores the lines
//! typed there before.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Entries kept per scope. Appends past this drop the oldest line.
const HISTORY_LIMIT: usize = 500;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct HistoryData {
    root: Vec<String>,
    #[serde(default)]
    modes: BTreeMap<String, Vec<String>>,
}

/// Navigable command history.
///
/// Navigation uses a counter measured from the newest entry: `previous`
/// walks toward the oldest line and clamps there, `next` walks back toward
/// the newest and yields an empty line once it falls off the end. Appending
/// always resets navigation.
///
/// Persistence is optional. With a storage path and an id set, every append
/// rewrites `{id}.history.json` under the storage path, best effort.
#[derive(Debug, Default)]
pub struct History {
    data: HistoryData,
    cursor: usize,
    cursor_stack: Vec<usize>,
    scope_stack: Vec<String>,
    id: Option<String>,
    dir: Option<PathBuf>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory history files are written to. Set this before [`set_id`].
    ///
    /// [`set_id`]: History::set_id
    pub fn set_storage_path(&mut self, dir: impl Into<PathBuf>) {
        self.dir = Some(dir.into());
    }

    /// Name this history and load any previously saved entries for it.
    ///
    /// A missing file starts fresh. An unreadable one is logged and
    /// discarded rather than surfaced.
    pub fn set_id(&mut self, id: &str) {
        self.id = Some(id.to_string());
        let Some(path) = self.file_path() else {
            return;
        };
        match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<HistoryData>(&text) {
                Ok(data) => {
                    self.data = data;
                    // In-flight navigation does not survive a data swap.
                    self.cursor = 0;
                },
                Err(err) => {
                    log::warn!("discarding corrupt history file {}: {err}", path.display());
                },
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                log::warn!("cannot read history file {}: {err}", path.display());
            },
        }
    }

    /// Record an executed line in the current scope.
    ///
    /// Blank lines and lines equal to the scope's newest entry are skipped.
    pub fn append(&mut self, line: &str) {
        self.cursor = 0;
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let scope = self.scope_mut();
        if scope.last().map(String::as_str) == Some(line) {
            return;
        }
        scope.push(line.to_string());
        if scope.len() > HISTORY_LIMIT {
            let excess = scope.len() - HISTORY_LIMIT;
            scope.drain(..excess);
        }
        self.persist();
    }

    /// Step toward the oldest entry. `None` when the scope is empty.
    pub fn previous(&mut self) -> Option<String> {
        let len = self.scope().len();
        if len == 0 {
            return None;
        }
        self.cursor = (self.cursor + 1).min(len);
        self.scope().get(len - self.cursor).cloned()
    }

    /// Step toward the newest entry. `None` when the scope is empty.
    ///
    /// Walking past the newest line yields an empty string, which a caller
    /// uses to blank the input line.
    pub fn next(&mut self) -> Option<String> {
        let len = self.scope().len();
        if len == 0 {
            return None;
        }
        if self.cursor <= 1 {
            self.cursor = 0;
            return Some(String::new());
        }
        self.cursor -= 1;
        self.scope().get(len - self.cursor).cloned()
    }

    /// Switch to the scope for mode `name`, saving the current cursor.
    pub fn enter_mode(&mut self, name: &str) {
        self.cursor_stack.push(self.cursor);
        self.scope_stack.push(name.to_string());
        self.cursor = 0;
        self.data.modes.entry(name.to_string()).or_default();
    }

    /// Leave the current mode scope and restore the saved cursor, clamped
    /// to the outer scope's current length.
    pub fn exit_mode(&mut self) {
        if self.scope_stack.pop().is_some() {
            let restored = self.cursor_stack.pop().unwrap_or(0);
            // The outer scope may have shrunk while the mode was active.
            self.cursor = restored.min(self.scope().len());
        }
    }

    /// Whether navigation currently targets a mode scope.
    pub fn in_mode(&self) -> bool {
        !self.scope_stack.is_empty()
    }

    /// Entries of the current scope, oldest first.
    pub fn entries(&self) -> &[String] {
        self.scope()
    }

    fn scope(&self) -> &[String] {
        match self.scope_stack.last() {
            Some(name) => self.data.modes.get(name).map_or(&[], Vec::as_slice),
            None => &self.data.root,
        }
    }

    /// Drop every scope, in memory and on disk.
    pub fn clear(&mut self) {
        self.data = HistoryData::default();
        self.cursor = 0;
        self.persist();
    }

    fn scope_mut(&mut self) -> &mut Vec<String> {
        match self.scope_stack.last() {
            Some(name) => self.data.modes.entry(name.clone()).or_default(),
            None => &mut self.data.root,
        }
    }

    fn file_path(&self) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        let id = self.id.as_ref()?;
        Some(dir.join(format!("{}.history.json", crate::sanitize_id(id))))
    }

    fn persist(&self) {
        let Some(path) = self.file_path() else {
            return;
        };
        let json = match serde_json::to_string(&self.data) {
            Ok(json) => json,
            Err(err) => {
                log::warn!("cannot serialize history: {err}");
                return;
            },
        };
        if let Err(err) = std::fs::write(&path, json) {
            log::warn!("cannot write history file {}: {err}", path.display());
        }
    }
}
