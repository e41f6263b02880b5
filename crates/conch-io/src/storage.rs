//! Per-instance key/value storage.
//!
//! Commands stash small pieces of state here between runs. The store is
//! inert until it is given an id; with a storage path configured, writes go
//! to `{id}.storage.json` so two instances with different ids never see each
//! other's data.

use std::collections::BTreeMap;
use std::path::PathBuf;

use conch_types::{ConchError, Result};

/// String key/value store scoped to one named instance.
#[derive(Debug, Default)]
pub struct LocalStorage {
    items: BTreeMap<String, String>,
    id: Option<String>,
    dir: Option<PathBuf>,
}

impl LocalStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory storage files are written to. Set this before [`init`].
    ///
    /// [`init`]: LocalStorage::init
    pub fn set_storage_path(&mut self, dir: impl Into<PathBuf>) {
        self.dir = Some(dir.into());
    }

    /// Bind the store to an id and load any previously saved items.
    ///
    /// A missing file starts empty. An unreadable one is logged and
    /// discarded rather than surfaced.
    pub fn init(&mut self, id: &str) {
        self.id = Some(id.to_string());
        let Some(path) = self.file_path() else {
            return;
        };
        match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<BTreeMap<String, String>>(&text) {
                Ok(items) => self.items = items,
                Err(err) => {
                    log::warn!("discarding corrupt storage file {}: {err}", path.display());
                },
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                log::warn!("cannot read storage file {}: {err}", path.display());
            },
        }
    }

    /// Whether the store has been bound to an id.
    pub fn is_init(&self) -> bool {
        self.id.is_some()
    }

    /// Read a value.
    pub fn get_item(&self, key: &str) -> Result<Option<String>> {
        self.require_init()?;
        Ok(self.items.get(key).cloned())
    }

    /// Write a value.
    pub fn set_item(&mut self, key: &str, value: &str) -> Result<()> {
        self.require_init()?;
        self.items.insert(key.to_string(), value.to_string());
        self.persist();
        Ok(())
    }

    /// Delete a value, returning what was stored.
    pub fn remove_item(&mut self, key: &str) -> Result<Option<String>> {
        self.require_init()?;
        let removed = self.items.remove(key);
        self.persist();
        Ok(removed)
    }

    /// Delete every value.
    pub fn clear(&mut self) -> Result<()> {
        self.require_init()?;
        self.items.clear();
        self.persist();
        Ok(())
    }

    fn require_init(&self) -> Result<()> {
        if self.id.is_none() {
            return Err(ConchError::Usage(
                "local storage requires an id; call local_storage() with a unique id first"
                    .to_string(),
            ));
        }
        Ok(())
    }

    fn file_path(&self) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        let id = self.id.as_ref()?;
        Some(dir.join(format!("{}.storage.json", crate::sanitize_id(id))))
    }

    fn persist(&self) {
        let Some(path) = self.file_path() else {
            return;
        };
        let json = match serde_json::to_string(&self.items) {
            Ok(json) => json,
            Err(err) => {
                log::warn!("cannot serialize storage: {err}");
                return;
            },
        };
        if let Err(err) = std::fs::write(&path, json) {
            log::warn!("cannot write storage file {}: {err}", path.display());
        }
    }
}
