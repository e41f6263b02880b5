//! Ordered command registry with replace-in-place semantics.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use conch_types::{ConchError, Result};

use crate::command::{Command, CommandKind};

/// All commands known to one engine, in registration order.
///
/// Registering a name that already exists replaces the old command at its
/// original position, which lets hosts override built-ins without disturbing
/// help ordering.
#[derive(Debug, Default)]
pub struct Registry {
    commands: RwLock<Vec<Arc<Command>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<Command>>> {
        self.commands.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<Command>>> {
        self.commands.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a normal command from a name template.
    pub fn register(&self, template: &str) -> Result<Arc<Command>> {
        self.insert(Command::build(template, CommandKind::Normal)?)
    }

    /// Register a mode command.
    pub fn register_mode(&self, template: &str) -> Result<Arc<Command>> {
        self.insert(Command::build(template, CommandKind::Mode)?)
    }

    /// Register the fallback command invoked when no name matches.
    pub fn register_catch(&self, template: &str) -> Result<Arc<Command>> {
        self.insert(Command::build(template, CommandKind::Catch)?)
    }

    fn insert(&self, cmd: Command) -> Result<Arc<Command>> {
        let cmd = Arc::new(cmd);
        let mut commands = self.write();
        let slot = commands.iter().position(|existing| {
            if cmd.is_catch() {
                existing.is_catch()
            } else {
                existing.name() == cmd.name()
            }
        });
        match slot {
            Some(i) => {
                log::warn!("command '{}' re-registered, replacing", cmd.name());
                commands[i] = Arc::clone(&cmd);
            },
            None => commands.push(Arc::clone(&cmd)),
        }
        Ok(cmd)
    }

    /// Add an alias, enforcing alias uniqueness across every command.
    pub fn add_alias(&self, cmd: &Arc<Command>, alias: &str) -> Result<()> {
        let commands = self.read();
        for existing in commands.iter() {
            if existing.aliases().iter().any(|a| a == alias) {
                return Err(ConchError::DuplicateAlias {
                    alias: alias.to_string(),
                    command: existing.name().to_string(),
                });
            }
        }
        drop(commands);
        cmd.push_alias(alias);
        Ok(())
    }

    /// Look a command up by exact name or alias.
    pub fn find(&self, name: &str) -> Option<Arc<Command>> {
        self.read()
            .iter()
            .find(|cmd| {
                !cmd.is_catch()
                    && (cmd.name() == name || cmd.aliases().iter().any(|a| a == name))
            })
            .cloned()
    }

    /// Remove a specific command instance.
    pub fn remove(&self, cmd: &Arc<Command>) {
        self.write().retain(|existing| !Arc::ptr_eq(existing, cmd));
    }

    /// Snapshot of every command in registration order.
    pub fn commands(&self) -> Vec<Arc<Command>> {
        self.read().clone()
    }

    /// The registered catch command, if any.
    pub fn catch_command(&self) -> Option<Arc<Command>> {
        self.read().iter().find(|cmd| cmd.is_catch()).cloned()
    }

    /// Sorted name and alias candidates for top-level completion.
    ///
    /// Hidden commands and the catch command are left out.
    pub fn completion_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for cmd in self.read().iter() {
            if cmd.is_catch() || cmd.is_hidden() {
                continue;
            }
            names.push(cmd.name().to_string());
            names.extend(cmd.aliases());
        }
        names.sort();
        names
    }

    /// Every matchable (name or alias, command) pair, hidden ones included.
    pub(crate) fn lookup_entries(&self) -> Vec<(String, Arc<Command>)> {
        let mut entries = Vec::new();
        for cmd in self.read().iter() {
            if cmd.is_catch() {
                continue;
            }
            entries.push((cmd.name().to_string(), Arc::clone(cmd)));
            for alias in cmd.aliases() {
                entries.push((alias, Arc::clone(cmd)));
            }
        }
        entries
    }
}
