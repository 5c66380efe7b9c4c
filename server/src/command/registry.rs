//! Id-keyed registry of live commands

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::handle::CommandHandle;
use crate::error::AgentError;

/// Tracks every command that has been started and not yet reaped
///
/// The lock is only held for map operations, never across an await.
#[derive(Default)]
pub struct CommandRegistry {
    commands: Mutex<HashMap<String, Arc<CommandHandle>>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<CommandHandle>>> {
        self.commands.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a handle under its id
    pub fn add(&self, handle: Arc<CommandHandle>) -> Result<(), AgentError> {
        let mut commands = self.lock();
        if commands.contains_key(handle.id()) {
            return Err(AgentError::DuplicateId(handle.id().to_string()));
        }
        commands.insert(handle.id().to_string(), handle);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<CommandHandle>> {
        self.lock().get(id).cloned()
    }

    /// Forget a command. Removing an unknown id is not an error.
    pub fn remove(&self, id: &str) -> Option<Arc<CommandHandle>> {
        self.lock().remove(id)
    }

    /// Ids of every registered command, in no particular order
    pub fn all(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
