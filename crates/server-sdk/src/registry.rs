//! Process-wide single-instance slot.

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{GameLiftError, Result};

/// Holds at most one instance.  `set` refuses to overwrite, `get` checks the
/// stored type, `destroy` empties the slot.
pub struct InstanceRegistry {
    slot: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
}

impl InstanceRegistry {
    pub const fn new() -> Self {
        Self {
            slot: parking_lot::const_mutex(None),
        }
    }

    pub fn set<T: Any + Send + Sync>(&self, instance: Arc<T>) -> Result<()> {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return Err(GameLiftError::AlreadyInitialized);
        }
        *slot = Some(instance as Arc<dyn Any + Send + Sync>);
        Ok(())
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        let instance = self
            .slot
            .lock()
            .clone()
            .ok_or(GameLiftError::NotInitialized)?;
        instance
            .downcast::<T>()
            .map_err(|_| GameLiftError::InitializationMismatch)
    }

    pub fn is_set(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Empty the slot, handing back whatever was in it.
    pub fn destroy(&self) -> Result<Arc<dyn Any + Send + Sync>> {
        self.slot.lock().take().ok_or(GameLiftError::NotInitialized)
    }

    /// Empty the slot only if it still holds `instance`.
    pub fn remove_if<T: Any + Send + Sync>(&self, instance: &Arc<T>) -> bool {
        let mut slot = self.slot.lock();
        let matches = slot
            .as_ref()
            .and_then(|held| held.clone().downcast::<T>().ok())
            .map(|held| Arc::ptr_eq(&held, instance))
            .unwrap_or(false);
        if matches {
            *slot = None;
        }
        matches
    }
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
