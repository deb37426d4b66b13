use crate::error::HarnessError;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// A named slot holding at most one process-wide instance.
///
/// The slot is the only owner the harness tracks: `clear` hands the instance
/// back so the caller decides when the last reference is dropped.
pub struct SingletonSlot<T> {
    name: &'static str,
    cell: Mutex<Option<Arc<T>>>,
}

impl<T> SingletonSlot<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            cell: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<T>>> {
        self.cell.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.lock().clone()
    }

    pub fn has_instance(&self) -> bool {
        self.lock().is_some()
    }

    /// Stores an instance in an empty slot
    pub fn set(&self, value: Arc<T>) -> Result<(), HarnessError> {
        let mut cell = self.lock();
        if cell.is_some() {
            return Err(HarnessError::SlotOccupied { slot: self.name });
        }
        *cell = Some(value);
        debug!("singleton '{}' stored", self.name);
        Ok(())
    }

    /// Returns the stored instance, building it with `init` on first access.
    ///
    /// The lock is not held while `init` runs, so a factory may consult the
    /// slot itself. If another instance was stored meanwhile, that one wins.
    pub fn get_or_try_init<F, E>(&self, init: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Result<Arc<T>, E>,
    {
        if let Some(existing) = self.get() {
            return Ok(existing);
        }

        let created = init()?;
        let mut cell = self.lock();
        match cell.as_ref() {
            Some(existing) => Ok(existing.clone()),
            None => {
                *cell = Some(created.clone());
                debug!("singleton '{}' constructed", self.name);
                Ok(created)
            }
        }
    }

    /// Empties the slot, returning the instance it held
    pub fn clear(&self) -> Option<Arc<T>> {
        let taken = self.lock().take();
        if taken.is_some() {
            debug!("singleton '{}' cleared", self.name);
        }
        taken
    }

    /// Fails if the slot holds an instance
    pub fn ensure_empty(&self) -> Result<(), HarnessError> {
        if self.has_instance() {
            Err(HarnessError::SlotNotEmpty { slot: self.name })
        } else {
            Ok(())
        }
    }
}
