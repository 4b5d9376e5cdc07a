use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::shared_types::SessionId;

// -----------------------------------------------------------------------------
// ----- NumberedPool ----------------------------------------------------------

/// Typed container of values keyed by a numeric id, with exclusive leases.
///
/// A lease moves the value out of the pool, so whoever holds a lease is the
/// only party able to touch the value until it is put back. A second lease on
/// the same id fails fast with `PoolError::Busy`.
#[derive(Debug)]
pub struct NumberedPool<T> {
    entries: Mutex<HashMap<SessionId, Entry<T>>>,
    limit: Option<usize>,
}

#[derive(Debug)]
struct Entry<T> {
    slot: Slot<T>,
    last_used: Instant,
}

#[derive(Debug)]
enum Slot<T> {
    Idle(T),
    Leased { purpose: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub registered: usize,
    pub leased: usize,
    pub idle: usize,
}

// -----------------------------------------------------------------------------
// ----- NumberedPool: Static --------------------------------------------------

impl<T> NumberedPool<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            limit: None,
        }
    }

    /// Pool refusing registrations once `limit` entries are present.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            limit: Some(limit),
        }
    }
}

impl<T> Default for NumberedPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

// -----------------------------------------------------------------------------
// ----- NumberedPool: Public --------------------------------------------------

impl<T> NumberedPool<T> {
    /// Inserts a new, unleased entry.
    pub fn register(&self, id: SessionId, value: T) -> Result<(), PoolError> {
        let mut entries = self.entries.lock();

        if entries.contains_key(&id) {
            return Err(PoolError::Duplicate(id));
        }

        if let Some(limit) = self.limit {
            if entries.len() >= limit {
                return Err(PoolError::Full { limit });
            }
        }

        entries.insert(
            id,
            Entry {
                slot: Slot::Idle(value),
                last_used: Instant::now(),
            },
        );

        Ok(())
    }

    /// Leases the entry: marks it busy on behalf of `purpose` and hands the
    /// value to the caller, who must `put` it back.
    pub fn get(&self, id: SessionId, purpose: &'static str) -> Result<T, PoolError> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&id).ok_or(PoolError::NotFound(id))?;

        match std::mem::replace(&mut entry.slot, Slot::Leased { purpose }) {
            Slot::Idle(value) => {
                entry.last_used = Instant::now();
                Ok(value)
            }
            Slot::Leased { purpose: holder } => {
                entry.slot = Slot::Leased { purpose: holder };
                Err(PoolError::Busy { id, purpose: holder })
            }
        }
    }

    /// Releases a lease. Returns the value back when there is no leased entry
    /// under `id` to receive it (unregistered while leased, or never leased);
    /// the caller then owns its teardown.
    pub fn put(&self, id: SessionId, value: T) -> Option<T> {
        let mut entries = self.entries.lock();

        let Some(entry) = entries.get_mut(&id) else {
            return Some(value);
        };

        if !matches!(entry.slot, Slot::Leased { .. }) {
            return Some(value);
        }

        entry.slot = Slot::Idle(value);
        entry.last_used = Instant::now();
        None
    }

    /// Scoped `get`: the returned guard puts the value back when dropped.
    pub fn lease(&self, id: SessionId, purpose: &'static str) -> Result<Lease<'_, T>, PoolError> {
        let value = self.get(id, purpose)?;
        Ok(Lease {
            pool: self,
            id,
            value: Some(value),
        })
    }

    /// Removes the entry. Returns the value if it was idle; a leased value
    /// stays with its lease holder, whose `put` will then hand it back.
    pub fn unregister(&self, id: SessionId) -> Option<T> {
        let entry = self.entries.lock().remove(&id)?;
        match entry.slot {
            Slot::Idle(value) => Some(value),
            Slot::Leased { .. } => None,
        }
    }

    /// Removes and returns every idle entry unused for at least `idle_for`.
    pub fn take_idle(&self, idle_for: Duration) -> Vec<(SessionId, T)> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let outdated: Vec<SessionId> = entries
            .iter()
            .filter(|(_, entry)| {
                matches!(entry.slot, Slot::Idle(_))
                    && now.saturating_duration_since(entry.last_used) >= idle_for
            })
            .map(|(id, _)| *id)
            .collect();

        let mut taken = Vec::with_capacity(outdated.len());
        for id in outdated {
            if let Some(Entry {
                slot: Slot::Idle(value),
                ..
            }) = entries.remove(&id)
            {
                taken.push((id, value));
            }
        }
        taken
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> PoolStats {
        let entries = self.entries.lock();
        let leased = entries
            .values()
            .filter(|entry| matches!(entry.slot, Slot::Leased { .. }))
            .count();

        PoolStats {
            registered: entries.len(),
            leased,
            idle: entries.len() - leased,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Lease -----------------------------------------------------------------

/// Exclusive checkout of a pooled value; released on drop on every exit path.
#[derive(Debug)]
pub struct Lease<'a, T> {
    pool: &'a NumberedPool<T>,
    id: SessionId,
    value: Option<T>,
}

impl<T> Lease<'_, T> {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Puts the value back now. Returns it when the entry was unregistered
    /// while leased; the caller then owns its teardown.
    pub fn release(mut self) -> Option<T> {
        let value = self.value.take()?;
        self.pool.put(self.id, value)
    }

    /// Removes the entry from the pool and keeps the value.
    pub fn remove(mut self) -> Option<T> {
        self.pool.entries.lock().remove(&self.id);
        self.value.take()
    }
}

impl<T> Deref for Lease<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value.as_ref().expect("lease already released")
    }
}

impl<T> DerefMut for Lease<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("lease already released")
    }
}

impl<T> Drop for Lease<'_, T> {
    fn drop(&mut self) {
        let Some(value) = self.value.take() else {
            return;
        };

        if let Some(orphan) = self.pool.put(self.id, value) {
            debug!("session {} unregistered during its lease; dropping it", self.id);
            drop(orphan);
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("{0} not found")]
    NotFound(SessionId),

    #[error("{id} in use: {purpose}")]
    Busy { id: SessionId, purpose: &'static str },

    #[error("{0} already present")]
    Duplicate(SessionId),

    #[error("pool is full (limit {limit})")]
    Full { limit: usize },
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
