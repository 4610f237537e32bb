use crate::{KvStore, StoreError, StoreResult};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

#[derive(Debug, Default)]
struct MemState {
    committed: BTreeMap<String, String>,
    /// `None` marks a pending delete.
    pending: HashMap<String, Option<String>>,
    closed: bool,
}

/// In-memory store. Clones share the same underlying state, which lets a test
/// hold on to the "disk" while the bridge under test is torn down.
#[derive(Clone, Default)]
pub struct MemKvStore {
    state: Arc<Mutex<MemState>>,
}

impl std::fmt::Debug for MemKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.state.lock();
        f.debug_struct("MemKvStore")
            .field("committed", &guard.committed.len())
            .field("pending", &guard.pending.len())
            .field("closed", &guard.closed)
            .finish()
    }
}

impl MemKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store whose committed contents are `entries`.
    pub fn from_committed(entries: BTreeMap<String, String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemState {
                committed: entries,
                ..MemState::default()
            })),
        }
    }

    /// Copy of the durable contents, ignoring pending writes.
    pub fn committed(&self) -> BTreeMap<String, String> {
        self.state.lock().committed.clone()
    }

    /// Simulate a process crash followed by a reopen: a fresh handle over the
    /// committed contents only.
    pub fn reopen(&self) -> Self {
        Self::from_committed(self.committed())
    }

    pub fn has_pending(&self) -> bool {
        !self.state.lock().pending.is_empty()
    }
}

impl KvStore for MemKvStore {
    fn has(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let guard = self.state.lock();
        if guard.closed {
            return Err(StoreError::Closed);
        }
        if let Some(pending) = guard.pending.get(key) {
            return Ok(pending.clone());
        }
        Ok(guard.committed.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut guard = self.state.lock();
        if guard.closed {
            return Err(StoreError::Closed);
        }
        guard.pending.insert(key.to_string(), Some(value.to_string()));
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        let mut guard = self.state.lock();
        if guard.closed {
            return Err(StoreError::Closed);
        }
        guard.pending.insert(key.to_string(), None);
        Ok(())
    }

    fn commit(&self) -> StoreResult<()> {
        let mut guard = self.state.lock();
        if guard.closed {
            return Err(StoreError::Closed);
        }
        let pending = std::mem::take(&mut guard.pending);
        for (key, value) in pending {
            match value {
                Some(value) => {
                    guard.committed.insert(key, value);
                }
                None => {
                    guard.committed.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn abort(&self) -> StoreResult<()> {
        let mut guard = self.state.lock();
        if guard.closed {
            return Err(StoreError::Closed);
        }
        guard.pending.clear();
        Ok(())
    }

    fn close(&self) -> StoreResult<()> {
        let mut guard = self.state.lock();
        guard.pending.clear();
        guard.closed = true;
        Ok(())
    }
}
