//! Process-wide registry of cancellable notification chains.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

/// Identifier of one notification chain.
///
/// Combines the user id, the creation time and a per-registry sequence
/// number, so two chains created in the same millisecond never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChainId(String);

impl ChainId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ChainId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct Registered {
    user_id: i64,
    token: CancellationToken,
}

/// Chain id → cancellation handle. Runtime only; lost on restart.
pub struct TaskRegistry {
    tasks: Mutex<HashMap<ChainId, Registered>>,
    seq: AtomicU64,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self { tasks: Mutex::new(HashMap::new()), seq: AtomicU64::new(1) }
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<ChainId, Registered>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn next_id(&self, user_id: i64, created_at: DateTime<Utc>) -> ChainId {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        ChainId(format!("{}_{}_{}", user_id, created_at.timestamp_millis(), seq))
    }

    pub fn register(&self, chain_id: ChainId, user_id: i64, token: CancellationToken) {
        self.tasks().insert(chain_id, Registered { user_id, token });
    }

    /// Cancel and evict a chain. No-op if absent or already finished.
    pub fn cancel(&self, chain_id: &ChainId) -> bool {
        match self.tasks().remove(chain_id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Evict a chain without cancelling it.
    pub fn forget(&self, chain_id: &ChainId) {
        self.tasks().remove(chain_id);
    }

    /// Install `chain_id` as the user's only live chain.
    ///
    /// Runs `persist` first (it records the new id durably and returns the
    /// previous one), then cancels the previous chain and any other chain
    /// still registered for the user, then registers the new one. All of it
    /// happens under the registry lock, so concurrent calls for the same
    /// user cannot leave two chains alive.
    pub fn supersede<E>(
        &self,
        chain_id: ChainId,
        user_id: i64,
        token: CancellationToken,
        persist: impl FnOnce() -> Result<Option<ChainId>, E>,
    ) -> Result<Option<ChainId>, E> {
        let mut tasks = self.tasks();
        let previous = persist()?;

        if let Some(entry) = previous.as_ref().and_then(|id| tasks.remove(id)) {
            entry.token.cancel();
        }
        cancel_user_locked(&mut tasks, user_id);

        tasks.insert(chain_id, Registered { user_id, token });
        Ok(previous)
    }

    /// Cancel every chain of the user after running `persist` under the lock.
    pub fn evict_user<E>(&self, user_id: i64, persist: impl FnOnce() -> Result<(), E>) -> Result<usize, E> {
        let mut tasks = self.tasks();
        persist()?;
        Ok(cancel_user_locked(&mut tasks, user_id))
    }

    pub fn live_for_user(&self, user_id: i64) -> usize {
        self.tasks().values().filter(|entry| entry.user_id == user_id).count()
    }

    pub fn len(&self) -> usize {
        self.tasks().len()
    }
}

fn cancel_user_locked(tasks: &mut HashMap<ChainId, Registered>, user_id: i64) -> usize {
    let stale: Vec<ChainId> = tasks
        .iter()
        .filter(|(_, entry)| entry.user_id == user_id)
        .map(|(id, _)| id.clone())
        .collect();
    for id in &stale {
        if let Some(entry) = tasks.remove(id) {
            entry.token.cancel();
        }
    }
    stale.len()
}
