use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::state::SafetyState;

/// Result of a compare-and-swap attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CasOutcome {
    /// The swap was applied.
    Applied,
    /// Another writer got there first; re-read and re-check.
    Conflict,
}

/// Durable keyed store for [`SafetyState`] rows.
///
/// The compare-and-swap is the only mutation path used during adjudication;
/// it must be linearizable per key. `insert` and `reset` are administrative
/// operations, never called on the adjudication path.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read the current state for a key.
    async fn get(&self, key: &str) -> Result<Option<SafetyState>, StoreError>;

    /// Atomically replace `expected` with `next`.
    ///
    /// The comparison key is `(key, updated_at)`: if the stored row's
    /// timestamp no longer matches `expected.updated_at`, the swap is
    /// rejected with [`CasOutcome::Conflict`] and nothing is written.
    async fn compare_and_swap(
        &self,
        expected: &SafetyState,
        next: &SafetyState,
    ) -> Result<CasOutcome, StoreError>;

    /// Seed a new tracked invariant. Fails if the key already exists.
    async fn insert(&self, state: SafetyState) -> Result<(), StoreError>;

    /// Administrative reset: unconditionally overwrite the row.
    async fn reset(&self, state: SafetyState) -> Result<(), StoreError>;
}

/// In-memory store for tests and development. Not durable.
pub struct MemoryStateStore {
    rows: RwLock<HashMap<String, SafetyState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<SafetyState>, StoreError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| StoreError::Backend("state lock poisoned".into()))?;
        Ok(rows.get(key).cloned())
    }

    async fn compare_and_swap(
        &self,
        expected: &SafetyState,
        next: &SafetyState,
    ) -> Result<CasOutcome, StoreError> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| StoreError::Backend("state lock poisoned".into()))?;
        match rows.get(&expected.key) {
            Some(current) if current.updated_at == expected.updated_at => {
                rows.insert(next.key.clone(), next.clone());
                Ok(CasOutcome::Applied)
            }
            Some(_) => Ok(CasOutcome::Conflict),
            None => Err(StoreError::NotFound(expected.key.clone())),
        }
    }

    async fn insert(&self, state: SafetyState) -> Result<(), StoreError> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| StoreError::Backend("state lock poisoned".into()))?;
        if rows.contains_key(&state.key) {
            return Err(StoreError::DuplicateKey(state.key));
        }
        rows.insert(state.key.clone(), state);
        Ok(())
    }

    async fn reset(&self, state: SafetyState) -> Result<(), StoreError> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| StoreError::Backend("state lock poisoned".into()))?;
        rows.insert(state.key.clone(), state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cas_applies_when_timestamp_matches() {
        let store = MemoryStateStore::new();
        let state = SafetyState::new("cash", 100.0, 0.0, 0.1);
        store.insert(state.clone()).await.unwrap();

        let next = state.apply(-5.0);
        let outcome = store.compare_and_swap(&state, &next).await.unwrap();
        assert_eq!(outcome, CasOutcome::Applied);
        assert_eq!(store.get("cash").await.unwrap().unwrap().value, 95.0);
    }

    #[tokio::test]
    async fn cas_conflicts_on_stale_read() {
        let store = MemoryStateStore::new();
        let state = SafetyState::new("cash", 100.0, 0.0, 0.1);
        store.insert(state.clone()).await.unwrap();

        // First writer wins.
        let next = state.apply(-5.0);
        store.compare_and_swap(&state, &next).await.unwrap();

        // Second writer still holds the old snapshot.
        let stale_next = state.apply(-10.0);
        let outcome = store.compare_and_swap(&state, &stale_next).await.unwrap();
        assert_eq!(outcome, CasOutcome::Conflict);
        assert_eq!(store.get("cash").await.unwrap().unwrap().value, 95.0);
    }

    #[tokio::test]
    async fn duplicate_insert_rejected() {
        let store = MemoryStateStore::new();
        store
            .insert(SafetyState::new("cash", 100.0, 0.0, 0.1))
            .await
            .unwrap();
        let err = store
            .insert(SafetyState::new("cash", 1.0, 0.0, 0.1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(_)));
    }

    #[tokio::test]
    async fn reset_overwrites() {
        let store = MemoryStateStore::new();
        store
            .insert(SafetyState::new("cash", 100.0, 0.0, 0.1))
            .await
            .unwrap();
        store
            .reset(SafetyState::new("cash", 500.0, 0.0, 0.1))
            .await
            .unwrap();
        assert_eq!(store.get("cash").await.unwrap().unwrap().value, 500.0);
    }
}
