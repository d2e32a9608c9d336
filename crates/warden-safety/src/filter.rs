use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{SafetyError, StoreError};
use crate::state::SafetyState;
use crate::store::{CasOutcome, StateStore};
use crate::STATE_UNAVAILABLE;

/// Outcome of a safety check.
#[derive(Clone, Debug)]
pub struct SafetyDecision {
    pub allowed: bool,
    /// The state after the check: the freshly written row when allowed, the
    /// unmodified current row when denied, `None` when the row was unreadable.
    pub state: Option<SafetyState>,
    pub reason: String,
}

impl SafetyDecision {
    fn denied(state: Option<SafetyState>, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            state,
            reason: reason.into(),
        }
    }
}

/// Safety Invariant Filter.
///
/// Evaluates the forward-invariance condition for one proposed delta and, on
/// acceptance, writes the new state through the store's compare-and-swap.
/// Losing writers retry the read-check-write cycle up to `max_cas_retries`
/// times before surfacing [`SafetyError::ContentionExceeded`].
pub struct SafetyFilter {
    store: Arc<dyn StateStore>,
    max_cas_retries: u32,
}

impl SafetyFilter {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            max_cas_retries: 3,
        }
    }

    pub fn with_max_cas_retries(mut self, retries: u32) -> Self {
        self.max_cas_retries = retries;
        self
    }

    /// Check a proposed delta against the tracked invariant for `key`.
    ///
    /// Fails closed: a missing row or a store read failure denies with
    /// reason `"state unavailable"`. No optimistic default exists.
    pub async fn check(&self, key: &str, delta: f64) -> Result<SafetyDecision, SafetyError> {
        for attempt in 0..=self.max_cas_retries {
            let current = match self.store.get(key).await {
                Ok(Some(state)) => state,
                Ok(None) => {
                    warn!(key, "safety state missing, failing closed");
                    return Ok(SafetyDecision::denied(None, STATE_UNAVAILABLE));
                }
                Err(err) => {
                    warn!(key, error = %err, "safety state unreadable, failing closed");
                    return Ok(SafetyDecision::denied(None, STATE_UNAVAILABLE));
                }
            };

            if !current.admits(delta) {
                let reason = format!(
                    "barrier condition violated for {key}: h(next)={:.2} < (1-{:.2})*h(current)={:.2}",
                    current.barrier() + delta,
                    current.decay_rate,
                    current.barrier_floor(),
                );
                debug!(key, delta, %reason, "safety check denied");
                return Ok(SafetyDecision::denied(Some(current), reason));
            }

            let next = current.apply(delta);
            match self.store.compare_and_swap(&current, &next).await {
                Ok(CasOutcome::Applied) => {
                    debug!(key, delta, value = next.value, "safety state advanced");
                    return Ok(SafetyDecision {
                        allowed: true,
                        reason: format!(
                            "barrier condition holds for {key}: h(next)={:.2} >= {:.2}",
                            next.barrier(),
                            current.barrier_floor(),
                        ),
                        state: Some(next),
                    });
                }
                Ok(CasOutcome::Conflict) => {
                    debug!(key, attempt, "compare-and-swap lost, retrying");
                    continue;
                }
                Err(StoreError::NotFound(_)) => {
                    // Row vanished between read and write; treat as unreadable.
                    warn!(key, "safety state disappeared mid-check, failing closed");
                    return Ok(SafetyDecision::denied(None, STATE_UNAVAILABLE));
                }
                Err(err) => {
                    warn!(key, error = %err, "safety state write failed, failing closed");
                    return Ok(SafetyDecision::denied(None, STATE_UNAVAILABLE));
                }
            }
        }

        Err(SafetyError::ContentionExceeded {
            key: key.to_string(),
            attempts: self.max_cas_retries + 1,
        })
    }

    /// Seed a new tracked invariant (administrative).
    pub async fn seed(&self, state: SafetyState) -> Result<(), SafetyError> {
        self.store.insert(state).await.map_err(SafetyError::from)
    }

    /// Explicit administrative reset of a tracked invariant.
    pub async fn reset(&self, state: SafetyState) -> Result<(), SafetyError> {
        warn!(key = %state.key, value = state.value, "administrative safety state reset");
        self.store.reset(state).await.map_err(SafetyError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStateStore;
    use async_trait::async_trait;

    /// Store whose reads always fail.
    struct BrokenStore;

    #[async_trait]
    impl StateStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<SafetyState>, StoreError> {
            Err(StoreError::Backend("disk on fire".into()))
        }
        async fn compare_and_swap(
            &self,
            _expected: &SafetyState,
            _next: &SafetyState,
        ) -> Result<CasOutcome, StoreError> {
            Err(StoreError::Backend("disk on fire".into()))
        }
        async fn insert(&self, _state: SafetyState) -> Result<(), StoreError> {
            Err(StoreError::Backend("disk on fire".into()))
        }
        async fn reset(&self, _state: SafetyState) -> Result<(), StoreError> {
            Err(StoreError::Backend("disk on fire".into()))
        }
    }

    /// Store that always reports a CAS conflict.
    struct ContendedStore {
        inner: MemoryStateStore,
    }

    #[async_trait]
    impl StateStore for ContendedStore {
        async fn get(&self, key: &str) -> Result<Option<SafetyState>, StoreError> {
            self.inner.get(key).await
        }
        async fn compare_and_swap(
            &self,
            _expected: &SafetyState,
            _next: &SafetyState,
        ) -> Result<CasOutcome, StoreError> {
            Ok(CasOutcome::Conflict)
        }
        async fn insert(&self, state: SafetyState) -> Result<(), StoreError> {
            self.inner.insert(state).await
        }
        async fn reset(&self, state: SafetyState) -> Result<(), StoreError> {
            self.inner.reset(state).await
        }
    }

    async fn seeded_filter() -> SafetyFilter {
        let filter = SafetyFilter::new(Arc::new(MemoryStateStore::new()));
        filter
            .seed(SafetyState::new("cash", 100.0, 0.0, 0.1))
            .await
            .unwrap();
        filter
    }

    #[tokio::test]
    async fn denies_barrier_violation_with_reason() {
        let filter = seeded_filter().await;
        let decision = filter.check("cash", -95.0).await.unwrap();
        assert!(!decision.allowed);
        assert!(decision.reason.contains("barrier condition violated"));
        // Denied checks never write.
        assert_eq!(decision.state.unwrap().value, 100.0);
    }

    #[tokio::test]
    async fn allows_and_persists_within_barrier() {
        let filter = seeded_filter().await;
        let decision = filter.check("cash", -5.0).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.state.unwrap().value, 95.0);
    }

    #[tokio::test]
    async fn missing_key_fails_closed() {
        let filter = SafetyFilter::new(Arc::new(MemoryStateStore::new()));
        let decision = filter.check("cash", -1.0).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.reason, STATE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn unreadable_store_fails_closed() {
        let filter = SafetyFilter::new(Arc::new(BrokenStore));
        let decision = filter.check("cash", -1.0).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.reason, STATE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn contention_surfaces_after_bounded_retries() {
        let inner = MemoryStateStore::new();
        inner
            .insert(SafetyState::new("cash", 100.0, 0.0, 0.1))
            .await
            .unwrap();
        let filter =
            SafetyFilter::new(Arc::new(ContendedStore { inner })).with_max_cas_retries(2);
        let err = filter.check("cash", -1.0).await.unwrap_err();
        assert!(matches!(
            err,
            SafetyError::ContentionExceeded { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn concurrent_checks_serialize_through_cas() {
        let store = Arc::new(MemoryStateStore::new());
        store
            .insert(SafetyState::new("cash", 100.0, 0.0, 1.0))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let filter = SafetyFilter::new(store.clone()).with_max_cas_retries(32);
            handles.push(tokio::spawn(async move {
                filter.check("cash", -10.0).await.unwrap()
            }));
        }
        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap().allowed {
                allowed += 1;
            }
        }
        // decay_rate 1.0 admits any non-negative next barrier: all ten
        // withdrawals fit, and the final balance reflects every one.
        assert_eq!(allowed, 10);
        assert_eq!(store.get("cash").await.unwrap().unwrap().value, 0.0);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            /// Accepted transitions never shrink the barrier below the decay
            /// floor, regardless of the delta sequence.
            #[test]
            fn accepted_transitions_respect_barrier(
                deltas in proptest::collection::vec(-200.0f64..200.0, 1..40),
                decay in 0.01f64..1.0,
            ) {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                rt.block_on(async move {
                    let store = Arc::new(MemoryStateStore::new());
                    store
                        .insert(SafetyState::new("cash", 100.0, 0.0, decay))
                        .await
                        .unwrap();
                    let filter = SafetyFilter::new(store.clone());

                    let mut previous = store.get("cash").await.unwrap().unwrap();
                    for delta in deltas {
                        let decision = filter.check("cash", delta).await.unwrap();
                        let current = store.get("cash").await.unwrap().unwrap();
                        if decision.allowed {
                            prop_assert!(
                                current.barrier() >= previous.barrier_floor() - 1e-9
                            );
                        } else {
                            prop_assert_eq!(current.value, previous.value);
                        }
                        previous = current;
                    }
                    Ok(())
                })?;
            }
        }
    }
}
