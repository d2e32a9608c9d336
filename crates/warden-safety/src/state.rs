use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One tracked safety invariant.
///
/// Mutated only through [`crate::SafetyFilter`], atomically, and never
/// deleted during the process lifetime. `decay_rate` is the per-transition
/// bound on how fast the barrier value may shrink (0 < rate <= 1).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SafetyState {
    pub key: String,
    pub value: f64,
    pub limit: f64,
    pub decay_rate: f64,
    pub updated_at: DateTime<Utc>,
}

impl SafetyState {
    pub fn new(key: impl Into<String>, value: f64, limit: f64, decay_rate: f64) -> Self {
        Self {
            key: key.into(),
            value,
            limit,
            decay_rate,
            updated_at: Utc::now(),
        }
    }

    /// Barrier function: distance from the unsafe boundary.
    pub fn barrier(&self) -> f64 {
        self.value - self.limit
    }

    /// Minimum barrier value the next state must keep.
    pub fn barrier_floor(&self) -> f64 {
        (1.0 - self.decay_rate) * self.barrier()
    }

    /// Whether applying `delta` keeps the forward-invariance condition.
    pub fn admits(&self, delta: f64) -> bool {
        let next_barrier = (self.value + delta) - self.limit;
        next_barrier >= self.barrier_floor()
    }

    /// The state after applying an admitted delta.
    ///
    /// The timestamp is strictly advanced so the store's compare-and-swap on
    /// `updated_at` can distinguish the old and new rows even within one
    /// clock tick.
    pub fn apply(&self, delta: f64) -> Self {
        let mut updated_at = Utc::now();
        if updated_at <= self.updated_at {
            updated_at = self.updated_at + Duration::microseconds(1);
        }
        Self {
            key: self.key.clone(),
            value: self.value + delta,
            limit: self.limit,
            decay_rate: self.decay_rate,
            updated_at,
        }
    }
}
