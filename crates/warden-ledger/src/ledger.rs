use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use tracing::debug;
use warden_types::{ActionId, ActionLedgerEntry, ActionOutcome};

use crate::error::LedgerError;

/// Coarse outcome class, for filtering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutcomeKind {
    Committed,
    Aborted,
    TimedOut,
    ExecutionFailed,
}

impl From<&ActionOutcome> for OutcomeKind {
    fn from(outcome: &ActionOutcome) -> Self {
        match outcome {
            ActionOutcome::Committed => OutcomeKind::Committed,
            ActionOutcome::Aborted { .. } => OutcomeKind::Aborted,
            ActionOutcome::TimedOut => OutcomeKind::TimedOut,
            ActionOutcome::ExecutionFailed { .. } => OutcomeKind::ExecutionFailed,
        }
    }
}

/// Filter for querying finalized entries.
#[derive(Clone, Debug, Default)]
pub struct LedgerFilter {
    pub outcome: Option<OutcomeKind>,
    pub action_kind: Option<String>,
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl LedgerFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcome(mut self, outcome: OutcomeKind) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn with_action_kind(mut self, kind: impl Into<String>) -> Self {
        self.action_kind = Some(kind.into());
        self
    }

    pub fn with_time_range(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.time_range = Some((from, to));
        self
    }

    /// Check if a finalized entry matches this filter.
    pub fn matches(&self, entry: &ActionLedgerEntry) -> bool {
        if let Some(outcome) = self.outcome {
            if OutcomeKind::from(&entry.outcome) != outcome {
                return false;
            }
        }
        if let Some(ref kind) = self.action_kind {
            if entry.proposed.kind != *kind {
                return false;
            }
        }
        if let Some((from, to)) = self.time_range {
            if entry.finalized_at < from || entry.finalized_at > to {
                return false;
            }
        }
        true
    }
}

/// Result of opening an action in the ledger.
#[derive(Clone, Debug)]
pub enum BeginOutcome {
    /// First time this action id is seen; the race may run.
    Opened,
    /// The action is already in flight in this process.
    InFlight,
    /// The action already resolved; here is its recorded trail.
    AlreadyFinalized(Box<ActionLedgerEntry>),
}

enum Slot {
    InFlight { opened_at: DateTime<Utc> },
    Finalized(ActionLedgerEntry),
}

/// Append-only ledger of adjudicated actions.
///
/// No delete or modify operations exist: the only mutations are `begin`
/// (register an in-flight action) and `finalize` (record the terminal entry,
/// exactly once per action id).
pub struct ActionLedger {
    slots: RwLock<HashMap<ActionId, Slot>>,
}

impl ActionLedger {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Register an action as in flight, or report its prior resolution.
    ///
    /// This is the idempotency gate for retried adjudication calls.
    pub fn begin(&self, action_id: ActionId) -> BeginOutcome {
        let mut slots = self.slots.write().unwrap();
        match slots.get(&action_id) {
            Some(Slot::Finalized(entry)) => BeginOutcome::AlreadyFinalized(Box::new(entry.clone())),
            Some(Slot::InFlight { .. }) => BeginOutcome::InFlight,
            None => {
                slots.insert(
                    action_id,
                    Slot::InFlight {
                        opened_at: Utc::now(),
                    },
                );
                BeginOutcome::Opened
            }
        }
    }

    /// Record the terminal entry for an opened action. Exactly once.
    pub fn finalize(&self, entry: ActionLedgerEntry) -> Result<(), LedgerError> {
        let mut slots = self.slots.write().unwrap();
        match slots.get(&entry.action_id) {
            None => Err(LedgerError::NotOpened(entry.action_id)),
            Some(Slot::Finalized(_)) => Err(LedgerError::AlreadyFinalized(entry.action_id)),
            Some(Slot::InFlight { .. }) => {
                debug!(action_id = %entry.action_id, outcome = %entry.outcome, "ledger entry finalized");
                slots.insert(entry.action_id, Slot::Finalized(entry));
                Ok(())
            }
        }
    }

    /// The finalized entry for an action, if it has resolved.
    pub fn entry(&self, action_id: &ActionId) -> Option<ActionLedgerEntry> {
        let slots = self.slots.read().unwrap();
        match slots.get(action_id) {
            Some(Slot::Finalized(entry)) => Some(entry.clone()),
            _ => None,
        }
    }

    /// Finalized entries matching a filter, unordered.
    pub fn query(&self, filter: &LedgerFilter) -> Vec<ActionLedgerEntry> {
        let slots = self.slots.read().unwrap();
        slots
            .values()
            .filter_map(|slot| match slot {
                Slot::Finalized(entry) if filter.matches(entry) => Some(entry.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of finalized entries.
    pub fn len(&self) -> usize {
        let slots = self.slots.read().unwrap();
        slots
            .values()
            .filter(|slot| matches!(slot, Slot::Finalized(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ActionLedger {
    fn default() -> Self {
        Self::new()
    }
}
