use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

/// Verdict channel between the evaluator and the executor.
///
/// `Pending` while evaluation runs; exactly one transition to `Cleared`
/// (every stage allowed) or `Raised` (some stage denied, or a defensive
/// raise). Later writes are ignored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateSignal {
    Pending,
    Cleared,
    Raised { reason: String },
}

/// A decided signal, as seen by the executor at its final checkpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecidedSignal {
    Cleared,
    Raised { reason: String },
}

/// Writer half of the interrupt channel. First write wins.
#[derive(Clone)]
pub struct InterruptSignal {
    tx: Arc<watch::Sender<GateSignal>>,
}

impl InterruptSignal {
    /// Create a fresh channel in the `Pending` state.
    pub fn channel() -> (Self, SignalReader) {
        let (tx, rx) = watch::channel(GateSignal::Pending);
        (Self { tx: Arc::new(tx) }, SignalReader { rx })
    }

    /// Raise the interrupt. Returns false if the signal was already decided.
    pub fn raise(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let written = self.tx.send_if_modified(|signal| {
            if matches!(signal, GateSignal::Pending) {
                *signal = GateSignal::Raised { reason };
                true
            } else {
                false
            }
        });
        if written {
            debug!("interrupt raised");
        }
        written
    }

    /// Publish the all-clear. Returns false if the signal was already decided.
    pub fn clear(&self) -> bool {
        self.tx.send_if_modified(|signal| {
            if matches!(signal, GateSignal::Pending) {
                *signal = GateSignal::Cleared;
                true
            } else {
                false
            }
        })
    }
}

/// Reader half of the interrupt channel.
pub struct SignalReader {
    rx: watch::Receiver<GateSignal>,
}

impl SignalReader {
    pub fn current(&self) -> GateSignal {
        self.rx.borrow().clone()
    }

    pub fn is_raised(&self) -> bool {
        matches!(*self.rx.borrow(), GateSignal::Raised { .. })
    }

    /// Block until the signal leaves `Pending`.
    ///
    /// A closed channel (evaluator dropped without deciding) reads as a
    /// raise: an undecided action must never commit.
    pub async fn wait_decided(&mut self) -> DecidedSignal {
        match self
            .rx
            .wait_for(|signal| !matches!(signal, GateSignal::Pending))
            .await
        {
            Ok(signal) => match &*signal {
                GateSignal::Cleared => DecidedSignal::Cleared,
                GateSignal::Raised { reason } => DecidedSignal::Raised {
                    reason: reason.clone(),
                },
                GateSignal::Pending => DecidedSignal::Raised {
                    reason: "interrupt channel closed".into(),
                },
            },
            Err(_) => DecidedSignal::Raised {
                reason: "evaluation interrupted".into(),
            },
        }
    }
}
