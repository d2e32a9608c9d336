//! Warden Gate - optimistic execution coordinator.
//!
//! The gate sits between an autonomous reasoning process and the outside
//! world. Every effectful action it receives is raced: an evaluator task
//! runs the governance stages (safety invariant, policy decision point,
//! consensus escalation) while an executor task prepares the effect in
//! parallel. The verdict travels over an interrupt channel; the executor
//! commits only if the channel reads `Cleared` at its final checkpoint.
//! Every resolution, including denials and timeouts, lands in the action
//! ledger exactly once.
#![deny(unsafe_code)]

pub mod config;
pub mod coordinator;
pub mod effector;
pub mod error;
pub mod evaluator;
pub mod interrupt;
pub mod mocks;

pub use config::{ConsensusConfig, GatewayConfig, PdpConfig, SafetyBinding, SafetyRoutingConfig};
pub use coordinator::{ActionResult, Coordinator};
pub use effector::{EffectReceipt, Effector, EffectorError, PreparedEffect};
pub use error::GateError;
pub use evaluator::{EvaluationReport, Evaluator};
pub use interrupt::{DecidedSignal, GateSignal, InterruptSignal, SignalReader};
