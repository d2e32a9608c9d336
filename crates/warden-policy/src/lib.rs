//! Warden Policy - PDP client with circuit-breaker fail-closed wrapper.
//!
//! The Policy Decision Point is an external rule-evaluation service; the
//! rule language is its implementation detail, not ours. This crate owns the
//! query/response contract ([`PdpRequest`]/[`PdpResponse`]), the HTTP
//! transport with a per-call timeout, and the [`CircuitBreaker`] that keeps
//! latency bounded during an outage while defaulting to the safe verdict.

pub mod breaker;
pub mod client;
pub mod error;
pub mod guarded;

pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use client::{HttpPdpClient, PdpClient, PdpRequest, PdpResponse, RequesterContext};
pub use error::PolicyError;
pub use guarded::GuardedPdpClient;

/// Reason string for verdicts produced while the circuit is open.
pub const CIRCUIT_OPEN: &str = "circuit open";
