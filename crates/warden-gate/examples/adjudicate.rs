//! Wire a gate from in-memory parts and adjudicate a few actions.
//!
//! Run with: cargo run -p warden-gate --example adjudicate

use std::sync::Arc;

use warden_gate::mocks::{approving_reviewer, MockEffector, StaticPdpClient};
use warden_gate::{Coordinator, GatewayConfig, SafetyBinding};
use warden_ledger::MemorySink;
use warden_policy::PdpClient;
use warden_safety::{MemoryStateStore, SafetyState, StateStore};
use warden_types::{ProposedAction, StakesTier};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,warden_gate=debug".into()),
        )
        .init();

    let mut config = GatewayConfig::default();
    config.safety.bindings.insert(
        "transfer".into(),
        SafetyBinding {
            state_key_parameter: "account".into(),
            delta_parameter: "amount".into(),
        },
    );

    let store = Arc::new(MemoryStateStore::new());
    store
        .insert(SafetyState::new("acct-1", 100.0, 0.0, 0.1))
        .await?;

    let sink = Arc::new(MemorySink::new());
    let gate = Coordinator::new(
        config,
        store.clone(),
        Box::new(StaticPdpClient::allow()) as Box<dyn PdpClient>,
        vec![
            approving_reviewer("risk-model"),
            approving_reviewer("compliance-model"),
            approving_reviewer("treasury-model"),
        ],
        Arc::new(MockEffector::new()),
        sink.clone(),
    );

    // A modest withdrawal: passes every stage and commits.
    let small = ProposedAction::builder("transfer")
        .parameter("account", "acct-1")
        .parameter("amount", -5.0)
        .stakes(StakesTier::Low)
        .build();
    let result = gate.adjudicate(small).await?;
    println!("small transfer  -> {}", result.outcome);

    // A withdrawal that would breach the barrier: denied by the safety stage.
    let reckless = ProposedAction::builder("transfer")
        .parameter("account", "acct-1")
        .parameter("amount", -90.0)
        .stakes(StakesTier::Low)
        .build();
    let result = gate.adjudicate(reckless).await?;
    println!("reckless transfer -> {}", result.outcome);

    // High stakes: routed through the reviewer roster before committing.
    let escrow = ProposedAction::builder("escrow_release")
        .parameter("escrow_id", "esc-42")
        .stakes(StakesTier::High)
        .build();
    let result = gate.adjudicate(escrow).await?;
    println!(
        "escrow release  -> {} ({} ballots)",
        result.outcome,
        result.ballots.len()
    );

    let balance = store.get("acct-1").await?.map(|s| s.value);
    println!("remaining balance: {balance:?}");

    gate.shutdown().await;
    println!("ledger rows persisted: {}", sink.len());
    Ok(())
}
