//! dg-sim
//!
//! Counterfactual simulation without contamination.
//!
//! Shadow cells are hypothetical variants of base cells, produced by
//! structural replacement and re-sealing — the base is never touched. A
//! [`SimulationContext`] forks the chain, overlays the shadows, and answers
//! the same query against both realities; dropping the context discards the
//! shadow world. When the verdict flips, the anchor search finds the minimal
//! overlay subset that still flips it, under a hard execution budget.

pub mod anchors;
pub mod backtest;
pub mod shadow;
pub mod simulation;

pub use anchors::{
    compute_anchor_hash, detect_counterfactual_anchors, AnchorKind, AnchorResult, ExecutionBudget,
};
pub use backtest::{count_cells_in_simulation, sort_results, BatchBacktestResult};
pub use shadow::{
    create_shadow_bridge, create_shadow_fact, create_shadow_policy_head, create_shadow_rule,
    fork_shadow_chain, OverlayContext, ShadowBridgeSpec, ShadowFactSpec, ShadowPolicyHeadSpec,
    ShadowRuleSpec, SimulationSpec,
};
pub use simulation::{
    compute_delta_report, create_contamination_attestation, simulation_result_to_audit_text,
    tag_proof_bundle_origin, ContaminationAttestation, DeltaReport, FactsDiff, SimulationContext,
    SimulationResult,
};
