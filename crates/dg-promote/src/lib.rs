//! dg-promote
//!
//! Policy governance: which rules are "current" for a namespace, and how
//! that pointer moves.
//!
//! A [`WitnessSet`] says who may approve a change and how many approvals are
//! needed. A [`PromotionRequest`] collects threshold signatures over a
//! canonical payload. Finalization (in `dg-engine`) mints a PolicyHead cell
//! that pins the promoted rule set with a verifiable `policy_hash`.

pub mod policyhead;
pub mod promotion;
pub mod registry;
pub mod witnessset;

pub use policyhead::{
    create_policy_head, get_current_policy_head, parse_policy_head, verify_policy_hash,
    PolicyHeadData, PolicyHeadSpec,
};
pub use promotion::{PromotionRequest, PromotionStatus};
pub use registry::WitnessRegistry;
pub use witnessset::{validate_threshold, WitnessSet};
