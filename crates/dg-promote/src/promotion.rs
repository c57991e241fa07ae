use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use dg_canon::canonical_json_bytes;
use dg_core::current_timestamp;

// ── Status ───────────────────────────────────────────────────────────────────

/// Promotion lifecycle.
///
/// `Pending → Collecting → ThresholdMet → Finalized`, with a terminal
/// `Rejected` branch. Transitions only ever move forward.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromotionStatus {
    /// Created, no signatures yet.
    Pending,
    /// At least one witness has signed.
    Collecting,
    /// Enough signatures to finalize.
    ThresholdMet,
    /// PolicyHead minted and appended.
    Finalized,
    /// Explicitly rejected; terminal.
    Rejected,
}

impl PromotionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromotionStatus::Pending => "pending",
            PromotionStatus::Collecting => "collecting",
            PromotionStatus::ThresholdMet => "threshold_met",
            PromotionStatus::Finalized => "finalized",
            PromotionStatus::Rejected => "rejected",
        }
    }
}

// ── PromotionRequest ─────────────────────────────────────────────────────────

/// One attempt to move a namespace's policy pointer.
///
/// What is being promoted is fixed at creation: `rule_ids` are sorted once
/// and the canonical payload — the exact bytes witnesses sign — is derived
/// from them. Only `status` and `signatures` change afterwards.
///
/// The payload embeds the `promotion_id`, so a signature collected for one
/// promotion can never be replayed against another; sorting `rule_ids`
/// makes it independent of submission order.
#[derive(Clone, Debug)]
pub struct PromotionRequest {
    pub promotion_id: String,
    pub namespace: String,
    rule_ids: Vec<String>,
    pub submitter_id: String,
    pub created_at: String,
    canonical_payload: Vec<u8>,
    pub required_threshold: usize,

    pub status: PromotionStatus,
    pub signatures: BTreeMap<String, Vec<u8>>,
}

impl PromotionRequest {
    /// Create a promotion with a fresh id and deterministic payload.
    pub fn create(
        namespace: impl Into<String>,
        rule_ids: Vec<String>,
        submitter_id: impl Into<String>,
        threshold: usize,
        created_at: Option<String>,
    ) -> Self {
        let namespace = namespace.into();
        let promotion_id = Uuid::new_v4().to_string();
        let created_at = created_at.unwrap_or_else(current_timestamp);

        let mut sorted_rule_ids = rule_ids;
        sorted_rule_ids.sort();

        let canonical_payload = canonical_json_bytes(&json!({
            "promotion_id": promotion_id,
            "namespace": namespace,
            "rule_ids": sorted_rule_ids,
            "timestamp": created_at,
        }));

        Self {
            promotion_id,
            namespace,
            rule_ids: sorted_rule_ids,
            submitter_id: submitter_id.into(),
            created_at,
            canonical_payload,
            required_threshold: threshold,
            status: PromotionStatus::Pending,
            signatures: BTreeMap::new(),
        }
    }

    /// The sorted rule ids, fixed at creation.
    pub fn rule_ids(&self) -> &[String] {
        &self.rule_ids
    }

    /// The bytes witnesses sign.
    pub fn canonical_payload(&self) -> &[u8] {
        &self.canonical_payload
    }

    /// Store a witness signature (a re-submission by the same witness
    /// overwrites, allowing key rotation mid-collection) and advance the
    /// status machine.
    pub fn record_signature(&mut self, witness_id: &str, signature: Vec<u8>) -> PromotionStatus {
        self.signatures.insert(witness_id.to_string(), signature);
        if self.signatures.len() == 1 && self.status == PromotionStatus::Pending {
            self.status = PromotionStatus::Collecting;
        }
        if self.signatures.len() >= self.required_threshold {
            self.status = PromotionStatus::ThresholdMet;
        }
        self.status
    }
}
