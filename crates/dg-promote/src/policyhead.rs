use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use dg_canon::{canonical_json_string, compute_policy_hash, compute_rule_logic_hash};
use dg_chain::Chain;
use dg_core::{
    parse_utc, CellDraft, CellId, CellType, DecisionCell, DgError, Fact, Header, LogicAnchor,
    Proof, SourceQuality, CELL_SCHEMA_VERSION,
};

/// Rule anchored by PolicyHead cells.
pub const PROMOTION_RULE_ID: &str = "rule:policy_promotion";

const PROMOTION_RULE_BODY: &str = "\
a policy head pins the sorted set of promoted rules\n\
the policy hash commits to that set\n\
a promotion finalizes only at witness threshold\n";

static PROMOTION_RULE_HASH: Lazy<String> =
    Lazy::new(|| compute_rule_logic_hash(PROMOTION_RULE_BODY));

// ── PolicyHead payload ───────────────────────────────────────────────────────

/// The object payload of a PolicyHead cell.
///
/// `witness_signatures` is retained for audit: which witnesses authorized
/// this head, with their signatures over the promotion's canonical payload.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PolicyHeadData {
    pub promoted_rule_ids: Vec<String>,
    pub policy_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_policy_head: Option<CellId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub witness_signatures: Option<BTreeMap<String, String>>,
    /// SHA-256 of the promotion payload the witnesses signed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_hash: Option<String>,
}

/// Inputs for minting a PolicyHead cell.
#[derive(Clone, Debug)]
pub struct PolicyHeadSpec {
    pub namespace: String,
    pub promoted_rule_ids: Vec<String>,
    pub graph_id: String,
    pub hash_scheme: String,
    pub prev_cell_hash: CellId,
    pub prev_policy_head: Option<CellId>,
    pub system_time: String,
    pub creator: Option<String>,
    pub witness_signatures: Option<BTreeMap<String, String>>,
    pub payload_hash: Option<String>,
}

/// Build a PolicyHead cell. Rule ids are sorted and the `policy_hash`
/// recomputed here, so the stored payload is canonical by construction.
///
/// PolicyHeads take effect the moment they are recorded: `valid_from` equals
/// `system_time` and `valid_to` is open.
pub fn create_policy_head(spec: &PolicyHeadSpec) -> Result<DecisionCell, DgError> {
    let mut rule_ids = spec.promoted_rule_ids.clone();
    rule_ids.sort();
    let data = PolicyHeadData {
        policy_hash: compute_policy_hash(&rule_ids),
        promoted_rule_ids: rule_ids,
        prev_policy_head: spec.prev_policy_head,
        witness_signatures: spec.witness_signatures.clone(),
        payload_hash: spec.payload_hash.clone(),
    };
    let object = canonical_json_string(
        &serde_json::to_value(&data).expect("policy head serialization is infallible"),
    );

    let draft = CellDraft {
        header: Header {
            version: CELL_SCHEMA_VERSION.to_string(),
            cell_type: CellType::PolicyHead,
            graph_id: spec.graph_id.clone(),
            hash_scheme: spec.hash_scheme.clone(),
            system_time: spec.system_time.clone(),
            prev_cell_hash: spec.prev_cell_hash,
        },
        fact: Fact {
            namespace: spec.namespace.clone(),
            subject: format!("policy:{}", spec.namespace),
            predicate: "policy_head".to_string(),
            object,
            confidence: 1.0,
            source_quality: SourceQuality::Authoritative,
            valid_from: spec.system_time.clone(),
            valid_to: None,
        },
        logic_anchor: LogicAnchor {
            rule_id: PROMOTION_RULE_ID.to_string(),
            rule_logic_hash: PROMOTION_RULE_HASH.clone(),
        },
        evidence: None,
        proof: Proof {
            signer_key_id: spec.creator.clone(),
            signature: None,
            signature_required: false,
        },
    };
    draft.seal()
}

/// Parse a PolicyHead cell's object payload.
pub fn parse_policy_head(cell: &DecisionCell) -> Result<PolicyHeadData, DgError> {
    if cell.header().cell_type != CellType::PolicyHead {
        return Err(DgError::input_invalid(format!(
            "cell {} is a '{}', not a policy head",
            cell.cell_id,
            cell.header().cell_type.as_str()
        )));
    }
    serde_json::from_str(&cell.fact().object)
        .map_err(|e| DgError::schema_invalid(format!("malformed policy head payload: {e}")))
}

/// Recompute the policy hash from the stored rule ids and compare.
pub fn verify_policy_hash(cell: &DecisionCell) -> Result<bool, DgError> {
    let data = parse_policy_head(cell)?;
    Ok(compute_policy_hash(&data.promoted_rule_ids) == data.policy_hash)
}

/// The PolicyHead with the greatest `system_time` in `namespace`, or `None`.
/// Chain position breaks exact timestamp ties (later append wins).
pub fn get_current_policy_head(chain: &Chain, namespace: &str) -> Option<Arc<DecisionCell>> {
    let mut best: Option<(&Arc<DecisionCell>, chrono::DateTime<chrono::Utc>)> = None;
    for cell in chain.iter() {
        if cell.header().cell_type != CellType::PolicyHead || cell.fact().namespace != namespace {
            continue;
        }
        let Ok(time) = parse_utc(&cell.header().system_time) else { continue };
        match &best {
            Some((_, best_time)) if time < *best_time => {}
            _ => best = Some((cell, time)),
        }
    }
    best.map(|(cell, _)| Arc::clone(cell))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dg_chain::GenesisSpec;

    fn chain_with_genesis() -> Chain {
        let mut chain = Chain::new();
        chain
            .initialize(&GenesisSpec::new("G", "corp").with_system_time("2025-01-01T00:00:00Z"))
            .unwrap();
        chain
    }

    fn head_spec(chain: &Chain, rule_ids: &[&str], system_time: &str) -> PolicyHeadSpec {
        PolicyHeadSpec {
            namespace: "corp".to_string(),
            promoted_rule_ids: rule_ids.iter().map(|s| s.to_string()).collect(),
            graph_id: chain.graph_id().unwrap().to_string(),
            hash_scheme: chain.hash_scheme().unwrap().to_string(),
            prev_cell_hash: chain.head().unwrap().cell_id,
            prev_policy_head: None,
            system_time: system_time.to_string(),
            creator: Some("alice".to_string()),
            witness_signatures: None,
            payload_hash: None,
        }
    }

    #[test]
    fn rule_ids_are_sorted_and_hash_verifies() {
        let chain = chain_with_genesis();
        let cell =
            create_policy_head(&head_spec(&chain, &["rule:b", "rule:a"], "2025-01-02T00:00:00Z"))
                .unwrap();
        let data = parse_policy_head(&cell).unwrap();
        assert_eq!(data.promoted_rule_ids, vec!["rule:a", "rule:b"]);
        assert!(verify_policy_hash(&cell).unwrap());
    }

    #[test]
    fn tampered_policy_hash_fails_verification() {
        let chain = chain_with_genesis();
        let cell =
            create_policy_head(&head_spec(&chain, &["rule:a"], "2025-01-02T00:00:00Z")).unwrap();
        let mut data = parse_policy_head(&cell).unwrap();
        data.policy_hash = "f".repeat(64);
        let mut draft = cell.to_draft();
        draft.fact.object =
            canonical_json_string(&serde_json::to_value(&data).unwrap());
        let forged = draft.seal().unwrap();
        assert!(!verify_policy_hash(&forged).unwrap());
    }

    #[test]
    fn policy_head_takes_effect_at_system_time() {
        let chain = chain_with_genesis();
        let cell =
            create_policy_head(&head_spec(&chain, &["rule:a"], "2025-01-02T00:00:00Z")).unwrap();
        assert_eq!(cell.fact().valid_from, cell.header().system_time);
        assert!(cell.fact().valid_to.is_none());
    }

    #[test]
    fn latest_system_time_wins_current_lookup() {
        let mut chain = chain_with_genesis();
        let first =
            create_policy_head(&head_spec(&chain, &["rule:a"], "2025-01-02T00:00:00Z")).unwrap();
        let first_id = chain.append(first).unwrap();
        let mut spec = head_spec(&chain, &["rule:a", "rule:b"], "2025-01-03T00:00:00Z");
        spec.prev_policy_head = Some(first_id);
        let second = create_policy_head(&spec).unwrap();
        let second_id = chain.append(second).unwrap();

        let current = get_current_policy_head(&chain, "corp").unwrap();
        assert_eq!(current.cell_id, second_id);
        assert_eq!(parse_policy_head(&current).unwrap().prev_policy_head, Some(first_id));
    }

    #[test]
    fn no_policy_head_returns_none() {
        let chain = chain_with_genesis();
        assert!(get_current_policy_head(&chain, "corp").is_none());
        assert!(get_current_policy_head(&chain, "corp.hr").is_none());
    }

    #[test]
    fn non_policy_head_cell_is_rejected_by_parser() {
        let chain = chain_with_genesis();
        let genesis = chain.genesis().unwrap();
        assert!(parse_policy_head(genesis).is_err());
    }
}
