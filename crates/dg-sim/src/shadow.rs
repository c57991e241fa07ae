use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use dg_canon::{canonical_json_string, compute_policy_hash};
use dg_chain::Chain;
use dg_core::{CellId, DecisionCell, DgError};
use dg_promote::parse_policy_head;

// ── Simulation spec ──────────────────────────────────────────────────────────

/// Wire format of a simulation request: which base cells to shadow and how.
/// Kinds the caller omits default to empty.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SimulationSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shadow_facts: Vec<ShadowFactSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shadow_rules: Vec<ShadowRuleSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shadow_policy_heads: Vec<ShadowPolicyHeadSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shadow_bridges: Vec<ShadowBridgeSpec>,
}

impl SimulationSpec {
    pub fn is_empty(&self) -> bool {
        self.shadow_facts.is_empty()
            && self.shadow_rules.is_empty()
            && self.shadow_policy_heads.is_empty()
            && self.shadow_bridges.is_empty()
    }
}

/// "What if this fact said something else?"
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ShadowFactSpec {
    pub base_cell_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<String>,
}

/// "What if this rule used different logic?"
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ShadowRuleSpec {
    pub base_cell_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_logic_hash: Option<String>,
}

/// "What if different rules were promoted?"
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ShadowPolicyHeadSpec {
    pub base_cell_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted_rule_ids: Option<Vec<String>>,
}

/// "What if this bridge targeted another namespace?"
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ShadowBridgeSpec {
    pub base_cell_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
}

// ── Shadow constructors ──────────────────────────────────────────────────────

/// Shadow a fact cell: structural replacement of fact fields, then re-seal.
/// Unset fields keep their base values; the resulting cell has its own id.
pub fn create_shadow_fact(
    base: &DecisionCell,
    spec: &ShadowFactSpec,
) -> Result<DecisionCell, DgError> {
    let mut draft = base.to_draft();
    if let Some(object) = &spec.object {
        draft.fact.object = object.clone();
    }
    if let Some(confidence) = spec.confidence {
        draft.fact.confidence = confidence;
    }
    if let Some(valid_from) = &spec.valid_from {
        draft.fact.valid_from = valid_from.clone();
    }
    if let Some(valid_to) = &spec.valid_to {
        draft.fact.valid_to = Some(valid_to.clone());
    }
    draft.seal()
}

/// Shadow a rule cell's logic hash.
pub fn create_shadow_rule(
    base: &DecisionCell,
    spec: &ShadowRuleSpec,
) -> Result<DecisionCell, DgError> {
    let Some(hash) = &spec.rule_logic_hash else {
        return Ok(base.clone());
    };
    let mut draft = base.to_draft();
    draft.logic_anchor.rule_logic_hash = hash.clone();
    draft.seal()
}

/// Shadow a PolicyHead with a different promoted rule set. The payload's
/// `policy_hash` is recomputed; every other payload field is preserved.
pub fn create_shadow_policy_head(
    base: &DecisionCell,
    spec: &ShadowPolicyHeadSpec,
) -> Result<DecisionCell, DgError> {
    let Some(rule_ids) = &spec.promoted_rule_ids else {
        return Ok(base.clone());
    };
    let mut data = parse_policy_head(base)?;
    let mut sorted = rule_ids.clone();
    sorted.sort();
    data.policy_hash = compute_policy_hash(&sorted);
    data.promoted_rule_ids = sorted;

    let mut draft = base.to_draft();
    draft.fact.object = canonical_json_string(
        &serde_json::to_value(&data).expect("policy head serialization is infallible"),
    );
    draft.seal()
}

/// Shadow a bridge cell's target namespace.
pub fn create_shadow_bridge(
    base: &DecisionCell,
    spec: &ShadowBridgeSpec,
) -> Result<DecisionCell, DgError> {
    let Some(object) = &spec.object else {
        return Ok(base.clone());
    };
    let mut draft = base.to_draft();
    draft.fact.object = object.clone();
    draft.seal()
}

// ── OverlayContext ───────────────────────────────────────────────────────────

/// Shadow cells grouped by kind, keyed by the base cell they replace.
/// BTreeMaps keep iteration order deterministic.
#[derive(Clone, Debug, Default)]
pub struct OverlayContext {
    pub shadow_facts: BTreeMap<CellId, Vec<DecisionCell>>,
    pub shadow_rules: BTreeMap<CellId, DecisionCell>,
    pub shadow_policy_heads: BTreeMap<CellId, DecisionCell>,
    pub shadow_bridges: BTreeMap<CellId, DecisionCell>,
}

impl OverlayContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_shadow_fact(&mut self, cell: DecisionCell, base_cell_id: CellId) {
        self.shadow_facts.entry(base_cell_id).or_default().push(cell);
    }

    pub fn add_shadow_rule(&mut self, cell: DecisionCell, base_cell_id: CellId) {
        self.shadow_rules.insert(base_cell_id, cell);
    }

    pub fn add_shadow_policy_head(&mut self, cell: DecisionCell, base_cell_id: CellId) {
        self.shadow_policy_heads.insert(base_cell_id, cell);
    }

    pub fn add_shadow_bridge(&mut self, cell: DecisionCell, base_cell_id: CellId) {
        self.shadow_bridges.insert(base_cell_id, cell);
    }

    pub fn cell_count(&self) -> usize {
        self.shadow_facts.values().map(Vec::len).sum::<usize>()
            + self.shadow_rules.len()
            + self.shadow_policy_heads.len()
            + self.shadow_bridges.len()
    }
}

/// Fork the base chain for a simulation. The fork shares all base cells
/// (Arc-backed) and keeps its private extension to itself.
pub fn fork_shadow_chain(base: &Chain) -> Chain {
    base.fork()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dg_chain::GenesisSpec;
    use dg_core::{
        CellDraft, CellType, Fact, Header, LogicAnchor, Proof, SourceQuality,
        CELL_SCHEMA_VERSION,
    };
    use dg_promote::{create_policy_head, PolicyHeadSpec};

    fn chain_with_fact() -> (Chain, CellId) {
        let mut chain = Chain::new();
        chain
            .initialize(&GenesisSpec::new("G", "corp").with_system_time("2025-01-01T00:00:00Z"))
            .unwrap();
        let draft = CellDraft {
            header: Header {
                version: CELL_SCHEMA_VERSION.to_string(),
                cell_type: CellType::Fact,
                graph_id: chain.graph_id().unwrap().to_string(),
                hash_scheme: chain.hash_scheme().unwrap().to_string(),
                system_time: "2025-01-02T00:00:00Z".to_string(),
                prev_cell_hash: chain.head().unwrap().cell_id,
            },
            fact: Fact {
                namespace: "corp".to_string(),
                subject: "user:alice".to_string(),
                predicate: "has_salary".to_string(),
                object: "80000".to_string(),
                confidence: 1.0,
                source_quality: SourceQuality::Verified,
                valid_from: "2025-01-01T00:00:00Z".to_string(),
                valid_to: None,
            },
            logic_anchor: LogicAnchor {
                rule_id: "rule:payroll".to_string(),
                rule_logic_hash: "0".repeat(64),
            },
            evidence: None,
            proof: Proof::unsigned(),
        };
        let id = chain.append(draft.seal().unwrap()).unwrap();
        (chain, id)
    }

    #[test]
    fn shadow_fact_gets_new_identity_and_base_is_untouched() {
        let (chain, id) = chain_with_fact();
        let base = chain.get_cell(&id).unwrap();
        let shadow = create_shadow_fact(
            base,
            &ShadowFactSpec {
                base_cell_id: id.to_hex(),
                object: Some("90000".to_string()),
                confidence: None,
                valid_from: None,
                valid_to: None,
            },
        )
        .unwrap();
        assert_ne!(shadow.cell_id, base.cell_id);
        assert_eq!(shadow.fact().object, "90000");
        assert_eq!(base.fact().object, "80000");
        assert!(shadow.verify_integrity());
    }

    #[test]
    fn no_op_shadow_rule_returns_identical_cell() {
        let (chain, id) = chain_with_fact();
        let base = chain.get_cell(&id).unwrap();
        let shadow = create_shadow_rule(
            base,
            &ShadowRuleSpec { base_cell_id: id.to_hex(), rule_logic_hash: None },
        )
        .unwrap();
        assert_eq!(shadow.cell_id, base.cell_id);
    }

    #[test]
    fn shadow_policy_head_recomputes_hash() {
        let mut chain = Chain::new();
        chain
            .initialize(&GenesisSpec::new("G", "corp").with_system_time("2025-01-01T00:00:00Z"))
            .unwrap();
        let head = create_policy_head(&PolicyHeadSpec {
            namespace: "corp".to_string(),
            promoted_rule_ids: vec!["rule:a".to_string()],
            graph_id: chain.graph_id().unwrap().to_string(),
            hash_scheme: chain.hash_scheme().unwrap().to_string(),
            prev_cell_hash: chain.head().unwrap().cell_id,
            prev_policy_head: None,
            system_time: "2025-01-02T00:00:00Z".to_string(),
            creator: None,
            witness_signatures: None,
            payload_hash: None,
        })
        .unwrap();
        let id = chain.append(head).unwrap();
        let base = chain.get_cell(&id).unwrap();

        let shadow = create_shadow_policy_head(
            base,
            &ShadowPolicyHeadSpec {
                base_cell_id: id.to_hex(),
                promoted_rule_ids: Some(vec!["rule:z".to_string(), "rule:b".to_string()]),
            },
        )
        .unwrap();
        let data = parse_policy_head(&shadow).unwrap();
        assert_eq!(data.promoted_rule_ids, vec!["rule:b", "rule:z"]);
        assert_eq!(data.policy_hash, compute_policy_hash(&data.promoted_rule_ids));
        assert_ne!(shadow.cell_id, base.cell_id);
    }

    #[test]
    fn shadow_cells_append_to_a_fork_not_the_base() {
        let (chain, id) = chain_with_fact();
        let base = chain.get_cell(&id).unwrap().as_ref().clone();
        let shadow = create_shadow_fact(
            &base,
            &ShadowFactSpec {
                base_cell_id: id.to_hex(),
                object: Some("90000".to_string()),
                confidence: None,
                valid_from: None,
                valid_to: None,
            },
        )
        .unwrap();

        let base_head = chain.head().unwrap().cell_id;
        let mut fork = fork_shadow_chain(&chain);
        fork.append(shadow).unwrap();
        assert_eq!(chain.head().unwrap().cell_id, base_head);
        assert_eq!(fork.length(), chain.length() + 1);
    }

    #[test]
    fn simulation_spec_deserializes_with_missing_kinds() {
        let spec: SimulationSpec = serde_json::from_value(serde_json::json!({
            "shadow_facts": [{"base_cell_id": "ab".repeat(32), "object": "90000"}],
        }))
        .unwrap();
        assert_eq!(spec.shadow_facts.len(), 1);
        assert!(spec.shadow_rules.is_empty());
        assert!(!spec.is_empty());
    }
}
