//! dg-scholar
//!
//! The Scholar answers "what did we know about X at time T, and was the
//! requester entitled to know it?" — with a proof.
//!
//! A Scholar is a stateless view constructed per query from a `&Chain`.
//! Query results are deterministic functions of chain state plus query
//! parameters: identical inputs produce byte-identical proof bundles after
//! canonical JSON.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use dg_chain::Chain;
use dg_core::{
    current_timestamp, is_namespace_prefix, parse_utc, CellId, CellType, DecisionCell, DgError,
};
use dg_registry::{BridgeStatus, NamespaceRegistry};

// ── Query inputs ─────────────────────────────────────────────────────────────

/// Parameters of one fact query. Optional filters narrow the candidate set;
/// missing bitemporal coordinates default to "now".
#[derive(Clone, Debug, Default)]
pub struct QueryParams {
    pub requester_namespace: String,
    pub namespace: String,
    pub subject: Option<String>,
    pub predicate: Option<String>,
    pub object: Option<String>,
    pub at_valid_time: Option<String>,
    pub as_of_system_time: Option<String>,
    pub requester_id: String,
    /// Include descendant namespaces of the target. Defaults to true.
    pub include_children: Option<bool>,
}

// ── Query outputs ────────────────────────────────────────────────────────────

/// Why the requester was allowed to see the target namespace.
#[derive(Clone, Debug, PartialEq)]
pub enum AuthorizationBasis {
    /// Requester namespace equals the target or is an ancestor of it.
    SameNamespace,
    /// A bridge grants access; `cells_used` are the granting cells.
    Bridge { cells_used: Vec<CellId> },
}

impl AuthorizationBasis {
    fn as_str(&self) -> &'static str {
        match self {
            AuthorizationBasis::SameNamespace => "same_namespace",
            AuthorizationBasis::Bridge { .. } => "bridge",
        }
    }
}

/// The complete answer to a query, convertible to a proof bundle.
#[derive(Clone, Debug)]
pub struct QueryResult {
    pub allowed: bool,
    pub basis: Option<AuthorizationBasis>,
    pub reason: String,
    /// Winning fact cells after conflict resolution, sorted by cell id.
    pub fact_cell_ids: Vec<CellId>,
    /// Every candidate that survived the bitemporal filter, sorted.
    pub candidate_cell_ids: Vec<CellId>,
    pub bridges_used: Vec<CellId>,
    pub genesis_cell_id: CellId,
    pub chain_head: CellId,
}

impl QueryResult {
    /// Machine-verifiable justification of the answer. The shape is part of
    /// the external interface; field order is fixed by canonical JSON.
    pub fn to_proof_bundle(&self) -> Value {
        json!({
            "results": {
                "fact_cell_ids": self.fact_cell_ids.iter().map(|c| c.to_hex()).collect::<Vec<_>>(),
                "fact_count": self.fact_cell_ids.len(),
            },
            "proof": {
                "candidate_cell_ids": self.candidate_cell_ids.iter().map(|c| c.to_hex()).collect::<Vec<_>>(),
                "bridges_used": self.bridges_used.iter().map(|c| c.to_hex()).collect::<Vec<_>>(),
                "genesis_cell_id": self.genesis_cell_id.to_hex(),
                "chain_head": self.chain_head.to_hex(),
            },
            "authorization_basis": {
                "allowed": self.allowed,
                "basis": self.basis.as_ref().map(|b| b.as_str()).unwrap_or(""),
                "reason": self.reason,
            },
        })
    }
}

// ── Scholar ──────────────────────────────────────────────────────────────────

/// The resolver. Borrow a chain, run queries, drop.
pub struct Scholar<'a> {
    chain: &'a Chain,
    registry: NamespaceRegistry,
}

pub fn create_scholar(chain: &Chain) -> Scholar<'_> {
    Scholar::new(chain)
}

impl<'a> Scholar<'a> {
    pub fn new(chain: &'a Chain) -> Self {
        Self { chain, registry: NamespaceRegistry::from_chain(chain) }
    }

    /// Run a fact query. Denial is a normal result (`allowed == false`),
    /// never an error; errors are reserved for malformed inputs and an
    /// uninitialized chain.
    pub fn query_facts(&self, params: &QueryParams) -> Result<QueryResult, DgError> {
        let genesis = self
            .chain
            .genesis()
            .ok_or_else(|| DgError::Internal("query against a chain without genesis".to_string()))?;
        let head = self.chain.head().expect("non-empty chain has a head");

        let at_valid_time = params.at_valid_time.clone().unwrap_or_else(current_timestamp);
        let as_of_system_time =
            params.as_of_system_time.clone().unwrap_or_else(current_timestamp);
        let at = parse_utc(&at_valid_time)?;
        let as_of = parse_utc(&as_of_system_time)?;

        // Step 1: visibility.
        let basis = if is_namespace_prefix(&params.requester_namespace, &params.namespace) {
            AuthorizationBasis::SameNamespace
        } else {
            match self.registry.bridge_status(
                &params.requester_namespace,
                &params.namespace,
                &at_valid_time,
                &as_of_system_time,
            )? {
                BridgeStatus::Active { cells_used } => AuthorizationBasis::Bridge { cells_used },
                BridgeStatus::Revoked { revoked_by } => {
                    return Ok(self.denied(
                        format!(
                            "bridge from '{}' to '{}' was revoked by cell {}",
                            params.requester_namespace, params.namespace, revoked_by
                        ),
                        genesis.cell_id,
                        head.cell_id,
                    ));
                }
                BridgeStatus::Missing => {
                    return Ok(self.denied(
                        format!(
                            "no effective bridge from '{}' to '{}': cross-namespace access requires a bridge",
                            params.requester_namespace, params.namespace
                        ),
                        genesis.cell_id,
                        head.cell_id,
                    ));
                }
            }
        };

        // Step 2: candidate selection.
        let include_children = params.include_children.unwrap_or(true);
        let mut candidates: Vec<&Arc<DecisionCell>> = self
            .chain
            .iter()
            .filter(|c| c.header().cell_type == CellType::Fact)
            .filter(|c| {
                if include_children {
                    is_namespace_prefix(&params.namespace, &c.fact().namespace)
                } else {
                    c.fact().namespace == params.namespace
                }
            })
            .filter(|c| params.subject.as_ref().map_or(true, |s| c.fact().subject == *s))
            .filter(|c| params.predicate.as_ref().map_or(true, |p| c.fact().predicate == *p))
            .filter(|c| params.object.as_ref().map_or(true, |o| c.fact().object == *o))
            .collect();

        // Step 3: bitemporal filter. Valid interval is half-open; a missing
        // valid_to means +∞; unparseable coordinates disqualify the cell.
        candidates.retain(|c| {
            let Ok(valid_from) = parse_utc(&c.fact().valid_from) else { return false };
            if valid_from > at {
                return false;
            }
            if let Some(valid_to) = &c.fact().valid_to {
                match parse_utc(valid_to) {
                    Ok(end) if end > at => {}
                    _ => return false,
                }
            }
            match parse_utc(&c.header().system_time) {
                Ok(st) => st <= as_of,
                Err(_) => false,
            }
        });

        let mut candidate_ids: Vec<CellId> = candidates.iter().map(|c| c.cell_id).collect();
        candidate_ids.sort();

        // Step 4: deterministic conflict resolution per (subject, predicate).
        let mut groups: HashMap<(String, String), &Arc<DecisionCell>> = HashMap::new();
        for &cell in &candidates {
            let key = (cell.fact().subject.clone(), cell.fact().predicate.clone());
            groups
                .entry(key)
                .and_modify(|winner| {
                    if Self::beats(cell, winner) {
                        *winner = cell;
                    }
                })
                .or_insert(cell);
        }
        let mut fact_cell_ids: Vec<CellId> = groups.values().map(|c| c.cell_id).collect();
        fact_cell_ids.sort();

        let bridges_used = match &basis {
            AuthorizationBasis::Bridge { cells_used } => cells_used.clone(),
            AuthorizationBasis::SameNamespace => Vec::new(),
        };

        debug!(
            requester = %params.requester_namespace,
            namespace = %params.namespace,
            facts = fact_cell_ids.len(),
            candidates = candidate_ids.len(),
            "query resolved"
        );

        let reason = match &basis {
            AuthorizationBasis::SameNamespace => {
                "requester namespace equals or contains the target namespace".to_string()
            }
            AuthorizationBasis::Bridge { cells_used } => format!(
                "effective bridge from '{}' to '{}' ({} granting cell(s))",
                params.requester_namespace,
                params.namespace,
                cells_used.len()
            ),
        };

        Ok(QueryResult {
            allowed: true,
            basis: Some(basis),
            reason,
            fact_cell_ids,
            candidate_cell_ids: candidate_ids,
            bridges_used,
            genesis_cell_id: genesis.cell_id,
            chain_head: head.cell_id,
        })
    }

    fn denied(&self, reason: String, genesis: CellId, head: CellId) -> QueryResult {
        QueryResult {
            allowed: false,
            basis: None,
            reason,
            fact_cell_ids: Vec::new(),
            candidate_cell_ids: Vec::new(),
            bridges_used: Vec::new(),
            genesis_cell_id: genesis,
            chain_head: head,
        }
    }

    /// True iff `a` wins over `b`: source-quality rank, then latest
    /// valid_from, then latest system_time, then largest cell_id.
    fn beats(a: &DecisionCell, b: &DecisionCell) -> bool {
        let quality = a.fact().source_quality.rank().cmp(&b.fact().source_quality.rank());
        if quality != std::cmp::Ordering::Equal {
            return quality.is_gt();
        }
        let a_from = parse_utc(&a.fact().valid_from).ok();
        let b_from = parse_utc(&b.fact().valid_from).ok();
        if a_from != b_from {
            return a_from > b_from;
        }
        let a_sys = parse_utc(&a.header().system_time).ok();
        let b_sys = parse_utc(&b.header().system_time).ok();
        if a_sys != b_sys {
            return a_sys > b_sys;
        }
        a.cell_id > b.cell_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dg_canon::canonical_json_bytes;
    use dg_chain::GenesisSpec;
    use dg_core::{
        CellDraft, Fact, Header, LogicAnchor, Proof, SourceQuality, CELL_SCHEMA_VERSION,
    };

    struct FactSpec<'s> {
        namespace: &'s str,
        subject: &'s str,
        predicate: &'s str,
        object: &'s str,
        quality: SourceQuality,
        system_time: &'s str,
        valid_from: &'s str,
        valid_to: Option<&'s str>,
        cell_type: CellType,
    }

    impl Default for FactSpec<'_> {
        fn default() -> Self {
            FactSpec {
                namespace: "corp",
                subject: "user:alice",
                predicate: "has_salary",
                object: "80000",
                quality: SourceQuality::Verified,
                system_time: "2025-01-02T00:00:00Z",
                valid_from: "2025-01-01T00:00:00Z",
                valid_to: None,
                cell_type: CellType::Fact,
            }
        }
    }

    fn chain_with_genesis() -> Chain {
        let mut chain = Chain::new();
        chain
            .initialize(&GenesisSpec::new("G", "corp").with_system_time("2025-01-01T00:00:00Z"))
            .unwrap();
        chain
    }

    fn append(chain: &mut Chain, spec: FactSpec<'_>) -> CellId {
        let draft = CellDraft {
            header: Header {
                version: CELL_SCHEMA_VERSION.to_string(),
                cell_type: spec.cell_type,
                graph_id: chain.graph_id().unwrap().to_string(),
                hash_scheme: chain.hash_scheme().unwrap().to_string(),
                system_time: spec.system_time.to_string(),
                prev_cell_hash: chain.head().unwrap().cell_id,
            },
            fact: Fact {
                namespace: spec.namespace.to_string(),
                subject: spec.subject.to_string(),
                predicate: spec.predicate.to_string(),
                object: spec.object.to_string(),
                confidence: 1.0,
                source_quality: spec.quality,
                valid_from: spec.valid_from.to_string(),
                valid_to: spec.valid_to.map(String::from),
            },
            logic_anchor: LogicAnchor {
                rule_id: "rule:payroll".to_string(),
                rule_logic_hash: "0".repeat(64),
            },
            evidence: None,
            proof: Proof::unsigned(),
        };
        chain.append(draft.seal().unwrap()).unwrap()
    }

    fn query(chain: &Chain, requester: &str, namespace: &str) -> QueryResult {
        let scholar = Scholar::new(chain);
        scholar
            .query_facts(&QueryParams {
                requester_namespace: requester.to_string(),
                namespace: namespace.to_string(),
                at_valid_time: Some("2025-06-01T00:00:00Z".to_string()),
                as_of_system_time: Some("2025-06-01T00:00:00Z".to_string()),
                requester_id: "analyst:test".to_string(),
                ..Default::default()
            })
            .unwrap()
    }

    #[test]
    fn same_namespace_query_returns_fact() {
        let mut chain = chain_with_genesis();
        let id = append(&mut chain, FactSpec::default());
        let result = query(&chain, "corp", "corp");
        assert!(result.allowed);
        assert_eq!(result.basis, Some(AuthorizationBasis::SameNamespace));
        assert_eq!(result.fact_cell_ids, vec![id]);
    }

    #[test]
    fn cross_namespace_without_bridge_is_denied() {
        let mut chain = chain_with_genesis();
        append(&mut chain, FactSpec { namespace: "corp.hr", ..Default::default() });
        let result = query(&chain, "corp.audit", "corp.hr");
        assert!(!result.allowed);
        assert!(result.reason.contains("bridge"));
        assert!(result.fact_cell_ids.is_empty());
    }

    #[test]
    fn ancestor_namespace_sees_descendants() {
        let mut chain = chain_with_genesis();
        let id = append(&mut chain, FactSpec { namespace: "corp.hr.pay", ..Default::default() });
        let result = query(&chain, "corp", "corp.hr.pay");
        assert!(result.allowed);
        assert_eq!(result.fact_cell_ids, vec![id]);
    }

    #[test]
    fn bridge_authorizes_and_is_recorded_in_proof() {
        let mut chain = chain_with_genesis();
        append(&mut chain, FactSpec { namespace: "corp.hr", ..Default::default() });
        let bridge_id = append(
            &mut chain,
            FactSpec {
                namespace: "corp.hr",
                subject: "namespace:corp.audit",
                predicate: "grants_access_to",
                object: "corp.hr",
                system_time: "2025-01-03T00:00:00Z",
                cell_type: CellType::Bridge,
                ..Default::default()
            },
        );
        let result = query(&chain, "corp.audit", "corp.hr");
        assert!(result.allowed);
        assert_eq!(result.basis, Some(AuthorizationBasis::Bridge { cells_used: vec![bridge_id] }));
        assert_eq!(result.bridges_used, vec![bridge_id]);
        assert_eq!(result.fact_cell_ids.len(), 1);
    }

    #[test]
    fn empty_validity_interval_never_selects() {
        let mut chain = chain_with_genesis();
        append(
            &mut chain,
            FactSpec {
                valid_from: "2025-01-01T00:00:00Z",
                valid_to: Some("2025-01-01T00:00:00Z"),
                ..Default::default()
            },
        );
        let result = query(&chain, "corp", "corp");
        assert!(result.allowed);
        assert!(result.fact_cell_ids.is_empty());
    }

    #[test]
    fn valid_to_upper_bound_is_exclusive() {
        let mut chain = chain_with_genesis();
        append(
            &mut chain,
            FactSpec {
                valid_from: "2025-01-01T00:00:00Z",
                valid_to: Some("2025-06-01T00:00:00Z"),
                ..Default::default()
            },
        );
        // at == valid_to: out of the interval.
        let result = query(&chain, "corp", "corp");
        assert!(result.fact_cell_ids.is_empty());

        let scholar = Scholar::new(&chain);
        let earlier = scholar
            .query_facts(&QueryParams {
                requester_namespace: "corp".to_string(),
                namespace: "corp".to_string(),
                at_valid_time: Some("2025-05-31T23:59:59Z".to_string()),
                as_of_system_time: Some("2025-06-01T00:00:00Z".to_string()),
                requester_id: "analyst:test".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(earlier.fact_cell_ids.len(), 1);
    }

    #[test]
    fn system_time_filter_hides_late_knowledge() {
        let mut chain = chain_with_genesis();
        append(&mut chain, FactSpec { system_time: "2025-03-01T00:00:00Z", ..Default::default() });
        let scholar = Scholar::new(&chain);
        let result = scholar
            .query_facts(&QueryParams {
                requester_namespace: "corp".to_string(),
                namespace: "corp".to_string(),
                at_valid_time: Some("2025-06-01T00:00:00Z".to_string()),
                as_of_system_time: Some("2025-02-01T00:00:00Z".to_string()),
                requester_id: "analyst:test".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert!(result.fact_cell_ids.is_empty());
    }

    #[test]
    fn higher_source_quality_wins_conflict() {
        let mut chain = chain_with_genesis();
        append(
            &mut chain,
            FactSpec { object: "80000", quality: SourceQuality::Asserted, ..Default::default() },
        );
        let authoritative = append(
            &mut chain,
            FactSpec {
                object: "85000",
                quality: SourceQuality::Authoritative,
                system_time: "2025-01-03T00:00:00Z",
                ..Default::default()
            },
        );
        let result = query(&chain, "corp", "corp");
        assert_eq!(result.fact_cell_ids, vec![authoritative]);
        assert_eq!(result.candidate_cell_ids.len(), 2);
    }

    #[test]
    fn later_valid_from_breaks_quality_tie() {
        let mut chain = chain_with_genesis();
        append(
            &mut chain,
            FactSpec { object: "80000", valid_from: "2025-01-01T00:00:00Z", ..Default::default() },
        );
        let newer = append(
            &mut chain,
            FactSpec {
                object: "90000",
                valid_from: "2025-02-01T00:00:00Z",
                system_time: "2025-02-01T00:00:00Z",
                ..Default::default()
            },
        );
        let result = query(&chain, "corp", "corp");
        assert_eq!(result.fact_cell_ids, vec![newer]);
    }

    #[test]
    fn cell_id_is_the_final_tiebreak() {
        let mut chain = chain_with_genesis();
        let a = append(&mut chain, FactSpec { object: "80000", ..Default::default() });
        let b = append(&mut chain, FactSpec { object: "80001", ..Default::default() });
        let result = query(&chain, "corp", "corp");
        let expected = if a > b { a } else { b };
        assert_eq!(result.fact_cell_ids, vec![expected]);
    }

    #[test]
    fn identical_queries_yield_byte_identical_bundles() {
        let mut chain = chain_with_genesis();
        append(&mut chain, FactSpec::default());
        append(&mut chain, FactSpec { subject: "user:bob", object: "70000", ..Default::default() });
        let first = canonical_json_bytes(&query(&chain, "corp", "corp").to_proof_bundle());
        let second = canonical_json_bytes(&query(&chain, "corp", "corp").to_proof_bundle());
        assert_eq!(first, second);
    }

    #[test]
    fn proof_bundle_has_the_contract_shape() {
        let mut chain = chain_with_genesis();
        append(&mut chain, FactSpec::default());
        let bundle = query(&chain, "corp", "corp").to_proof_bundle();
        assert_eq!(bundle["results"]["fact_count"], 1);
        assert!(bundle["proof"]["genesis_cell_id"].is_string());
        assert!(bundle["proof"]["chain_head"].is_string());
        assert_eq!(bundle["authorization_basis"]["allowed"], true);
        assert_eq!(bundle["authorization_basis"]["basis"], "same_namespace");
    }

    #[test]
    fn rule_cells_are_not_fact_candidates() {
        let mut chain = chain_with_genesis();
        append(&mut chain, FactSpec { cell_type: CellType::Rule, subject: "rule:r1", ..Default::default() });
        let result = query(&chain, "corp", "corp");
        assert!(result.fact_cell_ids.is_empty());
    }
}
