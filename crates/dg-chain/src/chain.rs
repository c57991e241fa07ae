use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info};

use dg_core::{
    is_namespace_prefix, parse_utc, CellId, CellType, DecisionCell, DgError, NULL_HASH,
};

use crate::genesis::{create_genesis_cell, verify_genesis, GenesisSpec};

// ── ValidationResult ─────────────────────────────────────────────────────────

/// Outcome of a full-chain validation pass.
#[derive(Clone, Debug)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub cells_checked: usize,
    pub graph_id: Option<String>,
    pub root_namespace: Option<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// One-screen human-readable summary.
    pub fn summary(&self) -> String {
        let status = if self.is_valid { "VALID" } else { "INVALID" };
        let mut lines = vec![
            format!("Chain validation: {status}"),
            format!("  Cells checked: {}", self.cells_checked),
            format!("  Graph ID: {}", self.graph_id.as_deref().unwrap_or("N/A")),
            format!("  Root namespace: {}", self.root_namespace.as_deref().unwrap_or("N/A")),
            format!("  Errors: {}", self.errors.len()),
            format!("  Warnings: {}", self.warnings.len()),
        ];
        if !self.errors.is_empty() {
            lines.push("  Error details:".to_string());
            for err in self.errors.iter().take(5) {
                lines.push(format!("    - {err}"));
            }
            if self.errors.len() > 5 {
                lines.push(format!("    ... and {} more", self.errors.len() - 5));
            }
        }
        lines.join("\n")
    }
}

// ── Chain ────────────────────────────────────────────────────────────────────

/// The append-only log of cells, Genesis first.
///
/// Cells are held behind `Arc`: [`Chain::fork`] clones the pointer vector,
/// so a simulation chain shares every base cell and only its private
/// extension differs.
#[derive(Clone, Debug, Default)]
pub struct Chain {
    cells: Vec<Arc<DecisionCell>>,
    index: HashMap<CellId, usize>,
    graph_id: Option<String>,
    root_namespace: Option<String>,
    hash_scheme: Option<String>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn length(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn genesis(&self) -> Option<&Arc<DecisionCell>> {
        self.cells.first()
    }

    pub fn head(&self) -> Option<&Arc<DecisionCell>> {
        self.cells.last()
    }

    pub fn graph_id(&self) -> Option<&str> {
        self.graph_id.as_deref()
    }

    pub fn root_namespace(&self) -> Option<&str> {
        self.root_namespace.as_deref()
    }

    pub fn hash_scheme(&self) -> Option<&str> {
        self.hash_scheme.as_deref()
    }

    pub fn has_genesis(&self) -> bool {
        self.cells.first().is_some_and(|c| c.is_genesis())
    }

    pub fn get_cell(&self, cell_id: &CellId) -> Option<&Arc<DecisionCell>> {
        self.index.get(cell_id).map(|&pos| &self.cells[pos])
    }

    pub fn cell_exists(&self, cell_id: &CellId) -> bool {
        self.index.contains_key(cell_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<DecisionCell>> {
        self.cells.iter()
    }

    /// Create and append the Genesis cell. Can only happen once.
    pub fn initialize(&mut self, spec: &GenesisSpec) -> Result<CellId, DgError> {
        if self.has_genesis() {
            return Err(DgError::GenesisViolation(
                "genesis already exists; cannot reinitialize".to_string(),
            ));
        }
        let genesis = create_genesis_cell(spec)?;
        let id = self.append(genesis)?;
        info!(graph_id = self.graph_id.as_deref().unwrap_or(""), "graph initialized");
        Ok(id)
    }

    /// Append a cell with default options (no signature verification).
    pub fn append(&mut self, cell: DecisionCell) -> Result<CellId, DgError> {
        self.append_cell(cell, false)
    }

    /// Append a cell. All invariants are checked before any mutation, so a
    /// failed append leaves the chain exactly as it was.
    ///
    /// With `verify_signatures` on, cells that declare `signature_required`
    /// must carry a signature. This is bootstrap mode: presence is checked,
    /// cryptographic resolution waits on a key registry.
    pub fn append_cell(
        &mut self,
        cell: DecisionCell,
        verify_signatures: bool,
    ) -> Result<CellId, DgError> {
        if cell.is_genesis() {
            if self.has_genesis() {
                return Err(DgError::GenesisViolation(
                    "genesis already exists; cannot add another".to_string(),
                ));
            }
            let (ok, failed) = verify_genesis(&cell);
            if !ok {
                return Err(DgError::GenesisViolation(format!(
                    "invalid genesis cell: {}",
                    failed.join("; ")
                )));
            }
            let id = cell.cell_id;
            self.graph_id = Some(cell.header().graph_id.clone());
            self.root_namespace = Some(cell.fact().namespace.clone());
            self.hash_scheme = Some(cell.header().hash_scheme.clone());
            self.index.insert(id, 0);
            self.cells.push(Arc::new(cell));
            return Ok(id);
        }

        if !self.has_genesis() {
            return Err(DgError::GenesisViolation(
                "cannot append cells before genesis exists".to_string(),
            ));
        }

        if !cell.verify_integrity() {
            return Err(DgError::IntegrityViolation(format!(
                "cell {} failed integrity check: computed hash does not match cell_id",
                cell.cell_id
            )));
        }

        let graph_id = self.graph_id.as_deref().unwrap_or("");
        if cell.header().graph_id != graph_id {
            return Err(DgError::GraphIdMismatch {
                expected: graph_id.to_string(),
                got: cell.header().graph_id.clone(),
            });
        }

        let scheme = self.hash_scheme.as_deref().unwrap_or("");
        if cell.header().hash_scheme != scheme {
            return Err(DgError::HashSchemeMismatch {
                expected: scheme.to_string(),
                got: cell.header().hash_scheme.clone(),
            });
        }

        let prev = self.get_cell(&cell.header().prev_cell_hash).ok_or_else(|| {
            DgError::ChainBreak(format!(
                "cell {} points to non-existent prev_cell_hash {}",
                cell.cell_id,
                cell.header().prev_cell_hash
            ))
        })?;

        // Monotonicity is relative to the linked predecessor: shadow variants
        // share their base cell's timestamp and still append cleanly.
        let cell_time = parse_utc(&cell.header().system_time)?;
        let prev_time = parse_utc(&prev.header().system_time)?;
        if cell_time < prev_time {
            return Err(DgError::TemporalViolation {
                cell_time: cell.header().system_time.clone(),
                prev_time: prev.header().system_time.clone(),
            });
        }

        if verify_signatures && cell.proof().signature_required && cell.proof().signature.is_none()
        {
            return Err(DgError::signature_invalid("cell requires signature but carries none")
                .with_details(json!({
                    "cell_id": cell.cell_id.to_hex(),
                    "signature_required": true,
                    "signature_present": false,
                })));
        }

        if self.index.contains_key(&cell.cell_id) {
            return Err(DgError::IntegrityViolation(format!(
                "duplicate cell_id {}",
                cell.cell_id
            )));
        }

        let id = cell.cell_id;
        self.index.insert(id, self.cells.len());
        self.cells.push(Arc::new(cell));
        debug!(cell_id = %id, length = self.cells.len(), "cell appended");
        Ok(id)
    }

    /// Fork this chain for simulation: shares all existing cells, and the
    /// fork's future appends never touch the original.
    pub fn fork(&self) -> Chain {
        self.clone()
    }

    // ── Validation ───────────────────────────────────────────────────────────

    /// Full validation pass over every cell and link.
    pub fn validate(&self) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if self.is_empty() {
            return ValidationResult {
                is_valid: true,
                cells_checked: 0,
                graph_id: None,
                root_namespace: None,
                errors,
                warnings: vec!["chain is empty".to_string()],
            };
        }

        let chain_graph_id = self.cells[0].header().graph_id.clone();
        let chain_root_ns = self.cells[0].fact().namespace.clone();

        if !self.cells[0].is_genesis() {
            errors.push("first cell is not genesis".to_string());
        } else {
            let (ok, failed) = verify_genesis(&self.cells[0]);
            if !ok {
                for check in failed {
                    errors.push(format!("genesis: {check}"));
                }
            }
        }

        let genesis_count = self.cells.iter().filter(|c| c.is_genesis()).count();
        if genesis_count > 1 {
            errors.push(format!("multiple genesis cells found: {genesis_count}"));
        }

        let mut seen: HashSet<CellId> = HashSet::new();
        let mut prev_time: Option<String> = None;

        for (i, cell) in self.cells.iter().enumerate() {
            if !seen.insert(cell.cell_id) {
                errors.push(format!("duplicate cell_id at position {i}: {}", cell.cell_id));
            }

            if !cell.verify_integrity() {
                errors.push(format!("integrity violation at position {i}: {}", cell.cell_id));
            }

            if cell.header().graph_id != chain_graph_id {
                errors.push(format!(
                    "graph id mismatch at position {i}: expected '{chain_graph_id}', got '{}'",
                    cell.header().graph_id
                ));
            }

            if i > 0 {
                if cell.header().prev_cell_hash == NULL_HASH {
                    errors.push(format!("non-genesis cell at position {i} has the null hash"));
                } else if !self.cell_exists(&cell.header().prev_cell_hash) {
                    errors.push(format!(
                        "broken chain at position {i}: prev_cell_hash {} not found",
                        cell.header().prev_cell_hash
                    ));
                }
            }

            if let Some(prev) = &prev_time {
                match (parse_utc(&cell.header().system_time), parse_utc(prev)) {
                    (Ok(t), Ok(p)) if t < p => warnings.push(format!(
                        "temporal inconsistency at position {i}: {} < {prev}",
                        cell.header().system_time
                    )),
                    (Err(_), _) => errors.push(format!(
                        "unparseable system_time at position {i}: '{}'",
                        cell.header().system_time
                    )),
                    _ => {}
                }
            }
            prev_time = Some(cell.header().system_time.clone());
        }

        ValidationResult {
            is_valid: errors.is_empty(),
            cells_checked: self.cells.len(),
            graph_id: Some(chain_graph_id),
            root_namespace: Some(chain_root_ns),
            errors,
            warnings,
        }
    }

    /// All cells failing the self-hash check, with positions.
    pub fn find_integrity_violations(&self) -> Vec<(usize, &Arc<DecisionCell>)> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.verify_integrity())
            .collect()
    }

    /// All cells whose graph_id differs from the chain's, with positions.
    pub fn find_graph_id_mismatches(&self) -> Vec<(usize, &Arc<DecisionCell>)> {
        let Some(graph_id) = self.graph_id.as_deref() else {
            return Vec::new();
        };
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| c.header().graph_id != graph_id)
            .collect()
    }

    // ── Traversal & finders ──────────────────────────────────────────────────

    /// Walk prev-links from `cell_id` back to Genesis.
    pub fn trace_to_genesis(&self, cell_id: &CellId) -> Result<Vec<Arc<DecisionCell>>, DgError> {
        let mut path = Vec::new();
        let mut current = *cell_id;
        while current != NULL_HASH {
            let cell = self.get_cell(&current).ok_or_else(|| {
                DgError::ChainBreak(format!("chain broken: cell {current} not found"))
            })?;
            path.push(Arc::clone(cell));
            current = cell.header().prev_cell_hash;
        }
        Ok(path)
    }

    pub fn find_by_type(&self, cell_type: CellType) -> Vec<&Arc<DecisionCell>> {
        self.cells.iter().filter(|c| c.header().cell_type == cell_type).collect()
    }

    pub fn find_by_subject(&self, subject: &str) -> Vec<&Arc<DecisionCell>> {
        self.cells.iter().filter(|c| c.fact().subject == subject).collect()
    }

    pub fn find_by_namespace(&self, namespace: &str, include_children: bool) -> Vec<&Arc<DecisionCell>> {
        self.cells
            .iter()
            .filter(|c| {
                if include_children {
                    is_namespace_prefix(namespace, &c.fact().namespace)
                } else {
                    c.fact().namespace == namespace
                }
            })
            .collect()
    }

    pub fn find_by_rule(&self, rule_id: &str) -> Vec<&Arc<DecisionCell>> {
        self.cells.iter().filter(|c| c.logic_anchor().rule_id == rule_id).collect()
    }

    /// Decision cells whose anchored rule hash no longer matches the current
    /// official hash — decisions made under stale rule text.
    pub fn find_decisions_with_rule_mismatch(
        &self,
        rule_cells: &HashMap<String, String>,
    ) -> Vec<&Arc<DecisionCell>> {
        self.cells
            .iter()
            .filter(|c| {
                c.header().cell_type == CellType::Decision
                    && rule_cells
                        .get(&c.logic_anchor().rule_id)
                        .is_some_and(|official| *official != c.logic_anchor().rule_logic_hash)
            })
            .collect()
    }

    // ── JSON import/export ───────────────────────────────────────────────────

    /// Export the whole chain. Cell bytes round-trip exactly.
    pub fn to_json(&self) -> Value {
        json!({
            "graph_id": self.graph_id,
            "root_namespace": self.root_namespace,
            "hash_scheme": self.hash_scheme,
            "cells": self.cells.iter().map(|c| c.to_value()).collect::<Vec<_>>(),
        })
    }

    /// Import a chain from its export format, re-running every append check.
    pub fn from_json(value: &Value) -> Result<Chain, DgError> {
        let cells = value
            .get("cells")
            .and_then(|v| v.as_array())
            .ok_or_else(|| DgError::schema_invalid("chain export is missing 'cells' array"))?;
        let mut chain = Chain::new();
        for cell_value in cells {
            let cell = DecisionCell::from_value(cell_value)?;
            chain.append(cell)?;
        }
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dg_core::{
        CellDraft, Fact, Header, LogicAnchor, Proof, SourceQuality, CELL_SCHEMA_VERSION,
    };

    fn test_chain() -> Chain {
        let mut chain = Chain::new();
        chain
            .initialize(
                &GenesisSpec::new("TestGraph", "corp")
                    .with_system_time("2025-01-01T00:00:00Z"),
            )
            .unwrap();
        chain
    }

    fn fact_draft(chain: &Chain, namespace: &str, subject: &str, object: &str) -> CellDraft {
        CellDraft {
            header: Header {
                version: CELL_SCHEMA_VERSION.to_string(),
                cell_type: CellType::Fact,
                graph_id: chain.graph_id().unwrap().to_string(),
                hash_scheme: chain.hash_scheme().unwrap().to_string(),
                system_time: "2025-01-02T00:00:00Z".to_string(),
                prev_cell_hash: chain.head().unwrap().cell_id,
            },
            fact: Fact {
                namespace: namespace.to_string(),
                subject: subject.to_string(),
                predicate: "has_salary".to_string(),
                object: object.to_string(),
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
        }
    }

    #[test]
    fn clean_append() {
        let mut chain = test_chain();
        let cell = fact_draft(&chain, "corp", "user:alice", "80000").seal().unwrap();
        let id = chain.append(cell).unwrap();
        assert_eq!(chain.length(), 2);
        assert_eq!(chain.head().unwrap().cell_id, id);
        assert!(chain.validate().is_valid);
    }

    #[test]
    fn second_genesis_is_rejected() {
        let mut chain = test_chain();
        let err = chain.initialize(&GenesisSpec::new("Another", "corp"));
        assert!(matches!(err, Err(DgError::GenesisViolation(_))));

        let genesis2 =
            create_genesis_cell(&GenesisSpec::new("Other", "corp")).unwrap();
        assert!(matches!(chain.append(genesis2), Err(DgError::GenesisViolation(_))));
    }

    #[test]
    fn fact_with_null_prev_hash_is_a_chain_break() {
        let mut chain = test_chain();
        let mut draft = fact_draft(&chain, "corp", "user:alice", "80000");
        draft.header.prev_cell_hash = NULL_HASH;
        let cell = draft.seal().unwrap();
        assert!(matches!(chain.append(cell), Err(DgError::ChainBreak(_))));
        assert_eq!(chain.length(), 1, "failed append must not mutate the chain");
    }

    #[test]
    fn unknown_prev_hash_is_a_chain_break() {
        let mut chain = test_chain();
        let mut draft = fact_draft(&chain, "corp", "user:alice", "80000");
        draft.header.prev_cell_hash = CellId::from_bytes([9u8; 32]);
        let cell = draft.seal().unwrap();
        assert!(matches!(chain.append(cell), Err(DgError::ChainBreak(_))));
    }

    #[test]
    fn wrong_graph_id_is_rejected() {
        let mut chain = test_chain();
        let mut draft = fact_draft(&chain, "corp", "user:alice", "80000");
        draft.header.graph_id = "graph:other-ffff".to_string();
        let cell = draft.seal().unwrap();
        assert!(matches!(chain.append(cell), Err(DgError::GraphIdMismatch { .. })));
    }

    #[test]
    fn earlier_timestamp_is_a_temporal_violation() {
        let mut chain = test_chain();
        let mut draft = fact_draft(&chain, "corp", "user:alice", "80000");
        draft.header.system_time = "2024-12-31T00:00:00Z".to_string();
        let cell = draft.seal().unwrap();
        assert!(matches!(chain.append(cell), Err(DgError::TemporalViolation { .. })));
    }

    #[test]
    fn signature_required_without_signature_fails_when_verifying() {
        let mut chain = test_chain();
        let mut draft = fact_draft(&chain, "corp", "user:alice", "80000");
        draft.proof.signature_required = true;
        let cell = draft.seal().unwrap();
        assert!(matches!(
            chain.append_cell(cell, true),
            Err(DgError::SignatureInvalid { .. })
        ));

        // Bootstrap mode: a present signature passes without key resolution.
        let mut draft = fact_draft(&chain, "corp", "user:alice", "80000");
        draft.proof.signature_required = true;
        draft.proof.signature = Some("c2ln".to_string());
        let cell = draft.seal().unwrap();
        assert!(chain.append_cell(cell, true).is_ok());
    }

    #[test]
    fn trace_to_genesis_walks_all_links() {
        let mut chain = test_chain();
        let a = chain.append(fact_draft(&chain, "corp", "user:alice", "1").seal().unwrap()).unwrap();
        let _b = chain.append(fact_draft(&chain, "corp", "user:bob", "2").seal().unwrap()).unwrap();
        let path = chain.trace_to_genesis(&a).unwrap();
        assert_eq!(path.len(), 2);
        assert!(path.last().unwrap().is_genesis());
    }

    #[test]
    fn json_round_trip_reproduces_ids() {
        let mut chain = test_chain();
        chain.append(fact_draft(&chain, "corp", "user:alice", "80000").seal().unwrap()).unwrap();
        let exported = chain.to_json();
        let restored = Chain::from_json(&exported).unwrap();
        assert_eq!(restored.length(), chain.length());
        for (a, b) in chain.iter().zip(restored.iter()) {
            assert_eq!(a.cell_id, b.cell_id);
        }
    }

    #[test]
    fn tampered_export_is_rejected_on_import() {
        let mut chain = test_chain();
        chain.append(fact_draft(&chain, "corp", "user:alice", "80000").seal().unwrap()).unwrap();
        let mut exported = chain.to_json();
        exported["cells"][1]["fact"]["object"] = json!("90000");
        assert!(matches!(
            Chain::from_json(&exported),
            Err(DgError::IntegrityViolation(_))
        ));
    }

    #[test]
    fn namespace_finder_respects_children_flag() {
        let mut chain = test_chain();
        chain.append(fact_draft(&chain, "corp.hr", "user:alice", "1").seal().unwrap()).unwrap();
        chain.append(fact_draft(&chain, "corp.hr.pay", "user:bob", "2").seal().unwrap()).unwrap();
        assert_eq!(chain.find_by_namespace("corp.hr", true).len(), 2);
        assert_eq!(chain.find_by_namespace("corp.hr", false).len(), 1);
    }

    #[test]
    fn fork_isolates_extensions() {
        let mut chain = test_chain();
        chain.append(fact_draft(&chain, "corp", "user:alice", "1").seal().unwrap()).unwrap();
        let mut fork = chain.fork();
        fork.append(fact_draft(&fork, "corp", "user:bob", "2").seal().unwrap()).unwrap();
        assert_eq!(chain.length(), 2);
        assert_eq!(fork.length(), 3);
        assert_eq!(chain.head().unwrap().fact().subject, "user:alice");
    }

    #[test]
    fn rule_mismatch_finder() {
        let mut chain = test_chain();
        let mut draft = fact_draft(&chain, "corp", "case:1", "approved");
        draft.header.cell_type = CellType::Decision;
        draft.logic_anchor.rule_logic_hash = "a".repeat(64);
        chain.append(draft.seal().unwrap()).unwrap();

        let mut official = HashMap::new();
        official.insert("rule:payroll".to_string(), "b".repeat(64));
        assert_eq!(chain.find_decisions_with_rule_mismatch(&official).len(), 1);

        official.insert("rule:payroll".to_string(), "a".repeat(64));
        assert_eq!(chain.find_decisions_with_rule_mismatch(&official).len(), 0);
    }
}
