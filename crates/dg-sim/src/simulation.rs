use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use dg_canon::{canonical_json_string, sha256_hex};
use dg_chain::Chain;
use dg_core::{CellId, DgError};
use dg_scholar::Scholar;

use crate::shadow::{fork_shadow_chain, OverlayContext};

// ── SimulationContext ────────────────────────────────────────────────────────

/// An isolated shadow world, alive for the duration of one simulation.
///
/// Construction forks the base chain and appends every overlay cell
/// *before* any Scholar is created, so shadow cells are visible to queries.
/// Dropping the context discards the shadow chain; the base chain is not
/// reachable from here at all, which is what makes contamination
/// structurally impossible.
pub struct SimulationContext {
    shadow_chain: Chain,
    at_valid_time: String,
    as_of_system_time: String,
}

impl SimulationContext {
    pub fn enter(
        base_chain: &Chain,
        overlay: &OverlayContext,
        at_valid_time: impl Into<String>,
        as_of_system_time: impl Into<String>,
    ) -> Result<Self, DgError> {
        let mut shadow_chain = fork_shadow_chain(base_chain);

        for cells in overlay.shadow_facts.values() {
            for cell in cells {
                shadow_chain.append(cell.clone())?;
            }
        }
        for cell in overlay.shadow_rules.values() {
            shadow_chain.append(cell.clone())?;
        }
        for cell in overlay.shadow_policy_heads.values() {
            shadow_chain.append(cell.clone())?;
        }
        for cell in overlay.shadow_bridges.values() {
            shadow_chain.append(cell.clone())?;
        }

        Ok(Self {
            shadow_chain,
            at_valid_time: at_valid_time.into(),
            as_of_system_time: as_of_system_time.into(),
        })
    }

    /// A Scholar over the shadow chain (base cells + overlay).
    pub fn scholar(&self) -> Scholar<'_> {
        Scholar::new(&self.shadow_chain)
    }

    pub fn shadow_chain(&self) -> &Chain {
        &self.shadow_chain
    }

    pub fn at_valid_time(&self) -> &str {
        &self.at_valid_time
    }

    pub fn as_of_system_time(&self) -> &str {
        &self.as_of_system_time
    }
}

// ── Delta report ─────────────────────────────────────────────────────────────

/// Sorted added/removed cell id lists.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct FactsDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Deterministic comparison of base and shadow query results.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DeltaReport {
    pub verdict_changed: bool,
    pub status_before: String,
    pub status_after: String,
    /// Reserved; always 0.0 in v1.
    pub score_delta: f64,
    pub facts_diff: FactsDiff,
    pub rules_diff: FactsDiff,
}

fn fact_ids_of(bundle: &Value) -> Vec<String> {
    bundle["results"]["fact_cell_ids"]
        .as_array()
        .map(|ids| ids.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default()
}

fn status_of(bundle: &Value) -> &'static str {
    if bundle["authorization_basis"]["allowed"].as_bool().unwrap_or(false) {
        "ALLOWED"
    } else {
        "DENIED"
    }
}

/// Compare two proof bundles. The verdict is the fact count; diffs are set
/// differences sorted for reproducibility.
pub fn compute_delta_report(base_result: &Value, shadow_result: &Value) -> DeltaReport {
    let base_facts = fact_ids_of(base_result);
    let shadow_facts = fact_ids_of(shadow_result);

    let mut added: Vec<String> =
        shadow_facts.iter().filter(|id| !base_facts.contains(id)).cloned().collect();
    let mut removed: Vec<String> =
        base_facts.iter().filter(|id| !shadow_facts.contains(id)).cloned().collect();
    added.sort();
    removed.sort();

    let base_count = base_result["results"]["fact_count"].as_u64().unwrap_or(0);
    let shadow_count = shadow_result["results"]["fact_count"].as_u64().unwrap_or(0);

    DeltaReport {
        verdict_changed: base_count != shadow_count,
        status_before: status_of(base_result).to_string(),
        status_after: status_of(shadow_result).to_string(),
        score_delta: 0.0,
        facts_diff: FactsDiff { added, removed },
        rules_diff: FactsDiff::default(),
    }
}

// ── Origin tagging ───────────────────────────────────────────────────────────

/// Tag a proof bundle with its origin (`BASE` or `SHADOW`).
///
/// Works on a deep copy; each cell-id list gains a parallel
/// `*_with_origin` list so consumers can merge bundles without losing
/// lineage. The original lists are kept untouched.
pub fn tag_proof_bundle_origin(proof_bundle: &Value, origin: &str) -> Value {
    let mut tagged = proof_bundle.clone();
    tagged["origin"] = json!(origin);

    let tag_list = |ids: &Value| -> Value {
        Value::Array(
            ids.as_array()
                .map(|list| {
                    list.iter()
                        .map(|id| json!({"cell_id": id, "origin": origin}))
                        .collect()
                })
                .unwrap_or_default(),
        )
    };

    if let Some(ids) = tagged.get("results").and_then(|r| r.get("fact_cell_ids")).cloned() {
        tagged["results"]["fact_cell_ids_with_origin"] = tag_list(&ids);
    }
    if let Some(ids) = tagged.get("proof").and_then(|p| p.get("candidate_cell_ids")).cloned() {
        tagged["proof"]["candidate_cell_ids_with_origin"] = tag_list(&ids);
    }
    if let Some(ids) = tagged.get("proof").and_then(|p| p.get("bridges_used")).cloned() {
        tagged["proof"]["bridges_used_with_origin"] = tag_list(&ids);
    }

    tagged
}

// ── Contamination attestation ────────────────────────────────────────────────

/// Proof that the base chain head did not move during a simulation.
/// `contamination_detected` must always be false — isolation is structural,
/// and the attestation exists so auditors need not take that on faith.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ContaminationAttestation {
    pub chain_head_before: String,
    pub chain_head_after: String,
    pub attestation_hash: String,
    pub contamination_detected: bool,
}

pub fn create_contamination_attestation(
    chain_head_before: &CellId,
    chain_head_after: &CellId,
    simulation_id: &str,
) -> ContaminationAttestation {
    let before = chain_head_before.to_hex();
    let after = chain_head_after.to_hex();
    let attestation_hash = sha256_hex(format!("{before}|{after}|{simulation_id}").as_bytes());
    ContaminationAttestation {
        contamination_detected: before != after,
        chain_head_before: before,
        chain_head_after: after,
        attestation_hash,
    }
}

// ── SimulationResult ─────────────────────────────────────────────────────────

/// The immutable outcome of one simulation. `to_value()` is deterministic:
/// canonical JSON of the same result is byte-identical across runs.
#[derive(Clone, Debug, Serialize)]
pub struct SimulationResult {
    pub simulation_id: String,
    pub rfa: Value,
    pub simulation_spec: Value,
    pub base_result: Value,
    pub shadow_result: Value,
    pub at_valid_time: String,
    pub as_of_system_time: String,
    pub delta_report: DeltaReport,
    pub anchors: Value,
    pub proof_bundle: Value,
}

impl SimulationResult {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("simulation result serialization is infallible")
    }
}

/// Deterministic plain-text audit report for a simulation.
/// The same `SimulationResult` always renders to the same text.
pub fn simulation_result_to_audit_text(result: &SimulationResult) -> String {
    let mut lines: Vec<String> = Vec::new();
    let short = |s: &str| -> String {
        if s.len() > 16 { format!("{}...", &s[..16]) } else { s.to_string() }
    };

    lines.push("SIMULATION AUDIT REPORT".to_string());
    lines.push("=".repeat(50));
    lines.push(String::new());

    lines.push("Simulation Context:".to_string());
    lines.push(format!("  Simulation ID: {}", short(&result.simulation_id)));
    lines.push(format!(
        "  RFA Hash: {}...",
        &sha256_hex(canonical_json_string(&result.rfa).as_bytes())[..16]
    ));
    lines.push(format!(
        "  Simulation Spec Hash: {}...",
        &sha256_hex(canonical_json_string(&result.simulation_spec).as_bytes())[..16]
    ));
    lines.push(format!("  Valid Time: {}", result.at_valid_time));
    lines.push(format!("  System Time: {}", result.as_of_system_time));
    lines.push(String::new());

    let render_reality = |lines: &mut Vec<String>, label: &str, bundle: &Value, base_ids: &[String]| {
        lines.push(format!("{label} Reality:"));
        let ids = fact_ids_of(bundle);
        lines.push(format!("  Facts Returned: {}", ids.len()));
        lines.push(format!("  Authorization: {}", status_of(bundle)));
        if !ids.is_empty() {
            lines.push("  Fact Cells:".to_string());
            for id in &ids {
                let tag = if label == "SHADOW" && !base_ids.contains(id) { " [SHADOW]" } else { "" };
                lines.push(format!("    - {}{tag}", short(id)));
            }
        }
        lines.push(String::new());
    };

    let base_ids = fact_ids_of(&result.base_result);
    render_reality(&mut lines, "BASE", &result.base_result, &base_ids);
    render_reality(&mut lines, "SHADOW", &result.shadow_result, &base_ids);

    lines.push("DELTA Analysis:".to_string());
    let dr = &result.delta_report;
    lines.push(format!("  Verdict Changed: {}", dr.verdict_changed));
    lines.push(format!("  Status Change: {} -> {}", dr.status_before, dr.status_after));
    lines.push(format!("  Score Delta: {}", dr.score_delta));
    lines.push(format!(
        "  Facts Diff: Added={}, Removed={}",
        dr.facts_diff.added.len(),
        dr.facts_diff.removed.len()
    ));
    lines.push(String::new());

    lines.push("Counterfactual Anchors:".to_string());
    let anchors = result.anchors["anchors"].as_array().cloned().unwrap_or_default();
    lines.push(format!("  Anchors Detected: {}", anchors.len()));
    if !anchors.is_empty() {
        lines.push("  Minimal Changes:".to_string());
        for anchor in &anchors {
            lines.push(format!(
                "    - ({}, {})",
                anchor["component_type"].as_str().unwrap_or("?"),
                short(anchor["cell_id"].as_str().unwrap_or("?"))
            ));
        }
    }
    if result.anchors["anchors_incomplete"].as_bool().unwrap_or(false) {
        lines.push("  [INCOMPLETE] Anchor search reached execution budget limit".to_string());
    }
    lines.push(String::new());

    lines.push("Contamination Attestation:".to_string());
    let attestation = &result.proof_bundle["contamination_attestation"];
    lines.push(format!(
        "  Chain Head Before: {}",
        short(attestation["chain_head_before"].as_str().unwrap_or(""))
    ));
    lines.push(format!(
        "  Chain Head After: {}",
        short(attestation["chain_head_after"].as_str().unwrap_or(""))
    ));
    lines.push(format!(
        "  Contamination Detected: {}",
        attestation["contamination_detected"].as_bool().unwrap_or(false)
    ));
    lines.push(format!(
        "  Attestation Hash: {}",
        short(attestation["attestation_hash"].as_str().unwrap_or(""))
    ));

    lines.join("\n")
}
