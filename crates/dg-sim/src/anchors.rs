use std::time::Instant;

use serde_json::{json, Value};
use tracing::debug;

use dg_canon::{canonical_json_bytes, sha256_hex};
use dg_core::DgError;

use crate::shadow::SimulationSpec;

// ── ExecutionBudget ──────────────────────────────────────────────────────────

/// Bounded-execution tracker: attempt count plus wall clock. Anchor search
/// stops when either cap is hit and reports partial results instead of
/// raising.
#[derive(Debug)]
pub struct ExecutionBudget {
    pub max_attempts: usize,
    pub max_runtime_ms: u64,
    pub attempts: usize,
    start: Instant,
}

impl ExecutionBudget {
    pub fn new(max_attempts: usize, max_runtime_ms: u64) -> Self {
        Self { max_attempts, max_runtime_ms, attempts: 0, start: Instant::now() }
    }

    pub fn is_exceeded(&self) -> bool {
        self.attempts >= self.max_attempts || self.elapsed_ms() >= self.max_runtime_ms as f64
    }

    pub fn increment(&mut self) {
        self.attempts += 1;
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

// ── Anchor kinds & results ───────────────────────────────────────────────────

/// Which overlay family an anchor component belongs to. Enumeration order
/// during the search is fact, rule, policy, bridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AnchorKind {
    Fact,
    Rule,
    Policy,
    Bridge,
}

impl AnchorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnchorKind::Fact => "fact",
            AnchorKind::Rule => "rule",
            AnchorKind::Policy => "policy",
            AnchorKind::Bridge => "bridge",
        }
    }
}

/// Outcome of a counterfactual anchor search.
#[derive(Clone, Debug, PartialEq)]
pub struct AnchorResult {
    /// Minimal overlay components still flipping the verdict, sorted by
    /// (kind name, cell id).
    pub anchors: Vec<(AnchorKind, String)>,
    /// True iff the search stopped on budget before completing.
    pub anchors_incomplete: bool,
    pub attempts_used: usize,
    pub runtime_ms: f64,
    /// SHA-256 over the canonical JSON of the sorted anchor list.
    pub anchor_hash: String,
}

impl AnchorResult {
    pub fn to_value(&self) -> Value {
        json!({
            "anchors": self.anchors.iter().map(|(kind, id)| {
                json!({"component_type": kind.as_str(), "cell_id": id})
            }).collect::<Vec<_>>(),
            "anchors_incomplete": self.anchors_incomplete,
            "attempts_used": self.attempts_used,
            "runtime_ms": self.runtime_ms,
            "anchor_hash": self.anchor_hash,
        })
    }
}

/// Stable identity of an anchor set: the same components in any order hash
/// identically.
pub fn compute_anchor_hash(anchors: &[(AnchorKind, String)]) -> String {
    let mut sorted: Vec<(&str, &str)> =
        anchors.iter().map(|(k, id)| (k.as_str(), id.as_str())).collect();
    sorted.sort();
    let value = Value::Array(
        sorted.into_iter().map(|(k, id)| json!([k, id])).collect(),
    );
    sha256_hex(&canonical_json_bytes(&value))
}

fn sort_anchors(mut anchors: Vec<(AnchorKind, String)>) -> Vec<(AnchorKind, String)> {
    anchors.sort_by(|a, b| (a.0.as_str(), &a.1).cmp(&(b.0.as_str(), &b.1)));
    anchors
}

// ── Subset enumeration ───────────────────────────────────────────────────────

/// All k-subsets of `items`, in lexicographic index order. Small and
/// deterministic; the budget caps how many are actually tested.
fn combinations<T: Clone>(items: &[T], k: usize) -> Vec<Vec<T>> {
    let n = items.len();
    let mut out = Vec::new();
    if k == 0 || k > n {
        return out;
    }
    let mut indices: Vec<usize> = (0..k).collect();
    loop {
        out.push(indices.iter().map(|&i| items[i].clone()).collect());
        // Advance to the next combination.
        let mut i = k;
        loop {
            if i == 0 {
                return out;
            }
            i -= 1;
            if indices[i] != i + n - k {
                break;
            }
        }
        indices[i] += 1;
        for j in (i + 1)..k {
            indices[j] = indices[j - 1] + 1;
        }
    }
}

/// Restrict a simulation spec to the given components.
fn restrict_spec(spec: &SimulationSpec, subset: &[(AnchorKind, String)]) -> SimulationSpec {
    let keep = |kind: AnchorKind, id: &str| -> bool {
        subset.iter().any(|(k, cid)| *k == kind && cid == id)
    };
    SimulationSpec {
        shadow_facts: spec
            .shadow_facts
            .iter()
            .filter(|f| keep(AnchorKind::Fact, &f.base_cell_id))
            .cloned()
            .collect(),
        shadow_rules: spec
            .shadow_rules
            .iter()
            .filter(|r| keep(AnchorKind::Rule, &r.base_cell_id))
            .cloned()
            .collect(),
        shadow_policy_heads: spec
            .shadow_policy_heads
            .iter()
            .filter(|p| keep(AnchorKind::Policy, &p.base_cell_id))
            .cloned()
            .collect(),
        shadow_bridges: spec
            .shadow_bridges
            .iter()
            .filter(|b| keep(AnchorKind::Bridge, &b.base_cell_id))
            .cloned()
            .collect(),
    }
}

// ── Search ───────────────────────────────────────────────────────────────────

/// Find the minimal subset of overlay components that, applied alone, still
/// flips the verdict.
///
/// Greedy iterative ablation: starting from the full set, try every subset
/// one component smaller (in deterministic order); whenever a smaller subset
/// still flips the verdict, adopt it and descend. `test_verdict` re-runs the
/// simulation for a restricted spec and reports whether the verdict still
/// changed — the Engine supplies it, keeping this crate free of an Engine
/// dependency.
///
/// Budget exhaustion returns the best-so-far with `anchors_incomplete`,
/// never an error.
pub fn detect_counterfactual_anchors<F>(
    simulation_spec: &SimulationSpec,
    max_anchor_attempts: usize,
    max_runtime_ms: u64,
    mut test_verdict: F,
) -> Result<AnchorResult, DgError>
where
    F: FnMut(&SimulationSpec) -> Result<bool, DgError>,
{
    let mut budget = ExecutionBudget::new(max_anchor_attempts, max_runtime_ms);

    // Enumerate components: facts, rules, policies, bridges, each sorted by
    // base cell id.
    let mut components: Vec<(AnchorKind, String)> = Vec::new();
    let mut fact_ids: Vec<String> =
        simulation_spec.shadow_facts.iter().map(|f| f.base_cell_id.clone()).collect();
    fact_ids.sort();
    components.extend(fact_ids.into_iter().map(|id| (AnchorKind::Fact, id)));
    let mut rule_ids: Vec<String> =
        simulation_spec.shadow_rules.iter().map(|r| r.base_cell_id.clone()).collect();
    rule_ids.sort();
    components.extend(rule_ids.into_iter().map(|id| (AnchorKind::Rule, id)));
    let mut policy_ids: Vec<String> =
        simulation_spec.shadow_policy_heads.iter().map(|p| p.base_cell_id.clone()).collect();
    policy_ids.sort();
    components.extend(policy_ids.into_iter().map(|id| (AnchorKind::Policy, id)));
    let mut bridge_ids: Vec<String> =
        simulation_spec.shadow_bridges.iter().map(|b| b.base_cell_id.clone()).collect();
    bridge_ids.sort();
    components.extend(bridge_ids.into_iter().map(|id| (AnchorKind::Bridge, id)));

    if components.is_empty() {
        return Ok(AnchorResult {
            anchors: Vec::new(),
            anchors_incomplete: false,
            attempts_used: 0,
            runtime_ms: 0.0,
            anchor_hash: compute_anchor_hash(&[]),
        });
    }

    let mut minimal = components.clone();

    let partial = |minimal: &[(AnchorKind, String)], budget: &ExecutionBudget| AnchorResult {
        anchors: sort_anchors(minimal.to_vec()),
        anchors_incomplete: true,
        attempts_used: budget.attempts,
        runtime_ms: budget.elapsed_ms(),
        anchor_hash: compute_anchor_hash(minimal),
    };

    for size in (1..components.len()).rev() {
        if budget.is_exceeded() {
            return Ok(partial(&minimal, &budget));
        }
        let mut shrunk = false;
        for subset in combinations(&minimal, size) {
            if budget.is_exceeded() {
                return Ok(partial(&minimal, &budget));
            }
            let restricted = restrict_spec(simulation_spec, &subset);
            let verdict_changed = test_verdict(&restricted)?;
            budget.increment();
            if verdict_changed {
                debug!(size, "smaller anchor subset still flips verdict");
                minimal = subset;
                shrunk = true;
                break;
            }
        }
        if !shrunk {
            break;
        }
    }

    Ok(AnchorResult {
        anchors: sort_anchors(minimal.clone()),
        anchors_incomplete: false,
        attempts_used: budget.attempts,
        runtime_ms: budget.elapsed_ms(),
        anchor_hash: compute_anchor_hash(&minimal),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shadow::{ShadowFactSpec, ShadowRuleSpec};

    fn fact_spec(id: &str) -> ShadowFactSpec {
        ShadowFactSpec {
            base_cell_id: id.to_string(),
            object: Some("x".to_string()),
            confidence: None,
            valid_from: None,
            valid_to: None,
        }
    }

    fn rule_spec(id: &str) -> ShadowRuleSpec {
        ShadowRuleSpec { base_cell_id: id.to_string(), rule_logic_hash: Some("f".repeat(64)) }
    }

    #[test]
    fn combinations_are_lexicographic() {
        let combos = combinations(&[1, 2, 3], 2);
        assert_eq!(combos, vec![vec![1, 2], vec![1, 3], vec![2, 3]]);
        assert!(combinations(&[1, 2], 3).is_empty());
    }

    #[test]
    fn empty_overlay_yields_empty_complete_result() {
        let spec = SimulationSpec::default();
        let result =
            detect_counterfactual_anchors(&spec, 100, 5000, |_| Ok(true)).unwrap();
        assert!(result.anchors.is_empty());
        assert!(!result.anchors_incomplete);
        assert_eq!(result.attempts_used, 0);
    }

    #[test]
    fn single_culprit_is_isolated() {
        // Two shadow facts and one shadow rule; only the rule flips the verdict.
        let spec = SimulationSpec {
            shadow_facts: vec![fact_spec(&"aa".repeat(32)), fact_spec(&"bb".repeat(32))],
            shadow_rules: vec![rule_spec(&"cc".repeat(32))],
            ..Default::default()
        };
        let result = detect_counterfactual_anchors(&spec, 100, 5000, |restricted| {
            Ok(!restricted.shadow_rules.is_empty())
        })
        .unwrap();
        assert_eq!(result.anchors, vec![(AnchorKind::Rule, "cc".repeat(32))]);
        assert!(!result.anchors_incomplete);
        assert!(result.attempts_used > 0);
    }

    #[test]
    fn budget_of_one_attempt_reports_incomplete() {
        let spec = SimulationSpec {
            shadow_facts: vec![fact_spec(&"aa".repeat(32)), fact_spec(&"bb".repeat(32))],
            shadow_rules: vec![rule_spec(&"cc".repeat(32))],
            ..Default::default()
        };
        let result = detect_counterfactual_anchors(&spec, 1, 5000, |restricted| {
            Ok(!restricted.shadow_rules.is_empty())
        })
        .unwrap();
        assert!(result.anchors_incomplete);
        assert_eq!(result.attempts_used, 1);
        // Best-so-far is returned, never empty-handed.
        assert!(!result.anchors.is_empty());
    }

    #[test]
    fn inseparable_pair_is_kept_whole() {
        // The verdict only flips when both facts are present.
        let a = "aa".repeat(32);
        let b = "bb".repeat(32);
        let spec = SimulationSpec {
            shadow_facts: vec![fact_spec(&a), fact_spec(&b)],
            ..Default::default()
        };
        let result = detect_counterfactual_anchors(&spec, 100, 5000, |restricted| {
            Ok(restricted.shadow_facts.len() == 2)
        })
        .unwrap();
        assert_eq!(result.anchors.len(), 2);
        assert!(!result.anchors_incomplete);
    }

    #[test]
    fn anchor_hash_is_order_independent() {
        let a = (AnchorKind::Rule, "cc".repeat(32));
        let b = (AnchorKind::Fact, "aa".repeat(32));
        assert_eq!(
            compute_anchor_hash(&[a.clone(), b.clone()]),
            compute_anchor_hash(&[b, a])
        );
    }

    #[test]
    fn restricting_to_anchors_still_flips_verdict() {
        // Property 8: re-running with only the anchors must flip the verdict.
        let spec = SimulationSpec {
            shadow_facts: vec![fact_spec(&"aa".repeat(32))],
            shadow_rules: vec![rule_spec(&"cc".repeat(32))],
            ..Default::default()
        };
        let oracle = |restricted: &SimulationSpec| Ok(!restricted.shadow_rules.is_empty());
        let result = detect_counterfactual_anchors(&spec, 100, 5000, oracle).unwrap();
        assert!(!result.anchors_incomplete);
        let restricted = restrict_spec(&spec, &result.anchors);
        assert!(oracle(&restricted).unwrap());
    }
}
