use serde_json::Value;

use crate::simulation::SimulationResult;

/// Immutable result of a batch backtest: one simulation per RFA, run under a
/// shared overlay and bitemporal coordinates, with execution-budget
/// accounting.
#[derive(Debug)]
pub struct BatchBacktestResult {
    /// Sorted by (subject, valid time, system time) for reproducibility.
    pub results: Vec<SimulationResult>,
    /// True iff any limit (cases, runtime, cells touched) stopped the batch.
    pub backtest_incomplete: bool,
    pub cases_processed: usize,
    pub runtime_ms: f64,
    pub cells_touched: usize,
}

impl BatchBacktestResult {
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "results": self.results.iter().map(|r| r.to_value()).collect::<Vec<_>>(),
            "backtest_incomplete": self.backtest_incomplete,
            "cases_processed": self.cases_processed,
            "runtime_ms": self.runtime_ms,
            "cells_touched": self.cells_touched,
        })
    }
}

/// Deterministic batch ordering: subject (missing sorts first), then valid
/// time, then system time. Stable, so equal keys keep arrival order.
pub fn sort_results(mut results: Vec<SimulationResult>) -> Vec<SimulationResult> {
    results.sort_by(|a, b| {
        let subject = |r: &SimulationResult| {
            r.rfa.get("subject").and_then(|s| s.as_str()).unwrap_or("").to_string()
        };
        (subject(a), a.at_valid_time.clone(), a.as_of_system_time.clone()).cmp(&(
            subject(b),
            b.at_valid_time.clone(),
            b.as_of_system_time.clone(),
        ))
    });
    results
}

/// Cells a simulation touched: fact, candidate and bridge ids on both the
/// base and shadow sides. Feeds the batch `max_cells_touched` limit.
pub fn count_cells_in_simulation(result: &SimulationResult) -> usize {
    let count_side = |bundle: &Value| -> usize {
        let len = |v: &Value| v.as_array().map(|a| a.len()).unwrap_or(0);
        len(&bundle["results"]["fact_cell_ids"])
            + len(&bundle["proof"]["candidate_cell_ids"])
            + len(&bundle["proof"]["bridges_used"])
    };
    count_side(&result.base_result) + count_side(&result.shadow_result)
}
