use std::collections::{BTreeMap, HashMap};

use serde_json::{json, Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use dg_canon::{canonical_json_bytes, sha256_hex};
use dg_chain::Chain;
use dg_core::{current_timestamp, CellId, DecisionCell, DgError};
use dg_crypto::verify_signature;
use dg_promote::{
    create_policy_head, get_current_policy_head, verify_policy_hash, PolicyHeadSpec,
    PromotionRequest, PromotionStatus, WitnessRegistry,
};
use dg_scholar::{QueryParams, Scholar};
use dg_sim::{
    compute_delta_report, create_contamination_attestation, create_shadow_bridge,
    create_shadow_fact, create_shadow_policy_head, create_shadow_rule,
    detect_counterfactual_anchors, sort_results, tag_proof_bundle_origin, BatchBacktestResult,
    ExecutionBudget, OverlayContext, SimulationContext, SimulationResult, SimulationSpec,
    count_cells_in_simulation,
};
use dg_wal::SegmentedWal;

use crate::packet::{build_proof_packet, sign_proof_packet};
use crate::rfa::{canonicalize_rfa, opt_str_field, validate_rfa_fields, validate_rfa_schema};

/// The validated entry point for queries, promotions and simulations over
/// one graph. Single-threaded by design: callers serialize mutations.
pub struct Engine {
    chain: Chain,
    wal: Option<SegmentedWal>,
    signing_key: Option<Vec<u8>>,
    public_key: Option<Vec<u8>>,
    verify_cell_signatures: bool,
    promotions: HashMap<String, PromotionRequest>,
    expected_prev_policy_head: HashMap<String, Option<CellId>>,
}

impl Engine {
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            wal: None,
            signing_key: None,
            public_key: None,
            verify_cell_signatures: false,
            promotions: HashMap::new(),
            expected_prev_policy_head: HashMap::new(),
        }
    }

    /// Attach Ed25519 keys for ProofPacket signing.
    pub fn with_signing_keys(mut self, signing_key: Vec<u8>, public_key: Vec<u8>) -> Self {
        self.signing_key = Some(signing_key);
        self.public_key = Some(public_key);
        self
    }

    /// Require signatures on cells that declare `signature_required`.
    pub fn with_cell_signature_verification(mut self, on: bool) -> Self {
        self.verify_cell_signatures = on;
        self
    }

    /// Attach a durable log. Every subsequent append lands in the WAL in
    /// the same call that extends the chain. A fresh WAL is backfilled with
    /// the cells already on the chain (Genesis included), so segments alone
    /// always reconstruct the full graph.
    pub fn with_wal(mut self, mut wal: SegmentedWal) -> Result<Self, DgError> {
        if wal.next_sequence() == 0 {
            for cell in self.chain.iter() {
                wal.append(&canonical_json_bytes(&cell.to_value()))?;
            }
        }
        self.wal = Some(wal);
        Ok(self)
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Append a cell through the engine: chain invariants first, then the
    /// WAL write. The WAL is synchronous; when this returns the cell is on
    /// the chain and durable.
    pub fn append_cell(&mut self, cell: DecisionCell) -> Result<CellId, DgError> {
        let bytes = canonical_json_bytes(&cell.to_value());
        let id = self.chain.append_cell(cell, self.verify_cell_signatures)?;
        if let Some(wal) = &mut self.wal {
            wal.append(&bytes)?;
        }
        Ok(id)
    }

    // ── process_rfa ──────────────────────────────────────────────────────────

    /// Process a Request-For-Access and return a ProofPacket.
    ///
    /// Pipeline: canonicalize → schema check → field check → Scholar query
    /// → proof bundle → packet envelope → optional signature.
    pub fn process_rfa(&self, rfa: &Value) -> Result<Value, DgError> {
        let canonical = canonicalize_rfa(rfa)?;
        validate_rfa_schema(&canonical)?;
        validate_rfa_fields(&canonical)?;

        let params = self.query_params(&canonical, None, None)?;
        let scholar = Scholar::new(&self.chain);
        let result = scholar.query_facts(&params)?;
        let bundle = result.to_proof_bundle();

        let graph_id = self
            .chain
            .graph_id()
            .ok_or_else(|| DgError::Internal("chain has no genesis".to_string()))?;
        let packet = build_proof_packet(graph_id, bundle);
        match (&self.signing_key, &self.public_key) {
            (Some(signing), Some(public)) => sign_proof_packet(packet, signing, public),
            _ => Ok(packet),
        }
    }

    fn query_params(
        &self,
        canonical: &Map<String, Value>,
        at_valid_time: Option<&str>,
        as_of_system_time: Option<&str>,
    ) -> Result<QueryParams, DgError> {
        let take = |field: &str| -> Result<Option<String>, DgError> {
            Ok(opt_str_field(canonical, field)?.map(String::from))
        };
        Ok(QueryParams {
            requester_namespace: canonical["requester_namespace"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            namespace: canonical["namespace"].as_str().unwrap_or_default().to_string(),
            subject: take("subject")?,
            predicate: take("predicate")?,
            object: take("object")?,
            at_valid_time: match at_valid_time {
                Some(t) => Some(t.to_string()),
                None => take("at_valid_time")?,
            },
            as_of_system_time: match as_of_system_time {
                Some(t) => Some(t.to_string()),
                None => take("as_of_system_time")?,
            },
            requester_id: canonical["requester_id"].as_str().unwrap_or_default().to_string(),
            include_children: None,
        })
    }

    // ── Promotion workflow ───────────────────────────────────────────────────

    /// Submit a promotion of `rule_ids` in `namespace`. Captures the current
    /// policy head so a concurrent finalization is detected later.
    pub fn submit_promotion(
        &mut self,
        namespace: &str,
        rule_ids: Vec<String>,
        submitter_id: &str,
    ) -> Result<String, DgError> {
        dg_core::validate_namespace(namespace)?;

        for rule_id in &rule_ids {
            let cell_id = CellId::from_hex(rule_id).map_err(|_| {
                DgError::input_invalid(format!("rule id '{rule_id}' is not a cell id"))
                    .with_details(json!({"rule_id": rule_id}))
            })?;
            let cell = self.chain.get_cell(&cell_id).ok_or_else(|| {
                DgError::input_invalid(format!("rule {rule_id} not found"))
                    .with_details(json!({"rule_id": rule_id, "namespace": namespace}))
            })?;
            if cell.fact().namespace != namespace {
                return Err(DgError::input_invalid(format!(
                    "rule {rule_id} is from namespace '{}', expected '{namespace}'",
                    cell.fact().namespace
                ))
                .with_details(json!({
                    "rule_id": rule_id,
                    "rule_namespace": cell.fact().namespace,
                    "expected_namespace": namespace,
                })));
            }
        }

        let registry = WitnessRegistry::new(&self.chain);
        let witness_set = registry.get_witness_set(namespace)?.ok_or_else(|| {
            DgError::input_invalid(format!("no WitnessSet configured for namespace '{namespace}'"))
                .with_details(json!({"namespace": namespace}))
        })?;

        let expected_prev =
            get_current_policy_head(&self.chain, namespace).map(|cell| cell.cell_id);

        let promotion = PromotionRequest::create(
            namespace,
            rule_ids,
            submitter_id,
            witness_set.threshold(),
            Some(current_timestamp()),
        );
        let promotion_id = promotion.promotion_id.clone();
        info!(%promotion_id, namespace, "promotion submitted");
        self.expected_prev_policy_head.insert(promotion_id.clone(), expected_prev);
        self.promotions.insert(promotion_id.clone(), promotion);
        Ok(promotion_id)
    }

    /// Record one witness signature on a promotion.
    ///
    /// Check order is contractual: promotion lookup, then witness
    /// authorization, then signature verification. An unauthorized witness
    /// never triggers cryptographic work.
    pub fn collect_witness_signature(
        &mut self,
        promotion_id: &str,
        witness_id: &str,
        signature: &[u8],
        public_key: &[u8],
    ) -> Result<PromotionStatus, DgError> {
        if !self.promotions.contains_key(promotion_id) {
            return Err(DgError::input_invalid(format!("promotion not found: {promotion_id}"))
                .with_details(json!({"promotion_id": promotion_id})));
        }

        let (namespace, status) = {
            let promotion = &self.promotions[promotion_id];
            (promotion.namespace.clone(), promotion.status)
        };
        if matches!(status, PromotionStatus::Finalized | PromotionStatus::Rejected) {
            return Err(DgError::unauthorized(format!(
                "promotion {promotion_id} is {} and accepts no further signatures",
                status.as_str()
            )));
        }

        let registry = WitnessRegistry::new(&self.chain);
        let witness_set = registry.get_witness_set(&namespace)?.ok_or_else(|| {
            DgError::input_invalid(format!("no WitnessSet for namespace '{namespace}'"))
        })?;
        if !witness_set.contains(witness_id) {
            return Err(DgError::unauthorized(format!(
                "witness '{witness_id}' is not in the WitnessSet for namespace '{namespace}'"
            ))
            .with_details(json!({
                "witness_id": witness_id,
                "namespace": namespace,
                "allowed_witnesses": witness_set.witnesses(),
            })));
        }

        let promotion = self.promotions.get_mut(promotion_id).expect("checked above");
        if !verify_signature(public_key, promotion.canonical_payload(), signature)? {
            return Err(DgError::signature_invalid(format!(
                "signature verification failed for witness '{witness_id}'"
            ))
            .with_details(json!({
                "witness_id": witness_id,
                "promotion_id": promotion_id,
            })));
        }

        let status = promotion.record_signature(witness_id, signature.to_vec());
        info!(%promotion_id, witness_id, status = status.as_str(), "witness signature recorded");
        Ok(status)
    }

    /// Move a promotion to the terminal `Rejected` state.
    pub fn reject_promotion(&mut self, promotion_id: &str, reason: &str) -> Result<(), DgError> {
        let promotion = self.promotions.get_mut(promotion_id).ok_or_else(|| {
            DgError::input_invalid(format!("promotion not found: {promotion_id}"))
        })?;
        if promotion.status == PromotionStatus::Finalized {
            return Err(DgError::unauthorized("cannot reject a finalized promotion"));
        }
        promotion.status = PromotionStatus::Rejected;
        self.expected_prev_policy_head.remove(promotion_id);
        warn!(%promotion_id, reason, "promotion rejected");
        Ok(())
    }

    /// Finalize a promotion: mint the PolicyHead cell and append it.
    /// Atomic — either the cell lands on the chain or an error is raised
    /// and nothing moved.
    pub fn finalize_promotion(&mut self, promotion_id: &str) -> Result<CellId, DgError> {
        let promotion = self.promotions.get(promotion_id).ok_or_else(|| {
            DgError::input_invalid(format!("promotion not found: {promotion_id}"))
                .with_details(json!({"promotion_id": promotion_id}))
        })?;

        if promotion.status != PromotionStatus::ThresholdMet {
            return Err(DgError::unauthorized(format!(
                "cannot finalize: status is '{}', need 'threshold_met'",
                promotion.status.as_str()
            ))
            .with_details(json!({
                "current_status": promotion.status.as_str(),
                "signatures_collected": promotion.signatures.len(),
                "threshold_required": promotion.required_threshold,
            })));
        }

        // Race check: the policy head must still be the one seen at submit
        // time. A concurrent finalization moved it, and this promotion's
        // prev_policy_head link would be stale.
        let current_head = get_current_policy_head(&self.chain, &promotion.namespace)
            .map(|cell| cell.cell_id);
        let expected_prev =
            self.expected_prev_policy_head.get(promotion_id).copied().flatten();
        if current_head != expected_prev {
            return Err(DgError::input_invalid("Concurrent promotion detected").with_details(
                json!({
                    "promotion_id": promotion_id,
                    "expected_prev_policy_head": expected_prev.map(|c| c.to_hex()),
                    "current_policy_head": current_head.map(|c| c.to_hex()),
                }),
            ));
        }

        let witness_signatures: BTreeMap<String, String> = promotion
            .signatures
            .iter()
            .map(|(witness, sig)| (witness.clone(), hex::encode(sig)))
            .collect();

        let head_cell = create_policy_head(&PolicyHeadSpec {
            namespace: promotion.namespace.clone(),
            promoted_rule_ids: promotion.rule_ids().to_vec(),
            graph_id: self
                .chain
                .graph_id()
                .ok_or_else(|| DgError::Internal("chain has no genesis".to_string()))?
                .to_string(),
            hash_scheme: self
                .chain
                .hash_scheme()
                .ok_or_else(|| DgError::Internal("chain has no genesis".to_string()))?
                .to_string(),
            prev_cell_hash: self
                .chain
                .head()
                .ok_or_else(|| DgError::Internal("chain has no head".to_string()))?
                .cell_id,
            prev_policy_head: expected_prev,
            system_time: current_timestamp(),
            creator: Some(promotion.submitter_id.clone()),
            witness_signatures: Some(witness_signatures),
            payload_hash: Some(sha256_hex(promotion.canonical_payload())),
        })?;

        if !verify_policy_hash(&head_cell)? {
            return Err(DgError::integrity_fail("PolicyHead policy_hash verification failed")
                .with_details(json!({
                    "promotion_id": promotion_id,
                    "cell_id": head_cell.cell_id.to_hex(),
                })));
        }

        let cell_id = self.append_cell(head_cell)?;

        let promotion = self.promotions.get_mut(promotion_id).expect("checked above");
        promotion.status = PromotionStatus::Finalized;
        self.expected_prev_policy_head.remove(promotion_id);
        info!(%promotion_id, %cell_id, "promotion finalized");
        Ok(cell_id)
    }

    /// Status of a known promotion.
    pub fn promotion_status(&self, promotion_id: &str) -> Option<PromotionStatus> {
        self.promotions.get(promotion_id).map(|p| p.status)
    }

    /// The canonical payload a witness must sign for a promotion.
    pub fn promotion_payload(&self, promotion_id: &str) -> Option<&[u8]> {
        self.promotions.get(promotion_id).map(|p| p.canonical_payload())
    }

    // ── Simulation ───────────────────────────────────────────────────────────

    /// Run an RFA against a counterfactual overlay at frozen bitemporal
    /// coordinates. The base chain is untouched by construction, and the
    /// result carries an attestation proving it.
    pub fn simulate_rfa(
        &self,
        rfa: &Value,
        simulation_spec: &SimulationSpec,
        at_valid_time: &str,
        as_of_system_time: &str,
        max_anchor_attempts: usize,
        max_runtime_ms: u64,
    ) -> Result<SimulationResult, DgError> {
        let chain_head_before = self
            .chain
            .head()
            .ok_or_else(|| DgError::Internal("chain has no head".to_string()))?
            .cell_id;

        let canonical = canonicalize_rfa(rfa)?;
        validate_rfa_schema(&canonical)?;
        validate_rfa_fields(&canonical)?;
        dg_core::validate_timestamp(at_valid_time)?;
        dg_core::validate_timestamp(as_of_system_time)?;

        let params = self.query_params(&canonical, Some(at_valid_time), Some(as_of_system_time))?;

        let base_result = Scholar::new(&self.chain).query_facts(&params)?.to_proof_bundle();
        let shadow_result =
            self.run_shadow_query(&params, simulation_spec, at_valid_time, as_of_system_time)?;

        let chain_head_after = self
            .chain
            .head()
            .ok_or_else(|| DgError::Internal("chain has no head".to_string()))?
            .cell_id;

        let simulation_id = Uuid::new_v4().to_string();
        let delta_report = compute_delta_report(&base_result, &shadow_result);

        let anchors = if delta_report.verdict_changed {
            let base_count = base_result["results"]["fact_count"].as_u64().unwrap_or(0);
            detect_counterfactual_anchors(
                simulation_spec,
                max_anchor_attempts,
                max_runtime_ms,
                |restricted| {
                    let shadow = self.run_shadow_query(
                        &params,
                        restricted,
                        at_valid_time,
                        as_of_system_time,
                    )?;
                    let count = shadow["results"]["fact_count"].as_u64().unwrap_or(0);
                    Ok(count != base_count)
                },
            )?
            .to_value()
        } else {
            json!({
                "anchors": [],
                "anchors_incomplete": false,
                "attempts_used": 0,
                "runtime_ms": 0.0,
                "anchor_hash": "",
            })
        };

        let attestation =
            create_contamination_attestation(&chain_head_before, &chain_head_after, &simulation_id);
        let proof_bundle = json!({
            "base": tag_proof_bundle_origin(&base_result, "BASE"),
            "shadow": tag_proof_bundle_origin(&shadow_result, "SHADOW"),
            "contamination_attestation": serde_json::to_value(&attestation)
                .expect("attestation serialization is infallible"),
        });

        Ok(SimulationResult {
            simulation_id,
            rfa: Value::Object(canonical),
            simulation_spec: serde_json::to_value(simulation_spec)
                .expect("simulation spec serialization is infallible"),
            base_result,
            shadow_result,
            at_valid_time: at_valid_time.to_string(),
            as_of_system_time: as_of_system_time.to_string(),
            delta_report,
            anchors,
            proof_bundle,
        })
    }

    /// Build the overlay, enter an isolated context, and answer the query
    /// from the shadow reality.
    fn run_shadow_query(
        &self,
        params: &QueryParams,
        simulation_spec: &SimulationSpec,
        at_valid_time: &str,
        as_of_system_time: &str,
    ) -> Result<Value, DgError> {
        let overlay = self.build_overlay(simulation_spec)?;
        let context =
            SimulationContext::enter(&self.chain, &overlay, at_valid_time, as_of_system_time)?;
        let result = context.scholar().query_facts(params)?;
        Ok(result.to_proof_bundle())
    }

    /// Materialize shadow cells from a simulation spec. Unknown base cells
    /// are skipped: a counterfactual about a cell the graph never had is an
    /// empty statement, not an error.
    fn build_overlay(&self, spec: &SimulationSpec) -> Result<OverlayContext, DgError> {
        let mut overlay = OverlayContext::new();
        for fact_spec in &spec.shadow_facts {
            let base_id = CellId::from_hex(&fact_spec.base_cell_id)?;
            if let Some(base) = self.chain.get_cell(&base_id) {
                overlay.add_shadow_fact(create_shadow_fact(base, fact_spec)?, base_id);
            }
        }
        for rule_spec in &spec.shadow_rules {
            let base_id = CellId::from_hex(&rule_spec.base_cell_id)?;
            if let Some(base) = self.chain.get_cell(&base_id) {
                overlay.add_shadow_rule(create_shadow_rule(base, rule_spec)?, base_id);
            }
        }
        for policy_spec in &spec.shadow_policy_heads {
            let base_id = CellId::from_hex(&policy_spec.base_cell_id)?;
            if let Some(base) = self.chain.get_cell(&base_id) {
                overlay
                    .add_shadow_policy_head(create_shadow_policy_head(base, policy_spec)?, base_id);
            }
        }
        for bridge_spec in &spec.shadow_bridges {
            let base_id = CellId::from_hex(&bridge_spec.base_cell_id)?;
            if let Some(base) = self.chain.get_cell(&base_id) {
                overlay.add_shadow_bridge(create_shadow_bridge(base, bridge_spec)?, base_id);
            }
        }
        Ok(overlay)
    }

    // ── Backtest ─────────────────────────────────────────────────────────────

    /// Simulate many RFAs under one overlay. Bounded by case count, wall
    /// time and cumulative cells touched; exceeding any limit returns the
    /// partial batch with `backtest_incomplete`.
    #[allow(clippy::too_many_arguments)]
    pub fn run_backtest(
        &self,
        rfa_list: &[Value],
        simulation_spec: &SimulationSpec,
        at_valid_time: &str,
        as_of_system_time: &str,
        max_cases: usize,
        max_runtime_ms: u64,
        max_cells_touched: usize,
    ) -> Result<BatchBacktestResult, DgError> {
        if rfa_list.is_empty() {
            return Ok(BatchBacktestResult {
                results: Vec::new(),
                backtest_incomplete: false,
                cases_processed: 0,
                runtime_ms: 0.0,
                cells_touched: 0,
            });
        }

        let mut budget = ExecutionBudget::new(max_cases, max_runtime_ms);
        let mut results = Vec::new();
        let mut cells_touched = 0usize;

        for rfa in rfa_list {
            if budget.is_exceeded() || cells_touched >= max_cells_touched {
                return Ok(BatchBacktestResult {
                    cases_processed: results.len(),
                    results: sort_results(results),
                    backtest_incomplete: true,
                    runtime_ms: budget.elapsed_ms(),
                    cells_touched,
                });
            }
            let result = self.simulate_rfa(
                rfa,
                simulation_spec,
                at_valid_time,
                as_of_system_time,
                100,
                5000,
            )?;
            cells_touched += count_cells_in_simulation(&result);
            results.push(result);
            budget.increment();
        }

        Ok(BatchBacktestResult {
            cases_processed: results.len(),
            results: sort_results(results),
            backtest_incomplete: false,
            runtime_ms: budget.elapsed_ms(),
            cells_touched,
        })
    }
}

/// Rebuild a chain from the WAL — segments alone are enough. Every record
/// is a cell's canonical export bytes; appends re-run all chain checks.
pub fn replay_wal(wal: &SegmentedWal) -> Result<Chain, DgError> {
    let mut chain = Chain::new();
    for record in wal.read_all()? {
        let value: Value = serde_json::from_slice(&record.cell_bytes).map_err(|e| {
            DgError::WalCorruption(format!(
                "record {} does not contain valid cell JSON: {e}",
                record.sequence
            ))
        })?;
        let cell = DecisionCell::from_value(&value)?;
        chain.append(cell)?;
    }
    Ok(chain)
}
