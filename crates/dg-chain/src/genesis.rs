use once_cell::sync::Lazy;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::json;

use dg_canon::{canonical_json_string, compute_rule_logic_hash};
use dg_core::validators::validate_graph_id;
use dg_core::{
    current_timestamp, validate_root_namespace, validate_timestamp, CellDraft, CellType,
    DecisionCell, DgError, Fact, Header, LogicAnchor, Proof, SourceQuality, CELL_SCHEMA_VERSION,
    HASH_SCHEME_CANONICAL, HASH_SCHEME_LEGACY, NULL_HASH,
};

/// Rule id anchored by every Genesis cell.
pub const GENESIS_RULE_ID: &str = "rule:genesis_boot";

/// The boot rule: the constitution every graph starts from. Its canonical
/// hash is pinned into the Genesis logic anchor.
pub const GENESIS_RULE_BODY: &str = "\
every cell must trace to genesis\n\
cell identity is the hash of canonical content\n\
access across namespaces requires an explicit bridge\n\
policy changes require witness threshold approval\n";

/// Canonicalized SHA-256 of the boot rule body.
pub static GENESIS_RULE_HASH: Lazy<String> =
    Lazy::new(|| compute_rule_logic_hash(GENESIS_RULE_BODY));

// ── Witness configuration ────────────────────────────────────────────────────

/// Witness configuration embedded in the Genesis object payload.
/// `dg-promote` turns this into a validated `WitnessSet` at lookup time.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WitnessConfig {
    pub witnesses: Vec<String>,
    pub threshold: usize,
}

/// Everything the Genesis object payload records about the graph's birth.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenesisConfig {
    pub graph_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    pub boot_rule: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub witness_set: Option<WitnessConfig>,
}

// ── Genesis creation ─────────────────────────────────────────────────────────

/// Parameters for minting a new graph.
#[derive(Clone, Debug)]
pub struct GenesisSpec {
    pub graph_name: String,
    pub root_namespace: String,
    pub creator: Option<String>,
    /// Defaults to now. Must be ISO-8601 UTC when given.
    pub system_time: Option<String>,
    /// Defaults to `canonical-json-v1`.
    pub hash_scheme: Option<String>,
    pub witness_set: Option<WitnessConfig>,
}

impl GenesisSpec {
    pub fn new(graph_name: impl Into<String>, root_namespace: impl Into<String>) -> Self {
        Self {
            graph_name: graph_name.into(),
            root_namespace: root_namespace.into(),
            creator: None,
            system_time: None,
            hash_scheme: None,
            witness_set: None,
        }
    }

    pub fn with_witness_set(mut self, witnesses: Vec<String>, threshold: usize) -> Self {
        self.witness_set = Some(WitnessConfig { witnesses, threshold });
        self
    }

    pub fn with_system_time(mut self, ts: impl Into<String>) -> Self {
        self.system_time = Some(ts.into());
        self
    }
}

/// Derive a fresh graph id: `graph:<sanitized name>-<random nonce>`.
pub fn generate_graph_id(graph_name: &str) -> String {
    let sanitized: String = graph_name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' { c } else { '-' })
        .collect();
    let mut nonce = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut nonce);
    format!("graph:{}-{}", sanitized.trim_matches('-'), hex::encode(nonce))
}

/// Build the one-and-only root cell of a graph.
///
/// Genesis uniqueness and first-position placement are enforced by
/// `Chain::append`, not here — this function can only vouch for structure.
pub fn create_genesis_cell(spec: &GenesisSpec) -> Result<DecisionCell, DgError> {
    validate_root_namespace(&spec.root_namespace)?;
    let system_time = match &spec.system_time {
        Some(ts) => {
            validate_timestamp(ts)?;
            ts.clone()
        }
        None => current_timestamp(),
    };
    let hash_scheme = match spec.hash_scheme.as_deref() {
        None => HASH_SCHEME_CANONICAL.to_string(),
        Some(s @ (HASH_SCHEME_CANONICAL | HASH_SCHEME_LEGACY)) => s.to_string(),
        Some(other) => {
            return Err(DgError::input_invalid(format!("unknown hash scheme '{other}'")))
        }
    };

    if let Some(ws) = &spec.witness_set {
        if ws.witnesses.is_empty() || ws.threshold < 1 || ws.threshold > ws.witnesses.len() {
            return Err(DgError::input_invalid(format!(
                "witness threshold {} out of range for {} witnesses",
                ws.threshold,
                ws.witnesses.len()
            )));
        }
    }

    let graph_id = generate_graph_id(&spec.graph_name);
    let config = GenesisConfig {
        graph_name: spec.graph_name.clone(),
        creator: spec.creator.clone(),
        boot_rule: GENESIS_RULE_BODY.to_string(),
        witness_set: spec.witness_set.clone(),
    };
    let object = canonical_json_string(
        &serde_json::to_value(&config).expect("genesis config serialization is infallible"),
    );

    let draft = CellDraft {
        header: Header {
            version: CELL_SCHEMA_VERSION.to_string(),
            cell_type: CellType::Genesis,
            graph_id: graph_id.clone(),
            hash_scheme,
            system_time: system_time.clone(),
            prev_cell_hash: NULL_HASH,
        },
        fact: Fact {
            namespace: spec.root_namespace.clone(),
            subject: graph_id,
            predicate: "genesis".to_string(),
            object,
            confidence: 1.0,
            source_quality: SourceQuality::Authoritative,
            valid_from: system_time,
            valid_to: None,
        },
        logic_anchor: LogicAnchor {
            rule_id: GENESIS_RULE_ID.to_string(),
            rule_logic_hash: GENESIS_RULE_HASH.clone(),
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

/// Structural verification of a Genesis cell. Returns `(ok, failed_checks)`
/// so callers can report every violation at once.
pub fn verify_genesis(cell: &DecisionCell) -> (bool, Vec<String>) {
    let mut failed = Vec::new();

    if cell.header().cell_type != CellType::Genesis {
        failed.push(format!("cell_type is '{}', not 'genesis'", cell.header().cell_type.as_str()));
    }
    if !cell.header().prev_cell_hash.is_null() {
        failed.push("prev_cell_hash is not the null hash".to_string());
    }
    if validate_root_namespace(&cell.fact().namespace).is_err() {
        failed.push(format!("namespace '{}' is not a valid root namespace", cell.fact().namespace));
    }
    if cell.logic_anchor().rule_logic_hash != *GENESIS_RULE_HASH {
        failed.push("boot rule hash does not match GENESIS_RULE_HASH".to_string());
    }
    if validate_graph_id(&cell.header().graph_id).is_err() {
        failed.push(format!("graph_id '{}' does not match the graph id pattern", cell.header().graph_id));
    }
    if validate_timestamp(&cell.header().system_time).is_err() {
        failed.push(format!("system_time '{}' is not ISO-8601 UTC", cell.header().system_time));
    }
    if validate_timestamp(&cell.fact().valid_from).is_err() {
        failed.push(format!("valid_from '{}' is not ISO-8601 UTC", cell.fact().valid_from));
    }
    if !cell.verify_integrity() {
        failed.push("cell_id does not recompute from canonical bytes".to_string());
    }

    (failed.is_empty(), failed)
}

/// Parse the Genesis object payload back into its configuration.
pub fn parse_genesis_config(cell: &DecisionCell) -> Result<GenesisConfig, DgError> {
    serde_json::from_str(&cell.fact().object).map_err(|e| {
        DgError::schema_invalid(format!("genesis object payload is not valid config JSON: {e}"))
            .with_details(json!({"cell_id": cell.cell_id.to_hex()}))
    })
}
