use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{HASH_SCHEME_CANONICAL, HASH_SCHEME_LEGACY};
use crate::error::DgError;
use crate::types::{CellId, NULL_HASH};

// ── CellType ─────────────────────────────────────────────────────────────────

/// Every cell in the ledger is one of these kinds. The kind steers how the
/// registry and the Scholar interpret the fact payload; the identity and
/// chain rules are identical for all of them.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CellType {
    Genesis,
    Fact,
    Rule,
    PolicyHead,
    Bridge,
    Judgment,
    Decision,
    Signal,
    Mitigation,
    Score,
    Verdict,
    Justification,
    Report,
}

impl CellType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CellType::Genesis => "genesis",
            CellType::Fact => "fact",
            CellType::Rule => "rule",
            CellType::PolicyHead => "policy_head",
            CellType::Bridge => "bridge",
            CellType::Judgment => "judgment",
            CellType::Decision => "decision",
            CellType::Signal => "signal",
            CellType::Mitigation => "mitigation",
            CellType::Score => "score",
            CellType::Verdict => "verdict",
            CellType::Justification => "justification",
            CellType::Report => "report",
        }
    }
}

// ── SourceQuality ────────────────────────────────────────────────────────────

/// Provenance grade of a fact. Higher rank wins conflict resolution.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceQuality {
    Authoritative,
    Verified,
    Asserted,
    Derived,
    Unverified,
}

impl SourceQuality {
    /// Conflict-resolution rank: authoritative (4) down to unverified (0).
    pub fn rank(&self) -> u8 {
        match self {
            SourceQuality::Authoritative => 4,
            SourceQuality::Verified => 3,
            SourceQuality::Asserted => 2,
            SourceQuality::Derived => 1,
            SourceQuality::Unverified => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceQuality::Authoritative => "authoritative",
            SourceQuality::Verified => "verified",
            SourceQuality::Asserted => "asserted",
            SourceQuality::Derived => "derived",
            SourceQuality::Unverified => "unverified",
        }
    }
}

// ── Cell components ──────────────────────────────────────────────────────────

/// Versioning and linkage. `graph_id` and `hash_scheme` must equal the
/// Genesis values for every cell in the chain.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Header {
    pub version: String,
    pub cell_type: CellType,
    pub graph_id: String,
    pub hash_scheme: String,
    pub system_time: String,
    pub prev_cell_hash: CellId,
}

/// Subject/predicate/object triple with bitemporal and provenance fields.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Fact {
    pub namespace: String,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub confidence: f64,
    pub source_quality: SourceQuality,
    pub valid_from: String,
    /// Exclusive upper bound of the validity interval; `None` means +∞.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<String>,
}

/// Pins the rule a cell was produced under. `rule_logic_hash` is the
/// canonicalized SHA-256 of the rule body, so decisions made under stale
/// rule text are mechanically detectable.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LogicAnchor {
    pub rule_id: String,
    pub rule_logic_hash: String,
}

/// References to supporting cells.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Evidence {
    pub supporting_cells: Vec<CellId>,
}

/// Signer attribution. The signature itself is optional until a key registry
/// exists; `signature_required` records the intent either way.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Proof {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signer_key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub signature_required: bool,
}

impl Proof {
    pub fn unsigned() -> Self {
        Proof { signer_key_id: None, signature: None, signature_required: false }
    }
}

// ── CellDraft → DecisionCell ─────────────────────────────────────────────────

/// All the fields of a cell, before it has an identity.
///
/// A `DecisionCell` can only be obtained by calling [`CellDraft::seal`],
/// which computes `cell_id` from the canonical body bytes. There is no way
/// to construct a cell with an externally supplied id.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CellDraft {
    pub header: Header,
    pub fact: Fact,
    pub logic_anchor: LogicAnchor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Evidence>,
    pub proof: Proof,
}

impl CellDraft {
    /// Compute the content hash and freeze the draft into a cell.
    pub fn seal(self) -> Result<DecisionCell, DgError> {
        let cell_id = compute_cell_id(&self)?;
        Ok(DecisionCell { cell_id, draft: self })
    }

    /// Canonical body value: the whole draft, nulls omitted, no cell_id.
    pub fn canonical_body(&self) -> Value {
        serde_json::to_value(self).expect("cell draft serialization is infallible")
    }
}

/// An immutable, identity-bearing cell. Identity equals content hash.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct DecisionCell {
    pub cell_id: CellId,
    #[serde(flatten)]
    draft: CellDraft,
}

impl DecisionCell {
    pub fn header(&self) -> &Header {
        &self.draft.header
    }

    pub fn fact(&self) -> &Fact {
        &self.draft.fact
    }

    pub fn logic_anchor(&self) -> &LogicAnchor {
        &self.draft.logic_anchor
    }

    pub fn evidence(&self) -> Option<&Evidence> {
        self.draft.evidence.as_ref()
    }

    pub fn proof(&self) -> &Proof {
        &self.draft.proof
    }

    /// Clone the cell's fields back into a draft. Structural replacement for
    /// shadow cells starts here: mutate the draft, then `seal()` again for a
    /// fresh identity.
    pub fn to_draft(&self) -> CellDraft {
        self.draft.clone()
    }

    /// Recompute the content hash and compare against `cell_id`.
    pub fn verify_integrity(&self) -> bool {
        match compute_cell_id(&self.draft) {
            Ok(computed) => computed == self.cell_id,
            Err(_) => false,
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.draft.header.cell_type == CellType::Genesis
            && self.draft.header.prev_cell_hash == NULL_HASH
    }

    /// Serialize to a JSON value including `cell_id` (export format).
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("cell serialization is infallible")
    }

    /// Deserialize from the export format and check the carried id against a
    /// recomputed one. Tampered bytes fail here, not deeper in the chain.
    pub fn from_value(value: &Value) -> Result<Self, DgError> {
        let carried = value
            .get("cell_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DgError::schema_invalid("cell is missing 'cell_id'"))?;
        let carried = CellId::from_hex(carried)?;
        let draft: CellDraft = serde_json::from_value(value.clone())
            .map_err(|e| DgError::schema_invalid(format!("malformed cell body: {e}")))?;
        let computed = compute_cell_id(&draft)?;
        if computed != carried {
            return Err(DgError::IntegrityViolation(format!(
                "cell_id mismatch: carried {carried}, recomputed {computed}"
            )));
        }
        Ok(DecisionCell { cell_id: carried, draft })
    }
}

/// Identity computation, dispatched on the header's hash scheme.
fn compute_cell_id(draft: &CellDraft) -> Result<CellId, DgError> {
    let hex = match draft.header.hash_scheme.as_str() {
        HASH_SCHEME_CANONICAL => dg_canon::content_hash(&draft.canonical_body()),
        HASH_SCHEME_LEGACY => dg_canon::sha256_hex(legacy_concat_bytes(draft).as_bytes()),
        other => {
            return Err(DgError::input_invalid(format!(
                "unknown hash scheme '{other}': expected '{HASH_SCHEME_CANONICAL}' or '{HASH_SCHEME_LEGACY}'"
            )))
        }
    };
    CellId::from_hex(&hex)
}

/// Fixed-order pipe-joined field string for the legacy identity scheme.
fn legacy_concat_bytes(draft: &CellDraft) -> String {
    let h = &draft.header;
    let f = &draft.fact;
    let l = &draft.logic_anchor;
    let p = &draft.proof;
    let evidence_ids = draft
        .evidence
        .as_ref()
        .map(|e| {
            e.supporting_cells
                .iter()
                .map(|c| c.to_hex())
                .collect::<Vec<_>>()
                .join(",")
        })
        .unwrap_or_default();
    [
        h.version.as_str(),
        h.cell_type.as_str(),
        h.graph_id.as_str(),
        h.hash_scheme.as_str(),
        h.system_time.as_str(),
        &h.prev_cell_hash.to_hex(),
        f.namespace.as_str(),
        f.subject.as_str(),
        f.predicate.as_str(),
        f.object.as_str(),
        &Value::from(f.confidence).to_string(),
        f.source_quality.as_str(),
        f.valid_from.as_str(),
        f.valid_to.as_deref().unwrap_or(""),
        l.rule_id.as_str(),
        &l.rule_logic_hash,
        &evidence_ids,
        p.signer_key_id.as_deref().unwrap_or(""),
        if p.signature_required { "1" } else { "0" },
    ]
    .join("|")
}
