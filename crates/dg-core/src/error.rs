use serde_json::{json, Value};
use thiserror::Error;

/// Error taxonomy for the kernel. Every variant maps to a stable
/// machine-readable code; callers branch on variants, never on message text.
#[derive(Debug, Error)]
pub enum DgError {
    // ── RFA / engine level ───────────────────────────────────────────────────
    #[error("schema invalid: {message}")]
    SchemaInvalid { message: String, details: Value },

    #[error("input invalid: {message}")]
    InputInvalid { message: String, details: Value },

    #[error("unauthorized: {message}")]
    Unauthorized { message: String, details: Value },

    #[error("signature invalid: {message}")]
    SignatureInvalid { message: String, details: Value },

    #[error("integrity failure: {message}")]
    IntegrityFail { message: String, details: Value },

    // ── Chain-level invariants ───────────────────────────────────────────────
    #[error("genesis violation: {0}")]
    GenesisViolation(String),

    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("chain break: {0}")]
    ChainBreak(String),

    #[error("temporal violation: cell system_time {cell_time} is before predecessor {prev_time}")]
    TemporalViolation { cell_time: String, prev_time: String },

    #[error("graph id mismatch: expected '{expected}', got '{got}'")]
    GraphIdMismatch { expected: String, got: String },

    #[error("hash scheme mismatch: expected '{expected}', got '{got}'")]
    HashSchemeMismatch { expected: String, got: String },

    // ── Durable log ──────────────────────────────────────────────────────────
    #[error("WAL header error: {0}")]
    WalHeader(String),

    #[error("WAL chain error: {0}")]
    WalChain(String),

    #[error("WAL corruption: {0}")]
    WalCorruption(String),

    // ── Catch-all ────────────────────────────────────────────────────────────
    #[error("internal error: {0}")]
    Internal(String),
}

impl DgError {
    pub fn schema_invalid(message: impl Into<String>) -> Self {
        DgError::SchemaInvalid { message: message.into(), details: json!({}) }
    }

    pub fn input_invalid(message: impl Into<String>) -> Self {
        DgError::InputInvalid { message: message.into(), details: json!({}) }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        DgError::Unauthorized { message: message.into(), details: json!({}) }
    }

    pub fn signature_invalid(message: impl Into<String>) -> Self {
        DgError::SignatureInvalid { message: message.into(), details: json!({}) }
    }

    pub fn integrity_fail(message: impl Into<String>) -> Self {
        DgError::IntegrityFail { message: message.into(), details: json!({}) }
    }

    /// Attach structured details to one of the engine-level variants.
    /// Chain-level variants carry their context in typed fields instead.
    pub fn with_details(mut self, new_details: Value) -> Self {
        match &mut self {
            DgError::SchemaInvalid { details, .. }
            | DgError::InputInvalid { details, .. }
            | DgError::Unauthorized { details, .. }
            | DgError::SignatureInvalid { details, .. }
            | DgError::IntegrityFail { details, .. } => *details = new_details,
            _ => {}
        }
        self
    }

    /// Stable machine-readable code for API surfaces and logs.
    pub fn code(&self) -> &'static str {
        match self {
            DgError::SchemaInvalid { .. } => "DG_SCHEMA_INVALID",
            DgError::InputInvalid { .. } => "DG_INPUT_INVALID",
            DgError::Unauthorized { .. } => "DG_UNAUTHORIZED",
            DgError::SignatureInvalid { .. } => "DG_SIGNATURE_INVALID",
            DgError::IntegrityFail { .. } => "DG_INTEGRITY_FAIL",
            DgError::GenesisViolation(_) => "DG_GENESIS_VIOLATION",
            DgError::IntegrityViolation(_) => "DG_INTEGRITY_VIOLATION",
            DgError::ChainBreak(_) => "DG_CHAIN_BREAK",
            DgError::TemporalViolation { .. } => "DG_TEMPORAL_VIOLATION",
            DgError::GraphIdMismatch { .. } => "DG_GRAPH_ID_MISMATCH",
            DgError::HashSchemeMismatch { .. } => "DG_HASH_SCHEME_MISMATCH",
            DgError::WalHeader(_) => "DG_WAL_HEADER",
            DgError::WalChain(_) => "DG_WAL_CHAIN",
            DgError::WalCorruption(_) => "DG_WAL_CORRUPTION",
            DgError::Internal(_) => "DG_INTERNAL_ERROR",
        }
    }

    /// Process exit code for CLI wrappers:
    /// 0 success, 2 schema, 3 integrity, 4 unauthorized, 5 signature, 1 other.
    pub fn exit_code(&self) -> i32 {
        match self {
            DgError::SchemaInvalid { .. } => 2,
            DgError::IntegrityFail { .. }
            | DgError::IntegrityViolation(_)
            | DgError::ChainBreak(_)
            | DgError::GenesisViolation(_)
            | DgError::TemporalViolation { .. }
            | DgError::GraphIdMismatch { .. }
            | DgError::HashSchemeMismatch { .. } => 3,
            DgError::Unauthorized { .. } => 4,
            DgError::SignatureInvalid { .. } => 5,
            _ => 1,
        }
    }

    /// Serializable error body: `{code, message, details}`.
    pub fn to_json(&self) -> Value {
        let details = match self {
            DgError::SchemaInvalid { details, .. }
            | DgError::InputInvalid { details, .. }
            | DgError::Unauthorized { details, .. }
            | DgError::SignatureInvalid { details, .. }
            | DgError::IntegrityFail { details, .. } => details.clone(),
            DgError::TemporalViolation { cell_time, prev_time } => {
                json!({"cell_time": cell_time, "prev_time": prev_time})
            }
            DgError::GraphIdMismatch { expected, got }
            | DgError::HashSchemeMismatch { expected, got } => {
                json!({"expected": expected, "got": got})
            }
            _ => json!({}),
        };
        json!({
            "code": self.code(),
            "message": self.to_string(),
            "details": details,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(DgError::input_invalid("x").code(), "DG_INPUT_INVALID");
        assert_eq!(DgError::GenesisViolation("x".into()).code(), "DG_GENESIS_VIOLATION");
        assert_eq!(DgError::WalCorruption("x".into()).code(), "DG_WAL_CORRUPTION");
    }

    #[test]
    fn exit_codes_follow_the_cli_contract() {
        assert_eq!(DgError::schema_invalid("x").exit_code(), 2);
        assert_eq!(DgError::integrity_fail("x").exit_code(), 3);
        assert_eq!(DgError::unauthorized("x").exit_code(), 4);
        assert_eq!(DgError::signature_invalid("x").exit_code(), 5);
        assert_eq!(DgError::Internal("x".into()).exit_code(), 1);
    }

    #[test]
    fn to_json_carries_code_and_details() {
        let err = DgError::input_invalid("bad namespace")
            .with_details(json!({"field": "namespace"}));
        let body = err.to_json();
        assert_eq!(body["code"], "DG_INPUT_INVALID");
        assert_eq!(body["details"]["field"], "namespace");
    }
}
