use serde::{Deserialize, Serialize};

use dg_core::{validate_namespace, DgError};

/// Validate a threshold against a witness roster: `1 ≤ threshold ≤ len`.
pub fn validate_threshold(threshold: usize, witnesses: &[String]) -> Result<(), DgError> {
    if witnesses.is_empty() {
        return Err(DgError::input_invalid("witness set must contain at least one witness"));
    }
    if threshold < 1 {
        return Err(DgError::input_invalid(format!("threshold must be >= 1, got {threshold}")));
    }
    if threshold > witnesses.len() {
        return Err(DgError::input_invalid(format!(
            "threshold {} exceeds witness count {}",
            threshold,
            witnesses.len()
        )));
    }
    Ok(())
}

/// Immutable witness configuration for a namespace: the roster of approvers
/// and how many of them must sign before a promotion can finalize.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WitnessSet {
    namespace: String,
    witnesses: Vec<String>,
    threshold: usize,
}

impl WitnessSet {
    /// Construct a validated witness set. The roster keeps its given order
    /// (it is part of the configuration identity).
    pub fn new(
        namespace: impl Into<String>,
        witnesses: Vec<String>,
        threshold: usize,
    ) -> Result<Self, DgError> {
        let namespace = namespace.into();
        validate_namespace(&namespace)?;
        validate_threshold(threshold, &witnesses)?;
        Ok(Self { namespace, witnesses, threshold })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn witnesses(&self) -> &[String] {
        &self.witnesses
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn contains(&self, witness_id: &str) -> bool {
        self.witnesses.iter().any(|w| w == witness_id)
    }
}
