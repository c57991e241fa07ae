use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::json::canonical_json_bytes;

/// SHA-256 of arbitrary bytes, lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// SHA-256 of the canonical JSON form of `value`, lowercase hex.
///
/// This is the identity function for cells, policies and anchors: identical
/// logical content always produces an identical hash.
pub fn content_hash(value: &Value) -> String {
    sha256_hex(&canonical_json_bytes(value))
}

/// Hash of a text payload after newline normalization and whitespace collapse.
///
/// Case is preserved — legal and policy wording must keep its exact letters;
/// only layout differences (CRLF, indentation, run-on spaces) are erased.
pub fn text_hash(text: &str) -> String {
    sha256_hex(normalize_text(text).as_bytes())
}

/// CRLF/CR to LF, then collapse runs of spaces and tabs inside each line and
/// trim line edges. Blank lines are kept (they separate clauses).
pub(crate) fn normalize_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<String> = unified
        .split('\n')
        .map(|line| {
            line.split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect();
    lines.join("\n")
}
