use serde_json::Value;

use crate::hash::sha256_hex;
use crate::json::canonical_json_bytes;

/// Canonical form of a rule body.
///
/// Rule logic hashes must be insensitive to layout and clause order:
/// 1. `#` comments are stripped (to end of line)
/// 2. each line is whitespace-collapsed and trimmed
/// 3. empty lines are dropped
/// 4. the remaining clauses are sorted
///
/// Two rule bodies that state the same clauses in a different order or with
/// different indentation therefore hash identically.
pub fn canonicalize_rule_content(body: &str) -> String {
    let unified = body.replace("\r\n", "\n").replace('\r', "\n");
    let mut clauses: Vec<String> = unified
        .split('\n')
        .map(|line| {
            let without_comment = match line.find('#') {
                Some(pos) => &line[..pos],
                None => line,
            };
            without_comment.split_whitespace().collect::<Vec<_>>().join(" ")
        })
        .filter(|line| !line.is_empty())
        .collect();
    clauses.sort();
    clauses.join("\n")
}

/// SHA-256 of the canonicalized rule body.
pub fn compute_rule_logic_hash(body: &str) -> String {
    sha256_hex(canonicalize_rule_content(body).as_bytes())
}

/// SHA-256 over the canonical JSON of the sorted rule-id list.
///
/// This is the `policy_hash` pinned inside every PolicyHead cell.
pub fn compute_policy_hash(rule_ids: &[String]) -> String {
    let mut sorted: Vec<&String> = rule_ids.iter().collect();
    sorted.sort();
    let value = Value::Array(sorted.into_iter().map(|s| Value::String(s.clone())).collect());
    sha256_hex(&canonical_json_bytes(&value))
}
