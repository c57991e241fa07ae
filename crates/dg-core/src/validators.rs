//! Field validators shared by the cell layer and the RFA entry points.
//!
//! Every validator rejects with `DgError::InputInvalid` carrying the field
//! name and the violated constraint, so API callers can fix inputs without
//! reading kernel source.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use crate::constants::{MAX_OBJECT_LENGTH, MAX_PREDICATE_LENGTH};
use crate::error::DgError;
use crate::types::{parse_utc, truncate};

/// Hierarchical namespace: lowercase dot-separated segments, each starting
/// with a letter, at most 64 chars per segment.
pub static NAMESPACE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z][a-z0-9_]{0,63}(\.[a-z][a-z0-9_]{0,63})*$").expect("valid regex")
});

/// Subject: `type:identifier`, lowercase. Dots and dashes are allowed in the
/// identifier part (bridge subjects embed namespaces there).
pub static SUBJECT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z][a-z0-9_]*:[a-z0-9_.\-]{1,128}$").expect("valid regex")
});

/// Predicate: snake_case, starts with a letter.
pub static PREDICATE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]{0,63}$").expect("valid regex"));

/// Graph identity: `graph:` followed by lowercase alphanumerics, `_` or `-`.
pub static GRAPH_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^graph:[a-z0-9_-]+$").expect("valid regex"));

pub fn validate_namespace(namespace: &str) -> Result<(), DgError> {
    if NAMESPACE_PATTERN.is_match(namespace) {
        Ok(())
    } else {
        Err(DgError::input_invalid(format!(
            "invalid namespace '{}': expected lowercase dot-separated segments (e.g. 'corp', 'corp.hr')",
            truncate(namespace, 80)
        ))
        .with_details(json!({
            "field": "namespace",
            "value": truncate(namespace, 80),
            "pattern": NAMESPACE_PATTERN.as_str(),
        })))
    }
}

/// Root namespaces additionally forbid dots — the Genesis cell anchors a
/// single top-level segment.
pub fn validate_root_namespace(namespace: &str) -> Result<(), DgError> {
    validate_namespace(namespace)?;
    if namespace.contains('.') {
        return Err(DgError::input_invalid(format!(
            "root namespace '{}' must not contain dots",
            truncate(namespace, 80)
        ))
        .with_details(json!({"field": "root_namespace", "value": truncate(namespace, 80)})));
    }
    Ok(())
}

pub fn validate_subject(subject: &str) -> Result<(), DgError> {
    if SUBJECT_PATTERN.is_match(subject) {
        Ok(())
    } else {
        Err(DgError::input_invalid(format!(
            "invalid subject '{}': expected lowercase 'type:identifier' with identifier of 1-128 chars",
            truncate(subject, 80)
        ))
        .with_details(json!({
            "field": "subject",
            "value": truncate(subject, 80),
            "pattern": SUBJECT_PATTERN.as_str(),
        })))
    }
}

pub fn validate_predicate(predicate: &str) -> Result<(), DgError> {
    if PREDICATE_PATTERN.is_match(predicate) {
        Ok(())
    } else {
        Err(DgError::input_invalid(format!(
            "invalid predicate '{}': expected snake_case of at most {} chars",
            truncate(predicate, 80),
            MAX_PREDICATE_LENGTH
        ))
        .with_details(json!({
            "field": "predicate",
            "value": truncate(predicate, 80),
            "pattern": PREDICATE_PATTERN.as_str(),
        })))
    }
}

/// Objects are free text up to 4096 chars. ASCII control characters are
/// rejected except tab and newline, which legal text legitimately contains.
pub fn validate_object(object: &str) -> Result<(), DgError> {
    let length = object.chars().count();
    if length > MAX_OBJECT_LENGTH {
        return Err(DgError::input_invalid(format!(
            "object exceeds maximum length: {length} > {MAX_OBJECT_LENGTH} chars"
        ))
        .with_details(json!({
            "field": "object",
            "length": length,
            "max_length": MAX_OBJECT_LENGTH,
        })));
    }
    if let Some(bad) = object
        .chars()
        .find(|c| matches!(*c, '\u{00}'..='\u{08}' | '\u{0B}'..='\u{1F}'))
    {
        return Err(DgError::input_invalid(format!(
            "object contains forbidden control character U+{:04X}",
            bad as u32
        ))
        .with_details(json!({
            "field": "object",
            "control_char": format!("U+{:04X}", bad as u32),
        })));
    }
    Ok(())
}

pub fn validate_timestamp(ts: &str) -> Result<(), DgError> {
    parse_utc(ts).map(|_| ())
}

pub fn validate_graph_id(graph_id: &str) -> Result<(), DgError> {
    if GRAPH_ID_PATTERN.is_match(graph_id) {
        Ok(())
    } else {
        Err(DgError::input_invalid(format!(
            "invalid graph id '{}': expected 'graph:' followed by [a-z0-9_-]",
            truncate(graph_id, 80)
        )))
    }
}

// ── Namespace hierarchy helpers ──────────────────────────────────────────────

/// True iff `parent` equals `child` or is a dot-segment ancestor of it.
/// Comparison is segment-wise: `corp.h` is NOT a prefix of `corp.hr`.
pub fn is_namespace_prefix(parent: &str, child: &str) -> bool {
    if parent == child {
        return true;
    }
    child.starts_with(parent) && child.as_bytes().get(parent.len()) == Some(&b'.')
}

/// Parent namespace of `ns`, or `None` for a root segment.
pub fn get_parent_namespace(ns: &str) -> Option<&str> {
    ns.rfind('.').map(|pos| &ns[..pos])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_boundaries() {
        assert!(validate_namespace("a").is_ok());
        assert!(validate_namespace("corp.hr.compensation").is_ok());
        assert!(validate_namespace("A").is_err());
        assert!(validate_namespace("a.").is_err());
        assert!(validate_namespace(".a").is_err());
        assert!(validate_namespace("corp..hr").is_err());
        assert!(validate_namespace("1corp").is_err());
    }

    #[test]
    fn root_namespace_rejects_dots() {
        assert!(validate_root_namespace("corp").is_ok());
        assert!(validate_root_namespace("corp.hr").is_err());
    }

    #[test]
    fn subject_format() {
        assert!(validate_subject("user:alice").is_ok());
        assert!(validate_subject("namespace:corp.audit").is_ok());
        assert!(validate_subject("User:alice").is_err());
        assert!(validate_subject("alice").is_err());
        assert!(validate_subject(&format!("user:{}", "a".repeat(128))).is_ok());
        assert!(validate_subject(&format!("user:{}", "a".repeat(129))).is_err());
    }

    #[test]
    fn predicate_format() {
        assert!(validate_predicate("has_salary").is_ok());
        assert!(validate_predicate("hasSalary").is_err());
        assert!(validate_predicate(&"a".repeat(64)).is_ok());
        assert!(validate_predicate(&"a".repeat(65)).is_err());
    }

    #[test]
    fn object_length_boundary() {
        assert!(validate_object(&"x".repeat(4096)).is_ok());
        assert!(validate_object(&"x".repeat(4097)).is_err());
    }

    #[test]
    fn object_control_chars() {
        assert!(validate_object("line one\nline\ttwo").is_ok());
        assert!(validate_object("bad\u{0000}byte").is_err());
        assert!(validate_object("bell\u{0007}").is_err());
        assert!(validate_object("vt\u{000B}").is_err());
    }

    #[test]
    fn prefix_is_segment_wise() {
        assert!(is_namespace_prefix("corp", "corp"));
        assert!(is_namespace_prefix("corp", "corp.hr"));
        assert!(is_namespace_prefix("corp.hr", "corp.hr.compensation"));
        assert!(!is_namespace_prefix("corp.h", "corp.hr"));
        assert!(!is_namespace_prefix("corp.hr", "corp"));
    }

    #[test]
    fn parent_namespace() {
        assert_eq!(get_parent_namespace("corp.hr.pay"), Some("corp.hr"));
        assert_eq!(get_parent_namespace("corp"), None);
    }
}
