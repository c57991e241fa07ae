//! dg-canon
//!
//! Canonical byte representation and SHA-256 hashing.
//!
//! Every hash and signature in the graph is computed over canonical JSON:
//! lexicographically sorted keys, compact separators, UTF-8, nulls omitted.
//! `serde_json::Value` objects are backed by a `BTreeMap` (the crate default,
//! without the `preserve_order` feature), so serializing a `Value` already
//! yields sorted keys and `,`/`:` separators — canonicalization here is
//! null-stripping plus that serialization.

pub mod hash;
pub mod json;
pub mod rules;

pub use hash::{content_hash, sha256_hex, text_hash};
pub use json::{canonical_json_bytes, canonical_json_string, strip_nulls};
pub use rules::{canonicalize_rule_content, compute_policy_hash, compute_rule_logic_hash};
