//! Graph-wide constants. Identity algorithms and size caps live here so every
//! crate agrees on them.

/// Cell schema version stamped into every header.
pub const CELL_SCHEMA_VERSION: &str = "1.0";

/// Identity scheme: SHA-256 over the canonical JSON of the cell body.
pub const HASH_SCHEME_CANONICAL: &str = "canonical-json-v1";

/// Identity scheme: SHA-256 over a fixed-order pipe-joined field string.
/// Kept for graphs minted before canonical JSON became the default.
pub const HASH_SCHEME_LEGACY: &str = "legacy-concat-v1";

/// Default root namespace for new graphs.
pub const DEFAULT_ROOT_NAMESPACE: &str = "corp";

/// Maximum length of `fact.object` in characters.
pub const MAX_OBJECT_LENGTH: usize = 4096;

/// Maximum length of the identifier part of a subject (after the colon).
pub const MAX_SUBJECT_IDENTIFIER_LENGTH: usize = 128;

/// Maximum total length of a predicate.
pub const MAX_PREDICATE_LENGTH: usize = 64;

/// Predicate that establishes a cross-namespace bridge.
pub const PREDICATE_GRANTS_ACCESS: &str = "grants_access_to";

/// Predicate that revokes a previously granted bridge.
pub const PREDICATE_REVOKE_BRIDGE: &str = "revoke_bridge";

/// Predicate that sets a permission on a subject within a namespace.
pub const PREDICATE_HAS_PERMISSION: &str = "has_permission";
