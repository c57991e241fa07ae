pub mod cell;
pub mod constants;
pub mod error;
pub mod types;
pub mod validators;

pub use cell::{
    CellDraft, CellType, DecisionCell, Evidence, Fact, Header, LogicAnchor, Proof, SourceQuality,
};
pub use constants::*;
pub use error::DgError;
pub use types::{current_timestamp, parse_utc, CellId, NULL_HASH};
pub use validators::{
    get_parent_namespace, is_namespace_prefix, validate_namespace, validate_object,
    validate_predicate, validate_root_namespace, validate_subject, validate_timestamp,
};
