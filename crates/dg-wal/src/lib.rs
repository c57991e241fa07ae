//! dg-wal
//!
//! Segmented write-ahead log: the kernel's only durability layer.
//!
//! Layout: a directory of numbered segment files (`00000000.wal`,
//! `00000001.wal`, ...) plus a `manifest.json` cache. Segments are the
//! source of truth; the manifest can always be rebuilt by scanning them.
//!
//! Each segment starts with a self-describing header (magic, schema
//! version, graph_id, hash_scheme) followed by length-prefixed records.
//! A record carries a global monotonic sequence number, the hash of the
//! previous record, and the cell bytes. The hash chain crosses segment
//! boundaries, so the whole log verifies end to end.
//!
//! Recovery policy: a broken chain or torn frame in the *active* segment is
//! truncated (an interrupted write); the same damage in a *sealed* segment
//! is fatal corruption — sealed files never change once rolled.

pub mod segment;
pub mod segmented;

pub use segment::{WalHeader, WalReader, WalRecord, WalWriter, WAL_MAGIC, WAL_VERSION};
pub use segmented::{Manifest, SegmentInfo, SegmentedWal};
