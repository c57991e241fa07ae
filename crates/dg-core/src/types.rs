use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::DgError;

// ── CellId ───────────────────────────────────────────────────────────────────

/// 32-byte cell identifier: SHA-256 of the cell's canonical body bytes.
///
/// Serializes as 64 lowercase hex characters. Byte-wise `Ord` matches the
/// lexicographic order of the hex form, which the Scholar relies on for its
/// final conflict tiebreak.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(pub [u8; 32]);

/// The null hash: `prev_cell_hash` of the Genesis cell and nothing else.
pub const NULL_HASH: CellId = CellId([0u8; 32]);

impl CellId {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, DgError> {
        let bytes = hex::decode(s).map_err(|_| DgError::input_invalid(format!(
            "cell id is not valid hex: '{}'",
            truncate(s, 32)
        )))?;
        if bytes.len() != 32 {
            return Err(DgError::input_invalid(format!(
                "cell id must be 32 bytes (64 hex chars), got {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    pub fn is_null(&self) -> bool {
        *self == NULL_HASH
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CellId({}…)", &self.to_hex()[..16])
    }
}

impl Serialize for CellId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for CellId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        CellId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ── Timestamps ───────────────────────────────────────────────────────────────

/// Current UTC time as an ISO-8601 string with microsecond precision.
///
/// Cells carry timestamps as strings for wire fidelity; comparisons always go
/// through [`parse_utc`] so sub-second forms order correctly.
pub fn current_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an ISO-8601 UTC timestamp. Non-UTC offsets are rejected — the graph
/// has a single clock domain.
pub fn parse_utc(ts: &str) -> Result<DateTime<Utc>, DgError> {
    let parsed = DateTime::parse_from_rfc3339(ts).map_err(|e| {
        DgError::input_invalid(format!("invalid ISO-8601 timestamp '{}': {}", truncate(ts, 40), e))
    })?;
    if parsed.offset().local_minus_utc() != 0 {
        return Err(DgError::input_invalid(format!(
            "timestamp '{}' is not UTC (offset {}s)",
            truncate(ts, 40),
            parsed.offset().local_minus_utc()
        )));
    }
    Ok(parsed.with_timezone(&Utc))
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_id_hex_round_trip() {
        let id = CellId::from_bytes([0xab; 32]);
        assert_eq!(CellId::from_hex(&id.to_hex()).unwrap(), id);
    }

    #[test]
    fn cell_id_rejects_wrong_length() {
        assert!(CellId::from_hex("abcd").is_err());
        assert!(CellId::from_hex("zz").is_err());
    }

    #[test]
    fn null_hash_is_all_zeros() {
        assert_eq!(NULL_HASH.to_hex(), "0".repeat(64));
        assert!(NULL_HASH.is_null());
    }

    #[test]
    fn ord_matches_hex_order() {
        let lo = CellId::from_bytes([0x01; 32]);
        let hi = CellId::from_bytes([0xff; 32]);
        assert!(lo < hi);
        assert!(lo.to_hex() < hi.to_hex());
    }

    #[test]
    fn parse_utc_accepts_z_and_zero_offset() {
        assert!(parse_utc("2025-01-01T00:00:00Z").is_ok());
        assert!(parse_utc("2025-01-01T00:00:00+00:00").is_ok());
        assert!(parse_utc("2025-01-01T00:00:00.500Z").is_ok());
    }

    #[test]
    fn parse_utc_rejects_offsets_and_garbage() {
        assert!(parse_utc("2025-01-01T00:00:00+02:00").is_err());
        assert!(parse_utc("2025-01-01").is_err());
        assert!(parse_utc("not a time").is_err());
    }

    #[test]
    fn subsecond_ordering_is_numeric_not_lexicographic() {
        let a = parse_utc("2025-01-01T00:00:00.5Z").unwrap();
        let b = parse_utc("2025-01-01T00:00:00Z").unwrap();
        assert!(a > b);
    }
}
