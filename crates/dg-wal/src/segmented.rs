use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use dg_core::DgError;

use crate::segment::{SegmentScan, WalHeader, WalReader, WalRecord, WalWriter, NULL_RECORD_HASH, WAL_VERSION};

/// Default roll threshold: 256 MiB.
const DEFAULT_MAX_BYTES: u64 = 256 * 1024 * 1024;

// ── Manifest ─────────────────────────────────────────────────────────────────

/// Per-segment metadata in the manifest cache.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SegmentInfo {
    pub id: u32,
    pub first_seq: u64,
    pub last_seq: u64,
    pub sealed: bool,
}

/// The manifest is a cache: convenient, never authoritative. It is
/// rewritten after every recovery and roll, and rebuilt from segment files
/// when absent or stale.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub graph_id: String,
    pub hash_scheme: String,
    pub segments: Vec<SegmentInfo>,
    pub active_segment: u32,
    pub roll_policy: RollPolicy,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RollPolicy {
    pub max_bytes: u64,
}

// ── SegmentedWal ─────────────────────────────────────────────────────────────

/// Append-only durable log over numbered segment files.
///
/// The caller holds the only writer; sealed segments may be read by anyone
/// without coordination.
pub struct SegmentedWal {
    dir: PathBuf,
    header: WalHeader,
    max_bytes: u64,
    active_id: u32,
    writer: WalWriter,
    next_sequence: u64,
    prev_hash: [u8; 32],
    segments: Vec<SegmentInfo>,
}

impl SegmentedWal {
    /// Open (or create) the log at `dir`, recovering state by scanning the
    /// segment files in order.
    pub fn open(
        dir: impl AsRef<Path>,
        graph_id: &str,
        hash_scheme: &str,
        max_bytes: Option<u64>,
    ) -> Result<Self, DgError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| DgError::WalHeader(format!("cannot create WAL directory: {e}")))?;
        let max_bytes = max_bytes.unwrap_or(DEFAULT_MAX_BYTES);
        let header = WalHeader {
            version: WAL_VERSION,
            graph_id: graph_id.to_string(),
            hash_scheme: hash_scheme.to_string(),
        };

        let segment_ids = Self::list_segments(&dir)?;
        if segment_ids.is_empty() {
            let path = Self::segment_path(&dir, 0);
            let writer = WalWriter::create(&path, &header)?;
            let mut wal = Self {
                dir,
                header,
                max_bytes,
                active_id: 0,
                writer,
                next_sequence: 0,
                prev_hash: NULL_RECORD_HASH,
                segments: vec![SegmentInfo { id: 0, first_seq: 0, last_seq: 0, sealed: false }],
            };
            wal.write_manifest()?;
            return Ok(wal);
        }

        // Recovery: scan every segment in order, carrying the hash chain
        // across boundaries. Damage in a sealed segment is fatal; damage in
        // the active (last) segment truncates the tail.
        let mut prev_hash = NULL_RECORD_HASH;
        let mut next_sequence = 0u64;
        let mut segments = Vec::new();
        let last_index = segment_ids.len() - 1;

        for (i, &id) in segment_ids.iter().enumerate() {
            let path = Self::segment_path(&dir, id);
            let scan = WalReader::scan(&path, Some(prev_hash))?;
            Self::check_header(&header, &scan, id)?;
            let sealed = i < last_index;

            if let Some(damage) = &scan.damage {
                if sealed {
                    return Err(DgError::WalCorruption(format!(
                        "sealed segment {id:08} is damaged ({damage}); disk corruption"
                    )));
                }
                warn!(segment = id, error = %damage, "truncating damaged active segment tail");
                let file = std::fs::OpenOptions::new()
                    .write(true)
                    .open(&path)
                    .map_err(|e| DgError::WalCorruption(format!("cannot open for truncate: {e}")))?;
                file.set_len(scan.valid_bytes)
                    .map_err(|e| DgError::WalCorruption(format!("truncate failed: {e}")))?;
            }

            for record in &scan.records {
                if record.sequence != next_sequence {
                    let err = format!(
                        "sequence gap in segment {id:08}: expected {next_sequence}, got {}",
                        record.sequence
                    );
                    if sealed {
                        return Err(DgError::WalCorruption(err));
                    }
                    return Err(DgError::WalChain(err));
                }
                next_sequence += 1;
                prev_hash = record.record_hash();
            }

            segments.push(SegmentInfo {
                id,
                first_seq: scan.records.first().map(|r| r.sequence).unwrap_or(next_sequence),
                last_seq: scan.records.last().map(|r| r.sequence).unwrap_or(next_sequence),
                sealed,
            });
        }

        let active_id = *segment_ids.last().expect("non-empty");
        let writer = WalWriter::open_for_append(&Self::segment_path(&dir, active_id))?;
        let mut wal = Self {
            dir,
            header,
            max_bytes,
            active_id,
            writer,
            next_sequence,
            prev_hash,
            segments,
        };
        wal.write_manifest()?;
        info!(
            segments = wal.segments.len(),
            next_sequence = wal.next_sequence,
            "WAL recovered"
        );
        Ok(wal)
    }

    fn check_header(expected: &WalHeader, scan: &SegmentScan, id: u32) -> Result<(), DgError> {
        if scan.header.graph_id != expected.graph_id {
            return Err(DgError::WalHeader(format!(
                "segment {id:08} belongs to graph '{}', expected '{}'",
                scan.header.graph_id, expected.graph_id
            )));
        }
        if scan.header.hash_scheme != expected.hash_scheme {
            return Err(DgError::WalHeader(format!(
                "segment {id:08} uses hash scheme '{}', expected '{}'",
                scan.header.hash_scheme, expected.hash_scheme
            )));
        }
        Ok(())
    }

    /// Append one cell's canonical bytes. Returns the assigned sequence.
    pub fn append(&mut self, cell_bytes: &[u8]) -> Result<u64, DgError> {
        if self.writer.size()? >= self.max_bytes {
            self.roll()?;
        }
        let record = WalRecord {
            sequence: self.next_sequence,
            prev_record_hash: self.prev_hash,
            cell_bytes: cell_bytes.to_vec(),
        };
        self.writer.append(&record)?;
        self.prev_hash = record.record_hash();
        if let Some(active) = self.segments.last_mut() {
            active.last_seq = record.sequence;
        }
        self.next_sequence += 1;
        Ok(record.sequence)
    }

    /// Seal the active segment and start a new one. The hash chain simply
    /// continues into the new file.
    fn roll(&mut self) -> Result<(), DgError> {
        if let Some(active) = self.segments.last_mut() {
            active.sealed = true;
        }
        self.active_id += 1;
        let path = Self::segment_path(&self.dir, self.active_id);
        self.writer = WalWriter::create(&path, &self.header)?;
        self.segments.push(SegmentInfo {
            id: self.active_id,
            first_seq: self.next_sequence,
            last_seq: self.next_sequence,
            sealed: false,
        });
        self.write_manifest()?;
        info!(segment = self.active_id, "WAL rolled to new segment");
        Ok(())
    }

    /// Read every record across all segments, verifying the full chain.
    pub fn read_all(&self) -> Result<Vec<WalRecord>, DgError> {
        let mut prev_hash = NULL_RECORD_HASH;
        let mut records = Vec::new();
        for segment in &self.segments {
            let scan = WalReader::scan(&Self::segment_path(&self.dir, segment.id), Some(prev_hash))?;
            if let Some(damage) = scan.damage {
                return Err(damage);
            }
            if let Some(last) = scan.records.last() {
                prev_hash = last.record_hash();
            }
            records.extend(scan.records);
        }
        Ok(records)
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn manifest(&self) -> Manifest {
        Manifest {
            version: WAL_VERSION,
            graph_id: self.header.graph_id.clone(),
            hash_scheme: self.header.hash_scheme.clone(),
            segments: self.segments.clone(),
            active_segment: self.active_id,
            roll_policy: RollPolicy { max_bytes: self.max_bytes },
        }
    }

    fn write_manifest(&mut self) -> Result<(), DgError> {
        let manifest = self.manifest();
        let json = serde_json::to_string_pretty(&manifest)
            .expect("manifest serialization is infallible");
        std::fs::write(self.dir.join("manifest.json"), json)
            .map_err(|e| DgError::WalHeader(format!("manifest write failed: {e}")))
    }

    fn segment_path(dir: &Path, id: u32) -> PathBuf {
        dir.join(format!("{id:08}.wal"))
    }

    fn list_segments(dir: &Path) -> Result<Vec<u32>, DgError> {
        let mut ids = Vec::new();
        let entries = std::fs::read_dir(dir)
            .map_err(|e| DgError::WalHeader(format!("cannot read WAL directory: {e}")))?;
        for entry in entries {
            let entry =
                entry.map_err(|e| DgError::WalHeader(format!("directory entry error: {e}")))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".wal") {
                if let Ok(id) = stem.parse::<u32>() {
                    ids.push(id);
                }
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    const GRAPH: &str = "graph:test-0000";
    const SCHEME: &str = "canonical-json-v1";

    #[test]
    fn fresh_log_appends_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut wal = SegmentedWal::open(dir.path(), GRAPH, SCHEME, None).unwrap();
        assert_eq!(wal.append(b"cell-0").unwrap(), 0);
        assert_eq!(wal.append(b"cell-1").unwrap(), 1);

        let records = wal.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].cell_bytes, b"cell-0");
        assert_eq!(records[1].cell_bytes, b"cell-1");
    }

    #[test]
    fn reopen_recovers_sequence_and_chain() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut wal = SegmentedWal::open(dir.path(), GRAPH, SCHEME, None).unwrap();
            wal.append(b"cell-0").unwrap();
            wal.append(b"cell-1").unwrap();
        }
        let mut wal = SegmentedWal::open(dir.path(), GRAPH, SCHEME, None).unwrap();
        assert_eq!(wal.next_sequence(), 2);
        assert_eq!(wal.append(b"cell-2").unwrap(), 2);
        assert_eq!(wal.read_all().unwrap().len(), 3);
    }

    #[test]
    fn rolling_crosses_segment_boundaries_with_one_chain() {
        let dir = tempfile::tempdir().unwrap();
        // Tiny roll threshold: every append after the first rolls.
        let mut wal = SegmentedWal::open(dir.path(), GRAPH, SCHEME, Some(64)).unwrap();
        for i in 0..5u8 {
            wal.append(format!("cell-{i}").as_bytes()).unwrap();
        }
        assert!(wal.segment_count() > 1);

        // Reopen: the chain verifies across all segments.
        let wal = SegmentedWal::open(dir.path(), GRAPH, SCHEME, Some(64)).unwrap();
        assert_eq!(wal.read_all().unwrap().len(), 5);
        assert_eq!(wal.next_sequence(), 5);
    }

    #[test]
    fn torn_active_tail_is_truncated_on_recovery() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut wal = SegmentedWal::open(dir.path(), GRAPH, SCHEME, None).unwrap();
            wal.append(b"cell-0").unwrap();
        }
        // Crash mid-write: garbage frame at the tail of the active segment.
        let path = dir.path().join("00000000.wal");
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&999u32.to_le_bytes()).unwrap();
        file.write_all(&[0xEE; 7]).unwrap();

        let wal = SegmentedWal::open(dir.path(), GRAPH, SCHEME, None).unwrap();
        assert_eq!(wal.next_sequence(), 1);
        assert_eq!(wal.read_all().unwrap().len(), 1);
    }

    #[test]
    fn damaged_sealed_segment_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut wal = SegmentedWal::open(dir.path(), GRAPH, SCHEME, Some(64)).unwrap();
            for i in 0..4u8 {
                wal.append(format!("cell-{i}").as_bytes()).unwrap();
            }
            assert!(wal.segment_count() > 1);
        }
        // Flip a byte deep inside the first (sealed) segment's first record.
        let path = dir.path().join("00000000.wal");
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 3;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let err = SegmentedWal::open(dir.path(), GRAPH, SCHEME, Some(64));
        assert!(matches!(err, Err(DgError::WalCorruption(_))));
    }

    #[test]
    fn wrong_graph_id_is_a_header_error() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut wal = SegmentedWal::open(dir.path(), GRAPH, SCHEME, None).unwrap();
            wal.append(b"cell-0").unwrap();
        }
        let err = SegmentedWal::open(dir.path(), "graph:other-1111", SCHEME, None);
        assert!(matches!(err, Err(DgError::WalHeader(_))));
    }

    #[test]
    fn manifest_reflects_segments_and_is_a_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut wal = SegmentedWal::open(dir.path(), GRAPH, SCHEME, Some(64)).unwrap();
        for i in 0..3u8 {
            wal.append(format!("cell-{i}").as_bytes()).unwrap();
        }
        let manifest = wal.manifest();
        assert_eq!(manifest.graph_id, GRAPH);
        assert_eq!(manifest.segments.len(), wal.segment_count());
        drop(wal);

        // Deleting the manifest loses nothing: recovery rebuilds it.
        std::fs::remove_file(dir.path().join("manifest.json")).unwrap();
        let wal = SegmentedWal::open(dir.path(), GRAPH, SCHEME, Some(64)).unwrap();
        assert_eq!(wal.read_all().unwrap().len(), 3);
        assert!(dir.path().join("manifest.json").exists());
    }
}
