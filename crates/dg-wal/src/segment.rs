use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};

use sha2::{Digest, Sha256};

use dg_core::DgError;

/// Magic bytes opening every segment file.
pub const WAL_MAGIC: &[u8; 6] = b"DGWAL1";

/// Segment format version.
pub const WAL_VERSION: u32 = 1;

/// All-zero hash: `prev_record_hash` of the first record in the log.
pub const NULL_RECORD_HASH: [u8; 32] = [0u8; 32];

/// Frames larger than this are treated as corruption, not allocation hints.
const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

// ── Header ───────────────────────────────────────────────────────────────────

/// Self-describing segment header. A segment alone is enough to know which
/// graph and identity scheme it belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalHeader {
    pub version: u32,
    pub graph_id: String,
    pub hash_scheme: String,
}

impl WalHeader {
    pub fn write_to(&self, w: &mut impl Write) -> Result<(), DgError> {
        let io = |e: std::io::Error| DgError::WalHeader(format!("header write failed: {e}"));
        w.write_all(WAL_MAGIC).map_err(io)?;
        w.write_all(&self.version.to_le_bytes()).map_err(io)?;
        write_lp_string(w, &self.graph_id).map_err(io)?;
        write_lp_string(w, &self.hash_scheme).map_err(io)?;
        Ok(())
    }

    pub fn read_from(r: &mut impl Read) -> Result<Self, DgError> {
        let io = |e: std::io::Error| DgError::WalHeader(format!("header read failed: {e}"));
        let mut magic = [0u8; 6];
        r.read_exact(&mut magic).map_err(io)?;
        if &magic != WAL_MAGIC {
            return Err(DgError::WalHeader(format!(
                "bad magic: expected {WAL_MAGIC:?}, got {magic:?}"
            )));
        }
        let mut version_bytes = [0u8; 4];
        r.read_exact(&mut version_bytes).map_err(io)?;
        let version = u32::from_le_bytes(version_bytes);
        if version != WAL_VERSION {
            return Err(DgError::WalHeader(format!(
                "unsupported segment version {version}, expected {WAL_VERSION}"
            )));
        }
        let graph_id = read_lp_string(r).map_err(io)?;
        let hash_scheme = read_lp_string(r).map_err(io)?;
        Ok(Self { version, graph_id, hash_scheme })
    }
}

fn write_lp_string(w: &mut impl Write, s: &str) -> std::io::Result<()> {
    w.write_all(&(s.len() as u32).to_le_bytes())?;
    w.write_all(s.as_bytes())
}

fn read_lp_string(r: &mut impl Read) -> std::io::Result<String> {
    let mut len_bytes = [0u8; 4];
    r.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

// ── Record ───────────────────────────────────────────────────────────────────

/// One framed log entry: global sequence, hash of the previous record, and
/// the cell's canonical bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalRecord {
    pub sequence: u64,
    pub prev_record_hash: [u8; 32],
    pub cell_bytes: Vec<u8>,
}

impl WalRecord {
    fn payload(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + 32 + self.cell_bytes.len());
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&self.prev_record_hash);
        buf.extend_from_slice(&self.cell_bytes);
        buf
    }

    /// Hash of this record; the next record's `prev_record_hash`.
    pub fn record_hash(&self) -> [u8; 32] {
        Sha256::digest(self.payload()).into()
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

/// Appends framed records to one segment file. The segmented layer owns
/// sequence numbering and the cross-segment hash chain.
pub struct WalWriter {
    file: File,
}

impl WalWriter {
    /// Create a fresh segment with its header already written.
    pub fn create(path: &std::path::Path, header: &WalHeader) -> Result<Self, DgError> {
        let mut file = File::create(path)
            .map_err(|e| DgError::WalHeader(format!("cannot create segment: {e}")))?;
        header.write_to(&mut file)?;
        file.sync_all()
            .map_err(|e| DgError::WalHeader(format!("segment header sync failed: {e}")))?;
        Ok(Self { file })
    }

    /// Open an existing segment for appending.
    pub fn open_for_append(path: &std::path::Path) -> Result<Self, DgError> {
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .append(true)
            .open(path)
            .map_err(|e| DgError::WalHeader(format!("cannot open segment: {e}")))?;
        file.seek(SeekFrom::End(0))
            .map_err(|e| DgError::WalHeader(format!("segment seek failed: {e}")))?;
        Ok(Self { file })
    }

    /// Write one record frame and fsync. The WAL write is synchronous: when
    /// this returns, the record is durable.
    pub fn append(&mut self, record: &WalRecord) -> Result<(), DgError> {
        let payload = record.payload();
        let io = |e: std::io::Error| DgError::WalChain(format!("record write failed: {e}"));
        self.file.write_all(&(payload.len() as u32).to_le_bytes()).map_err(io)?;
        self.file.write_all(&payload).map_err(io)?;
        self.file.sync_all().map_err(io)?;
        Ok(())
    }

    pub fn size(&self) -> Result<u64, DgError> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(|e| DgError::WalChain(format!("segment stat failed: {e}")))
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

/// Result of scanning a segment.
#[derive(Debug)]
pub struct SegmentScan {
    pub header: WalHeader,
    pub records: Vec<WalRecord>,
    /// Byte offset just past the last fully valid record.
    pub valid_bytes: u64,
    /// Damage found past `valid_bytes`, if any.
    pub damage: Option<DgError>,
}

/// Reads a segment front to back, verifying frames as it goes.
pub struct WalReader;

impl WalReader {
    /// Scan a segment file. A torn or oversized tail frame stops the scan
    /// and is reported as damage; everything before it is intact. Hash-chain
    /// verification against `expected_prev_hash` flags the first record that
    /// breaks the chain.
    pub fn scan(
        path: &std::path::Path,
        expected_prev_hash: Option<[u8; 32]>,
    ) -> Result<SegmentScan, DgError> {
        let file = File::open(path)
            .map_err(|e| DgError::WalHeader(format!("cannot open segment: {e}")))?;
        let mut reader = BufReader::new(file);
        let header = WalHeader::read_from(&mut reader)?;
        let mut offset = reader
            .stream_position()
            .map_err(|e| DgError::WalHeader(format!("segment seek failed: {e}")))?;

        let mut records = Vec::new();
        let mut prev_hash = expected_prev_hash;
        let mut damage = None;

        loop {
            let mut len_bytes = [0u8; 4];
            match reader.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    damage = Some(DgError::WalChain(format!("frame length read failed: {e}")));
                    break;
                }
            }
            let len = u32::from_le_bytes(len_bytes);
            if len < 40 || len > MAX_FRAME_BYTES {
                damage = Some(DgError::WalChain(format!("implausible frame length {len}")));
                break;
            }
            let mut payload = vec![0u8; len as usize];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(_) => {
                    damage = Some(DgError::WalChain("torn frame at segment tail".to_string()));
                    break;
                }
            }

            let sequence = u64::from_le_bytes(payload[..8].try_into().expect("8 bytes"));
            let mut prev_record_hash = [0u8; 32];
            prev_record_hash.copy_from_slice(&payload[8..40]);
            let record =
                WalRecord { sequence, prev_record_hash, cell_bytes: payload[40..].to_vec() };

            if let Some(expected) = prev_hash {
                if record.prev_record_hash != expected {
                    damage = Some(DgError::WalChain(format!(
                        "hash chain broken at sequence {sequence}"
                    )));
                    break;
                }
            }
            prev_hash = Some(record.record_hash());
            records.push(record);
            offset += 4 + len as u64;
        }

        Ok(SegmentScan { header, records, valid_bytes: offset, damage })
    }
}
