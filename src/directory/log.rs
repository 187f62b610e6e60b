//! Append-only directory log
//!
//! Entry layout:
//! - Entry Length (u32 LE), total length including this field
//! - Entry Type (u8): PUT / REMOVE
//! - Sequence Number (u64 LE)
//! - Payload (PUT: JSON-encoded record, REMOVE: UTF-8 file id)
//! - Checksum (u32 LE) over everything before it
//!
//! Every append is followed by fsync. An append is acknowledged only after
//! fsync returns. A failed append is rolled back by truncating the file to its
//! previous length; if that is not possible the writer poisons itself.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use super::checksum::{compute_checksum, verify_checksum};
use super::errors::{DirectoryError, DirectoryResult};
use super::record::FileRecord;

const HEADER_LEN: usize = 4 + 1 + 8;
const MIN_ENTRY_LEN: usize = HEADER_LEN + 4;
/// Larger entries are refused on append and treated as corruption on replay.
pub const MAX_ENTRY_LEN: usize = 1 << 20;

/// Directory log entry types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryType {
    Put = 1,
    Remove = 2,
}

impl EntryType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(EntryType::Put),
            2 => Some(EntryType::Remove),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// A mutation recorded in the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOp {
    Put(FileRecord),
    Remove(String),
}

impl LogOp {
    pub fn entry_type(&self) -> EntryType {
        match self {
            LogOp::Put(_) => EntryType::Put,
            LogOp::Remove(_) => EntryType::Remove,
        }
    }

    fn encode_payload(&self) -> DirectoryResult<Vec<u8>> {
        match self {
            LogOp::Put(record) => Ok(serde_json::to_vec(record)?),
            LogOp::Remove(file_id) => Ok(file_id.as_bytes().to_vec()),
        }
    }

    /// Serialize a complete entry carrying this op.
    ///
    /// Fails with `EntryTooLarge` for entries replay would reject.
    pub fn serialize(&self, sequence: u64) -> DirectoryResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let len = HEADER_LEN + payload.len() + 4;
        if len > MAX_ENTRY_LEN {
            return Err(DirectoryError::EntryTooLarge {
                len,
                max: MAX_ENTRY_LEN,
            });
        }
        let entry_len = len as u32;

        let mut buf = Vec::with_capacity(entry_len as usize);
        buf.extend_from_slice(&entry_len.to_le_bytes());
        buf.push(self.entry_type().as_u8());
        buf.extend_from_slice(&sequence.to_le_bytes());
        buf.extend_from_slice(&payload);

        let checksum = compute_checksum(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());
        Ok(buf)
    }
}

/// A decoded log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub sequence: u64,
    pub op: LogOp,
}

impl LogEntry {
    /// Decode a full entry (length prefix through checksum).
    ///
    /// The checksum must already have been verified by the caller.
    fn decode(offset: u64, data: &[u8]) -> DirectoryResult<Self> {
        let corrupt = |reason: String| DirectoryError::Corruption { offset, reason };

        let entry_type = EntryType::from_u8(data[4])
            .ok_or_else(|| corrupt(format!("unknown entry type {}", data[4])))?;

        let mut seq_buf = [0u8; 8];
        seq_buf.copy_from_slice(&data[5..13]);
        let sequence = u64::from_le_bytes(seq_buf);

        let payload = &data[HEADER_LEN..data.len() - 4];
        let op = match entry_type {
            EntryType::Put => {
                let record: FileRecord = serde_json::from_slice(payload)
                    .map_err(|e| corrupt(format!("undecodable record: {}", e)))?;
                LogOp::Put(record)
            }
            EntryType::Remove => {
                let file_id = String::from_utf8(payload.to_vec())
                    .map_err(|e| corrupt(format!("invalid UTF-8 file id: {}", e)))?;
                LogOp::Remove(file_id)
            }
        };

        Ok(Self { sequence, op })
    }
}

/// Sequential reader used for replay at startup.
pub struct LogReader {
    reader: BufReader<File>,
    offset: u64,
    file_size: u64,
    last_sequence: u64,
}

impl LogReader {
    pub fn open(path: &Path) -> DirectoryResult<Self> {
        let file = File::open(path).map_err(|e| DirectoryError::io(path, e))?;
        let file_size = file
            .metadata()
            .map_err(|e| DirectoryError::io(path, e))?
            .len();

        Ok(Self {
            reader: BufReader::new(file),
            offset: 0,
            file_size,
            last_sequence: 0,
        })
    }

    /// Byte offset of the end of the last successfully read entry.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Reads the next entry.
    ///
    /// Returns `Ok(None)` at a clean end of file, `TornTail` when the final
    /// entry is incomplete or fails its checksum, and `Corruption` for any
    /// damage before the final entry.
    pub fn read_next(&mut self) -> DirectoryResult<Option<LogEntry>> {
        if self.offset >= self.file_size {
            return Ok(None);
        }

        let remaining = self.file_size - self.offset;
        if remaining < 4 {
            return Err(DirectoryError::TornTail {
                offset: self.offset,
            });
        }

        let mut len_buf = [0u8; 4];
        self.reader
            .read_exact(&mut len_buf)
            .map_err(|e| self.read_error(e))?;
        let entry_len = u32::from_le_bytes(len_buf) as usize;

        if !(MIN_ENTRY_LEN..=MAX_ENTRY_LEN).contains(&entry_len) {
            return Err(DirectoryError::Corruption {
                offset: self.offset,
                reason: format!("invalid entry length {}", entry_len),
            });
        }
        if entry_len as u64 > remaining {
            // An interrupted append leaves nothing valid behind it. A damaged
            // length prefix that swallows later entries does.
            let mut rest = vec![0u8; remaining as usize - 4];
            self.reader
                .read_exact(&mut rest)
                .map_err(|e| self.read_error(e))?;
            if frame_follows(&rest, self.last_sequence) {
                return Err(DirectoryError::Corruption {
                    offset: self.offset,
                    reason: format!(
                        "entry length {} runs past a later valid entry",
                        entry_len
                    ),
                });
            }
            return Err(DirectoryError::TornTail {
                offset: self.offset,
            });
        }

        let mut buf = vec![0u8; entry_len];
        buf[..4].copy_from_slice(&len_buf);
        self.reader
            .read_exact(&mut buf[4..])
            .map_err(|e| self.read_error(e))?;

        let checksum_offset = entry_len - 4;
        let mut checksum_buf = [0u8; 4];
        checksum_buf.copy_from_slice(&buf[checksum_offset..]);
        if !verify_checksum(&buf[..checksum_offset], u32::from_le_bytes(checksum_buf)) {
            // A bad checksum on the final entry is indistinguishable from a
            // write interrupted by a crash.
            if entry_len as u64 == remaining {
                return Err(DirectoryError::TornTail {
                    offset: self.offset,
                });
            }
            return Err(DirectoryError::Corruption {
                offset: self.offset,
                reason: "checksum mismatch".to_string(),
            });
        }

        let entry = LogEntry::decode(self.offset, &buf)?;
        if entry.sequence <= self.last_sequence {
            return Err(DirectoryError::Corruption {
                offset: self.offset,
                reason: format!(
                    "sequence {} does not follow {}",
                    entry.sequence, self.last_sequence
                ),
            });
        }

        self.last_sequence = entry.sequence;
        self.offset += entry_len as u64;
        Ok(Some(entry))
    }

    fn read_error(&self, e: io::Error) -> DirectoryError {
        DirectoryError::Corruption {
            offset: self.offset,
            reason: format!("read failed: {}", e),
        }
    }
}

/// Whether a complete, checksummed entry newer than `last_sequence` starts
/// anywhere in `bytes`.
fn frame_follows(bytes: &[u8], last_sequence: u64) -> bool {
    (0..bytes.len()).any(|start| {
        let candidate = &bytes[start..];
        if candidate.len() < MIN_ENTRY_LEN {
            return false;
        }
        let mut len_buf = [0u8; 4];
        len_buf.copy_from_slice(&candidate[..4]);
        let len = u32::from_le_bytes(len_buf) as usize;
        if len < MIN_ENTRY_LEN || len > candidate.len() || EntryType::from_u8(candidate[4]).is_none() {
            return false;
        }
        let mut seq_buf = [0u8; 8];
        seq_buf.copy_from_slice(&candidate[5..13]);
        if u64::from_le_bytes(seq_buf) <= last_sequence {
            return false;
        }
        let mut checksum_buf = [0u8; 4];
        checksum_buf.copy_from_slice(&candidate[len - 4..len]);
        verify_checksum(&candidate[..len - 4], u32::from_le_bytes(checksum_buf))
    })
}

/// Append-only writer with fsync on every append.
pub struct LogWriter {
    path: PathBuf,
    file: File,
    next_sequence: u64,
    len: u64,
    poisoned: bool,
}

impl LogWriter {
    /// Opens (or creates) the log for appending.
    ///
    /// `next_sequence` comes from replay; sequence numbers are never reused.
    pub fn open(path: &Path, next_sequence: u64) -> DirectoryResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| DirectoryError::io(path, e))?;
        let len = file
            .metadata()
            .map_err(|e| DirectoryError::io(path, e))?
            .len();

        Ok(Self {
            path: path.to_path_buf(),
            file,
            next_sequence,
            len,
            poisoned: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Refuse all further appends through this handle.
    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    /// Appends one entry and fsyncs it. Returns the assigned sequence number.
    pub fn append(&mut self, op: &LogOp) -> DirectoryResult<u64> {
        if self.poisoned {
            return Err(DirectoryError::Poisoned);
        }

        let sequence = self.next_sequence;
        let bytes = op.serialize(sequence)?;

        if let Err(source) = self.file.write_all(&bytes) {
            let rolled_back = self.rollback();
            if !rolled_back {
                self.poisoned = true;
            }
            return Err(DirectoryError::AppendFailed {
                sequence,
                rolled_back,
                source,
            });
        }

        // After a failed fsync the page cache state is unknown; never trust
        // this handle again.
        if let Err(source) = self.file.sync_data() {
            self.rollback();
            self.poisoned = true;
            return Err(DirectoryError::FsyncFailed { sequence, source });
        }

        self.len += bytes.len() as u64;
        self.next_sequence += 1;
        Ok(sequence)
    }

    fn rollback(&mut self) -> bool {
        self.file
            .set_len(self.len)
            .and_then(|_| self.file.sync_all())
            .is_ok()
    }

    /// Writes a fresh log holding one PUT per record and atomically swaps it
    /// in place of `path`.
    pub fn write_compacted<'a>(
        path: &Path,
        records: impl IntoIterator<Item = &'a FileRecord>,
    ) -> DirectoryResult<Self> {
        let tmp_path = compaction_path(path);
        let fail = |what: &str, e: io::Error| {
            DirectoryError::CompactionFailed(format!("{} {}: {}", what, tmp_path.display(), e))
        };

        let file = File::create(&tmp_path).map_err(|e| fail("create", e))?;
        let mut out = BufWriter::new(file);
        let mut sequence = 0u64;
        for record in records {
            sequence += 1;
            let bytes = LogOp::Put(record.clone()).serialize(sequence)?;
            out.write_all(&bytes).map_err(|e| fail("write", e))?;
        }
        let file = out
            .into_inner()
            .map_err(|e| fail("flush", e.into_error()))?;
        file.sync_all().map_err(|e| fail("fsync", e))?;
        drop(file);

        fs::rename(&tmp_path, path).map_err(|e| fail("rename", e))?;
        if let Some(parent) = path.parent() {
            sync_dir(parent).map_err(|e| fail("fsync parent of", e))?;
        }

        Self::open(path, sequence + 1)
    }
}

fn compaction_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".compact");
    path.with_file_name(name)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::record::test_records::record;
    use tempfile::TempDir;

    fn read_all(path: &Path) -> DirectoryResult<Vec<LogEntry>> {
        let mut reader = LogReader::open(path)?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.read_next()? {
            entries.push(entry);
        }
        Ok(entries)
    }

    #[test]
    fn test_append_then_replay() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("directory.log");

        let mut writer = LogWriter::open(&path, 1).unwrap();
        assert_eq!(writer.append(&LogOp::Put(record("a", "u1", 0))).unwrap(), 1);
        assert_eq!(writer.append(&LogOp::Remove("a".into())).unwrap(), 2);
        drop(writer);

        let entries = read_all(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].sequence, 1);
        assert!(matches!(&entries[0].op, LogOp::Put(r) if r.file_id == "a"));
        assert_eq!(entries[1].op, LogOp::Remove("a".into()));
    }

    #[test]
    fn test_truncated_final_entry_is_torn_tail() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("directory.log");

        let mut writer = LogWriter::open(&path, 1).unwrap();
        writer.append(&LogOp::Put(record("a", "u1", 0))).unwrap();
        writer.append(&LogOp::Put(record("b", "u1", 1))).unwrap();
        drop(writer);

        let full_len = fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(full_len - 5).unwrap();
        drop(file);

        let mut reader = LogReader::open(&path).unwrap();
        assert!(reader.read_next().unwrap().is_some());
        let valid = reader.offset();
        match reader.read_next() {
            Err(DirectoryError::TornTail { offset }) => assert_eq!(offset, valid),
            other => panic!("expected torn tail, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_flipped_byte_mid_log_is_corruption() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("directory.log");

        let mut writer = LogWriter::open(&path, 1).unwrap();
        writer.append(&LogOp::Put(record("a", "u1", 0))).unwrap();
        writer.append(&LogOp::Put(record("b", "u1", 1))).unwrap();
        drop(writer);

        let mut bytes = fs::read(&path).unwrap();
        bytes[20] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let result = read_all(&path);
        assert!(matches!(result, Err(DirectoryError::Corruption { offset: 0, .. })));
    }

    #[test]
    fn test_damaged_length_mid_log_is_corruption() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("directory.log");

        let mut writer = LogWriter::open(&path, 1).unwrap();
        for id in ["a", "b", "c"] {
            writer.append(&LogOp::Put(record(id, "u1", 0))).unwrap();
        }
        drop(writer);

        // Point the first entry's length past the end of the file.
        let mut bytes = fs::read(&path).unwrap();
        let claimed = (bytes.len() + 100) as u32;
        bytes[..4].copy_from_slice(&claimed.to_le_bytes());
        fs::write(&path, &bytes).unwrap();

        let result = read_all(&path);
        assert!(matches!(result, Err(DirectoryError::Corruption { offset: 0, .. })));
    }

    #[test]
    fn test_oversized_entry_is_refused() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("directory.log");

        let mut writer = LogWriter::open(&path, 1).unwrap();
        writer.append(&LogOp::Put(record("a", "u1", 0))).unwrap();

        let mut huge = record("b", "u1", 1);
        huge.original_name = "x".repeat(MAX_ENTRY_LEN);
        assert!(matches!(
            writer.append(&LogOp::Put(huge)),
            Err(DirectoryError::EntryTooLarge { .. })
        ));
        assert!(!writer.is_poisoned());
        assert_eq!(writer.append(&LogOp::Remove("a".into())).unwrap(), 2);
        drop(writer);

        assert_eq!(read_all(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_compaction_rewrites_live_records() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("directory.log");

        let mut writer = LogWriter::open(&path, 1).unwrap();
        for id in ["a", "b", "c"] {
            writer.append(&LogOp::Put(record(id, "u1", 0))).unwrap();
        }
        writer.append(&LogOp::Remove("b".into())).unwrap();
        drop(writer);

        let live = vec![record("a", "u1", 0), record("c", "u1", 0)];
        let writer = LogWriter::write_compacted(&path, live.iter()).unwrap();
        assert_eq!(writer.next_sequence(), 3);
        assert!(!compaction_path(&path).exists());

        let entries = read_all(&path).unwrap();
        let ids: Vec<_> = entries
            .iter()
            .map(|e| match &e.op {
                LogOp::Put(r) => r.file_id.clone(),
                LogOp::Remove(id) => panic!("unexpected remove of {}", id),
            })
            .collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_entry_type_roundtrip() {
        assert_eq!(EntryType::from_u8(1), Some(EntryType::Put));
        assert_eq!(EntryType::from_u8(2), Some(EntryType::Remove));
        assert_eq!(EntryType::from_u8(9), None);
    }
}
