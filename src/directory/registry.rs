//! The directory: file id → record, indexed by owner.
//!
//! Writers are serialized by one mutex around the log writer. A mutation is
//! appended and fsynced before the in-memory index changes, and the index
//! write lock is only taken after the log accepted the entry, so readers
//! never observe an entry that is not durable.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use tracing::{error, info, warn};

use super::errors::{DirectoryError, DirectoryResult};
use super::log::{LogOp, LogReader, LogWriter};
use super::record::FileRecord;

const LOG_FILE_NAME: &str = "directory.log";

/// Directory tuning
#[derive(Debug, Clone)]
pub struct DirectoryOptions {
    /// Dead log entries tolerated before automatic compaction, provided they
    /// also outnumber the live records.
    pub compaction_min_garbage: usize,
}

impl Default for DirectoryOptions {
    fn default() -> Self {
        Self {
            compaction_min_garbage: 256,
        }
    }
}

#[derive(Debug, Default)]
struct Index {
    records: HashMap<String, FileRecord>,
    by_owner: HashMap<String, BTreeSet<String>>,
}

impl Index {
    fn insert(&mut self, record: FileRecord) -> Option<FileRecord> {
        let previous = self.remove(&record.file_id);
        self.by_owner
            .entry(record.owner_id.clone())
            .or_default()
            .insert(record.file_id.clone());
        self.records.insert(record.file_id.clone(), record);
        previous
    }

    fn remove(&mut self, file_id: &str) -> Option<FileRecord> {
        let record = self.records.remove(file_id)?;
        self.unlink_owner(&record.owner_id, file_id);
        Some(record)
    }

    fn unlink_owner(&mut self, owner_id: &str, file_id: &str) {
        if let Some(ids) = self.by_owner.get_mut(owner_id) {
            ids.remove(file_id);
            if ids.is_empty() {
                self.by_owner.remove(owner_id);
            }
        }
    }
}

struct Writer {
    log: LogWriter,
    /// Log entries that no longer describe a live record.
    garbage: usize,
}

/// Durable registry of uploaded files.
pub struct Directory {
    path: PathBuf,
    options: DirectoryOptions,
    index: RwLock<Index>,
    writer: Mutex<Writer>,
}

impl std::fmt::Debug for Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory")
            .field("path", &self.path)
            .field("records", &self.len())
            .finish()
    }
}

impl Directory {
    /// Opens the directory stored under `data_dir`, replaying the log.
    ///
    /// A missing log starts empty. A torn final entry is cut off. A log that
    /// is corrupt before its final entry is moved aside and the directory
    /// starts empty; only failing to create or open a fresh log is an error.
    pub fn open(data_dir: &Path, options: DirectoryOptions) -> DirectoryResult<Self> {
        fs::create_dir_all(data_dir).map_err(|e| DirectoryError::io(data_dir, e))?;
        let path = data_dir.join(LOG_FILE_NAME);

        let (index, next_sequence, garbage) = if path.exists() {
            Self::replay(&path)
        } else {
            (Index::default(), 1, 0)
        };

        let log = LogWriter::open(&path, next_sequence)?;
        let directory = Self {
            path,
            options,
            index: RwLock::new(index),
            writer: Mutex::new(Writer { log, garbage }),
        };

        info!(
            path = %directory.path.display(),
            records = directory.len(),
            garbage,
            "directory loaded"
        );

        if garbage > 0 {
            let mut writer = directory.lock_writer();
            directory.compact_locked(&mut writer)?;
            drop(writer);
        }

        Ok(directory)
    }

    fn replay(path: &Path) -> (Index, u64, usize) {
        let mut reader = match LogReader::open(path) {
            Ok(reader) => reader,
            Err(e) => {
                error!(error = %e, "directory log unreadable, starting empty");
                quarantine(path);
                return (Index::default(), 1, 0);
            }
        };

        let mut index = Index::default();
        let mut garbage = 0usize;
        loop {
            match reader.read_next() {
                Ok(Some(entry)) => match entry.op {
                    LogOp::Put(record) => {
                        if index.insert(record).is_some() {
                            garbage += 1;
                        }
                    }
                    LogOp::Remove(file_id) => {
                        garbage += if index.remove(&file_id).is_some() { 2 } else { 1 };
                    }
                },
                Ok(None) => break,
                Err(DirectoryError::TornTail { offset }) => {
                    warn!(offset, "directory log has a torn final entry, truncating");
                    if let Err(e) = truncate(path, offset) {
                        error!(error = %e, "failed to truncate torn directory log, starting empty");
                        quarantine(path);
                        return (Index::default(), 1, 0);
                    }
                    break;
                }
                Err(e) => {
                    error!(error = %e, "directory log corrupt, starting empty");
                    quarantine(path);
                    return (Index::default(), 1, 0);
                }
            }
        }

        (index, reader.last_sequence() + 1, garbage)
    }

    /// Path of the backing log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably inserts a new record.
    pub fn put(&self, record: FileRecord) -> DirectoryResult<()> {
        let mut writer = self.lock_writer();
        if self.read_index().records.contains_key(&record.file_id) {
            return Err(DirectoryError::Duplicate(record.file_id));
        }

        writer.log.append(&LogOp::Put(record.clone()))?;
        self.write_index().insert(record);
        Ok(())
    }

    /// Durably removes a record, returning it.
    pub fn remove(&self, file_id: &str) -> DirectoryResult<FileRecord> {
        let mut writer = self.lock_writer();
        if !self.read_index().records.contains_key(file_id) {
            return Err(DirectoryError::NotFound(file_id.to_string()));
        }

        writer.log.append(&LogOp::Remove(file_id.to_string()))?;
        let record = self
            .write_index()
            .remove(file_id)
            .ok_or_else(|| DirectoryError::NotFound(file_id.to_string()))?;

        // The PUT and this REMOVE are both dead now.
        writer.garbage += 2;
        if self.should_compact(&writer) {
            // The removal is already durable; later writes fail with
            // `Poisoned` if compaction left the log unusable.
            if let Err(e) = self.compact_locked(&mut writer) {
                error!(error = %e, "directory compaction failed");
            }
        }

        Ok(record)
    }

    /// Looks up a record by id regardless of owner.
    pub fn get(&self, file_id: &str) -> Option<FileRecord> {
        self.read_index().records.get(file_id).cloned()
    }

    /// Looks up a record only if `owner_id` owns it.
    pub fn get_owned(&self, owner_id: &str, file_id: &str) -> Option<FileRecord> {
        self.read_index()
            .records
            .get(file_id)
            .filter(|record| record.is_owned_by(owner_id))
            .cloned()
    }

    /// All records owned by `owner_id`, oldest first.
    pub fn list_by_owner(&self, owner_id: &str) -> Vec<FileRecord> {
        let index = self.read_index();
        let mut records: Vec<FileRecord> = index
            .by_owner
            .get(owner_id)
            .into_iter()
            .flatten()
            .filter_map(|id| index.records.get(id).cloned())
            .collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.file_id.cmp(&b.file_id))
        });
        records
    }

    /// Snapshot of every record.
    pub fn all(&self) -> Vec<FileRecord> {
        let mut records: Vec<FileRecord> = self.read_index().records.values().cloned().collect();
        records.sort_by(|a, b| a.file_id.cmp(&b.file_id));
        records
    }

    pub fn len(&self) -> usize {
        self.read_index().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewrites the log with only live records.
    pub fn compact(&self) -> DirectoryResult<()> {
        let mut writer = self.lock_writer();
        self.compact_locked(&mut writer)
    }

    fn should_compact(&self, writer: &Writer) -> bool {
        writer.garbage >= self.options.compaction_min_garbage && writer.garbage > self.len()
    }

    fn compact_locked(&self, writer: &mut Writer) -> DirectoryResult<()> {
        if writer.log.is_poisoned() {
            return Err(DirectoryError::Poisoned);
        }
        let records = self.all();
        let reclaimed = writer.garbage;
        match LogWriter::write_compacted(&self.path, records.iter()) {
            Ok(log) => writer.log = log,
            Err(e) => {
                // The rename may or may not have happened, so the current
                // handle can point at an unlinked file.
                writer.log.poison();
                return Err(e);
            }
        }
        writer.garbage = 0;
        info!(live = records.len(), reclaimed, "directory log compacted");
        Ok(())
    }

    fn lock_writer(&self) -> MutexGuard<'_, Writer> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_index(&self) -> RwLockReadGuard<'_, Index> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, Index> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn truncate(path: &Path, len: u64) -> std::io::Result<()> {
    let file = fs::OpenOptions::new().write(true).open(path)?;
    file.set_len(len)?;
    file.sync_all()
}

fn quarantine(path: &Path) {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".corrupt-{}", Utc::now().timestamp()));
    let target = path.with_file_name(name);
    match fs::rename(path, &target) {
        Ok(()) => warn!(moved_to = %target.display(), "quarantined directory log"),
        Err(e) => error!(error = %e, "failed to quarantine directory log"),
    }
}
