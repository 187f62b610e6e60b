//! Directory subsystem
//!
//! The durable index mapping a file id to its owner and hosting backend. It
//! is the single source of truth for ownership.
//!
//! # Durability
//!
//! - Every mutation is appended to `directory.log` and fsynced before the
//!   caller sees success.
//! - Mutations are serialized through one writer; reads share a lock over the
//!   in-memory index.
//! - Startup replays the whole log. Compaction rewrites it with live records
//!   only and swaps it in with an atomic rename.

mod checksum;
mod errors;
mod log;
mod record;
mod registry;

pub use errors::{DirectoryError, DirectoryResult, Severity};
pub use log::{EntryType, LogEntry, LogOp, LogReader, LogWriter};
pub use record::{BackendLocation, FileRecord};
pub use registry::{Directory, DirectoryOptions};

#[cfg(test)]
pub(crate) use record::test_records;
