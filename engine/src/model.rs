//! Core data model for transfer runs.
//!
//! This module defines the main data structures for representing a transfer:
//! - SourceEntry: a file or directory the caller selected
//! - TransferOptions: flags controlling one run
//! - FileTask: a single file within a run
//! - TransferRun: the aggregate state mutated by the worker
//! - TransferResult: the summary handed back to the control surface

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::checksums::{ChecksumAlgorithm, ChecksumValue};
use crate::error::FileError;

/// Default chunk size for the copy loop (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Whether a source entry is a single file or a directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    File,
    Directory,
}

/// A top-level path selected by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub path: PathBuf,
    pub kind: SourceKind,
}

impl SourceEntry {
    pub fn file<P: Into<PathBuf>>(path: P) -> Self {
        SourceEntry {
            path: path.into(),
            kind: SourceKind::File,
        }
    }

    pub fn directory<P: Into<PathBuf>>(path: P) -> Self {
        SourceEntry {
            path: path.into(),
            kind: SourceKind::Directory,
        }
    }

    /// Classify a path by asking the filesystem (symlinks are followed).
    ///
    /// Paths that cannot be inspected are tagged as files; the enumerator
    /// then reports them as an entry failure.
    pub fn detect<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let kind = match std::fs::metadata(&path) {
            Ok(metadata) if metadata.is_dir() => SourceKind::Directory,
            _ => SourceKind::File,
        };
        SourceEntry { path, kind }
    }
}

/// Flags for one transfer run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOptions {
    /// Hash source and destination after each copy and compare
    pub verify_checksum: bool,

    /// Recreate the directory layout of directory sources under the destination
    pub preserve_structure: bool,

    /// Replace existing destination files instead of renaming the new copy
    pub overwrite_existing: bool,

    /// Digest used when `verify_checksum` is set
    pub checksum_algorithm: ChecksumAlgorithm,

    /// Copy the source modification time onto the destination
    pub preserve_mtime: bool,

    /// Bytes read and written per step of the copy loop
    pub chunk_size: usize,
}

impl Default for TransferOptions {
    fn default() -> Self {
        TransferOptions {
            verify_checksum: true,
            preserve_structure: true,
            overwrite_existing: false,
            checksum_algorithm: ChecksumAlgorithm::Md5,
            preserve_mtime: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// The state of a single file task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    /// Not yet processed
    Pending,
    /// Currently transferring
    Copying,
    /// Copied (and verified, if requested)
    Done,
    /// Copy or verification failed
    Failed,
    /// Interrupted by cancellation; the destination may be partial
    Cancelled,
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileState::Pending => write!(f, "Pending"),
            FileState::Copying => write!(f, "Copying"),
            FileState::Done => write!(f, "Done"),
            FileState::Failed => write!(f, "Failed"),
            FileState::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// A single file to copy, derived from a SourceEntry during planning.
#[derive(Debug)]
pub struct FileTask {
    /// Full source path
    pub source_path: PathBuf,

    /// Resolved destination path, before collision renaming
    pub destination_path: PathBuf,

    /// Size measured during enumeration
    pub size_bytes: u64,

    /// Index of the SourceEntry that produced this file
    pub origin: usize,

    /// Path relative to the originating directory (the file name for file sources)
    pub relative_path: PathBuf,

    /// Current state of this file
    pub state: FileState,

    /// Bytes written for this file so far
    pub bytes_copied: u64,

    /// Path actually written, which differs from `destination_path` after a rename
    pub final_destination: Option<PathBuf>,

    /// Failure recorded for this file
    pub error: Option<FileError>,

    /// Checksum of the source (computed during verification)
    pub source_checksum: Option<ChecksumValue>,

    /// Checksum of the destination (computed during verification)
    pub dest_checksum: Option<ChecksumValue>,
}

impl FileTask {
    pub fn new(
        source_path: PathBuf,
        destination_path: PathBuf,
        size_bytes: u64,
        origin: usize,
        relative_path: PathBuf,
    ) -> Self {
        FileTask {
            source_path,
            destination_path,
            size_bytes,
            origin,
            relative_path,
            state: FileState::Pending,
            bytes_copied: 0,
            final_destination: None,
            error: None,
            source_checksum: None,
            dest_checksum: None,
        }
    }

    /// File name used in progress reports.
    pub fn display_name(&self) -> String {
        file_display_name(&self.source_path)
    }

    /// Destination written, falling back to the resolved path.
    pub fn written_path(&self) -> &Path {
        self.final_destination
            .as_deref()
            .unwrap_or(&self.destination_path)
    }
}

pub(crate) fn file_display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// A source entry (or a directory below one) that yielded no tasks.
#[derive(Debug)]
pub struct EntryFailure {
    /// Index of the SourceEntry being enumerated
    pub origin: usize,
    /// Path that could not be accessed
    pub path: PathBuf,
    pub error: FileError,
}

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Created, not yet started
    Pending,
    /// Currently executing
    Running,
    /// Loop exited (completed or cancelled)
    Finished,
}

/// Aggregate state for one transfer, mutated only by the worker executing it.
#[derive(Debug)]
pub struct TransferRun {
    /// Unique identifier for this run
    pub id: Uuid,

    /// Sources as submitted by the caller
    pub sources: Vec<SourceEntry>,

    /// Existing destination directory
    pub destination_root: PathBuf,

    pub options: TransferOptions,

    /// Files to copy, in enumeration order
    pub tasks: Vec<FileTask>,

    /// Entries that could not be enumerated
    pub entry_failures: Vec<EntryFailure>,

    /// Sum of all task sizes
    pub total_bytes: u64,

    /// Sum of sizes of successfully copied files
    pub transferred_bytes: u64,

    /// Number of successfully copied files
    pub transferred_files: usize,

    /// Set once cancellation has been observed
    pub cancelled: bool,

    pub state: RunState,

    /// Whether `plan_run` has populated the tasks
    pub planned: bool,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TransferRun {
    /// Overall completion, counting `in_flight` bytes of the current file.
    ///
    /// In-flight bytes are clamped so the figure never passes the planned
    /// total, even if a file grew after enumeration. An empty run is 100%.
    pub fn overall_percent(&self, in_flight: u64) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        let done = self
            .transferred_bytes
            .saturating_add(in_flight)
            .min(self.total_bytes);
        done as f64 / self.total_bytes as f64 * 100.0
    }

    /// Number of tasks in a terminal failed state.
    pub fn failed_files(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.state == FileState::Failed)
            .count()
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Every enumerated file was copied (and verified, if requested)
    Completed,
    /// Stopped by the cancellation token
    Cancelled,
    /// Ran to the end, but at least one file or entry failed
    CompletedWithErrors,
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStatus::Completed => write!(f, "completed"),
            TransferStatus::Cancelled => write!(f, "cancelled"),
            TransferStatus::CompletedWithErrors => write!(f, "completed_with_errors"),
        }
    }
}

/// Serializable record of a failed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
    pub kind: String,
    pub message: String,
    pub os_error: Option<u32>,
}

/// Serializable record of a source entry that could not be enumerated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryFailureSummary {
    pub path: PathBuf,
    pub kind: String,
    pub message: String,
    pub os_error: Option<u32>,
}

/// Final summary of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferResult {
    pub run_id: Uuid,
    pub status: TransferStatus,
    pub files_copied: usize,
    pub files_total: usize,
    pub bytes_copied: u64,
    pub total_bytes: u64,
    pub failures: Vec<FileFailure>,
    pub entry_failures: Vec<EntryFailureSummary>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_ms: u64,
}

impl TransferResult {
    /// Build the summary from a finished run.
    pub fn from_run(run: &TransferRun) -> Self {
        let status = if run.cancelled {
            TransferStatus::Cancelled
        } else if run.failed_files() > 0 || !run.entry_failures.is_empty() {
            TransferStatus::CompletedWithErrors
        } else {
            TransferStatus::Completed
        };

        let failures = run
            .tasks
            .iter()
            .filter(|t| t.state == FileState::Failed)
            .filter_map(|t| {
                t.error.as_ref().map(|e| FileFailure {
                    source_path: t.source_path.clone(),
                    destination_path: t.written_path().to_path_buf(),
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                    os_error: e.raw_os_error(),
                })
            })
            .collect();

        let entry_failures = run
            .entry_failures
            .iter()
            .map(|f| EntryFailureSummary {
                path: f.path.clone(),
                kind: f.error.kind().to_string(),
                message: f.error.to_string(),
                os_error: f.error.raw_os_error(),
            })
            .collect();

        let elapsed_ms = match (run.started_at, run.finished_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as u64,
            _ => 0,
        };

        TransferResult {
            run_id: run.id,
            status,
            files_copied: run.transferred_files,
            files_total: run.tasks.len(),
            bytes_copied: run.transferred_bytes,
            total_bytes: run.total_bytes,
            failures,
            entry_failures,
            started_at: run.started_at,
            finished_at: run.finished_at,
            elapsed_ms,
        }
    }
}
