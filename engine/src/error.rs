//! Error types for the transfer engine.
//!
//! There are two layers:
//! - `EngineError`: run-level errors that prevent a transfer from starting.
//!   These are returned synchronously from `create_run` / `spawn_transfer`.
//! - `FileError`: failures scoped to one source entry or one file. They are
//!   recorded on the task (or in the run's entry failures) and never stop
//!   the run.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that stop a run before (or instead of) executing it.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No source entries were supplied
    #[error("No sources selected")]
    NoSources,

    /// Destination root does not exist or cannot be inspected
    #[error("Destination directory unavailable: {}", path.display())]
    DestinationUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Destination root exists but is not a directory
    #[error("Destination is not a directory: {}", path.display())]
    DestinationNotDirectory { path: PathBuf },

    /// The run is not in the state the operation requires
    #[error("Invalid run state: {reason}")]
    InvalidState { reason: String },

    /// The worker thread could not be started
    #[error("Failed to start transfer worker: {source}")]
    WorkerSpawn {
        #[source]
        source: io::Error,
    },

    /// The worker thread panicked before producing a result
    #[error("Transfer worker panicked")]
    WorkerPanicked,
}

impl EngineError {
    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<u32> {
        match self {
            Self::DestinationUnavailable { source, .. } | Self::WorkerSpawn { source } => {
                source.raw_os_error().map(|e| e as u32)
            }
            _ => None,
        }
    }
}

/// A recoverable failure attached to a single source entry or file.
#[derive(Debug, Error)]
pub enum FileError {
    /// A source entry (or a directory below it) could not be listed or read
    #[error("Cannot access {}: {source}", path.display())]
    EntryAccess {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Parent directories of the destination could not be created
    #[error("Failed to create directory {}: {source}", path.display())]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to open or read the source file
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to create or write the destination file
    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Destination resolves to the source file itself
    #[error("Destination is the source file itself: {}", path.display())]
    SameFile { path: PathBuf },

    /// A checksum could not be computed
    #[error("Failed to checksum {}: {source}", path.display())]
    Checksum {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Source and destination digests differ after copying
    #[error("Checksum verification failed for {}: expected {expected}, got {actual}", path.display())]
    VerificationMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}

impl FileError {
    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<u32> {
        match self {
            Self::EntryAccess { source, .. }
            | Self::DirectoryCreation { source, .. }
            | Self::Read { source, .. }
            | Self::Write { source, .. }
            | Self::Checksum { source, .. } => source.raw_os_error().map(|e| e as u32),
            Self::SameFile { .. } | Self::VerificationMismatch { .. } => None,
        }
    }

    /// Short machine-readable category, used in serialized summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EntryAccess { .. } => "entry_access",
            Self::DirectoryCreation { .. } => "directory_creation",
            Self::Read { .. } => "read",
            Self::Write { .. } => "write",
            Self::SameFile { .. } => "same_file",
            Self::Checksum { .. } => "checksum",
            Self::VerificationMismatch { .. } => "verification_mismatch",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_os_error_passthrough() {
        let err = FileError::Read {
            path: PathBuf::from("a.txt"),
            source: io::Error::from_raw_os_error(2),
        };
        assert_eq!(err.raw_os_error(), Some(2));
        assert_eq!(err.kind(), "read");
    }

    #[test]
    fn test_mismatch_message_names_both_digests() {
        let err = FileError::VerificationMismatch {
            path: PathBuf::from("a.txt"),
            expected: "abc".to_string(),
            actual: "def".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("abc"));
        assert!(msg.contains("def"));
        assert_eq!(err.raw_os_error(), None);
    }

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::DestinationNotDirectory {
            path: PathBuf::from("/out"),
        };
        assert_eq!(err.to_string(), "Destination is not a directory: /out");
        assert_eq!(EngineError::NoSources.to_string(), "No sources selected");
    }
}
