//! # Ferry Engine - File Transfer Library
//!
//! A headless engine that copies a selection of files and directories into
//! an existing destination directory. Designed as the foundation for any
//! control surface (CLI, GUI, automation).
//!
//! ## Overview
//!
//! - Multiple sources per run, each a file or a directory tree
//! - Flat or structure-preserving destination layout
//! - Rename-on-collision (`name_1.ext`) or overwrite
//! - Chunked copy with per-chunk progress and cooperative cancellation
//! - Optional checksum verification (MD5 by default)
//! - Per-file error isolation: one bad file never stops the run
//!
//! ## Basic Usage
//!
//! ```no_run
//! use engine::{spawn_transfer, CancellationToken, SourceEntry, TransferOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let handle = spawn_transfer(
//!     vec![SourceEntry::detect("/home/me/docs"), SourceEntry::detect("/home/me/todo.txt")],
//!     "/media/usb",
//!     TransferOptions::default(),
//!     CancellationToken::new(),
//! )?;
//!
//! for event in handle.events() {
//!     println!("{:?}", event);
//! }
//!
//! let result = handle.wait()?;
//! println!("{}: {}/{} files", result.status, result.files_copied, result.files_total);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core data structures (TransferRun, FileTask, options, results)
//! - **error**: Run-level and file-level error types
//! - **fs_ops**: Enumeration, destination resolution, chunked copy
//! - **checksums**: Checksum computation and verification
//! - **cancel**: Cancellation token
//! - **progress**: Progress callback trait, events and snapshots
//! - **job**: Run orchestration (create, plan, run)
//! - **worker**: Background execution with an event stream

pub mod cancel;
pub mod checksums;
pub mod error;
pub mod fs_ops;
pub mod job;
pub mod model;
pub mod progress;
pub mod worker;

// Re-export main types and functions
pub use cancel::CancellationToken;
pub use checksums::{compute_file_checksum, verify_task, ChecksumAlgorithm, ChecksumValue};
pub use error::{EngineError, FileError};
pub use job::{create_run, plan_run, run_transfer};
pub use model::{
    EntryFailure, FileFailure, FileState, FileTask, RunState, SourceEntry, SourceKind,
    TransferOptions, TransferResult, TransferRun, TransferStatus,
};
pub use progress::{ChannelProgress, ProgressCallback, ProgressEvent, ProgressSnapshot};
pub use worker::{spawn_transfer, TransferHandle};
