//! Run orchestration module.
//!
//! This module provides the run lifecycle functions:
//! - Creating a run from sources, a destination and options (validation)
//! - Planning a run (enumerating sources, resolving destinations)
//! - Executing a run (the sequential chunked-copy loop)

use std::path::Path;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::checksums;
use crate::error::{EngineError, FileError};
use crate::fs_ops;
use crate::model::{
    FileState, FileTask, RunState, SourceEntry, TransferOptions, TransferResult, TransferRun,
};
use crate::progress::ProgressCallback;

/// Create a new transfer run.
///
/// Rejects an empty source list and a destination root that is missing or
/// not a directory. The destination root is never created by the engine;
/// only sub-directories below it are.
///
/// # Errors
/// `NoSources`, `DestinationUnavailable` or `DestinationNotDirectory`.
pub fn create_run<P: AsRef<Path>>(
    sources: Vec<SourceEntry>,
    destination: P,
    options: TransferOptions,
) -> Result<TransferRun, EngineError> {
    let destination = destination.as_ref();

    if sources.is_empty() {
        return Err(EngineError::NoSources);
    }

    match std::fs::metadata(destination) {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => {
            return Err(EngineError::DestinationNotDirectory {
                path: destination.to_path_buf(),
            })
        }
        Err(e) => {
            return Err(EngineError::DestinationUnavailable {
                path: destination.to_path_buf(),
                source: e,
            })
        }
    }

    Ok(TransferRun {
        id: Uuid::new_v4(),
        sources,
        destination_root: destination.to_path_buf(),
        options,
        tasks: Vec::new(),
        entry_failures: Vec::new(),
        total_bytes: 0,
        transferred_bytes: 0,
        transferred_files: 0,
        cancelled: false,
        state: RunState::Pending,
        planned: false,
        created_at: Utc::now(),
        started_at: None,
        finished_at: None,
    })
}

/// Plan a run by enumerating its sources.
///
/// Populates `run.tasks` (one per regular file, each tied to the source entry
/// that produced it), `run.entry_failures` and `run.total_bytes`.
///
/// # Errors
/// `InvalidState` if the run was already planned or started.
pub fn plan_run(run: &mut TransferRun) -> Result<(), EngineError> {
    if run.state != RunState::Pending || run.planned {
        return Err(EngineError::InvalidState {
            reason: format!(
                "run must be pending and unplanned to plan; state: {:?}, planned: {}",
                run.state, run.planned
            ),
        });
    }

    let enumeration = fs_ops::enumerate(&run.sources);

    run.tasks = enumeration
        .files
        .into_iter()
        .map(|file| {
            let source = &run.sources[file.origin];
            let destination = fs_ops::resolve_destination(
                &run.destination_root,
                source,
                &file,
                run.options.preserve_structure,
            );
            FileTask::new(
                file.path,
                destination,
                file.size_bytes,
                file.origin,
                file.relative_path,
            )
        })
        .collect();
    run.entry_failures = enumeration.failures;
    run.total_bytes = run.tasks.iter().map(|t| t.size_bytes).sum();
    run.planned = true;

    info!(
        run_id = %run.id,
        files = run.tasks.len(),
        total_bytes = run.total_bytes,
        skipped_entries = run.entry_failures.len(),
        "planned transfer"
    );

    Ok(())
}

/// Execute a planned run.
///
/// Files are copied one at a time. Per-file failures are recorded on the
/// task and the loop moves on. Cancellation is polled before each file and
/// after each chunk; once observed, no further file is started.
///
/// # Errors
/// `InvalidState` if the run is not planned or has already run.
pub fn run_transfer(
    run: &mut TransferRun,
    progress: Option<&dyn ProgressCallback>,
    cancel: &CancellationToken,
) -> Result<TransferResult, EngineError> {
    if run.state != RunState::Pending || !run.planned {
        return Err(EngineError::InvalidState {
            reason: format!(
                "run must be planned and pending to execute; state: {:?}, planned: {}",
                run.state, run.planned
            ),
        });
    }

    run.state = RunState::Running;
    run.started_at = Some(Utc::now());
    info!(run_id = %run.id, destination = %run.destination_root.display(), "transfer started");

    if let Some(callback) = progress {
        callback.on_run_started(run);
        for failure in &run.entry_failures {
            callback.on_entry_skipped(run, failure);
        }
    }

    let overwrite = run.options.overwrite_existing;
    let chunk_size = run.options.chunk_size;
    let verify = run.options.verify_checksum;
    let algorithm = run.options.checksum_algorithm;
    let preserve_mtime = run.options.preserve_mtime;

    for index in 0..run.tasks.len() {
        if cancel.is_cancelled() {
            run.cancelled = true;
            break;
        }

        run.tasks[index].state = FileState::Copying;
        if let Some(callback) = progress {
            callback.on_file_started(run, index, &run.tasks[index]);
        }

        let src = run.tasks[index].source_path.clone();
        let dst = run.tasks[index].destination_path.clone();

        let copied = fs_ops::copy_file_chunked(&src, &dst, overwrite, chunk_size, cancel, |bytes| {
            run.tasks[index].bytes_copied = bytes;
            if let Some(callback) = progress {
                callback.on_chunk_copied(run, index, bytes);
            }
        });

        match copied {
            Ok(outcome) if outcome.cancelled => {
                let task = &mut run.tasks[index];
                task.state = FileState::Cancelled;
                task.bytes_copied = outcome.bytes_copied;
                task.final_destination = Some(outcome.destination);
                run.cancelled = true;
                warn!(
                    path = %task.written_path().display(),
                    bytes = task.bytes_copied,
                    "transfer cancelled mid-file; partial destination left in place"
                );
            }
            Ok(outcome) => {
                let task = &mut run.tasks[index];
                task.bytes_copied = outcome.bytes_copied;
                task.final_destination = Some(outcome.destination);

                let verified = if verify {
                    verify_copy(task, algorithm)
                } else {
                    Ok(())
                };

                match verified {
                    Ok(()) => {
                        if preserve_mtime {
                            if let Some(mtime) = outcome.source_mtime {
                                fs_ops::apply_mtime(task.written_path(), mtime);
                            }
                        }
                        task.state = FileState::Done;
                        let size = task.size_bytes;
                        run.transferred_files += 1;
                        run.transferred_bytes = run
                            .transferred_bytes
                            .saturating_add(size)
                            .min(run.total_bytes);
                    }
                    Err(e) => {
                        debug!(path = %task.source_path.display(), error = %e, "verification failed");
                        task.state = FileState::Failed;
                        task.error = Some(e);
                    }
                }
            }
            Err(e) => {
                let task = &mut run.tasks[index];
                debug!(path = %task.source_path.display(), error = %e, "file copy failed");
                task.state = FileState::Failed;
                task.error = Some(e);
            }
        }

        debug!(
            index,
            path = %run.tasks[index].source_path.display(),
            state = %run.tasks[index].state,
            "file finished"
        );
        if let Some(callback) = progress {
            callback.on_file_finished(run, index, &run.tasks[index]);
        }

        if run.cancelled {
            break;
        }
    }

    run.state = RunState::Finished;
    run.finished_at = Some(Utc::now());

    let result = TransferResult::from_run(run);
    info!(
        run_id = %run.id,
        status = %result.status,
        files_copied = result.files_copied,
        files_total = result.files_total,
        bytes_copied = result.bytes_copied,
        "transfer finished"
    );

    if let Some(callback) = progress {
        callback.on_run_finished(run, &result);
    }

    Ok(result)
}

/// Hash source and destination; a mismatch becomes a `VerificationMismatch`.
fn verify_copy(
    task: &mut FileTask,
    algorithm: checksums::ChecksumAlgorithm,
) -> Result<(), FileError> {
    if checksums::verify_task(task, algorithm)? {
        return Ok(());
    }

    let digest = |value: &Option<checksums::ChecksumValue>| {
        value
            .as_ref()
            .map(|v| v.to_string_with_algo())
            .unwrap_or_default()
    };
    Err(FileError::VerificationMismatch {
        path: task.written_path().to_path_buf(),
        expected: digest(&task.source_checksum),
        actual: digest(&task.dest_checksum),
    })
}
