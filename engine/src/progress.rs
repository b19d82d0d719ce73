//! Progress reporting.
//!
//! The engine reports through the `ProgressCallback` trait, which keeps it
//! decoupled from any UI technology. `ChannelProgress` is the standard
//! implementation: it turns every callback into a `ProgressEvent` and sends
//! it over a channel, so the control surface never touches engine state.
//! `ProgressSnapshot` folds those events into the latest known state.

use std::path::PathBuf;

use crossbeam_channel::Sender;
use uuid::Uuid;

use crate::model::{EntryFailure, FileState, FileTask, TransferResult, TransferRun, TransferStatus};

/// Trait for receiving progress updates from a transfer run.
///
/// All methods are called synchronously on the worker thread.
pub trait ProgressCallback: Send {
    /// Called once after planning, before the first file.
    fn on_run_started(&self, run: &TransferRun);

    /// Called for each source entry (or sub-directory) that could not be enumerated.
    fn on_entry_skipped(&self, run: &TransferRun, failure: &EntryFailure);

    /// Called when a file is about to be copied.
    fn on_file_started(&self, run: &TransferRun, file_index: usize, file: &FileTask);

    /// Called after every chunk written for the current file.
    ///
    /// `bytes_this_file` is the number of bytes written so far for this file.
    fn on_chunk_copied(&self, run: &TransferRun, file_index: usize, bytes_this_file: u64);

    /// Called when a file reaches a terminal state.
    fn on_file_finished(&self, run: &TransferRun, file_index: usize, file: &FileTask);

    /// Called once when the loop exits (completed or cancelled).
    fn on_run_finished(&self, run: &TransferRun, result: &TransferResult);
}

/// A message describing one step of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    RunStarted {
        run_id: Uuid,
        files_total: usize,
        total_bytes: u64,
    },
    EntrySkipped {
        path: PathBuf,
        error: String,
    },
    FileStarted {
        index: usize,
        file_name: String,
        size_bytes: u64,
    },
    ChunkCopied {
        index: usize,
        file_name: String,
        bytes_copied: u64,
        file_size: u64,
        overall_percent: f64,
    },
    FileFinished {
        index: usize,
        file_name: String,
        state: FileState,
        destination: PathBuf,
        error: Option<String>,
    },
    RunFinished {
        status: TransferStatus,
        files_copied: usize,
        files_total: usize,
    },
}

/// A ProgressCallback that forwards every update over a channel.
///
/// Send errors are ignored: a control surface that stopped listening must
/// not stop the transfer.
pub struct ChannelProgress {
    sender: Sender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new(sender: Sender<ProgressEvent>) -> Self {
        ChannelProgress { sender }
    }
}

impl ProgressCallback for ChannelProgress {
    fn on_run_started(&self, run: &TransferRun) {
        let _ = self.sender.send(ProgressEvent::RunStarted {
            run_id: run.id,
            files_total: run.tasks.len(),
            total_bytes: run.total_bytes,
        });
    }

    fn on_entry_skipped(&self, _run: &TransferRun, failure: &EntryFailure) {
        let _ = self.sender.send(ProgressEvent::EntrySkipped {
            path: failure.path.clone(),
            error: failure.error.to_string(),
        });
    }

    fn on_file_started(&self, _run: &TransferRun, file_index: usize, file: &FileTask) {
        let _ = self.sender.send(ProgressEvent::FileStarted {
            index: file_index,
            file_name: file.display_name(),
            size_bytes: file.size_bytes,
        });
    }

    fn on_chunk_copied(&self, run: &TransferRun, file_index: usize, bytes_this_file: u64) {
        let file = &run.tasks[file_index];
        let _ = self.sender.send(ProgressEvent::ChunkCopied {
            index: file_index,
            file_name: file.display_name(),
            bytes_copied: bytes_this_file,
            file_size: file.size_bytes,
            overall_percent: run.overall_percent(bytes_this_file.min(file.size_bytes)),
        });
    }

    fn on_file_finished(&self, _run: &TransferRun, file_index: usize, file: &FileTask) {
        let _ = self.sender.send(ProgressEvent::FileFinished {
            index: file_index,
            file_name: file.display_name(),
            state: file.state,
            destination: file.written_path().to_path_buf(),
            error: file.error.as_ref().map(|e| e.to_string()),
        });
    }

    fn on_run_finished(&self, _run: &TransferRun, result: &TransferResult) {
        let _ = self.sender.send(ProgressEvent::RunFinished {
            status: result.status,
            files_copied: result.files_copied,
            files_total: result.files_total,
        });
    }
}

/// Latest known state of a run, as seen from the control surface.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressSnapshot {
    pub files_total: usize,
    pub total_bytes: u64,
    pub current_file_name: String,
    pub current_file_bytes: u64,
    pub current_file_size: u64,
    pub overall_percent: f64,
    pub done_count: usize,
    pub failed_count: usize,
    pub skipped_entries: usize,
    pub status: Option<TransferStatus>,
}

impl ProgressSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the snapshot.
    pub fn apply(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::RunStarted {
                files_total,
                total_bytes,
                ..
            } => {
                *self = ProgressSnapshot {
                    files_total: *files_total,
                    total_bytes: *total_bytes,
                    skipped_entries: self.skipped_entries,
                    overall_percent: if *total_bytes == 0 { 100.0 } else { 0.0 },
                    ..ProgressSnapshot::default()
                };
            }
            ProgressEvent::EntrySkipped { .. } => {
                self.skipped_entries += 1;
            }
            ProgressEvent::FileStarted {
                file_name,
                size_bytes,
                ..
            } => {
                self.current_file_name = file_name.clone();
                self.current_file_bytes = 0;
                self.current_file_size = *size_bytes;
            }
            ProgressEvent::ChunkCopied {
                bytes_copied,
                file_size,
                overall_percent,
                ..
            } => {
                self.current_file_bytes = *bytes_copied;
                self.current_file_size = *file_size;
                self.overall_percent = *overall_percent;
            }
            ProgressEvent::FileFinished { state, .. } => match state {
                FileState::Done => self.done_count += 1,
                FileState::Failed => self.failed_count += 1,
                _ => {}
            },
            ProgressEvent::RunFinished {
                status,
                files_copied,
                files_total,
            } => {
                self.status = Some(*status);
                self.done_count = *files_copied;
                self.files_total = *files_total;
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_some()
    }
}
