//! Background execution of a run.
//!
//! `spawn_transfer` validates its inputs on the calling thread, then plans
//! and executes the run on a single worker thread. The caller keeps a
//! `TransferHandle`: a stream of `ProgressEvent`s, the cancellation token,
//! and a join for the final `TransferResult`.

use std::path::Path;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver};
use tracing::debug;
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::error::EngineError;
use crate::job::{create_run, plan_run, run_transfer};
use crate::model::{SourceEntry, TransferOptions, TransferResult};
use crate::progress::{ChannelProgress, ProgressEvent};

/// Control-side view of a running transfer.
pub struct TransferHandle {
    run_id: Uuid,
    cancel: CancellationToken,
    events: Receiver<ProgressEvent>,
    worker: JoinHandle<Result<TransferResult, EngineError>>,
}

impl TransferHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Ask the worker to stop at the next chunk boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Blocking iterator over progress events.
    ///
    /// Finite and single-pass: it ends once the worker has sent
    /// `RunFinished` (or stopped early) and dropped its sender.
    pub fn events(&self) -> crossbeam_channel::Iter<'_, ProgressEvent> {
        self.events.iter()
    }

    /// Events already queued, without blocking.
    pub fn try_events(&self) -> crossbeam_channel::TryIter<'_, ProgressEvent> {
        self.events.try_iter()
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for the worker and return its result.
    pub fn wait(self) -> Result<TransferResult, EngineError> {
        self.worker
            .join()
            .map_err(|_| EngineError::WorkerPanicked)?
    }
}

/// Validate the request and start a run on a background thread.
///
/// Fatal problems (no sources, unusable destination) are returned here,
/// before any thread is started. `cancel` may be shared with other control
/// code, e.g. a signal handler.
pub fn spawn_transfer<P: AsRef<Path>>(
    sources: Vec<SourceEntry>,
    destination: P,
    options: TransferOptions,
    cancel: CancellationToken,
) -> Result<TransferHandle, EngineError> {
    let mut run = create_run(sources, destination, options)?;
    let run_id = run.id;

    let (sender, events) = unbounded::<ProgressEvent>();
    let worker_cancel = cancel.clone();

    let worker = thread::Builder::new()
        .name(format!("transfer-{}", run_id))
        .spawn(move || {
            plan_run(&mut run)?;
            let progress = ChannelProgress::new(sender);
            let result = run_transfer(&mut run, Some(&progress), &worker_cancel);
            debug!(run_id = %run.id, "transfer worker exiting");
            result
        })
        .map_err(|e| EngineError::WorkerSpawn { source: e })?;

    Ok(TransferHandle {
        run_id,
        cancel,
        events,
        worker,
    })
}
