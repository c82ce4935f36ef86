//! Run handles: cancellation, terminal status, and blocking completion.
//!
//! A background run is represented by an [`Operation`]. The caller can peek
//! at its status (still `Unknown` while in flight), signal an abort, and
//! block until the terminal status is assigned.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::TerminalStatus;

/// Shared cooperative cancellation flag.
///
/// Walkers poll it before starting each item; items already started are
/// allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag {
    flag: Arc<AtomicBool>,
}

impl AbortFlag {
    pub fn new() -> Self {
        AbortFlag::default()
    }

    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Holds a run's status; assigned a terminal value at most once.
#[derive(Debug)]
pub struct StatusCell<S> {
    status: Mutex<S>,
    assigned: Condvar,
}

impl<S: TerminalStatus> Default for StatusCell<S> {
    fn default() -> Self {
        StatusCell {
            status: Mutex::new(S::unknown()),
            assigned: Condvar::new(),
        }
    }
}

impl<S: TerminalStatus> StatusCell<S> {
    pub fn new() -> Self {
        StatusCell::default()
    }

    /// Current status; `S::unknown()` until the run finishes.
    pub fn get(&self) -> S {
        *self.status.lock()
    }

    /// Assign the terminal status.
    ///
    /// Returns false, leaving the cell unchanged, if a terminal value was
    /// already assigned or `status` is not terminal.
    pub fn set(&self, status: S) -> bool {
        let mut current = self.status.lock();
        if current.is_terminal() || !status.is_terminal() {
            return false;
        }
        *current = status;
        self.assigned.notify_all();
        true
    }

    /// Block until a terminal status is assigned, then return it.
    pub fn wait(&self) -> S {
        let mut current = self.status.lock();
        while !current.is_terminal() {
            self.assigned.wait(&mut current);
        }
        *current
    }
}

/// Handle to a comparison or copy running on its own thread.
#[derive(Debug)]
pub struct Operation<S> {
    id: Uuid,
    abort: AbortFlag,
    status: Arc<StatusCell<S>>,
    worker: JoinHandle<Result<S, EngineError>>,
}

impl<S: TerminalStatus> Operation<S> {
    /// Run `work` on a new thread.
    ///
    /// `work` receives the abort flag; its result becomes the terminal status.
    /// A precondition error is stored as the error status and returned again
    /// from [`Operation::wait`].
    pub fn spawn<F>(name: &str, work: F) -> Self
    where
        F: FnOnce(&AbortFlag) -> Result<S, EngineError> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let abort = AbortFlag::new();
        let status = Arc::new(StatusCell::new());

        let worker = {
            let abort = abort.clone();
            let status = Arc::clone(&status);
            let span = tracing::info_span!("operation", %id, name = %name);
            thread::spawn(move || {
                let _entered = span.enter();
                let result = work(&abort);
                match &result {
                    Ok(terminal) => {
                        status.set(*terminal);
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "run failed before completion");
                        status.set(S::error());
                    }
                }
                result
            })
        };

        Operation {
            id,
            abort,
            status,
            worker,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Ask the run to stop starting new items.
    pub fn abort(&self) {
        self.abort.abort();
    }

    /// A clone of the run's abort flag, e.g. for an event sink to hold.
    pub fn abort_flag(&self) -> AbortFlag {
        self.abort.clone()
    }

    /// Non-blocking peek at the status.
    pub fn status(&self) -> S {
        self.status.get()
    }

    pub fn is_finished(&self) -> bool {
        self.status.get().is_terminal()
    }

    /// Block until the run finishes and return its result.
    ///
    /// # Errors
    /// Returns the run's precondition error, or `WorkerPanicked` if the
    /// worker thread died.
    pub fn wait(self) -> Result<S, EngineError> {
        match self.worker.join() {
            Ok(result) => result,
            Err(_) => {
                self.status.set(S::error());
                Err(EngineError::WorkerPanicked)
            }
        }
    }
}
