//! One-shot deferred action on its own thread, cancellable exactly once.
//!
//! The worker waits on a cancel channel with `recv_timeout(delay)`. Firing and
//! cancelling both go through one state lock, so the action runs at most once
//! and never after a successful cancel. Dropping the task cancels it.

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, StressError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    Pending,
    Fired,
    Cancelled,
}

/// Result of [`DeferredTask::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The action had not run and now never will.
    Cancelled,
    /// The action already ran (or is running; cancel waits for it to finish).
    AlreadyFired,
    /// An earlier cancel already settled the task.
    AlreadyCancelled,
}

pub struct DeferredTask {
    delay: Duration,
    state: Arc<Mutex<TaskState>>,
    cancel_tx: Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    settled: Option<CancelOutcome>,
}

impl DeferredTask {
    /// Run `action` on a new thread named `name` after `delay`.
    pub fn schedule<F>(name: &str, delay: Duration, action: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        let state = Arc::new(Mutex::new(TaskState::Pending));
        let worker_state = Arc::clone(&state);

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || deferred_main(&cancel_rx, delay, &worker_state, action))
            .map_err(|source| StressError::Runtime {
                details: format!("failed to spawn deferred task thread: {source}"),
            })?;

        Ok(Self {
            delay,
            state,
            cancel_tx,
            join: Some(join),
            settled: None,
        })
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn has_fired(&self) -> bool {
        *self.state.lock() == TaskState::Fired
    }

    /// Cancel if still pending, then wait for the worker thread to exit.
    ///
    /// Safe to call any number of times; only the first call can return
    /// [`CancelOutcome::Cancelled`] or [`CancelOutcome::AlreadyFired`].
    pub fn cancel(&mut self) -> CancelOutcome {
        if self.settled.is_some() {
            return CancelOutcome::AlreadyCancelled;
        }
        let outcome = {
            let mut state = self.state.lock();
            match *state {
                TaskState::Pending => {
                    *state = TaskState::Cancelled;
                    CancelOutcome::Cancelled
                }
                TaskState::Fired => CancelOutcome::AlreadyFired,
                TaskState::Cancelled => CancelOutcome::AlreadyCancelled,
            }
        };
        // The worker may have already exited and dropped the receiver.
        let _ = self.cancel_tx.try_send(());
        if let Some(join) = self.join.take()
            && join.join().is_err()
        {
            eprintln!("[CST-SCHEDULE] deferred task thread panicked");
        }
        self.settled = Some(outcome);
        outcome
    }
}

impl Drop for DeferredTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn deferred_main<F: FnOnce()>(
    cancel_rx: &Receiver<()>,
    delay: Duration,
    state: &Mutex<TaskState>,
    action: F,
) {
    match cancel_rx.recv_timeout(delay) {
        Err(RecvTimeoutError::Timeout) => {
            {
                let mut guard = state.lock();
                if *guard != TaskState::Pending {
                    return;
                }
                *guard = TaskState::Fired;
            }
            action();
        }
        Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
    }
}
