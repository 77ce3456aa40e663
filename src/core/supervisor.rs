//! Supervised background tasks.
//!
//! Work that does not need to block the caller (file reindexing after
//! reconciliation) runs on its own thread, but the join handle is kept here.
//! Finished tasks are reaped on every `spawn` and `pending` call, and their
//! failures are logged then and there. `wait` joins the rest and returns
//! every failure not yet handed out.

use crate::core::error::PoolError;
use crate::core::redact;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

/// A background task that returned an error or panicked.
#[derive(Debug)]
pub struct TaskFailure {
    pub task: String,
    pub message: String,
}

type Handle = (String, JoinHandle<Result<(), PoolError>>);

#[derive(Default)]
pub struct TaskSupervisor {
    handles: Mutex<Vec<Handle>>,
    failures: Mutex<Vec<TaskFailure>>,
    closed: AtomicBool,
}

fn join_task(task: String, handle: JoinHandle<Result<(), PoolError>>) -> Option<TaskFailure> {
    let message = match handle.join() {
        Ok(Ok(())) => return None,
        Ok(Err(e)) => redact::redact_string(&e.to_string()),
        Err(_) => "task panicked".to_string(),
    };
    tracing::warn!(task = %task, error = %message, "background task failed");
    Some(TaskFailure { task, message })
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` on a tracked thread. Finished tasks are reaped first, so the
    /// handle list only holds work still in flight.
    pub fn spawn<F>(&self, task: &str, f: F) -> Result<(), PoolError>
    where
        F: FnOnce() -> Result<(), PoolError> + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::Validation(format!(
                "supervisor is closed; cannot start '{}'",
                task
            )));
        }
        self.reap();
        let handle = thread::Builder::new()
            .name(format!("drivepool-{}", task))
            .spawn(f)?;
        self.handles
            .lock()
            .map_err(|_| PoolError::Validation("Supervisor lock poisoned".to_string()))?
            .push((task.to_string(), handle));
        Ok(())
    }

    /// Join every finished task. Failures are logged immediately and kept
    /// until the next `wait`.
    pub fn reap(&self) {
        let finished: Vec<Handle> = match self.handles.lock() {
            Ok(mut guard) => {
                let (done, running): (Vec<Handle>, Vec<Handle>) =
                    guard.drain(..).partition(|(_, h)| h.is_finished());
                *guard = running;
                done
            }
            Err(_) => return,
        };
        let failed: Vec<TaskFailure> = finished
            .into_iter()
            .filter_map(|(task, handle)| join_task(task, handle))
            .collect();
        if failed.is_empty() {
            return;
        }
        if let Ok(mut sink) = self.failures.lock() {
            sink.extend(failed);
        }
    }

    /// Tasks still running.
    pub fn pending(&self) -> usize {
        self.reap();
        self.handles.lock().map(|h| h.len()).unwrap_or(0)
    }

    /// Refuse new work. Tasks already running are unaffected.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Join every task spawned so far and drain all failures recorded since
    /// the last call, including those already reaped.
    pub fn wait(&self) -> Vec<TaskFailure> {
        let handles: Vec<Handle> = match self.handles.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        let joined: Vec<TaskFailure> = handles
            .into_iter()
            .filter_map(|(task, handle)| join_task(task, handle))
            .collect();

        let mut failures = match self.failures.lock() {
            Ok(mut sink) => std::mem::take(&mut *sink),
            Err(_) => Vec::new(),
        };
        failures.extend(joined);
        failures
    }
}

impl Drop for TaskSupervisor {
    fn drop(&mut self) {
        self.close();
        let failures = self.wait();
        if !failures.is_empty() {
            tracing::warn!(count = failures.len(), "background tasks failed before shutdown");
        }
    }
}
