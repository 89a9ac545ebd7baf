//! Fixed-capacity worker pool for file-level validation tasks.
//!
//! The pool owns a set of worker threads created at construction; capacity
//! never changes afterwards. Tasks are handed over on a zero-capacity
//! rendezvous channel, so a submission only completes when a worker is free
//! to take it. That makes the blocking [`WorkerPool::submit`] a single
//! reserve-then-hand-off primitive: the number of in-flight tasks can never
//! exceed the pool capacity, and there is no wait/queue race window for
//! callers to retry around.
//!
//! A panic inside a task is contained to that task. The worker catches it,
//! reports it to the shared sink together with the task's path, and keeps
//! serving.

use crate::error::{Error, Result};
use crate::report::{ReportSink, Severity};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, trace};

/// A deferred unit of work: one file path plus the job that processes it.
///
/// The path is carried alongside the job so that a panicking task can still
/// be attributed to the file it was working on.
pub struct Task {
    path: PathBuf,
    job: Box<dyn FnOnce() + Send + 'static>,
}

impl Task {
    /// Creates a new task for the given path
    pub fn new(path: impl Into<PathBuf>, job: impl FnOnce() + Send + 'static) -> Self {
        Self {
            path: path.into(),
            job: Box::new(job),
        }
    }

    /// The path this task will process
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").field("path", &self.path).finish()
    }
}

/// Fixed-capacity pool of background worker threads
pub struct WorkerPool {
    tx: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
    capacity: usize,
}

impl WorkerPool {
    /// Creates a pool with exactly `capacity` worker threads.
    ///
    /// Panics and task failures are reported through `sink`.
    pub fn new(capacity: usize, sink: Arc<dyn ReportSink>) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::internal("worker pool capacity must be at least 1"));
        }

        // Rendezvous channel: a send completes only when a worker is ready,
        // so in-flight tasks never exceed the worker count.
        let (tx, rx) = bounded::<Task>(0);

        let mut workers = Vec::with_capacity(capacity);
        for id in 0..capacity {
            let rx = rx.clone();
            let sink = Arc::clone(&sink);
            let handle = thread::Builder::new()
                .name(format!("pesift-worker-{id}"))
                .spawn(move || worker_loop(id, rx, sink))
                .map_err(|e| Error::internal(format!("failed to spawn worker {id}: {e}")))?;
            workers.push(handle);
        }

        debug!(capacity, "worker pool started");

        Ok(Self {
            tx: Some(tx),
            workers,
            capacity,
        })
    }

    /// The fixed capacity this pool was constructed with
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Attempts non-blocking admission of a task.
    ///
    /// Returns the task back to the caller if no worker is free right now;
    /// the caller may retry or fall back to [`WorkerPool::submit`].
    pub fn try_submit(&self, task: Task) -> std::result::Result<(), Task> {
        let Some(tx) = &self.tx else {
            return Err(task);
        };
        match tx.try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(task)) | Err(TrySendError::Disconnected(task)) => Err(task),
        }
    }

    /// Submits a task, blocking until a worker is free to take it.
    ///
    /// This is the backpressure point for the directory walker: the control
    /// thread cannot run further ahead of processing capacity than the one
    /// task it is currently trying to hand over.
    pub fn submit(&self, task: Task) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(Error::PoolClosed)?;
        trace!(path = %task.path.display(), "submitting task");
        tx.send(task).map_err(|_| Error::PoolClosed)
    }

    /// Closes the pool and waits for all in-flight tasks to finish.
    pub fn join(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender wakes all idle workers with a disconnect.
        drop(self.tx.take());
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(id: usize, rx: Receiver<Task>, sink: Arc<dyn ReportSink>) {
    trace!(worker = id, "worker started");

    // Channel disconnect is the shutdown signal.
    while let Ok(task) = rx.recv() {
        let path = task.path;
        let job = task.job;

        let outcome = panic::catch_unwind(AssertUnwindSafe(job));
        if let Err(payload) = outcome {
            let detail = panic_message(&*payload);
            error!(worker = id, path = %path.display(), detail, "task panicked");
            sink.line(
                Severity::Error,
                &format!("error while processing '{}': {detail}", path.display()),
            );
        }
    }

    trace!(worker = id, "worker exiting");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    }
}
