//! Bounded pool of threads for blocking work.
//!
//! Timed limit checks and log compression run here so they never block an
//! accept loop or the thread emitting log lines.

use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crossbeam_channel::{Sender, TrySendError, bounded};
use thiserror::Error;
use tracing::{debug, error};

const WORKER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::worker");

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Errors raised when submitting work.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Spawning a worker thread failed.
    #[error("failed to spawn worker thread: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The job queue is full.
    #[error("worker queue '{pool}' is full")]
    Saturated {
        /// Pool name.
        pool: String,
    },
    /// The pool has shut down.
    #[error("worker pool '{pool}' is closed")]
    Closed {
        /// Pool name.
        pool: String,
    },
}

/// Fixed set of threads fed by a bounded queue.
#[derive(Debug)]
pub struct WorkerPool {
    name: String,
    sender: Option<Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `threads` workers sharing a queue of `capacity` jobs.
    pub fn new(name: &str, threads: usize, capacity: usize) -> Result<Self, WorkerError> {
        let (sender, receiver) = bounded::<Job>(capacity.max(1));
        let mut workers = Vec::with_capacity(threads.max(1));
        for index in 0..threads.max(1) {
            let jobs = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || {
                    for job in jobs {
                        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            error!(target: WORKER_TARGET, "worker job panicked");
                        }
                    }
                })
                .map_err(|source| WorkerError::Spawn { source })?;
            workers.push(handle);
        }
        debug!(target: WORKER_TARGET, pool = name, threads = workers.len(), "worker pool started");
        Ok(Self {
            name: name.to_owned(),
            sender: Some(sender),
            workers,
        })
    }

    /// Queues `job` without blocking the caller.
    pub fn execute<F>(&self, job: F) -> Result<(), WorkerError>
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(sender) = &self.sender else {
            return Err(WorkerError::Closed {
                pool: self.name.clone(),
            });
        };
        sender.try_send(Box::new(job)).map_err(|error| match error {
            TrySendError::Full(_) => WorkerError::Saturated {
                pool: self.name.clone(),
            },
            TrySendError::Disconnected(_) => WorkerError::Closed {
                pool: self.name.clone(),
            },
        })
    }

    /// Stops accepting jobs and waits for queued ones to finish.
    pub fn shutdown(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!(target: WORKER_TARGET, pool = %self.name, "worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
