//! Single-writer execution queue.
//!
//! Every stateful operation of a datastore runs as a job on one worker
//! thread, in submission order. A job that panics is contained: the
//! panic is re-raised on the thread that submitted it (or logged, for
//! fire-and-forget jobs) and the worker keeps draining the queue.

use parking_lot::Mutex;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;
use tracing::error;

type Job = Box<dyn FnOnce() + Send>;

/// A FIFO task queue backed by a single named worker thread.
pub(crate) struct Executor {
    sender: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Executor {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let worker = std::thread::Builder::new()
            .name("jotdb-executor".to_string())
            .spawn(move || {
                for job in receiver {
                    if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
                        let what = panic
                            .downcast_ref::<&str>()
                            .copied()
                            .unwrap_or("(non-string panic)");
                        error!("queued task panicked: {what}");
                    }
                }
            })
            .expect("failed to spawn executor worker thread");

        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enqueues a job without waiting for its completion.
    ///
    /// Safe to call from inside another job; the new job runs after every
    /// job enqueued before it.
    pub(crate) fn submit(&self, job: impl FnOnce() + Send + 'static) {
        if let Some(sender) = self.sender.lock().as_ref() {
            let _ = sender.send(Box::new(job));
        }
    }

    /// Runs a job on the queue and blocks until it completes, returning
    /// its result.
    ///
    /// A panic inside the job is re-raised on this thread; the worker
    /// itself survives and proceeds with the next job.
    ///
    /// Must not be called from inside another job: the queue is strictly
    /// serial, so waiting on the worker from the worker deadlocks.
    pub(crate) fn run<T: Send + 'static>(&self, job: impl FnOnce() -> T + Send + 'static) -> T {
        let (reply, result) = mpsc::channel();
        self.submit(move || {
            let outcome = catch_unwind(AssertUnwindSafe(job));
            let _ = reply.send(outcome);
        });
        match result.recv() {
            Ok(Ok(value)) => value,
            Ok(Err(panic)) => resume_unwind(panic),
            Err(_) => panic!("executor worker exited while a job was waiting"),
        }
    }

    /// Stops accepting jobs, drains the queue and joins the worker.
    pub(crate) fn shutdown(&self) {
        // Dropping the sender ends the worker's receive loop once the
        // queue is empty.
        drop(self.sender.lock().take());
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
