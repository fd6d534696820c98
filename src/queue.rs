//! Single-worker task queue.
//!
//! All I/O against one transport goes through one [`TaskQueue`], so requests
//! and responses never interleave no matter how many threads drive the
//! session. Two threads back each queue:
//! - the worker runs jobs one at a time
//! - the dispatcher drains the non-blocking FIFO, handing each entry to the
//!   worker as a blocking job so ordering holds across both submission kinds

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{Sender, bounded, unbounded};
use parking_lot::Mutex;

use crate::error::{Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;
type WorkerSender = Arc<Mutex<Option<Sender<Job>>>>;

pub struct TaskQueue {
    name: String,
    worker_id: ThreadId,
    dispatcher_id: ThreadId,
    jobs: WorkerSender,
    pending: Mutex<Option<Sender<Job>>>,
    disposed: AtomicBool,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskQueue {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();

        let (job_tx, job_rx) = unbounded::<Job>();
        let worker_name = name.clone();
        let worker = thread::Builder::new()
            .name(format!("{name}-worker"))
            .spawn(move || {
                log::debug!("{worker_name}: worker started");
                for job in job_rx {
                    job();
                }
                log::debug!("{worker_name}: worker stopped");
            })?;

        let jobs: WorkerSender = Arc::new(Mutex::new(Some(job_tx)));

        let (pending_tx, pending_rx) = unbounded::<Job>();
        let dispatcher_jobs = Arc::clone(&jobs);
        let dispatcher_name = name.clone();
        let dispatcher = thread::Builder::new()
            .name(format!("{name}-dispatch"))
            .spawn(move || {
                for job in pending_rx {
                    if let Err(err) = run_on_worker(&dispatcher_jobs, &dispatcher_name, job) {
                        log::error!("{dispatcher_name}: queued job failed: {err}");
                    }
                }
            })?;

        Ok(Self {
            name,
            worker_id: worker.thread().id(),
            dispatcher_id: dispatcher.thread().id(),
            jobs,
            pending: Mutex::new(Some(pending_tx)),
            disposed: AtomicBool::new(false),
            threads: Mutex::new(vec![worker, dispatcher]),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when called from this queue's worker thread.
    pub fn is_worker_thread(&self) -> bool {
        thread::current().id() == self.worker_id
    }

    /// Run `job` on the worker and wait for its result.
    ///
    /// Called from the worker itself (a job submitting more work) the job
    /// runs inline. A panicking job surfaces as [`Error::JobPanicked`] and
    /// leaves the worker alive.
    pub fn submit_blocking<T, F>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::QueueDisposed);
        }
        if self.is_worker_thread() {
            return Ok(job());
        }

        let (result_tx, result_rx) = bounded(1);
        run_on_worker(
            &self.jobs,
            &self.name,
            Box::new(move || {
                let _ = result_tx.send(job());
            }),
        )?;

        result_rx
            .try_recv()
            .map_err(|_| Error::JobPanicked("job produced no result".into()))
    }

    /// Append `job` to the FIFO and return immediately.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::QueueDisposed);
        }
        if self.is_worker_thread() {
            job();
            return Ok(());
        }

        let pending = self.pending.lock();
        let sender = pending.as_ref().ok_or(Error::QueueDisposed)?;
        sender.send(Box::new(job)).map_err(|_| Error::QueueDisposed)
    }

    /// Stop both threads. Jobs already handed to the worker still run.
    ///
    /// Repeated calls are no-ops. Must not be called from one of this
    /// queue's own jobs; if it is, the threads are released but not joined.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.pending.lock().take();
        self.jobs.lock().take();

        let current = thread::current().id();
        if current == self.worker_id || current == self.dispatcher_id {
            log::error!("{}: disposed from inside its own job", self.name);
            return;
        }

        for handle in self.threads.lock().drain(..) {
            if handle.join().is_err() {
                log::error!("{}: queue thread panicked", self.name);
            }
        }
        log::debug!("{}: disposed", self.name);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Hand `job` to the worker and block until it has run.
fn run_on_worker(jobs: &WorkerSender, name: &str, job: Job) -> Result<()> {
    let (done_tx, done_rx) = bounded::<std::result::Result<(), String>>(1);
    let job_name = name.to_string();
    let wrapped: Job = Box::new(move || {
        let outcome = panic::catch_unwind(AssertUnwindSafe(job)).map_err(|payload| {
            let message = panic_message(payload.as_ref());
            log::error!("{job_name}: job panicked: {message}");
            message
        });
        let _ = done_tx.send(outcome);
    });

    let sender = jobs.lock().clone().ok_or(Error::QueueDisposed)?;
    sender.send(wrapped).map_err(|_| Error::QueueDisposed)?;
    drop(sender);

    match done_rx.recv() {
        Ok(Ok(())) => Ok(()),
        Ok(Err(message)) => Err(Error::JobPanicked(message)),
        Err(_) => Err(Error::QueueDisposed),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
