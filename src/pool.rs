use crate::error::JobError;
use crate::worker::CancelableWorker;

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// A unit of work submitted to a pool.
pub type Job<R> = Box<dyn FnOnce() -> R + Send + 'static>;

/// Invoked with the job's result when it completes normally.
pub type SuccessCallback<R> = Box<dyn FnOnce(R) + Send + 'static>;

/// Invoked with the captured failure when the job panics.
pub type ErrorCallback = Box<dyn FnOnce(JobError) + Send + 'static>;

/// A pool of workers executing submitted jobs.
///
/// The asynchronous path never propagates a job failure to the submitter:
/// every accepted submission eventually invokes exactly one of its two
/// callbacks, possibly on a pool thread.
pub trait WorkerPool<R: Send + 'static>: Send + Sync {
  /// Runs `job` and blocks for its result. A panic inside the job propagates
  /// to the caller.
  fn apply(&self, job: Job<R>) -> R;

  /// Submits `job` for asynchronous execution. Exactly one of `on_success`
  /// and `on_error` is eventually invoked; failures inside the job are
  /// captured and delivered through `on_error`, never raised here.
  fn apply_async(&self, job: Job<R>, on_success: SuccessCallback<R>, on_error: ErrorCallback);

  /// Stops accepting new jobs; already-queued jobs still run.
  fn close(&self);

  /// Stops accepting new jobs and asks workers to stop after their current
  /// job; queued-but-unstarted jobs are dropped without any callback.
  fn terminate(&self);

  /// Blocks until the pool's worker threads have exited. Call after `close`
  /// or `terminate`.
  fn join(&mut self);
}

fn run_job<R>(job: Job<R>) -> Result<R, JobError> {
  panic::catch_unwind(AssertUnwindSafe(job)).map_err(JobError::from_panic)
}

/// A degenerate pool that executes every job synchronously on the calling
/// thread. Useful for tests and for callers that want the pool interface
/// without any parallelism; lifecycle operations are no-ops.
#[derive(Debug, Default)]
pub struct InThreadPool;

impl InThreadPool {
  pub fn new() -> Self {
    Self
  }
}

impl<R: Send + 'static> WorkerPool<R> for InThreadPool {
  fn apply(&self, job: Job<R>) -> R {
    job()
  }

  fn apply_async(&self, job: Job<R>, on_success: SuccessCallback<R>, on_error: ErrorCallback) {
    match run_job(job) {
      Ok(result) => on_success(result),
      Err(error) => on_error(error),
    }
  }

  fn close(&self) {}

  fn terminate(&self) {}

  fn join(&mut self) {}
}

struct AsyncJob<R> {
  job: Job<R>,
  on_success: SuccessCallback<R>,
  on_error: ErrorCallback,
}

// How often an idle pool worker re-checks its cancellation flag.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A pool of OS worker threads draining a shared job channel.
///
/// Each worker is a [`CancelableWorker`] that polls the channel with a bounded
/// wait, so `terminate` takes effect within one poll interval even while the
/// pool is idle.
pub struct ThreadPool<R: Send + 'static> {
  name: String,
  job_tx: Mutex<Option<Sender<AsyncJob<R>>>>,
  workers: Vec<CancelableWorker>,
}

impl<R: Send + 'static> ThreadPool<R> {
  /// Creates a pool with one worker per logical CPU.
  pub fn new(name: &str) -> io::Result<Self> {
    Self::with_workers(name, num_cpus::get())
  }

  pub fn with_workers(name: &str, worker_count: usize) -> io::Result<Self> {
    let (job_tx, job_rx) = unbounded::<AsyncJob<R>>();

    let mut workers = Vec::with_capacity(worker_count.max(1));
    for index in 0..worker_count.max(1) {
      let job_rx = job_rx.clone();
      let mut worker = CancelableWorker::new(format!("{name}-worker-{index}"), move |_scope| {
        match job_rx.recv_timeout(IDLE_POLL_INTERVAL) {
          Ok(async_job) => {
            match run_job(async_job.job) {
              Ok(result) => (async_job.on_success)(result),
              Err(error) => {
                warn!(error = %error, "Job failed; delivering to error callback.");
                (async_job.on_error)(error);
              }
            }
            true
          }
          Err(RecvTimeoutError::Timeout) => true,
          // Sender dropped and channel drained: ordinary completion.
          Err(RecvTimeoutError::Disconnected) => false,
        }
      });
      worker.start()?;
      workers.push(worker);
    }

    debug!(pool = %name, workers = workers.len(), "Thread pool started.");

    Ok(Self {
      name: name.to_string(),
      job_tx: Mutex::new(Some(job_tx)),
      workers,
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Number of jobs accepted but not yet picked up by a worker.
  pub fn queued_job_count(&self) -> usize {
    self.job_tx.lock().as_ref().map_or(0, Sender::len)
  }
}

impl<R: Send + 'static> WorkerPool<R> for ThreadPool<R> {
  fn apply(&self, job: Job<R>) -> R {
    let (result_tx, result_rx) = crossbeam_channel::bounded::<Result<R, JobError>>(1);
    let error_tx = result_tx.clone();
    self.apply_async(
      job,
      Box::new(move |result| {
        let _ = result_tx.send(Ok(result));
      }),
      Box::new(move |error| {
        let _ = error_tx.send(Err(error));
      }),
    );
    match result_rx.recv() {
      Ok(Ok(result)) => result,
      // Re-raise the captured failure on the calling thread.
      Ok(Err(error)) => panic::resume_unwind(Box::new(error.message().to_string())),
      Err(_) => panic::resume_unwind(Box::new(format!(
        "pool '{}' dropped the job before it could run",
        self.name
      ))),
    }
  }

  fn apply_async(&self, job: Job<R>, on_success: SuccessCallback<R>, on_error: ErrorCallback) {
    let guard = self.job_tx.lock();
    match guard.as_ref() {
      Some(job_tx) => {
        if let Err(send_error) = job_tx.send(AsyncJob {
          job,
          on_success,
          on_error,
        }) {
          // All workers are gone; honor the exactly-one-callback contract.
          let rejected = send_error.into_inner();
          drop(guard);
          (rejected.on_error)(JobError::new(format!("pool '{}' has no live workers", self.name)));
        }
      }
      None => {
        drop(guard);
        warn!(pool = %self.name, "Submission after close/terminate.");
        on_error(JobError::new(format!("pool '{}' is closed", self.name)));
      }
    }
  }

  fn close(&self) {
    // Dropping the sender disconnects the channel once drained, which the
    // workers treat as ordinary completion.
    if self.job_tx.lock().take().is_some() {
      debug!(pool = %self.name, "Pool closed; workers will drain the queue and stop.");
    }
  }

  fn terminate(&self) {
    let had_sender = self.job_tx.lock().take().is_some();
    for worker in &self.workers {
      worker.request_cancel();
    }
    if had_sender {
      debug!(pool = %self.name, "Pool terminated; queued jobs are dropped.");
    }
  }

  fn join(&mut self) {
    for worker in &mut self.workers {
      worker.join();
    }
    debug!(pool = %self.name, "All pool workers joined.");
  }
}

impl<R: Send + 'static> Drop for ThreadPool<R> {
  fn drop(&mut self) {
    // Make sure detached workers can observe shutdown and exit; joining here
    // could block arbitrarily long, so it stays the caller's decision.
    if self.job_tx.lock().take().is_some() {
      debug!(pool = %self.name, "Pool dropped without close; signaling workers to stop.");
    }
  }
}
