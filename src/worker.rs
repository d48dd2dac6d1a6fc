use crate::cell::AtomicCell;

use std::io;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

lazy_static::lazy_static! {
  static ref NEXT_WORKER_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// Lifecycle of a [`CancelableWorker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
  Created,
  Running,
  CancelRequested,
  Terminated,
}

#[derive(Debug, Clone, Copy)]
struct WorkerStatus {
  state: WorkerState,
  // Monotone: flips to false when a cancellation request is accepted and
  // never reverts.
  never_canceled: bool,
}

struct WorkerShared {
  id: u64,
  name: String,
  status: AtomicCell<WorkerStatus>,
  terminated: Condvar,
}

impl WorkerShared {
  fn request_cancel(&self) {
    let mut status = self.status.lock();
    if status.state == WorkerState::Terminated {
      // A cancel after natural completion is a no-op; it does not retroactively
      // mark the worker as canceled.
      trace!(worker = %self.name, worker_id = self.id, "Cancel requested after termination; ignoring.");
      return;
    }
    if !status.never_canceled {
      trace!(worker = %self.name, worker_id = self.id, "Cancel already requested.");
      return;
    }
    status.never_canceled = false;
    if status.state == WorkerState::Running {
      status.state = WorkerState::CancelRequested;
    }
    debug!(worker = %self.name, worker_id = self.id, "Cancellation requested.");
  }

  fn never_canceled(&self) -> bool {
    self.status.lock().never_canceled
  }

  fn is_terminated(&self) -> bool {
    self.status.lock().state == WorkerState::Terminated
  }

  fn await_termination(&self) {
    let mut status = self.status.lock();
    while status.state != WorkerState::Terminated {
      self.terminated.wait(&mut status);
    }
  }

  fn mark_terminated(&self) {
    let mut status = self.status.lock();
    status.state = WorkerState::Terminated;
    self.terminated.notify_all();
  }
}

/// Marks the worker terminated even if the loop body panics, so joiners are
/// never left blocked.
struct TerminationGuard {
  shared: Arc<WorkerShared>,
}

impl Drop for TerminationGuard {
  fn drop(&mut self) {
    self.shared.mark_terminated();
  }
}

/// The worker's view of its own cancellation state, passed to each loop
/// iteration so the body can self-cancel or inspect the flag.
pub struct CancelScope {
  shared: Arc<WorkerShared>,
}

impl CancelScope {
  /// Requests cancellation from inside the loop body. Idempotent; the loop
  /// stops before its next iteration.
  pub fn request_cancel(&self) {
    self.shared.request_cancel();
  }

  pub fn never_canceled(&self) -> bool {
    self.shared.never_canceled()
  }
}

/// A detachable, clonable, non-owning reference to a [`CancelableWorker`].
///
/// Lets a third party request cancellation and wait for termination without
/// owning the worker. `join` must only be used once the worker has been
/// started; joining a never-started worker blocks indefinitely.
#[derive(Clone)]
pub struct CancelHandle {
  shared: Arc<WorkerShared>,
}

impl CancelHandle {
  /// Requests cooperative cancellation. Idempotent.
  pub fn request_cancel(&self) {
    self.shared.request_cancel();
  }

  /// Blocks until the worker's loop has finished running.
  pub fn join(&self) {
    self.shared.await_termination();
  }

  /// True iff cancellation was never requested before natural completion.
  pub fn never_canceled(&self) -> bool {
    self.shared.never_canceled()
  }

  pub fn is_terminated(&self) -> bool {
    self.shared.is_terminated()
  }
}

/// A long-running unit of work on its own OS thread, polling a cancellation
/// flag at every iteration boundary.
///
/// The loop body is supplied at construction as a closure invoked once per
/// iteration; returning `false` stops the loop as ordinary completion, which
/// is distinguished from cancellation: `never_canceled` stays true. After
/// `request_cancel` (from the body's [`CancelScope`], from a [`CancelHandle`]
/// or from the worker itself) the loop stops within one iteration; in-progress
/// work is never preempted.
pub struct CancelableWorker {
  shared: Arc<WorkerShared>,
  // Held only between construction and start; the Mutex keeps the worker
  // shareable across threads while it owns the not-yet-running body.
  body: Mutex<Option<Box<dyn FnMut(&CancelScope) -> bool + Send + 'static>>>,
  thread: Option<thread::JoinHandle<()>>,
}

impl CancelableWorker {
  pub fn new(name: impl Into<String>, body: impl FnMut(&CancelScope) -> bool + Send + 'static) -> Self {
    let id = NEXT_WORKER_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
    Self {
      shared: Arc::new(WorkerShared {
        id,
        name: name.into(),
        status: AtomicCell::new(WorkerStatus {
          state: WorkerState::Created,
          never_canceled: true,
        }),
        terminated: Condvar::new(),
      }),
      body: Mutex::new(Some(Box::new(body))),
      thread: None,
    }
  }

  /// Begins running the work loop on its own thread and returns immediately.
  ///
  /// Starting twice is an error that is logged and otherwise ignored.
  pub fn start(&mut self) -> io::Result<()> {
    let Some(body) = self.body.lock().take() else {
      warn!(worker = %self.shared.name, worker_id = self.shared.id, "Worker already started.");
      return Ok(());
    };

    {
      let mut status = self.shared.status.lock();
      if status.state == WorkerState::Created {
        status.state = WorkerState::Running;
      }
    }

    let shared = self.shared.clone();
    let thread = thread::Builder::new()
      .name(self.shared.name.clone())
      .spawn(move || run_loop(shared, body))?;
    self.thread = Some(thread);
    Ok(())
  }

  /// Returns a detachable handle to this worker.
  pub fn handle(&self) -> CancelHandle {
    CancelHandle {
      shared: self.shared.clone(),
    }
  }

  /// Requests cooperative cancellation. Idempotent; callable before or after
  /// `start` (a pre-start cancel prevents any iteration from running).
  pub fn request_cancel(&self) {
    self.shared.request_cancel();
  }

  /// Blocks until the worker's loop has finished running.
  pub fn join(&mut self) {
    match self.thread.take() {
      Some(thread) => {
        if thread.join().is_err() {
          warn!(worker = %self.shared.name, worker_id = self.shared.id, "Worker loop body panicked.");
        }
      }
      None => {
        warn!(worker = %self.shared.name, worker_id = self.shared.id, "Join called before start, or called twice.");
      }
    }
  }

  /// True iff cancellation was never requested before natural completion.
  pub fn never_canceled(&self) -> bool {
    self.shared.never_canceled()
  }
}

fn run_loop(shared: Arc<WorkerShared>, mut body: Box<dyn FnMut(&CancelScope) -> bool + Send>) {
  debug!(worker = %shared.name, worker_id = shared.id, "Worker loop started.");

  let _termination_guard = TerminationGuard {
    shared: shared.clone(),
  };
  let scope = CancelScope {
    shared: shared.clone(),
  };

  loop {
    if !shared.never_canceled() {
      debug!(worker = %shared.name, worker_id = shared.id, "Cancellation observed; stopping loop.");
      break;
    }
    if !body(&scope) {
      debug!(worker = %shared.name, worker_id = shared.id, "Loop body signaled ordinary completion.");
      break;
    }
  }
}
