use crate::cell::AtomicCell;
use crate::error::{ConfigError, JobError};
use crate::pool::{Job, WorkerPool};

use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Condvar;
use tracing::{debug, trace};

/// Receives the outcome of every request submitted through a
/// [`BoundedPoolFacade`]. Invoked on pool threads, concurrently with the
/// submitter, so implementations must synchronize their own state (an
/// [`AtomicCell`] counter is the usual choice).
pub trait CompletionHandler<R>: Send + Sync {
  fn on_worker_result(&self, result: R);

  fn on_worker_error(&self, error: JobError);
}

impl<R, H: CompletionHandler<R> + ?Sized> CompletionHandler<R> for Arc<H> {
  fn on_worker_result(&self, result: R) {
    (**self).on_worker_result(result);
  }

  fn on_worker_error(&self, error: JobError) {
    (**self).on_worker_error(error);
  }
}

/// Admission control state: the in-flight request count, paired with a
/// condvar signaled on every decrement.
struct AdmissionGate {
  in_flight: AtomicCell<usize>,
  released: Condvar,
}

impl AdmissionGate {
  fn new() -> Self {
    Self {
      in_flight: AtomicCell::new(0),
      released: Condvar::new(),
    }
  }

  /// Blocks until the count is below `max`, then increments it.
  fn acquire(&self, max: usize) {
    let mut in_flight = self.in_flight.lock();
    while *in_flight >= max {
      trace!(in_flight = *in_flight, max, "Admission gate saturated; waiting for a slot.");
      self.released.wait(&mut in_flight);
    }
    *in_flight += 1;
  }

  /// Decrements the count and wakes blocked submitters and drainers.
  fn release(&self) {
    let mut in_flight = self.in_flight.lock();
    debug_assert!(*in_flight > 0, "admission gate released more often than acquired");
    *in_flight = in_flight.saturating_sub(1);
    self.released.notify_all();
  }

  /// Blocks until every in-flight request has completed.
  fn wait_for_idle(&self) {
    let mut in_flight = self.in_flight.lock();
    while *in_flight > 0 {
      self.released.wait(&mut in_flight);
    }
  }

  fn in_flight(&self) -> usize {
    self.in_flight.get()
  }
}

/// A backpressure-bounded facade over a [`WorkerPool`].
///
/// At most `max_pending_async_requests` submissions may be outstanding at
/// once; `send_to_worker` blocks while the limit is reached. Every accepted
/// request decrements the in-flight count exactly once — on success or on
/// error, never both — before its outcome is dispatched to the
/// [`CompletionHandler`], so pending work can never queue up without bound.
///
/// The facade is a scoped resource: [`shutdown`](Self::shutdown) (or `Drop`)
/// blocks until every outstanding request has completed and then closes and
/// joins the wrapped pool, guaranteeing that no callback fires afterwards.
pub struct BoundedPoolFacade<R, P, H>
where
  R: Send + 'static,
  P: WorkerPool<R>,
  H: CompletionHandler<R> + 'static,
{
  pool: P,
  handler: Arc<H>,
  max_pending: usize,
  gate: Arc<AdmissionGate>,
  shut_down: bool,
  _result: PhantomData<fn(R)>,
}

impl<R, P, H> BoundedPoolFacade<R, P, H>
where
  R: Send + 'static,
  P: WorkerPool<R>,
  H: CompletionHandler<R> + 'static,
{
  /// Wraps `pool`, limiting it to `max_pending_async_requests` outstanding
  /// submissions. Fails when the limit is not positive, with the offending
  /// value attached.
  pub fn new(pool: P, handler: H, max_pending_async_requests: isize) -> Result<Self, ConfigError> {
    if max_pending_async_requests <= 0 {
      return Err(ConfigError::InvalidMaxPending {
        value: max_pending_async_requests,
      });
    }
    Ok(Self {
      pool,
      handler: Arc::new(handler),
      max_pending: max_pending_async_requests as usize,
      gate: Arc::new(AdmissionGate::new()),
      shut_down: false,
      _result: PhantomData,
    })
  }

  /// Submits `job`, blocking first while the in-flight count is at the
  /// configured maximum. The outcome reaches the handler on a pool thread;
  /// a failure inside the job is never re-raised here.
  pub fn send_to_worker(&self, job: Job<R>) {
    self.gate.acquire(self.max_pending);

    let gate = self.gate.clone();
    let handler = self.handler.clone();
    let error_gate = self.gate.clone();
    let error_handler = self.handler.clone();

    self.pool.apply_async(
      job,
      Box::new(move |result| {
        gate.release();
        handler.on_worker_result(result);
      }),
      Box::new(move |error| {
        error_gate.release();
        error_handler.on_worker_error(error);
      }),
    );
  }

  /// Number of requests currently outstanding, in `[0, max]`.
  pub fn pending_requests(&self) -> usize {
    self.gate.in_flight()
  }

  pub fn handler(&self) -> &H {
    &self.handler
  }

  /// Blocks until every outstanding request has completed, then closes and
  /// joins the wrapped pool. Dropping the facade without calling this does
  /// the same.
  pub fn shutdown(mut self) {
    self.shutdown_in_place();
  }

  fn shutdown_in_place(&mut self) {
    if self.shut_down {
      return;
    }
    self.shut_down = true;

    debug!(pending = self.gate.in_flight(), "Facade shutting down; draining outstanding requests.");
    self.gate.wait_for_idle();
    self.pool.close();
    self.pool.join();
    debug!("Facade shut down; wrapped pool closed and joined.");
  }
}

impl<R, P, H> Drop for BoundedPoolFacade<R, P, H>
where
  R: Send + 'static,
  P: WorkerPool<R>,
  H: CompletionHandler<R> + 'static,
{
  fn drop(&mut self) {
    self.shutdown_in_place();
  }
}
