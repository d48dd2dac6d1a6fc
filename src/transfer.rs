//! Adaptive, backoff-driven transfer of items through a [`BoundedQueue`]
//! shared by a writer and a reader on different threads.
//!
//! Each side polls the queue with a bounded wait and adjusts that wait
//! multiplicatively: success shrinks it toward the lower bound so an
//! uncontended queue is polled responsively, a timeout grows it toward the
//! upper bound to back off from sustained backpressure. The factor also
//! bounds the worst-case latency before a cancellation signal is observed,
//! since the continuation predicate is re-checked before every attempt.

use crate::error::ConfigError;
use crate::queue::BoundedQueue;

use std::time::Duration;

use tracing::{debug, trace};

/// An inclusive range of polling timeouts, both bounds positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutRange {
  lower: Duration,
  upper: Duration,
}

impl TimeoutRange {
  pub fn new(lower: Duration, upper: Duration) -> Result<Self, ConfigError> {
    if lower.is_zero() || upper.is_zero() || lower > upper {
      return Err(ConfigError::InvalidTimeoutRange { lower, upper });
    }
    Ok(Self { lower, upper })
  }

  pub fn lower(&self) -> Duration {
    self.lower
  }

  pub fn upper(&self) -> Duration {
    self.upper
  }
}

/// The per-side timeout scalar. Plain local state: writer and reader each own
/// one, so the queue itself stays the only coordination channel between them.
#[derive(Debug, Clone)]
struct AdaptiveTimeout {
  current: Duration,
  range: TimeoutRange,
  factor: f64,
}

impl AdaptiveTimeout {
  fn new(range: TimeoutRange, factor: f64) -> Result<Self, ConfigError> {
    // `!(factor > 1.0)` also rejects NaN. A factor of exactly 1 would never
    // back off and a smaller one would shrink instead of grow.
    if !(factor > 1.0) {
      return Err(ConfigError::InvalidTimeoutFactor { factor });
    }
    Ok(Self {
      current: range.lower(),
      range,
      factor,
    })
  }

  fn current(&self) -> Duration {
    self.current
  }

  /// Backs off after a timed-out attempt, clamping to the upper bound.
  fn grow(&mut self) {
    self.current = self.current.mul_f64(self.factor).min(self.range.upper());
  }

  /// Speeds polling back up after a successful attempt, clamping to the
  /// lower bound.
  fn shrink(&mut self) {
    self.current = self.current.div_f64(self.factor).max(self.range.lower());
  }
}

/// The writer side of an adaptive transfer: drains a lazy, single-pass source
/// sequence into a queue.
pub struct QueueWriter {
  timeout: AdaptiveTimeout,
}

impl QueueWriter {
  pub fn new(timeout_range: TimeoutRange, timeout_factor: f64) -> Result<Self, ConfigError> {
    Ok(Self {
      timeout: AdaptiveTimeout::new(timeout_range, timeout_factor)?,
    })
  }

  /// Moves items from `source` into `queue` until the source is exhausted or
  /// `can_continue` returns false, whichever comes first. An item whose
  /// enqueue timed out is retried on the next iteration — unless cancellation
  /// arrives first, in which case it is dropped.
  ///
  /// Returns the number of items enqueued.
  pub fn run<T>(
    mut self,
    queue: &BoundedQueue<T>,
    mut can_continue: impl FnMut() -> bool,
    source: impl IntoIterator<Item = T>,
  ) -> usize {
    let mut source = source.into_iter();
    let mut retried_item: Option<T> = None;
    let mut written = 0usize;

    loop {
      if !can_continue() {
        debug!(written, "Queue writer stopping: continuation predicate is false.");
        break;
      }

      let item = match retried_item.take().or_else(|| source.next()) {
        Some(item) => item,
        None => {
          debug!(written, "Queue writer stopping: source sequence exhausted.");
          break;
        }
      };

      match queue.put(item, self.timeout.current()) {
        Ok(()) => {
          written += 1;
          self.timeout.shrink();
        }
        Err(item) => {
          trace!(timeout = ?self.timeout.current(), "Enqueue timed out; backing off and retrying the item.");
          retried_item = Some(item);
          self.timeout.grow();
        }
      }
    }

    written
  }
}

/// The reader side of an adaptive transfer: feeds dequeued items, in order,
/// to a consumer callback.
pub struct QueueReader<T, C: FnMut(T)> {
  item_consumer: C,
  timeout: AdaptiveTimeout,
  _item: std::marker::PhantomData<fn(T)>,
}

impl<T, C: FnMut(T)> QueueReader<T, C> {
  pub fn new(
    item_consumer: C,
    timeout_range: TimeoutRange,
    timeout_factor: f64,
  ) -> Result<Self, ConfigError> {
    Ok(Self {
      item_consumer,
      timeout: AdaptiveTimeout::new(timeout_range, timeout_factor)?,
      _item: std::marker::PhantomData,
    })
  }

  /// Dequeues items and invokes the consumer synchronously, in dequeue order,
  /// until `can_continue` returns false. The reader has no notion of an
  /// exhausted source; the predicate encodes it (e.g. by counting consumed
  /// items).
  ///
  /// Returns the number of items consumed.
  pub fn run(mut self, queue: &BoundedQueue<T>, mut can_continue: impl FnMut() -> bool) -> usize {
    let mut consumed = 0usize;

    loop {
      if !can_continue() {
        debug!(consumed, "Queue reader stopping: continuation predicate is false.");
        break;
      }

      match queue.get(self.timeout.current()) {
        Some(item) => {
          (self.item_consumer)(item);
          consumed += 1;
          self.timeout.shrink();
        }
        None => {
          trace!(timeout = ?self.timeout.current(), "Dequeue timed out; backing off.");
          self.timeout.grow();
        }
      }
    }

    consumed
  }
}
