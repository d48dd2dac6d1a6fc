use crate::error::ConfigError;

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};

/// A bounded blocking FIFO with timed enqueue and dequeue.
///
/// Both channel ends live inside the queue, so the channel stays connected for
/// as long as any clone is alive and a timed-out operation always means "the
/// queue stayed full (or empty) for the whole wait", never disconnection.
///
/// Clones share the same buffer. The transfer protocol in this crate assumes
/// exactly one writer clone and one reader clone.
pub struct BoundedQueue<T> {
  tx: Sender<T>,
  rx: Receiver<T>,
  capacity: usize,
}

// Not derived: channel ends clone regardless of whether T does.
impl<T> Clone for BoundedQueue<T> {
  fn clone(&self) -> Self {
    Self {
      tx: self.tx.clone(),
      rx: self.rx.clone(),
      capacity: self.capacity,
    }
  }
}

impl<T> BoundedQueue<T> {
  pub fn new(capacity: usize) -> Result<Self, ConfigError> {
    if capacity == 0 {
      return Err(ConfigError::InvalidQueueCapacity { capacity });
    }
    let (tx, rx) = bounded(capacity);
    Ok(Self { tx, rx, capacity })
  }

  /// Enqueues `item`, waiting up to `timeout` for a free slot.
  ///
  /// On timeout the rejected item is handed back so the caller can retry it.
  pub fn put(&self, item: T, timeout: Duration) -> Result<(), T> {
    match self.tx.send_timeout(item, timeout) {
      Ok(()) => Ok(()),
      Err(SendTimeoutError::Timeout(item)) => Err(item),
      // Unreachable while self.rx is alive, but hand the item back anyway.
      Err(SendTimeoutError::Disconnected(item)) => Err(item),
    }
  }

  /// Dequeues the oldest item, waiting up to `timeout` for one to arrive.
  pub fn get(&self, timeout: Duration) -> Option<T> {
    self.rx.recv_timeout(timeout).ok()
  }

  pub fn len(&self) -> usize {
    self.rx.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rx.is_empty()
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SHORT_WAIT: Duration = Duration::from_millis(10);

  #[test]
  fn zero_capacity_is_rejected() {
    let result = BoundedQueue::<i32>::new(0);
    assert_eq!(result.err(), Some(ConfigError::InvalidQueueCapacity { capacity: 0 }));
  }

  #[test]
  fn items_come_out_in_fifo_order() {
    let queue = BoundedQueue::new(3).unwrap();
    for item in [7, 8, 9] {
      queue.put(item, SHORT_WAIT).unwrap();
    }
    assert_eq!(queue.len(), 3);
    assert_eq!(queue.get(SHORT_WAIT), Some(7));
    assert_eq!(queue.get(SHORT_WAIT), Some(8));
    assert_eq!(queue.get(SHORT_WAIT), Some(9));
  }

  #[test]
  fn put_on_a_full_queue_times_out_and_returns_the_item() {
    let queue = BoundedQueue::new(1).unwrap();
    queue.put(90, SHORT_WAIT).unwrap();
    assert_eq!(queue.put(91, SHORT_WAIT), Err(91));
    assert_eq!(queue.len(), 1);
  }

  #[test]
  fn get_on_an_empty_queue_times_out() {
    let queue = BoundedQueue::<i32>::new(1).unwrap();
    assert_eq!(queue.get(SHORT_WAIT), None);
  }
}
