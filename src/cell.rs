use parking_lot::{Mutex, MutexGuard};

/// A mutex-guarded value supporting atomic read-modify-write.
///
/// Every operation acquires the lock for its whole duration, so each one is
/// linearizable: compound operations from any number of threads never lose
/// updates. The guard never escapes the public API; `get` returns a clone.
///
/// If a mapping closure panics, the panic propagates to the caller, the lock
/// is released (parking_lot mutexes do not poison) and the cell keeps its
/// pre-call value, since the store only happens after the closure returns.
pub struct AtomicCell<T> {
  value: Mutex<T>,
}

impl<T> AtomicCell<T> {
  pub fn new(value: T) -> Self {
    Self {
      value: Mutex::new(value),
    }
  }

  /// Replaces the current value.
  pub fn set(&self, value: T) {
    *self.value.lock() = value;
  }

  /// Stores `value` and returns the prior one.
  pub fn get_then_set(&self, value: T) -> T {
    std::mem::replace(&mut *self.value.lock(), value)
  }

  /// Stores `f(prior)` and returns the prior value.
  pub fn get_then_map(&self, f: impl FnOnce(&T) -> T) -> T {
    let mut guard = self.value.lock();
    let next = f(&guard);
    std::mem::replace(&mut *guard, next)
  }

  /// Stores `f(prior)`, discarding the prior value.
  pub fn map(&self, f: impl FnOnce(&T) -> T) {
    let mut guard = self.value.lock();
    let next = f(&guard);
    *guard = next;
  }

  /// Locks the cell directly, for crate-internal use together with a
  /// `Condvar` (the facade's admission gate waits on this guard).
  pub(crate) fn lock(&self) -> MutexGuard<'_, T> {
    self.value.lock()
  }
}

impl<T: Clone> AtomicCell<T> {
  /// Returns a clone of the current value.
  pub fn get(&self) -> T {
    self.value.lock().clone()
  }

  /// Stores `f(prior)` and returns the new value.
  pub fn map_then_get(&self, f: impl FnOnce(&T) -> T) -> T {
    let mut guard = self.value.lock();
    let next = f(&guard);
    *guard = next;
    guard.clone()
  }
}

impl<T: Default> Default for AtomicCell<T> {
  fn default() -> Self {
    Self::new(T::default())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn set_replaces_the_value() {
    let cell = AtomicCell::new(9);
    cell.set(92);
    assert_eq!(cell.get(), 92);
  }

  #[test]
  fn get_then_set_returns_the_prior_value() {
    let cell = AtomicCell::new(9);
    assert_eq!(cell.get_then_set(90), 9);
    assert_eq!(cell.get(), 90);
  }

  #[test]
  fn get_then_map_returns_the_prior_value() {
    let cell = AtomicCell::new(5);
    assert_eq!(cell.get_then_map(|value| value + 90), 5);
    assert_eq!(cell.get(), 95);
  }

  #[test]
  fn map_then_get_returns_the_new_value() {
    let cell = AtomicCell::new(7);
    assert_eq!(cell.map_then_get(|value| value + 90), 97);
  }

  #[test]
  fn map_stores_the_mapped_value() {
    let cell = AtomicCell::new(90);
    cell.map(|value| value + 1);
    assert_eq!(cell.get(), 91);
  }

  #[test]
  fn a_panicking_closure_leaves_the_value_untouched() {
    let cell = AtomicCell::new(42);
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
      cell.map(|_| panic!("mapping failed"));
    }));
    assert!(outcome.is_err());
    assert_eq!(cell.get(), 42);
  }
}
