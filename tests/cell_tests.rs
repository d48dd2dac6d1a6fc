use std::sync::Arc;
use std::thread;

use thread_relay::AtomicCell;

const THREAD_COUNT: usize = 2;
const INCREMENTS_PER_THREAD: usize = 450;

// Runs the same increment body on several threads against one shared cell and
// returns the final value.
fn run_concurrent_increments(increment: fn(&AtomicCell<i64>)) -> i64 {
  let cell = Arc::new(AtomicCell::new(0i64));

  let threads: Vec<_> = (0..THREAD_COUNT)
    .map(|_| {
      let cell = cell.clone();
      thread::spawn(move || {
        for _ in 0..INCREMENTS_PER_THREAD {
          increment(&cell);
        }
      })
    })
    .collect();

  for thread in threads {
    thread.join().unwrap();
  }

  cell.get()
}

#[test]
fn concurrent_get_then_map_increments_lose_no_updates() {
  let total = run_concurrent_increments(|cell| {
    cell.get_then_map(|value| value + 1);
  });
  assert_eq!(total, (THREAD_COUNT * INCREMENTS_PER_THREAD) as i64);
}

#[test]
fn concurrent_map_then_get_increments_lose_no_updates() {
  let total = run_concurrent_increments(|cell| {
    cell.map_then_get(|value| value + 1);
  });
  assert_eq!(total, (THREAD_COUNT * INCREMENTS_PER_THREAD) as i64);
}

#[test]
fn concurrent_mixed_compound_operations_lose_no_updates() {
  let total = run_concurrent_increments(|cell| {
    cell.map(|value| value + 1);
  });
  assert_eq!(total, (THREAD_COUNT * INCREMENTS_PER_THREAD) as i64);
}
