use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::Rng;
use thread_relay::{
  AtomicCell, BoundedPoolFacade, CompletionHandler, ConfigError, InThreadPool, JobError, ThreadPool,
};

fn init_tracing() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter =
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,thread_relay=trace"));
    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

// Accumulates results and counts errors, the way a batch submitter would.
struct SummingHandler {
  sum: AtomicCell<i64>,
  errors: AtomicCell<usize>,
}

impl SummingHandler {
  fn new() -> Arc<Self> {
    Arc::new(Self {
      sum: AtomicCell::new(0),
      errors: AtomicCell::new(0),
    })
  }
}

impl CompletionHandler<i64> for SummingHandler {
  fn on_worker_result(&self, result: i64) {
    self.sum.map(|value| value + result);
  }

  fn on_worker_error(&self, _error: JobError) {
    self.errors.map(|value| value + 1);
  }
}

fn special_sum(alpha: i64, beta: i64) -> i64 {
  thread::sleep(Duration::from_millis(50));
  alpha + beta + 1
}

fn special_sum_with_error(alpha: i64, beta: i64) -> i64 {
  if alpha == 90 {
    panic!("alpha 90 is not summable");
  }
  thread::sleep(Duration::from_millis(50));
  alpha + beta + 1
}

#[test]
fn all_results_reach_the_handler_through_an_in_thread_pool() {
  init_tracing();
  let handler = SummingHandler::new();

  let facade = BoundedPoolFacade::new(InThreadPool::new(), handler.clone(), 2).unwrap();
  for (alpha, beta) in [(9, 4), (3, 8), (5, 7), (3, 2), (14, 7)] {
    facade.send_to_worker(Box::new(move || special_sum(alpha, beta)));
  }
  facade.shutdown();

  assert_eq!(handler.sum.get(), (9 + 4) + (3 + 8) + (5 + 7) + (3 + 2) + (14 + 7) + 5);
  assert_eq!(handler.errors.get(), 0);
}

#[test]
fn dropping_the_facade_blocks_until_every_request_has_completed() {
  init_tracing();
  let handler = SummingHandler::new();

  {
    let pool = ThreadPool::with_workers("drained", 2).unwrap();
    let facade = BoundedPoolFacade::new(pool, handler.clone(), 2).unwrap();
    for (alpha, beta) in [(9, 4), (3, 8), (5, 7), (3, 2), (14, 7)] {
      facade.send_to_worker(Box::new(move || special_sum(alpha, beta)));
    }
    // No explicit shutdown: leaving the scope must drain the facade.
  }

  assert_eq!(handler.sum.get(), (9 + 4) + (3 + 8) + (5 + 7) + (3 + 2) + (14 + 7) + 5);
  assert_eq!(handler.errors.get(), 0);
}

#[test]
fn failing_jobs_reach_only_the_error_hook() {
  init_tracing();
  let handler = SummingHandler::new();

  let pool = ThreadPool::with_workers("flaky", 2).unwrap();
  let facade = BoundedPoolFacade::new(pool, handler.clone(), 2).unwrap();
  for (alpha, beta) in [(9, 4), (90, 8), (5, 7), (90, 2), (14, 7)] {
    facade.send_to_worker(Box::new(move || special_sum_with_error(alpha, beta)));
  }
  facade.shutdown();

  assert_eq!(handler.sum.get(), (9 + 4) + (5 + 7) + (14 + 7) + 3);
  assert_eq!(handler.errors.get(), 2);
}

#[test]
fn construction_fails_for_a_non_positive_request_limit() {
  let handler = SummingHandler::new();
  let outcome = BoundedPoolFacade::new(InThreadPool::new(), handler, -5);
  assert!(matches!(
    outcome.err(),
    Some(ConfigError::InvalidMaxPending { value: -5 })
  ));
}

#[test]
fn the_in_flight_count_never_exceeds_the_configured_maximum() {
  init_tracing();
  let handler = SummingHandler::new();

  let in_flight = Arc::new(AtomicUsize::new(0));
  let peak_in_flight = Arc::new(AtomicUsize::new(0));

  let pool = ThreadPool::with_workers("bounded", 4).unwrap();
  let facade = BoundedPoolFacade::new(pool, handler.clone(), 2).unwrap();

  let mut rng = rand::rng();
  for _ in 0..20 {
    let delay = Duration::from_millis(rng.random_range(1..10));
    let job_in_flight = in_flight.clone();
    let job_peak = peak_in_flight.clone();
    facade.send_to_worker(Box::new(move || {
      let current = job_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
      job_peak.fetch_max(current, Ordering::SeqCst);
      thread::sleep(delay);
      job_in_flight.fetch_sub(1, Ordering::SeqCst);
      1
    }));
  }
  facade.shutdown();

  assert_eq!(handler.sum.get(), 20);
  assert_eq!(handler.errors.get(), 0);
  assert!(
    peak_in_flight.load(Ordering::SeqCst) <= 2,
    "admission control let more than 2 requests run at once"
  );
}
