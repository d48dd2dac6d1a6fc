use std::any::Any;
use std::time::Duration;

use thiserror::Error;

/// Construction-time validation failures.
///
/// Each variant carries the offending value(s) so callers can report exactly
/// what was rejected. These errors are raised synchronously and are never
/// retried internally.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
  #[error("invalid timeout range [{lower:?}, {upper:?}]: bounds must be positive and lower <= upper")]
  InvalidTimeoutRange { lower: Duration, upper: Duration },

  #[error("timeout factor must be strictly greater than 1 (got {factor})")]
  InvalidTimeoutFactor { factor: f64 },

  #[error("max pending async requests must be positive (got {value})")]
  InvalidMaxPending { value: isize },

  #[error("queue capacity must be at least 1 (got {capacity})")]
  InvalidQueueCapacity { capacity: usize },
}

/// A failure raised inside a submitted job.
///
/// The pool recovers the panic and delivers it to the error callback of the
/// submission; it is never re-raised on the submitting thread.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("worker job failed: {message}")]
pub struct JobError {
  message: String,
}

impl JobError {
  pub(crate) fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }

  pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
    let message = if let Some(text) = payload.downcast_ref::<&str>() {
      (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
      text.clone()
    } else {
      "opaque panic payload".to_string()
    };
    Self { message }
  }

  /// The panic message captured from the failed job, when one was available.
  pub fn message(&self) -> &str {
    &self.message
  }
}
