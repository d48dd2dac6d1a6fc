//! Thread-to-thread coordination primitives: a mutex-guarded atomic cell,
//! cancelable worker threads, an adaptive bounded-queue transfer protocol
//! and a backpressure-bounded facade over a worker pool.

mod cell;
mod error;
mod facade;
mod pool;
mod queue;
mod transfer;
mod worker;

pub use cell::AtomicCell;
pub use error::{ConfigError, JobError};
pub use facade::{BoundedPoolFacade, CompletionHandler};
pub use pool::{ErrorCallback, InThreadPool, Job, SuccessCallback, ThreadPool, WorkerPool};
pub use queue::BoundedQueue;
pub use transfer::{QueueReader, QueueWriter, TimeoutRange};
pub use worker::{CancelHandle, CancelScope, CancelableWorker};
