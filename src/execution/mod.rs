//! Pipeline execution: engine, scheduling, step running, retries, teardown

pub mod engine;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod teardown;

pub use engine::{EventHandler, ExecutionEngine, ExecutionEvent, RunOptions};
pub use retry::{CancelFlag, RetryPolicy};
pub use runner::{Outcome, RunnerError, StepRunner};
pub use scheduler::{ExecutionScheduler, SchedulingStrategy};
pub use teardown::{TeardownFailure, TeardownQueue};
