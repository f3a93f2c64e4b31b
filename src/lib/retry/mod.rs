pub mod backoff;
pub mod executor;

pub use backoff::{BackoffPolicy, BackoffSchedule, compute};
pub use executor::RetryExecutor;
