//! Fixed-size pool of isolated workers with FIFO dispatch.

pub mod counters;
pub mod handle;
pub mod pool;
pub mod queue;
pub mod telemetry;
pub mod worker;

#[cfg(test)]
mod pool_test;

// Re-export main types
pub use handle::TaskHandle;
pub use pool::{PoolStats, WorkerPool};
pub use queue::{Task, TaskQueue};
pub use worker::{Payload, WorkerState};
