// Error definitions shared by the pool, caches and coordinator.

use std::sync::Arc;

/// Errors that can reach a caller of `submit`/`fetch`.
///
/// The enum is `Clone` so one settled outcome can be handed to every caller
/// waiting on the same key.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The supplied computation itself failed.
    #[error("producer failed: {0}")]
    Producer(Arc<anyhow::Error>),

    /// The worker running the task died; the worker has been retired.
    #[error("worker {worker} faulted while running task {task}: {reason}")]
    WorkerFault {
        worker: usize,
        task: u64,
        reason: String,
    },

    /// The pool is shut down (or shutting down).
    #[error("worker pool terminated")]
    PoolTerminated,
}

impl Error {
    /// Wraps a producer failure.
    pub fn producer(err: anyhow::Error) -> Self {
        Error::Producer(Arc::new(err))
    }

    /// Returns true for `PoolTerminated`.
    pub fn is_pool_terminated(&self) -> bool {
        matches!(self, Error::PoolTerminated)
    }

    /// Returns true for `WorkerFault`.
    pub fn is_worker_fault(&self) -> bool {
        matches!(self, Error::WorkerFault { .. })
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::producer(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failures of a durable raw store. Never surfaced past the durable adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("storage quota exceeded")]
    QuotaExceeded,

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_producer_error_displays_source() {
        let err = Error::producer(anyhow::anyhow!("boom"));
        assert_eq!(err.to_string(), "producer failed: boom");
        assert!(!err.is_pool_terminated());
    }

    #[test]
    fn test_worker_fault_display() {
        let err = Error::WorkerFault {
            worker: 1,
            task: 7,
            reason: "died".into(),
        };
        assert!(err.is_worker_fault());
        assert_eq!(err.to_string(), "worker 1 faulted while running task 7: died");
    }

    #[test]
    fn test_panic_message() {
        let p: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(p.as_ref()), "static");
        let p: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(p.as_ref()), "owned");
        let p: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(p.as_ref()), "unknown panic");
    }
}
