// Future returned by `WorkerPool::submit`.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

use crate::error::{Error, Result};

enum Inner<T> {
    Pending(oneshot::Receiver<Result<T>>),
    Rejected(Option<Error>),
}

/// Resolves to the task's outcome. Dropping it does not cancel the task.
pub struct TaskHandle<T> {
    id: Option<u64>,
    inner: Inner<T>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn pending(id: u64, rx: oneshot::Receiver<Result<T>>) -> Self {
        Self {
            id: Some(id),
            inner: Inner::Pending(rx),
        }
    }

    /// A handle that is already settled with an error; no task exists behind it.
    pub(crate) fn rejected(err: Error) -> Self {
        Self {
            id: None,
            inner: Inner::Rejected(Some(err)),
        }
    }

    /// Correlation id of the task, `None` when rejected at submit time.
    pub fn id(&self) -> Option<u64> {
        self.id
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.inner {
            // A dropped resolver means the pool went away before settling.
            Inner::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|res| res.unwrap_or(Err(Error::PoolTerminated))),
            Inner::Rejected(err) => Poll::Ready(Err(err.take().unwrap_or(Error::PoolTerminated))),
        }
    }
}
