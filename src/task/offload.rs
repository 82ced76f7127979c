use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread;

use futures_channel::oneshot::{self, Canceled};

use crate::error::{Error, Result};
use crate::executor::blocking::Job;
use crate::executor::{loop_thread, Inner};
use crate::global;
use crate::utils;

/// A future that runs a blocking call on the executor's blocking pool.
///
/// Returned by [`AsyncExecutor::sync_to_async`] and [`global::sync_to_async`].
/// Nothing happens until the future is polled: the first poll hands the call
/// to the pool, later polls wait for its result. It must be awaited from a
/// task running on the executor it was created from, otherwise it resolves
/// to [`Error::Misuse`].
///
/// Dropping the future abandons the result, but a call already handed to the
/// pool still runs to completion.
///
/// [`AsyncExecutor::sync_to_async`]: crate::AsyncExecutor::sync_to_async
/// [`global::sync_to_async`]: crate::global::sync_to_async
///
/// # Examples
///
/// ```
/// use taskbridge::AsyncExecutor;
///
/// let executor = AsyncExecutor::new();
/// let offload = executor.sync_to_async(|| 21 * 2);
/// let handle = executor.submit(async move { offload.await }).unwrap();
/// assert_eq!(handle.result().unwrap().unwrap(), 42);
/// ```
pub struct Offload<T> {
    job: Option<Box<dyn FnOnce() -> T + Send>>,
    binding: Binding,
    state: State<T>,
}

/// Which executor's pool the call goes to.
pub(crate) enum Binding {
    Instance(Arc<Inner>),
    /// Resolved against the process-global executor at first poll.
    Global,
}

enum State<T> {
    NotSubmitted,
    Waiting(oneshot::Receiver<thread::Result<T>>),
    Complete,
}

impl<T> Offload<T> {
    pub(crate) fn new<F>(binding: Binding, job: F) -> Offload<T>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Offload {
            job: Some(Box::new(job)),
            binding,
            state: State::NotSubmitted,
        }
    }
}

impl<T: Send + 'static> Future for Offload<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<T>> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                State::NotSubmitted => {
                    let inner = match &this.binding {
                        Binding::Instance(inner) => inner.clone(),
                        Binding::Global => match global::executor_inner() {
                            Ok(inner) => inner,
                            Err(err) => {
                                this.state = State::Complete;
                                return Poll::Ready(Err(err));
                            }
                        },
                    };

                    if loop_thread::current_executor() != Some(inner.id) {
                        this.state = State::Complete;
                        return Poll::Ready(Err(Error::Misuse(
                            "offloaded calls must be awaited from a task on their own executor",
                        )));
                    }

                    let job = this.job.take().expect("offload job already taken");
                    let (sender, receiver) = oneshot::channel();
                    let job: Job = Box::new(move || {
                        let result = panic::catch_unwind(AssertUnwindSafe(job));
                        let _ = sender.send(result);
                    });
                    if let Err(err) = inner.pool.schedule(job) {
                        this.state = State::Complete;
                        return Poll::Ready(Err(err));
                    }
                    this.state = State::Waiting(receiver);
                }
                State::Waiting(receiver) => {
                    let result = match Pin::new(receiver).poll(cx) {
                        Poll::Ready(result) => result,
                        Poll::Pending => return Poll::Pending,
                    };
                    this.state = State::Complete;
                    return Poll::Ready(match result {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(payload)) => {
                            Err(Error::TaskFailed(utils::panic_message(&*payload)))
                        }
                        Err(Canceled) => Err(Error::Closed),
                    });
                }
                State::Complete => panic!("`Offload` polled after completion"),
            }
        }
    }
}

impl<T> fmt::Debug for Offload<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            State::NotSubmitted => "NotSubmitted",
            State::Waiting(_) => "Waiting",
            State::Complete => "Complete",
        };
        f.debug_struct("Offload").field("state", &state).finish()
    }
}
