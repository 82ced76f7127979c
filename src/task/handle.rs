use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use log::{error, trace};

use crate::error::{Error, Result};
use crate::executor::loop_thread::{self, Message};
use crate::executor::ExecutorId;
use crate::task::TaskId;
use crate::utils;

/// A handle that waits for the result of a submitted task.
///
/// The handle may be kept on the submitting thread, sent somewhere else, or
/// shared with other threads through [`on_done`] callbacks; any thread can
/// block on it at any time. The task records exactly one outcome: a value, a
/// panic, or a cancellation. Waiting again after the outcome is recorded
/// returns immediately.
///
/// Dropping the handle detaches the task: it keeps running on the loop, but
/// there is no way to read its outcome anymore.
///
/// [`on_done`]: #method.on_done
///
/// # Examples
///
/// ```
/// use taskbridge::AsyncExecutor;
///
/// let executor = AsyncExecutor::new();
/// let handle = executor.submit(async { 1 + 2 }).unwrap();
/// assert_eq!(handle.result().unwrap(), 3);
/// ```
pub struct TaskHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(shared: Arc<Shared<T>>) -> TaskHandle<T> {
        TaskHandle { shared }
    }

    /// Returns the identifier of the underlying task.
    pub fn task_id(&self) -> TaskId {
        self.shared.task
    }

    /// Blocks until the task finishes and returns its output.
    ///
    /// Consumes the handle, like [`std::thread::JoinHandle::join`]. A task
    /// that panicked yields [`Error::TaskFailed`] with the panic message; a
    /// cancelled task yields [`Error::Cancelled`].
    ///
    /// # Errors
    ///
    /// Calling this from the task's own executor would deadlock the loop, so
    /// it fails with [`Error::Misuse`] instead.
    pub fn result(self) -> Result<T> {
        self.shared.wait_take(None)
    }

    /// Blocks until the task finishes or the timeout elapses.
    ///
    /// On [`Error::Timeout`] the task is left untouched and the handle stays
    /// usable, so the wait can be retried. Once a value has been taken out, a
    /// later call reports [`Error::Misuse`].
    pub fn result_timeout(&mut self, timeout: Duration) -> Result<T> {
        self.shared.wait_take(Some(timeout))
    }

    /// Blocks until the task finishes and returns its failure, if any.
    ///
    /// `None` means the task produced a value. Unlike [`result`], this never
    /// consumes the value and can be called any number of times. From the
    /// task's own executor this reports the misuse as the error.
    ///
    /// [`result`]: #method.result
    pub fn exception(&self) -> Option<Error> {
        self.shared.wait_error()
    }

    /// Waits for the task to finish, up to the given timeout.
    ///
    /// Returns whether the outcome was recorded in time. On the executor's
    /// own loop thread this does not block and reports the current state.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.shared.check_same_loop().is_err() {
            return self.is_done();
        }
        self.shared.wait_done(Some(timeout))
    }

    /// Requests cancellation of the task.
    ///
    /// Returns `true` when the request was delivered while the outcome was
    /// still pending. Cancellation is cooperative: the loop drops the task at
    /// its next scheduling point, so a task past its last suspension point
    /// completes normally and [`is_cancelled`] only turns true once the drop
    /// actually happened.
    ///
    /// [`is_cancelled`]: #method.is_cancelled
    pub fn cancel(&self) -> bool {
        {
            let state = self.shared.state.lock().unwrap();
            if !matches!(state.outcome, Outcome::Pending) {
                return false;
            }
        }
        trace!(task_id = self.shared.task.0; "cancel requested");
        self.shared.sender.send(Message::Cancel(self.shared.task)).is_ok()
    }

    /// Returns `true` once the task's outcome is recorded.
    pub fn is_done(&self) -> bool {
        !matches!(self.shared.state.lock().unwrap().outcome, Outcome::Pending)
    }

    /// Returns `true` if the task's outcome is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.shared.state.lock().unwrap().outcome, Outcome::Cancelled)
    }

    /// Registers a callback to run when the task finishes.
    ///
    /// Callbacks run on the loop thread right after the outcome is recorded,
    /// in registration order. If the task is already done, the callback runs
    /// immediately on the calling thread. A panicking callback is logged and
    /// otherwise ignored.
    pub fn on_done<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.shared.state.lock().unwrap();
        if matches!(state.outcome, Outcome::Pending) {
            state.callbacks.push(Box::new(callback));
        } else {
            drop(state);
            callback();
        }
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("task", &self.shared.task)
            .field("done", &self.is_done())
            .finish()
    }
}

/// State shared between a task running on the loop and its waiters.
pub(crate) struct Shared<T> {
    /// Executor the task belongs to, for same-loop wait detection.
    executor: ExecutorId,
    task: TaskId,
    /// Live-task counter of the owning executor.
    live: Arc<AtomicUsize>,
    /// Loop inbox, for cancel requests and completion sweeps.
    sender: Sender<Message>,
    state: Mutex<State<T>>,
    done: Condvar,
}

struct State<T> {
    outcome: Outcome<T>,
    callbacks: Vec<Box<dyn FnOnce() + Send>>,
}

enum Outcome<T> {
    Pending,
    Value(T),
    /// The value was moved out by a successful timed wait.
    Taken,
    Panicked(String),
    Cancelled,
}

impl<T> Outcome<T> {
    fn kind(&self) -> &'static str {
        match self {
            Outcome::Pending => "pending",
            Outcome::Value(_) | Outcome::Taken => "value",
            Outcome::Panicked(_) => "panicked",
            Outcome::Cancelled => "cancelled",
        }
    }
}

impl<T> Shared<T> {
    pub(crate) fn new(
        executor: ExecutorId,
        task: TaskId,
        live: Arc<AtomicUsize>,
        sender: Sender<Message>,
    ) -> Arc<Shared<T>> {
        Arc::new(Shared {
            executor,
            task,
            live,
            sender,
            state: Mutex::new(State {
                outcome: Outcome::Pending,
                callbacks: Vec::new(),
            }),
            done: Condvar::new(),
        })
    }

    fn check_same_loop(&self) -> Result<()> {
        if loop_thread::current_executor() == Some(self.executor) {
            return Err(Error::Misuse(
                "cannot block on a task from inside its own executor",
            ));
        }
        Ok(())
    }

    /// Blocks until the outcome is recorded. Returns `false` on timeout.
    fn wait_done(&self, timeout: Option<Duration>) -> bool {
        // A timeout too large for the clock counts as no deadline at all.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut state = self.state.lock().unwrap();
        loop {
            if !matches!(state.outcome, Outcome::Pending) {
                return true;
            }
            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    let (state, _) = self.done.wait_timeout(state, deadline - now).unwrap();
                    state
                }
                None => self.done.wait(state).unwrap(),
            };
        }
    }

    fn wait_take(&self, timeout: Option<Duration>) -> Result<T> {
        self.check_same_loop()?;
        if !self.wait_done(timeout) {
            return Err(Error::Timeout);
        }
        self.state.lock().unwrap().take_outcome()
    }

    fn wait_error(&self) -> Option<Error> {
        if let Err(err) = self.check_same_loop() {
            return Some(err);
        }
        self.wait_done(None);
        match &self.state.lock().unwrap().outcome {
            Outcome::Panicked(message) => Some(Error::TaskFailed(message.clone())),
            Outcome::Cancelled => Some(Error::Cancelled),
            _ => None,
        }
    }
}

impl<T> State<T> {
    fn take_outcome(&mut self) -> Result<T> {
        match &self.outcome {
            Outcome::Pending => unreachable!("outcome read while still pending"),
            Outcome::Value(_) => match mem::replace(&mut self.outcome, Outcome::Taken) {
                Outcome::Value(value) => Ok(value),
                _ => unreachable!(),
            },
            Outcome::Taken => Err(Error::Misuse("task result already taken")),
            Outcome::Panicked(message) => Err(Error::TaskFailed(message.clone())),
            Outcome::Cancelled => Err(Error::Cancelled),
        }
    }
}

/// Write side of a task's shared state, moved into the wrapped future.
///
/// Exactly one outcome is recorded: `finish` stores the task's value or
/// panic, and dropping the guard without finishing records a cancellation.
/// Either way the waiters are woken, callbacks run, the executor's live-task
/// counter drops, and the loop is told to sweep its registry entry.
pub(crate) struct Completion<T> {
    shared: Arc<Shared<T>>,
    delivered: bool,
}

impl<T> Completion<T> {
    pub(crate) fn new(shared: Arc<Shared<T>>) -> Completion<T> {
        Completion {
            shared,
            delivered: false,
        }
    }

    /// Records the task's outcome.
    pub(crate) fn finish(mut self, result: thread::Result<T>) {
        match result {
            Ok(value) => self.deliver(Outcome::Value(value)),
            Err(payload) => self.deliver(Outcome::Panicked(utils::panic_message(&*payload))),
        }
    }

    fn deliver(&mut self, outcome: Outcome<T>) {
        self.delivered = true;
        let kind = outcome.kind();
        // Drop the live count first, so a waiter woken below already sees
        // it settled.
        self.shared.live.fetch_sub(1, Ordering::SeqCst);
        let callbacks = {
            let mut state = self.shared.state.lock().unwrap();
            debug_assert!(matches!(state.outcome, Outcome::Pending));
            state.outcome = outcome;
            mem::take(&mut state.callbacks)
        };
        self.shared.done.notify_all();
        for callback in callbacks {
            // A panicking callback must not take the loop thread down.
            if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
                error!(task_id = self.shared.task.0; "completion callback panicked");
            }
        }
        trace!(task_id = self.shared.task.0, outcome = kind; "task completed");
        let _ = self.shared.sender.send(Message::Finished(self.shared.task));
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        // The future was dropped before finishing: the task was cancelled.
        if !self.delivered {
            self.deliver(Outcome::Cancelled);
        }
    }
}
