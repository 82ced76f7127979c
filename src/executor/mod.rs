//! The executor and its lifecycle.
//!
//! An [`AsyncExecutor`] owns three things: a task loop on a dedicated
//! thread, a registry of cancel handles living on that loop, and a pool of
//! blocking workers. The facade itself is cheap to create; the loop thread
//! starts with the first submitted task and stops when the executor shuts
//! down.

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use crossbeam_utils::atomic::AtomicCell;
use log::{error, trace};

use crate::error::{Error, Result};
use crate::task::handle::{Completion, Shared};
use crate::task::offload::{Binding, Offload};
use crate::task::{TaskHandle, TaskId};
use crate::utils::{self, CatchUnwind};

use self::blocking::BlockingPool;
use self::loop_thread::Message;

pub(crate) mod blocking;
pub(crate) mod loop_thread;

mod builder;

pub use builder::Builder;

const NOT_STARTED: u8 = 0;
const RUNNING: u8 = 1;
const SHUTTING_DOWN: u8 = 2;
const STOPPED: u8 = 3;

/// A unique identifier for an executor within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExecutorId(u64);

impl ExecutorId {
    /// Generates a new executor ID.
    pub(crate) fn generate() -> ExecutorId {
        static COUNTER: AtomicCell<u64> = AtomicCell::new(1);

        let id = COUNTER.fetch_add(1);
        if id > u64::MAX / 2 {
            std::process::abort();
        }
        ExecutorId(id)
    }
}

/// An executor bridging synchronous callers and asynchronous tasks.
///
/// Tasks are submitted from any thread and run cooperatively on a single
/// loop thread owned by the executor; [`TaskHandle`]s carry their results
/// back. Inside a task, [`sync_to_async`] hands blocking calls to a thread
/// pool so the loop stays responsive.
///
/// Dropping the executor shuts it down gracefully, waiting for live tasks
/// to finish.
///
/// [`sync_to_async`]: #method.sync_to_async
///
/// # Examples
///
/// ```
/// use taskbridge::AsyncExecutor;
///
/// let executor = AsyncExecutor::new();
///
/// let handle = executor.submit(async { 1 + 2 }).unwrap();
/// assert_eq!(handle.result().unwrap(), 3);
///
/// executor.shutdown();
/// ```
pub struct AsyncExecutor {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) id: ExecutorId,
    name: String,
    /// One of `NOT_STARTED`, `RUNNING`, `SHUTTING_DOWN`, `STOPPED`.
    state: AtomicU8,
    /// Startup and shutdown are serialized through this lock. Shutdown
    /// holds it across the loop join, so a concurrent shutdown blocks
    /// until the first one is through.
    lifecycle: Mutex<Lifecycle>,
    /// Send side of the loop's inbox.
    sender: Sender<Message>,
    /// Tasks whose outcome is not recorded yet.
    live: Arc<AtomicUsize>,
    pub(crate) pool: BlockingPool,
    stack_size: Option<usize>,
}

struct Lifecycle {
    /// Handed to the loop thread when it starts.
    receiver: Option<Receiver<Message>>,
    thread: Option<JoinHandle<()>>,
}

impl AsyncExecutor {
    /// Creates an executor with default settings.
    ///
    /// This is cheap: no thread starts until the first task comes in.
    pub fn new() -> AsyncExecutor {
        Builder::new().build()
    }

    pub(crate) fn from_parts(
        name: String,
        worker_threads: usize,
        stack_size: Option<usize>,
    ) -> AsyncExecutor {
        let (sender, receiver) = unbounded();
        let pool = BlockingPool::new(worker_threads, &name);
        AsyncExecutor {
            inner: Arc::new(Inner {
                id: ExecutorId::generate(),
                name,
                state: AtomicU8::new(NOT_STARTED),
                lifecycle: Mutex::new(Lifecycle {
                    receiver: Some(receiver),
                    thread: None,
                }),
                sender,
                live: Arc::new(AtomicUsize::new(0)),
                pool,
                stack_size,
            }),
        }
    }

    /// Returns the executor's name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the number of tasks whose outcome is not recorded yet.
    pub fn live_tasks(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Returns `true` while the loop thread is up.
    pub fn is_running(&self) -> bool {
        self.inner.state.load(Ordering::SeqCst) == RUNNING
    }

    /// Returns `true` once the executor no longer accepts tasks.
    pub fn is_closed(&self) -> bool {
        self.inner.state.load(Ordering::SeqCst) >= SHUTTING_DOWN
    }

    /// Starts the task loop without submitting anything.
    ///
    /// Submission starts the loop on its own; this exists for callers that
    /// want the thread up front. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Closed`] once shutdown has begun.
    pub fn start(&self) -> Result<()> {
        self.ensure_started()
    }

    /// Submits a future to run on the executor's loop.
    ///
    /// Starts the loop thread if this is the first task. The future runs
    /// cooperatively alongside the executor's other tasks, so it should
    /// never block; blocking calls belong in [`sync_to_async`]. A task
    /// that panics does not disturb the loop, the panic is captured in its
    /// handle.
    ///
    /// [`sync_to_async`]: #method.sync_to_async
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Closed`] once the executor is shutting down.
    ///
    /// # Examples
    ///
    /// ```
    /// use taskbridge::AsyncExecutor;
    ///
    /// let executor = AsyncExecutor::new();
    /// let handle = executor.submit(async { "hello" }).unwrap();
    /// assert_eq!(handle.result().unwrap(), "hello");
    /// ```
    pub fn submit<F, T>(&self, future: F) -> Result<TaskHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.ensure_started()?;

        let task_id = TaskId::generate();
        let shared = Shared::new(
            self.inner.id,
            task_id,
            self.inner.live.clone(),
            self.inner.sender.clone(),
        );
        let completion = Completion::new(shared.clone());
        self.inner.live.fetch_add(1, Ordering::SeqCst);

        // The guard records exactly one outcome: the future's value or
        // panic through `finish`, or a cancellation when the future is
        // dropped unfinished.
        let wrapped = async move {
            let guard = completion;
            let result = CatchUnwind::new(AssertUnwindSafe(future)).await;
            guard.finish(result);
        };

        let sender = self.inner.sender.clone();
        let schedule = move |runnable| {
            // The loop may already be gone when a straggling wake fires.
            let _ = sender.send(Message::Run(runnable));
        };
        let (runnable, task) = async_task::spawn(wrapped, schedule);

        // Register ahead of the first poll so a cancel cannot miss the
        // task. Both go through the same sender, so the order holds.
        let _ = self.inner.sender.send(Message::Register { id: task_id, task });
        runnable.schedule();

        trace!(executor = self.name(), task_id = task_id.as_u64(); "task submitted");
        Ok(TaskHandle::new(shared))
    }

    /// Submits one task per item and returns their handles in input order.
    ///
    /// The handles are independent: waiting on, cancelling, or dropping
    /// one does not affect the others. If the executor closes midway, the
    /// already-submitted tasks keep running detached.
    ///
    /// # Examples
    ///
    /// ```
    /// use taskbridge::AsyncExecutor;
    ///
    /// let executor = AsyncExecutor::new();
    /// let handles = executor.map(|n| async move { n * 2 }, 0..4).unwrap();
    ///
    /// let doubled: Vec<i32> = handles
    ///     .into_iter()
    ///     .map(|handle| handle.result().unwrap())
    ///     .collect();
    /// assert_eq!(doubled, vec![0, 2, 4, 6]);
    /// ```
    pub fn map<F, Fut, I>(&self, f: F, items: I) -> Result<Vec<TaskHandle<Fut::Output>>>
    where
        F: Fn(I::Item) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
        I: IntoIterator,
    {
        items.into_iter().map(|item| self.submit(f(item))).collect()
    }

    /// Wraps a blocking call in a future that runs it on the blocking
    /// pool.
    ///
    /// The call does not start until the future is first polled, and the
    /// future must be awaited from a task on this executor. See
    /// [`Offload`] for the full contract.
    pub fn sync_to_async<F, T>(&self, f: F) -> Offload<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        Offload::new(Binding::Instance(self.inner.clone()), f)
    }

    /// Requests cancellation of every live task.
    ///
    /// Cooperative, like [`TaskHandle::cancel`]: each task is dropped at
    /// its next scheduling point.
    pub fn cancel_all(&self) {
        let _ = self.inner.sender.send(Message::CancelAll);
    }

    /// Shuts the executor down, waiting for live tasks to finish.
    ///
    /// New tasks from outside are refused with [`Error::Closed`] from
    /// this point on, while tasks already on the loop run to completion,
    /// offloaded calls included. The loop thread and the blocking workers
    /// are joined before this returns. Shutting down twice is a no-op.
    ///
    /// # Panics
    ///
    /// Panics when called from one of this executor's own tasks. If the
    /// loop thread itself panicked, the panic is resumed here.
    pub fn shutdown(&self) {
        self.inner.shutdown(false);
    }

    /// Cancels every live task, then shuts the executor down.
    ///
    /// Still waits: cancelled tasks are dropped at their next scheduling
    /// point, and blocking calls already handed to the pool run to
    /// completion first.
    ///
    /// # Panics
    ///
    /// Same contract as [`shutdown`](#method.shutdown).
    pub fn shutdown_now(&self) {
        self.inner.shutdown(true);
    }

    /// Starts a shutdown without waiting for it to finish.
    ///
    /// The loop drains its live tasks and stops on its own; its thread is
    /// joined by a later [`shutdown`](#method.shutdown) call or when the
    /// executor is dropped. Combine with [`cancel_all`](#method.cancel_all)
    /// to drop the backlog instead of draining it.
    pub fn shutdown_background(&self) {
        self.inner.begin_shutdown(false);
    }

    pub(crate) fn executor_inner(&self) -> Arc<Inner> {
        self.inner.clone()
    }

    /// Starts the loop thread on the first call.
    ///
    /// The state is checked before the lifecycle lock is touched, so that
    /// a task submitting during shutdown is refused instead of blocking
    /// on the lock held across the loop join.
    fn ensure_started(&self) -> Result<()> {
        let inner = &self.inner;
        match inner.state.load(Ordering::SeqCst) {
            RUNNING => return Ok(()),
            SHUTTING_DOWN | STOPPED => return Err(Error::Closed),
            _ => {}
        }

        let mut lifecycle = inner.lifecycle.lock().unwrap();
        // The state may have settled while this thread waited for the
        // lock.
        if inner
            .state
            .compare_exchange(NOT_STARTED, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return match inner.state.load(Ordering::SeqCst) {
                RUNNING => Ok(()),
                _ => Err(Error::Closed),
            };
        }

        let receiver = lifecycle
            .receiver
            .take()
            .expect("loop receiver already taken");
        lifecycle.thread = Some(loop_thread::spawn(inner.clone(), receiver));
        trace!(executor = &*inner.name; "executor started");
        Ok(())
    }
}

impl Default for AsyncExecutor {
    fn default() -> AsyncExecutor {
        AsyncExecutor::new()
    }
}

impl fmt::Debug for AsyncExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncExecutor")
            .field("name", &self.inner.name)
            .field("live_tasks", &self.live_tasks())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for AsyncExecutor {
    fn drop(&mut self) {
        if loop_thread::current_executor() == Some(self.inner.id) {
            // Joining the loop from inside itself would deadlock, and a
            // panic here would abort the process. Leak the loop instead.
            error!(
                executor = &*self.inner.name;
                "executor dropped from inside one of its tasks; its threads are leaked"
            );
            return;
        }
        self.inner.begin_shutdown(false);
        self.inner.finish_shutdown(false);
    }
}

impl Inner {
    /// Flips the state to `SHUTTING_DOWN` and tells the loop to stop.
    fn begin_shutdown(&self, cancel: bool) {
        if cancel {
            let _ = self.sender.send(Message::CancelAll);
        }
        loop {
            let state = self.state.load(Ordering::SeqCst);
            if state >= SHUTTING_DOWN {
                return;
            }
            if self
                .state
                .compare_exchange(state, SHUTTING_DOWN, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break;
            }
        }
        let _ = self.sender.send(Message::Stop);
        trace!(executor = &*self.name; "shutdown requested");
    }

    fn shutdown(&self, cancel: bool) {
        if loop_thread::current_executor() == Some(self.id) {
            panic!("cannot shut down an executor from inside one of its tasks");
        }
        self.begin_shutdown(cancel);
        self.finish_shutdown(true);
    }

    /// Joins the loop thread and the blocking workers.
    fn finish_shutdown(&self, resume_panic: bool) {
        let mut lifecycle = match self.lifecycle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let result = match lifecycle.thread.take() {
            Some(thread) => thread.join(),
            None => {
                // Never started, or another caller already joined it.
                lifecycle.receiver = None;
                Ok(())
            }
        };
        self.pool.shutdown();
        self.state.store(STOPPED, Ordering::SeqCst);
        drop(lifecycle);

        match result {
            Ok(()) => trace!(executor = &*self.name; "executor stopped"),
            Err(payload) => {
                error!(
                    executor = &*self.name;
                    "task loop panicked: {}",
                    utils::panic_message(&*payload)
                );
                if resume_panic {
                    panic::resume_unwind(payload);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executor_ids_are_distinct() {
        assert_ne!(ExecutorId::generate(), ExecutorId::generate());
    }

    #[test]
    fn new_executor_is_idle() {
        let executor = AsyncExecutor::new();
        assert!(!executor.is_running());
        assert!(!executor.is_closed());
        assert_eq!(executor.live_tasks(), 0);
    }

    #[test]
    fn unstarted_executor_shuts_down_cleanly() {
        let executor = AsyncExecutor::new();
        executor.shutdown();
        assert!(executor.is_closed());
        assert!(matches!(
            executor.submit(async { 0 }),
            Err(Error::Closed)
        ));
        // A second shutdown is a no-op.
        executor.shutdown();
    }

    #[test]
    fn named_executor_reports_its_name() {
        let executor = Builder::new().name("bridge".to_string()).build();
        assert_eq!(executor.name(), "bridge");
    }
}
