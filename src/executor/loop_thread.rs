//! The dedicated thread driving an executor's task loop.
//!
//! The loop is a plain channel receiver: polling a task, registering or
//! cancelling one, and stopping are all messages in one inbox, so every
//! operation on the loop is naturally serialized and needs no further
//! locking. Parking and waking come for free from the blocking receive.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use async_task::{Runnable, Task};
use crossbeam_channel::Receiver;
use log::trace;

use crate::executor::{ExecutorId, Inner};
use crate::task::TaskId;

pub(crate) enum Message {
    /// A task ready to be polled.
    Run(Runnable),
    /// A new task's cancel handle, sent ahead of its first poll.
    Register { id: TaskId, task: Task<()> },
    /// Drop a task's cancel handle, cancelling it at its next scheduling
    /// point.
    Cancel(TaskId),
    /// A task delivered its outcome; its registry entry can go.
    Finished(TaskId),
    /// Drop every cancel handle.
    CancelAll,
    /// Stop once the live-task count reaches zero.
    Stop,
}

pub(crate) fn spawn(inner: Arc<Inner>, receiver: Receiver<Message>) -> JoinHandle<()> {
    let mut builder = thread::Builder::new().name(format!("{}/loop", inner.name));
    if let Some(stack_size) = inner.stack_size {
        builder = builder.stack_size(stack_size);
    }
    builder
        .spawn(move || {
            let id = inner.id;
            set_current(id, || main_loop(inner, receiver))
        })
        .expect("cannot start a thread driving the task loop")
}

fn main_loop(inner: Arc<Inner>, receiver: Receiver<Message>) {
    trace!(executor = &*inner.name; "task loop started");

    // Cancel handles of live tasks. Dropping a handle cancels its task;
    // dropping the whole registry on the way out cancels whatever is left.
    let mut registry: HashMap<TaskId, Task<()>> = HashMap::new();
    let mut stopping = false;

    while let Ok(message) = receiver.recv() {
        match message {
            Message::Run(runnable) => {
                runnable.run();
            }
            Message::Register { id, task } => {
                registry.insert(id, task);
            }
            Message::Cancel(id) => {
                registry.remove(&id);
            }
            Message::Finished(id) => {
                registry.remove(&id);
            }
            Message::CancelAll => registry.clear(),
            Message::Stop => stopping = true,
        }

        if stopping && inner.live.load(Ordering::SeqCst) == 0 {
            break;
        }
    }

    trace!(executor = &*inner.name; "task loop stopped");
}

thread_local! {
    static CURRENT: Cell<Option<ExecutorId>> = Cell::new(None);
}

/// Returns the executor whose loop is driving the current thread, if any.
pub(crate) fn current_executor() -> Option<ExecutorId> {
    CURRENT.try_with(|current| current.get()).unwrap_or(None)
}

fn set_current<F, R>(id: ExecutorId, f: F) -> R
where
    F: FnOnce() -> R,
{
    struct Reset<'a>(&'a Cell<Option<ExecutorId>>);

    impl Drop for Reset<'_> {
        fn drop(&mut self) {
            self.0.set(None);
        }
    }

    CURRENT.with(|current| {
        current.set(Some(id));
        let _guard = Reset(current);

        f()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_executor_is_scoped_to_the_closure() {
        let id = ExecutorId::generate();
        assert_eq!(current_executor(), None);
        set_current(id, || assert_eq!(current_executor(), Some(id)));
        assert_eq!(current_executor(), None);
    }
}
