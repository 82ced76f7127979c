use std::fmt;

use crossbeam_utils::atomic::AtomicCell;

/// A unique identifier for a submitted task.
///
/// # Examples
///
/// ```
/// use taskbridge::AsyncExecutor;
///
/// let executor = AsyncExecutor::new();
/// let handle = executor.submit(async { 1 + 2 }).unwrap();
/// println!("id = {}", handle.task_id());
/// ```
#[derive(Eq, PartialEq, Clone, Copy, Hash, Debug)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
    /// Generates a new `TaskId`.
    pub(crate) fn generate() -> TaskId {
        static COUNTER: AtomicCell<u64> = AtomicCell::new(1);

        let id = COUNTER.fetch_add(1);
        if id > u64::MAX / 2 {
            std::process::abort();
        }
        TaskId(id)
    }

    /// Returns the identifier as an integer.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
