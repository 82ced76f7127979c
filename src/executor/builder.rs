use std::sync::atomic::{AtomicUsize, Ordering};

use crate::executor::AsyncExecutor;

/// Builder that configures the settings of a new executor.
///
/// # Examples
///
/// ```
/// use taskbridge::Builder;
///
/// let executor = Builder::new()
///     .name("render".to_string())
///     .worker_threads(2)
///     .build();
/// let handle = executor.submit(async { 7 }).unwrap();
/// assert_eq!(handle.result().unwrap(), 7);
/// ```
#[derive(Debug, Default)]
pub struct Builder {
    pub(crate) name: Option<String>,
    pub(crate) worker_threads: Option<usize>,
    pub(crate) stack_size: Option<usize>,
}

impl Builder {
    /// Creates a new builder.
    pub fn new() -> Builder {
        Builder {
            name: None,
            worker_threads: None,
            stack_size: None,
        }
    }

    /// Configures the name of the executor.
    ///
    /// The loop thread is named `<name>/loop` and the blocking workers
    /// `<name>/blocking`. Unnamed executors get a generated name.
    pub fn name(mut self, name: String) -> Builder {
        self.name = Some(name);
        self
    }

    /// Configures how many blocking workers the executor may run at once.
    ///
    /// Defaults to the number of logical cores. Workers are started on
    /// demand, so an executor that never offloads a call starts none.
    ///
    /// # Panics
    ///
    /// Panics if `threads` is zero.
    pub fn worker_threads(mut self, threads: usize) -> Builder {
        assert!(threads > 0, "worker_threads must be at least one");
        self.worker_threads = Some(threads);
        self
    }

    /// Configures the stack size of the loop thread, in bytes.
    pub fn stack_size(mut self, stack_size: usize) -> Builder {
        self.stack_size = Some(stack_size);
        self
    }

    /// Builds the executor.
    ///
    /// The loop thread is not started yet; it comes up with the first
    /// submitted task.
    pub fn build(self) -> AsyncExecutor {
        let name = self.name.unwrap_or_else(generated_name);
        let worker_threads = self.worker_threads.unwrap_or_else(num_cpus::get);
        AsyncExecutor::from_parts(name, worker_threads, self.stack_size)
    }
}

fn generated_name() -> String {
    static COUNTER: AtomicUsize = AtomicUsize::new(1);
    format!("taskbridge-{}", COUNTER.fetch_add(1, Ordering::SeqCst))
}
