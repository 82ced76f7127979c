//! Tasks and their handles.
//!
//! A task is a future running cooperatively on an executor's loop thread.
//! Submitting one yields a [`TaskHandle`] any thread can block on;
//! [`Offload`] goes the other way and suspends a task while a blocking
//! call runs on the executor's worker pool.
//!
//! # Examples
//!
//! Submit a task and block on its result:
//!
//! ```
//! use taskbridge::AsyncExecutor;
//!
//! let executor = AsyncExecutor::new();
//!
//! let handle = executor.submit(async {
//!     1 + 2
//! }).unwrap();
//! assert_eq!(handle.result().unwrap(), 3);
//! ```

pub use handle::TaskHandle;
pub use offload::Offload;
pub use sleep::sleep;
pub use task_id::TaskId;

mod sleep;
mod task_id;

pub(crate) mod handle;
pub(crate) mod offload;
