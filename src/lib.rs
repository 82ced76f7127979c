//! Bridge synchronous code and asynchronous tasks over a dedicated
//! executor thread.
//!
//! An [`AsyncExecutor`] runs futures cooperatively on a single loop thread
//! it owns. Synchronous callers submit work from any thread and block on
//! the returned [`TaskHandle`]s for results; inside a task, blocking calls
//! go the other way through [`AsyncExecutor::sync_to_async`], which hands
//! them to a worker pool so the loop keeps turning. Code with no executor
//! of its own to pass around can lean on the process-wide one in
//! [`global`].
//!
//! # Examples
//!
//! Submit a task and block the current thread on its result:
//!
//! ```
//! use taskbridge::AsyncExecutor;
//!
//! let executor = AsyncExecutor::new();
//!
//! let handle = executor.submit(async { 2 + 2 }).unwrap();
//! assert_eq!(handle.result().unwrap(), 4);
//! ```
//!
//! Offload a blocking call from inside a task:
//!
//! ```
//! use std::time::Duration;
//!
//! use taskbridge::AsyncExecutor;
//!
//! let executor = AsyncExecutor::new();
//!
//! let offload = executor.sync_to_async(|| {
//!     std::thread::sleep(Duration::from_millis(10));
//!     "done"
//! });
//! let handle = executor.submit(async move { offload.await }).unwrap();
//! assert_eq!(handle.result().unwrap().unwrap(), "done");
//! ```

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![doc(test(attr(deny(rust_2018_idioms, warnings))))]
#![doc(test(attr(allow(unused_extern_crates, unused_variables))))]

pub use error::{Error, Result};
pub use executor::{AsyncExecutor, Builder};
pub use task::{Offload, TaskHandle, TaskId};

pub mod global;
pub mod task;

mod error;
mod executor;
mod utils;
