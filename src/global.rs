//! The process-global executor.
//!
//! Library code deep inside a synchronous call stack often has no executor
//! to pass around. This module keeps one per process: the application
//! installs it once with [`init`] or [`init_with`], and any code can then
//! reach it through [`run_async`] and [`sync_to_async`].
//!
//! Processes that never call [`init`] can opt in through the environment
//! instead: when [`ENV_INIT`] holds a non-empty value, the first use
//! installs a default executor on the fly. The variable is read once and
//! the answer is kept for the life of the process.
//!
//! The slot itself is an ordinary value, [`GlobalExecutor`]; the functions
//! here all act on one process-wide instance. Tests that want to exercise
//! installation against a clean slate can stage their own holder instead of
//! fighting over the shared one.
//!
//! # Examples
//!
//! ```
//! use taskbridge::global;
//!
//! global::init();
//!
//! let handle = global::run_async(async { 40 + 2 }).unwrap();
//! assert_eq!(handle.result().unwrap(), 42);
//! ```

use std::env;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock};

use log::trace;
use once_cell::sync::Lazy;

use crate::error::{Error, Result};
use crate::executor::{AsyncExecutor, Builder, Inner};
use crate::task::offload::{Binding, Offload};
use crate::task::TaskHandle;

/// The environment variable that opts the process into a lazily installed
/// global executor.
///
/// Any non-empty value counts as opting in. It is observed once, on the
/// first use of this module; changing it afterwards has no effect.
pub const ENV_INIT: &str = "TASKBRIDGE_INIT";

static GLOBAL: GlobalExecutor = GlobalExecutor::new();

static ENV_OPTED_IN: Lazy<bool> = Lazy::new(|| {
    env::var(ENV_INIT)
        .map(|value| !value.is_empty())
        .unwrap_or(false)
});

/// A slot holding at most one shared executor.
///
/// The process-wide slot behind [`init`] and [`run_async`] is one of these;
/// fresh instances exist so tests can run the installation protocol without
/// touching process state. Installation is first-wins: once a slot is
/// filled, later installs return `false` and change nothing until
/// [`reset`](GlobalExecutor::reset) empties it.
pub struct GlobalExecutor {
    slot: RwLock<Option<Arc<AsyncExecutor>>>,
}

impl GlobalExecutor {
    /// Creates an empty slot.
    pub const fn new() -> GlobalExecutor {
        GlobalExecutor {
            slot: RwLock::new(None),
        }
    }

    /// Installs an executor with default settings.
    ///
    /// Returns `true` when this call installed it and `false` when one was
    /// already in place.
    pub fn init(&self) -> bool {
        self.init_with(default_builder())
    }

    /// Installs the executor built from `builder`.
    ///
    /// Same contract as [`init`](GlobalExecutor::init): only the first
    /// installation takes effect.
    pub fn init_with(&self, builder: Builder) -> bool {
        let mut slot = self.slot.write().unwrap();
        if slot.is_some() {
            return false;
        }
        let executor = Arc::new(builder.build());
        trace!(executor = executor.name(); "global executor installed");
        *slot = Some(executor);
        true
    }

    /// Installs a default executor when the environment variable `var`
    /// holds a non-empty value.
    ///
    /// Reads `var` at the time of the call. Returns `true` only when this
    /// call installed the executor; an unset or empty variable, like an
    /// already filled slot, leaves the slot alone.
    pub fn init_from_env(&self, var: &str) -> bool {
        let opted_in = env::var(var)
            .map(|value| !value.is_empty())
            .unwrap_or(false);
        opted_in && self.init()
    }

    /// Returns the installed executor.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotInitialized`] while the slot is empty.
    pub fn get(&self) -> Result<Arc<AsyncExecutor>> {
        self.slot
            .read()
            .unwrap()
            .clone()
            .ok_or(Error::NotInitialized)
    }

    /// Returns `true` while an executor is installed.
    pub fn is_initialized(&self) -> bool {
        self.slot.read().unwrap().is_some()
    }

    /// Empties the slot and shuts the executor down, waiting for its tasks.
    ///
    /// Safe to call when nothing is installed.
    pub fn reset(&self) {
        // The slot is released before the shutdown wait, so tasks still
        // draining can keep using the executor through clones they hold.
        let executor = self.slot.write().unwrap().take();
        if let Some(executor) = executor {
            executor.shutdown();
        }
    }
}

impl Default for GlobalExecutor {
    fn default() -> GlobalExecutor {
        GlobalExecutor::new()
    }
}

impl fmt::Debug for GlobalExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalExecutor")
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

fn default_builder() -> Builder {
    Builder::new().name("taskbridge-global".to_string())
}

/// Installs the global executor with default settings.
///
/// Returns `true` when this call installed it and `false` when one was
/// already in place; the first installation wins and later calls change
/// nothing.
pub fn init() -> bool {
    GLOBAL.init()
}

/// Installs the global executor built from `builder`.
///
/// Same contract as [`init`]: only the first installation takes effect.
pub fn init_with(builder: Builder) -> bool {
    GLOBAL.init_with(builder)
}

/// Returns `true` while a global executor is installed.
pub fn is_initialized() -> bool {
    GLOBAL.is_initialized()
}

/// Returns the global executor.
///
/// # Errors
///
/// Fails with [`Error::NotInitialized`] when none is installed and the
/// environment did not opt in through [`ENV_INIT`].
pub fn get() -> Result<Arc<AsyncExecutor>> {
    match GLOBAL.get() {
        Err(Error::NotInitialized) if *ENV_OPTED_IN => {
            GLOBAL.init();
            GLOBAL.get()
        }
        other => other,
    }
}

/// Submits a future to the global executor.
///
/// A missing global executor surfaces here, at the call site.
///
/// # Errors
///
/// Fails with [`Error::NotInitialized`] when no global executor is
/// available, or [`Error::Closed`] when it has shut down.
pub fn run_async<F, T>(future: F) -> Result<TaskHandle<T>>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    get()?.submit(future)
}

/// Wraps a blocking call in a future bound to the global executor.
///
/// Resolution is lazy: a missing global executor only surfaces as
/// [`Error::NotInitialized`] once the future is awaited.
///
/// # Examples
///
/// ```
/// use taskbridge::global;
///
/// global::init();
///
/// let offload = global::sync_to_async(|| 21 * 2);
/// let handle = global::run_async(async move { offload.await }).unwrap();
/// assert_eq!(handle.result().unwrap().unwrap(), 42);
/// ```
pub fn sync_to_async<F, T>(f: F) -> Offload<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Offload::new(Binding::Global, f)
}

/// Uninstalls the global executor and shuts it down, waiting for its
/// tasks.
///
/// Meant for test harnesses that need a clean slate between cases; a
/// process normally keeps its global executor for its whole life. Safe to
/// call when nothing is installed.
pub fn reset() {
    GLOBAL.reset();
}

pub(crate) fn executor_inner() -> Result<Arc<Inner>> {
    Ok(get()?.executor_inner())
}
