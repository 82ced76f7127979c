use std::time::Duration;

use futures_timer::Delay;

/// Sleeps for the specified amount of time.
///
/// Suspends the current task without blocking the loop thread, so the
/// executor's other tasks keep running while this one waits. This function
/// might sleep for slightly longer than the specified duration but never
/// less.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use taskbridge::{task, AsyncExecutor};
///
/// let executor = AsyncExecutor::new();
/// let handle = executor
///     .submit(async {
///         task::sleep(Duration::from_millis(10)).await;
///         "woke"
///     })
///     .unwrap();
/// assert_eq!(handle.result().unwrap(), "woke");
/// ```
pub async fn sleep(dur: Duration) {
    Delay::new(dur).await
}
