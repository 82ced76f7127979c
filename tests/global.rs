use std::sync::mpsc;
use std::time::Duration;

use taskbridge::{global, task, Builder, Error};

// The global slot is process-wide state, so the whole lifecycle runs as
// one test. The environment opt-in lives in its own test binaries.
#[test]
fn global_executor_lifecycle() {
    // Nothing installed, no env opt-in: eager calls are refused.
    assert!(!global::is_initialized());
    assert!(matches!(
        global::run_async(async { 0 }),
        Err(Error::NotInitialized)
    ));

    // A lazily bound offload only fails once awaited.
    let offload = global::sync_to_async(|| 1);
    assert!(matches!(
        futures::executor::block_on(offload),
        Err(Error::NotInitialized)
    ));

    // The first installation wins.
    assert!(global::init_with(
        Builder::new().name("global-test".to_string())
    ));
    assert!(!global::init());
    assert!(global::is_initialized());
    assert_eq!(global::get().unwrap().name(), "global-test");

    // Work flows through the module-level shortcuts.
    let handle = global::run_async(async { 6 * 7 }).unwrap();
    assert_eq!(handle.result().unwrap(), 42);

    let offload = global::sync_to_async(|| "offloaded");
    let handle = global::run_async(async move { offload.await }).unwrap();
    assert_eq!(handle.result().unwrap().unwrap(), "offloaded");

    // Reset drains the executor and empties the slot.
    let (tx, rx) = mpsc::channel();
    global::run_async(async move {
        task::sleep(Duration::from_millis(50)).await;
        tx.send(()).unwrap();
    })
    .unwrap();
    global::reset();
    assert_eq!(rx.try_recv(), Ok(()));
    assert!(!global::is_initialized());
    assert!(matches!(
        global::run_async(async { 0 }),
        Err(Error::NotInitialized)
    ));

    // A fresh install works after a reset.
    assert!(global::init());
    let handle = global::run_async(async { "again" }).unwrap();
    assert_eq!(handle.result().unwrap(), "again");
    global::reset();
}
