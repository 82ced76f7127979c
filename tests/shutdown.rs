use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use futures::channel::oneshot;

use taskbridge::{task, AsyncExecutor, Error};

#[test]
fn shutdown_waits_for_live_tasks() {
    let executor = AsyncExecutor::new();
    let (tx, rx) = mpsc::channel();
    let _handle = executor
        .submit(async move {
            task::sleep(Duration::from_millis(100)).await;
            tx.send("drained").unwrap();
        })
        .unwrap();

    executor.shutdown();
    assert_eq!(rx.try_recv().unwrap(), "drained");
    assert!(executor.is_closed());
    assert!(!executor.is_running());
}

#[test]
fn submit_after_shutdown_is_refused() {
    let executor = AsyncExecutor::new();
    executor.submit(async {}).unwrap().result().unwrap();
    executor.shutdown();
    assert!(matches!(executor.submit(async { 1 }), Err(Error::Closed)));
    assert!(matches!(
        executor.map(|n: i32| async move { n }, 0..3),
        Err(Error::Closed)
    ));
}

#[test]
fn draining_task_finishes_its_offload() {
    // A task caught by the shutdown can still push blocking work to the
    // pool while it drains.
    let executor = AsyncExecutor::new();
    let (started_tx, started_rx) = mpsc::channel();
    let (tx, rx) = mpsc::channel();
    let offload = executor.sync_to_async(|| "offloaded during drain");
    let _handle = executor
        .submit(async move {
            started_tx.send(()).unwrap();
            task::sleep(Duration::from_millis(50)).await;
            tx.send(offload.await.unwrap()).unwrap();
        })
        .unwrap();

    started_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    executor.shutdown();
    assert_eq!(rx.try_recv().unwrap(), "offloaded during drain");
}

#[test]
fn submitting_from_a_draining_task_fails_cleanly() {
    let executor = Arc::new(AsyncExecutor::new());
    let (started_tx, started_rx) = mpsc::channel();
    let (result_tx, result_rx) = mpsc::channel();
    let clone = executor.clone();
    let _handle = executor
        .submit(async move {
            started_tx.send(()).unwrap();
            task::sleep(Duration::from_millis(100)).await;
            // The executor is shutting down by now; this must fail
            // instead of deadlocking against the joining shutdown.
            result_tx
                .send(clone.submit(async { 0 }).map(|_| ()))
                .unwrap();
        })
        .unwrap();

    started_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    executor.shutdown();
    assert!(matches!(result_rx.try_recv().unwrap(), Err(Error::Closed)));
}

#[test]
fn shutdown_now_cancels_the_backlog() {
    let executor = AsyncExecutor::new();
    let (_gate_tx, gate_rx) = oneshot::channel::<()>();
    let handle = executor
        .submit(async move {
            let _ = gate_rx.await;
        })
        .unwrap();

    executor.shutdown_now();
    assert!(handle.is_cancelled());
    assert!(executor.is_closed());
    assert_eq!(executor.live_tasks(), 0);
}

#[test]
fn shutdown_background_does_not_wait() {
    let executor = AsyncExecutor::new();
    let (tx, rx) = mpsc::channel();
    let _handle = executor
        .submit(async move {
            task::sleep(Duration::from_millis(200)).await;
            tx.send(()).unwrap();
        })
        .unwrap();

    executor.shutdown_background();
    assert!(executor.is_closed());
    // Still draining in the background.
    assert!(rx.try_recv().is_err());

    // A full shutdown joins what the background one started.
    executor.shutdown();
    assert_eq!(rx.try_recv(), Ok(()));
}

#[test]
fn cancel_all_with_background_shutdown_drains_quickly() {
    let executor = AsyncExecutor::new();
    let handles: Vec<_> = (0..4)
        .map(|_| {
            executor
                .submit(async {
                    task::sleep(Duration::from_secs(60)).await;
                })
                .unwrap()
        })
        .collect();
    assert_eq!(executor.live_tasks(), 4);

    executor.cancel_all();
    executor.shutdown_background();
    assert!(executor.is_closed());

    // The minute-long sleepers must be swept well before their timers fire.
    for handle in &handles {
        assert!(handle.wait_timeout(Duration::from_secs(10)));
        assert!(handle.is_cancelled());
    }
    assert_eq!(executor.live_tasks(), 0);
}

#[test]
fn racing_shutdowns_all_return() {
    let executor = Arc::new(AsyncExecutor::new());
    let _handle = executor
        .submit(async {
            task::sleep(Duration::from_millis(50)).await;
        })
        .unwrap();

    let mut threads = Vec::new();
    for _ in 0..4 {
        let executor = executor.clone();
        threads.push(thread::spawn(move || executor.shutdown()));
    }
    for thread in threads {
        thread.join().unwrap();
    }
    assert!(executor.is_closed());
}

#[test]
fn shutdown_from_inside_a_task_panics_the_task() {
    let executor = Arc::new(AsyncExecutor::new());
    let clone = executor.clone();
    let handle = executor
        .submit(async move {
            clone.shutdown();
        })
        .unwrap();

    match handle.result() {
        Err(Error::TaskFailed(message)) => assert!(message.contains("cannot shut down")),
        other => panic!("unexpected outcome: {:?}", other),
    }

    // The refusal left the executor intact.
    let handle = executor.submit(async { 2 }).unwrap();
    assert_eq!(handle.result().unwrap(), 2);
}

#[test]
fn dropping_the_executor_drains_it() {
    let (tx, rx) = mpsc::channel();
    let executor = AsyncExecutor::new();
    executor
        .submit(async move {
            task::sleep(Duration::from_millis(50)).await;
            tx.send("drained").unwrap();
        })
        .unwrap();

    drop(executor);
    assert_eq!(rx.try_recv().unwrap(), "drained");
}

#[test]
fn unwinding_out_of_scope_still_drains() {
    let (tx, rx) = mpsc::channel();
    let thread = thread::spawn(move || {
        let executor = AsyncExecutor::new();
        executor
            .submit(async move {
                task::sleep(Duration::from_millis(50)).await;
                tx.send("drained").unwrap();
            })
            .unwrap();
        panic!("caller failure");
    });

    // The unwind drops the executor, which still waits for the task.
    assert!(thread.join().is_err());
    assert_eq!(rx.try_recv().unwrap(), "drained");
}
