//! A thread pool dedicated to offloaded blocking calls.
//!
//! Threads start on demand up to a configured cap and decay after a second
//! of idleness, keeping one warm for the next burst. Shutting the pool down
//! disconnects its queue, lets the workers drain it, and joins them.

use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::error::{Error, Result};

/// How long an extra worker waits for work before stopping.
const KEEP_ALIVE: Duration = Duration::from_secs(1);

pub(crate) type Job = Box<dyn FnOnce() + Send>;

pub(crate) struct BlockingPool {
    inner: Arc<Inner>,
}

struct Inner {
    /// Taken on shutdown, disconnecting the workers.
    sender: Mutex<Option<Sender<Job>>>,
    receiver: Receiver<Job>,
    /// The number of workers blocked on the queue.
    idle: AtomicUsize,
    /// The number of live workers.
    threads: AtomicUsize,
    limit: usize,
    name: String,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl BlockingPool {
    pub(crate) fn new(limit: usize, executor_name: &str) -> BlockingPool {
        debug_assert!(limit >= 1);
        let (sender, receiver) = unbounded();
        BlockingPool {
            inner: Arc::new(Inner {
                sender: Mutex::new(Some(sender)),
                receiver,
                idle: AtomicUsize::new(0),
                threads: AtomicUsize::new(0),
                limit,
                name: format!("{}/blocking", executor_name),
                handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Queues a job, starting a worker if none is waiting for work.
    pub(crate) fn schedule(&self, job: Job) -> Result<()> {
        let sender = self.inner.sender.lock().unwrap();
        let sender = sender.as_ref().ok_or(Error::Closed)?;
        if self.inner.idle.load(Ordering::SeqCst) == 0 {
            Inner::start_thread(&self.inner);
        }
        sender.send(job).map_err(|_| Error::Closed)
    }

    /// Disconnects the queue and joins the workers.
    ///
    /// Jobs already queued still run to completion first. Scheduling after
    /// this fails with [`Error::Closed`]. Calling it a second time is a
    /// no-op.
    pub(crate) fn shutdown(&self) {
        drop(self.inner.sender.lock().unwrap().take());
        let handles = mem::take(&mut *self.inner.handles.lock().unwrap());
        for handle in handles {
            let _ = handle.join();
        }
    }

    #[cfg(test)]
    pub(crate) fn thread_count(&self) -> usize {
        self.inner.threads.load(Ordering::SeqCst)
    }
}

impl Inner {
    fn start_thread(inner: &Arc<Inner>) {
        if inner.threads.fetch_add(1, Ordering::SeqCst) >= inner.limit {
            inner.threads.fetch_sub(1, Ordering::SeqCst);
            return;
        }
        inner.idle.fetch_add(1, Ordering::SeqCst);

        let worker = inner.clone();
        let receiver = inner.receiver.clone();
        let thread = thread::Builder::new()
            .name(inner.name.clone())
            .spawn(move || worker.work(receiver))
            .expect("cannot start a blocking thread");

        let mut handles = inner.handles.lock().unwrap();
        handles.retain(|handle| !handle.is_finished());
        handles.push(thread);
    }

    fn work(&self, receiver: Receiver<Job>) {
        loop {
            let job = match receiver.recv_timeout(KEEP_ALIVE) {
                Ok(job) => job,
                Err(RecvTimeoutError::Timeout) => {
                    // Check whether this is the last idle worker. If so,
                    // stay warm for the next burst instead of stopping.
                    if self.idle.fetch_sub(1, Ordering::SeqCst) == 1 {
                        self.idle.fetch_add(1, Ordering::SeqCst);
                        continue;
                    }
                    self.threads.fetch_sub(1, Ordering::SeqCst);
                    return;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.idle.fetch_sub(1, Ordering::SeqCst);
                    self.threads.fetch_sub(1, Ordering::SeqCst);
                    return;
                }
            };
            self.idle.fetch_sub(1, Ordering::SeqCst);

            job();
            // Take whatever queued up while this job ran.
            while let Ok(job) = receiver.try_recv() {
                job();
            }

            self.idle.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn runs_scheduled_jobs() {
        let pool = BlockingPool::new(4, "test");
        let (tx, rx) = mpsc::channel();
        for i in 0..8 {
            let tx = tx.clone();
            pool.schedule(Box::new(move || tx.send(i).unwrap())).unwrap();
        }
        let mut seen: Vec<i32> = (0..8)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..8).collect::<Vec<_>>());
        pool.shutdown();
    }

    #[test]
    fn schedule_after_shutdown_is_rejected() {
        let pool = BlockingPool::new(2, "test");
        pool.schedule(Box::new(|| {})).unwrap();
        pool.shutdown();
        assert!(matches!(pool.schedule(Box::new(|| {})), Err(Error::Closed)));
    }

    #[test]
    fn shutdown_drains_queued_jobs() {
        let pool = BlockingPool::new(1, "test");
        let (tx, rx) = mpsc::channel();
        for _ in 0..3 {
            let tx = tx.clone();
            pool.schedule(Box::new(move || {
                thread::sleep(Duration::from_millis(20));
                tx.send(()).unwrap();
            }))
            .unwrap();
        }
        pool.shutdown();
        // All three jobs must have finished before shutdown returned.
        for _ in 0..3 {
            rx.try_recv().unwrap();
        }
    }

    #[test]
    fn worker_count_respects_limit() {
        let pool = BlockingPool::new(2, "test");
        let (release_tx, release_rx) = mpsc::channel();
        let release_rx = Arc::new(Mutex::new(release_rx));
        for _ in 0..6 {
            let release_rx = release_rx.clone();
            pool.schedule(Box::new(move || {
                let _ = release_rx
                    .lock()
                    .unwrap()
                    .recv_timeout(Duration::from_secs(5));
            }))
            .unwrap();
        }
        thread::sleep(Duration::from_millis(100));
        assert!(pool.thread_count() <= 2);
        for _ in 0..6 {
            release_tx.send(()).unwrap();
        }
        pool.shutdown();
    }
}
