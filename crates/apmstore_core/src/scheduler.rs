//! Maintenance scheduler.

use crate::error::CoreResult;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

/// Runs periodic maintenance ticks and delayed actions.
///
/// Rotation checks, writing status samples, disk checks, size refreshes,
/// deferred index persistence and recording timers all run here, never on
/// the write pools. Blocking work is moved to the runtime's blocking threads.
#[derive(Debug)]
pub struct Scheduler {
    runtime: Option<Runtime>,
    handle: Handle,
}

impl Scheduler {
    /// Starts a scheduler with its own runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be built.
    pub fn new() -> CoreResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("apmstore-scheduler")
            .enable_time()
            .build()?;
        let handle = runtime.handle().clone();
        Ok(Self {
            runtime: Some(runtime),
            handle,
        })
    }

    /// Spawns a future on the scheduler.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Runs `task` every `period`, starting one period from now.
    ///
    /// The task runs on a blocking thread and returns `false` to stop the
    /// schedule.
    pub fn every<F>(&self, period: Duration, task: F) -> JoinHandle<()>
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        let task = Arc::new(task);
        self.handle.spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let task = Arc::clone(&task);
                match tokio::task::spawn_blocking(move || task()).await {
                    Ok(true) => {}
                    _ => break,
                }
            }
        })
    }

    /// Runs `task` once after `delay` on a blocking thread.
    pub fn after<F>(&self, delay: Duration, task: F) -> JoinHandle<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            // the blocking closure runs to completion even if this task is aborted
            let _ = tokio::task::spawn_blocking(task).await;
        })
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[test]
    fn every_repeats_until_false() {
        let scheduler = Scheduler::new().unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        let counter = Arc::clone(&count);
        let tx = parking_lot::Mutex::new(tx);
        scheduler.every(Duration::from_millis(5), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 3 {
                tx.lock().send(()).unwrap();
                return false;
            }
            true
        });

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn after_runs_once() {
        let scheduler = Scheduler::new().unwrap();
        let (tx, rx) = mpsc::channel();
        scheduler.after(Duration::from_millis(5), move || tx.send(42).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }

    #[test]
    fn aborted_timer_never_fires() {
        let scheduler = Scheduler::new().unwrap();
        let (tx, rx) = mpsc::channel::<()>();
        let handle = scheduler.after(Duration::from_millis(200), move || tx.send(()).unwrap());
        handle.abort();
        assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());
    }
}
