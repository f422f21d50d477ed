//! Bounded waiting for in-flight work to drain.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Wakes threads and tasks waiting for a counter or set to drain.
///
/// Blocking callers use [`DrainSignal::wait_until`]; async callers await
/// [`DrainSignal::notified`].
#[derive(Debug, Default)]
pub(crate) struct DrainSignal {
    lock: Mutex<()>,
    cond: Condvar,
    notify: Notify,
}

impl DrainSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wakes every waiter. Call after the watched state changed.
    pub(crate) fn notify(&self) {
        {
            let _guard = self.lock.lock();
            self.cond.notify_all();
        }
        self.notify.notify_waiters();
    }

    pub(crate) fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.notify.notified()
    }

    /// Blocks until `drained` returns true, giving up after `iterations`
    /// waits of `interval` each.
    ///
    /// Returns false if the bound was hit. Progress is logged per iteration
    /// and a warning is logged when giving up.
    pub(crate) fn wait_until(
        &self,
        drained: impl Fn() -> bool,
        interval: Duration,
        iterations: u32,
        what: &str,
    ) -> bool {
        for iteration in 1..=iterations {
            let mut guard = self.lock.lock();
            if drained() {
                return true;
            }
            self.cond.wait_for(&mut guard, interval);
            drop(guard);

            if drained() {
                return true;
            }
            info!(iteration, max_iterations = iterations, "waiting for {what} to drain");
        }

        if drained() {
            return true;
        }
        warn!(
            iterations,
            "{what} did not drain in time, proceeding anyway"
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn returns_immediately_when_drained() {
        let signal = DrainSignal::new();
        assert!(signal.wait_until(|| true, Duration::from_secs(10), 3, "tasks"));
    }

    #[test]
    fn wakes_on_notify() {
        let signal = Arc::new(DrainSignal::new());
        let pending = Arc::new(AtomicUsize::new(1));

        let worker = {
            let signal = Arc::clone(&signal);
            let pending = Arc::clone(&pending);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                pending.store(0, Ordering::SeqCst);
                signal.notify();
            })
        };

        let drained = signal.wait_until(
            || pending.load(Ordering::SeqCst) == 0,
            Duration::from_secs(5),
            2,
            "tasks",
        );
        worker.join().unwrap();
        assert!(drained);
    }

    #[test]
    fn gives_up_after_bound() {
        let signal = DrainSignal::new();
        let drained = signal.wait_until(|| false, Duration::from_millis(1), 3, "tasks");
        assert!(!drained);
    }
}
