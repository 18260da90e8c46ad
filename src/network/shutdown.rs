//! Cooperative cancellation for worker threads

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Granularity of cancellable sleeps
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Cancellation context shared between a worker and its owner
///
/// Workers check it on every socket timeout return and sleep through it,
/// so cancelling wakes them within one slice.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    cancelled: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless cancelled first.
    /// Returns `false` if the token was cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

/// Join a worker, giving up after `timeout`
///
/// A worker that does not finish in time is detached and logged.
pub fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration, name: &str) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            tracing::warn!("[{}] worker did not exit within {:?}, detaching", name, timeout);
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
    if handle.join().is_err() {
        tracing::error!("[{}] worker panicked", name);
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_completes_when_not_cancelled() {
        let token = ShutdownToken::new();
        assert!(token.sleep(Duration::from_millis(20)));
    }

    #[test]
    fn test_cancel_wakes_sleeper() {
        let token = ShutdownToken::new();
        let worker = token.clone();
        let start = Instant::now();
        let handle = thread::spawn(move || {
            worker.sleep(Duration::from_secs(30));
        });

        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(join_with_timeout(handle, Duration::from_secs(2), "test"));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
