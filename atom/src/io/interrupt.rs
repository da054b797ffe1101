//! Cooperative cancellation and interruptible waiting.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::debug;

use crate::error::AtomError;

/// Granularity at which blocking waits re-check the cancel flag.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shared flag flipped by an external interrupt (e.g. Ctrl-C).
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fail with [`AtomError::Interrupted`] if cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(AtomError::Interrupted.into());
        }
        Ok(())
    }
}

/// Blocking wait between retries.
pub trait Sleeper {
    /// Wait for `duration`, returning early with [`AtomError::Interrupted`]
    /// if `cancel` fires.
    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> Result<()>;
}

/// Sleeps on the calling thread in [`POLL_INTERVAL`] slices.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> Result<()> {
        debug!(wait_secs = duration.as_secs(), "backoff sleep");
        let deadline = Instant::now() + duration;
        loop {
            cancel.check()?;
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return Ok(());
            };
            if remaining.is_zero() {
                return Ok(());
            }
            thread::sleep(remaining.min(POLL_INTERVAL));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FailureReason;
    use crate::error::failure_reason;

    #[test]
    fn zero_sleep_returns_immediately() {
        ThreadSleeper
            .sleep(Duration::ZERO, &CancelToken::new())
            .expect("sleep");
    }

    #[test]
    fn cancelled_token_interrupts_sleep() {
        let token = CancelToken::new();
        let remote = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.cancel();
        });

        let started = Instant::now();
        let err = ThreadSleeper
            .sleep(Duration::from_secs(30), &token)
            .unwrap_err();
        handle.join().expect("join");

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(failure_reason(&err), Some(FailureReason::Interrupted));
    }
}
