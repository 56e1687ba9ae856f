//! Cooperative cancellation
//!
//! The flag is checked by the retry loop at the top of every attempt, never
//! in the middle of a body. Long-running bodies that want to notice a
//! cancellation earlier poll [`CancellationToken::is_cancelled`] or sleep via
//! [`CancellationToken::wait`]. Interrupting an in-flight remote operation is
//! a separate out-of-band call (`Task::abort`).

use crate::error::Cancelled;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Slice used by [`CancellationToken::wait`] between flag checks.
pub const DEFAULT_WAIT_SLICE: Duration = Duration::from_secs(5);

/// Shared cancellation flag. The default token can never be cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Option<Arc<AtomicBool>>,
}

impl CancellationToken {
    /// A token that can be cancelled through any of its clones.
    pub fn new() -> Self {
        Self {
            flag: Some(Arc::new(AtomicBool::new(false))),
        }
    }

    /// A token that is never cancelled.
    pub fn none() -> Self {
        Self { flag: None }
    }

    /// Request cancellation. No effect on [`CancellationToken::none`].
    pub fn cancel(&self) {
        if let Some(flag) = &self.flag {
            flag.store(true, Ordering::SeqCst);
        }
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// False for [`CancellationToken::none`].
    pub fn can_be_cancelled(&self) -> bool {
        self.flag.is_some()
    }

    /// Sleep for `total`, checking the flag every [`DEFAULT_WAIT_SLICE`].
    pub fn wait(&self, total: Duration) -> Result<(), Cancelled> {
        self.wait_in_slices(total, DEFAULT_WAIT_SLICE)
    }

    /// Sleep for `total` in steps of at most `slice`, returning early with
    /// [`Cancelled`] once the flag is set.
    pub fn wait_in_slices(&self, total: Duration, slice: Duration) -> Result<(), Cancelled> {
        let slice = if slice.is_zero() { total } else { slice };
        let mut remaining = total;
        while !remaining.is_zero() {
            if self.is_cancelled() {
                return Err(Cancelled);
            }
            let step = remaining.min(slice);
            std::thread::sleep(step);
            remaining -= step;
        }
        if self.is_cancelled() {
            return Err(Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_token_ignores_cancel() {
        let token = CancellationToken::none();
        token.cancel();
        assert!(!token.is_cancelled());
        assert!(!token.can_be_cancelled());
    }

    #[test]
    fn clones_share_the_flag() {
        let token = CancellationToken::new();
        let observer = token.clone();
        token.cancel();
        assert!(observer.is_cancelled());
    }

    #[test]
    fn wait_returns_early_when_cancelled() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });
        let started = std::time::Instant::now();
        let result = token.wait_in_slices(Duration::from_secs(10), Duration::from_millis(5));
        handle.join().expect("canceller thread panicked");
        assert_eq!(result, Err(Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn wait_completes_without_cancellation() {
        let token = CancellationToken::new();
        assert!(token
            .wait_in_slices(Duration::from_millis(10), Duration::from_millis(3))
            .is_ok());
    }
}
