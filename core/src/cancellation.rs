use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Error returned by work that observed its cancellation request.
///
/// Task bodies poll their token between chunks of work and bail out with
/// this error once cancellation was requested.
///
/// # Example
///
/// ```
/// use redlilium_core::{CancellationToken, Cancelled};
///
/// fn process(chunks: &[u32], token: &CancellationToken) -> Result<u32, Cancelled> {
///     let mut sum = 0;
///     for chunk in chunks {
///         token.checkpoint()?;
///         sum += chunk;
///     }
///     Ok(sum)
/// }
///
/// let token = CancellationToken::new();
/// assert_eq!(process(&[1, 2, 3], &token), Ok(6));
/// token.cancel();
/// assert_eq!(process(&[1, 2, 3], &token), Err(Cancelled));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("task cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Token that signals cancellation to cooperative tasks.
///
/// Cloning a token creates another handle to the same cancellation flag.
/// Calling [`cancel()`](CancellationToken::cancel) on any clone affects all.
/// Cancellation is advisory: nothing is interrupted, the running code decides
/// when to look at the flag.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a new cancellation token (not cancelled).
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Signals cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Returns whether cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Returns `Err(Cancelled)` once cancellation has been signalled.
    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_token_clone_shares_state() {
        let token1 = CancellationToken::new();
        let token2 = token1.clone();

        assert!(!token1.is_cancelled());
        assert!(!token2.is_cancelled());

        token2.cancel();

        assert!(token1.is_cancelled());
        assert!(token2.is_cancelled());
    }

    #[test]
    fn checkpoint_reports_cancellation() {
        let token = CancellationToken::default();
        assert_eq!(token.checkpoint(), Ok(()));
        token.cancel();
        assert_eq!(token.checkpoint(), Err(Cancelled));
        assert_eq!(Cancelled.to_string(), "task cancelled");
    }
}
