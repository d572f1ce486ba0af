//! Context implementation for request-scoped cancellation and deadlines
//!
//! Every async trait method receives a [`Context`]. Long running provider
//! work (waiting for a cloud object to settle) sleeps through
//! [`Context::sleep`] so that cancellation and deadlines stop it promptly.

use crate::error::{Result, TfplugError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Context carries cancellation and an optional deadline across async boundaries
/// Clones share the same cancellation signal
#[derive(Clone)]
pub struct Context {
    deadline: Option<Instant>,
    cancel: Arc<watch::Sender<bool>>,
}

impl Context {
    pub fn new() -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            deadline: None,
            cancel: Arc::new(cancel),
        }
    }

    /// Derive a context whose deadline is at most `timeout` from now.
    /// An earlier deadline inherited from `self` is kept.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };

        Self {
            deadline: Some(deadline),
            cancel: self.cancel.clone(),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when no deadline is set
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Returns an error once the context is cancelled or past its deadline
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(TfplugError::Cancelled);
        }
        if matches!(self.remaining(), Some(left) if left.is_zero()) {
            return Err(TfplugError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Sleep for `duration`, waking early with an error on cancellation or deadline
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.check()?;

        let wait = match self.remaining() {
            Some(left) if left < duration => left,
            _ => duration,
        };

        let mut cancelled = self.cancel.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = cancelled.wait_for(|cancelled| *cancelled) => {
                return Err(TfplugError::Cancelled);
            }
        }

        self.check()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn context_manual_cancel_is_shared_by_clones() {
        let ctx = Context::new();
        let clone = ctx.clone();

        assert!(!clone.is_cancelled());
        ctx.cancel();
        assert!(clone.is_cancelled());
        assert!(matches!(clone.check(), Err(TfplugError::Cancelled)));
    }

    #[tokio::test]
    async fn context_deadline_is_reported() {
        let ctx = Context::new();
        assert!(ctx.deadline().is_none());
        assert!(ctx.remaining().is_none());

        let timed = ctx.with_timeout(Duration::from_secs(60));
        assert!(timed.deadline().is_some());
        assert!(timed.check().is_ok());
    }

    #[tokio::test]
    async fn child_timeout_never_extends_parent_deadline() {
        let parent = Context::new().with_timeout(Duration::from_millis(50));
        let child = parent.with_timeout(Duration::from_secs(60));

        assert_eq!(parent.deadline(), child.deadline());
    }

    #[tokio::test]
    async fn sleep_stops_at_deadline() {
        let ctx = Context::new().with_timeout(Duration::from_millis(20));
        let started = Instant::now();

        let result = ctx.sleep(Duration::from_secs(5)).await;

        assert!(matches!(result, Err(TfplugError::DeadlineExceeded)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn sleep_wakes_on_cancel() {
        let ctx = Context::new();
        let canceller = ctx.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = ctx.sleep(Duration::from_secs(5)).await;
        assert!(matches!(result, Err(TfplugError::Cancelled)));
    }
}
