//! Operation scopes: cancellation plus an optional deadline.

use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellable operation scope with an optional deadline.
///
/// Every public operation takes a `&Scope`. Cloning a scope shares its
/// cancellation; [`Scope::child`] derives a scope that is cancelled together
/// with its parent but can also be cancelled on its own.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Scope {
    /// Scope without a deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope expiring `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Child scope sharing this scope's deadline.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Child scope whose deadline is the earlier of the parent's and
    /// `timeout` from now.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < candidate => parent,
            _ => candidate,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Completes once the scope is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Fails fast when the scope is already cancelled or past its deadline.
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Error::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Drive `fut` until it completes, the scope is cancelled or the
    /// deadline passes, whichever comes first.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        let deadline = self.deadline;
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::Cancelled),
            _ = wait_until(deadline) => Err(Error::DeadlineExceeded),
            result = fut => result,
        }
    }

    /// Cancellable sleep.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.run(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => futures::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancelled_scope_fails_immediately() {
        let scope = Scope::new();
        scope.cancel();

        assert_eq!(scope.check(), Err(Error::Cancelled));
        let result = scope.run(async { Ok(1) }).await;
        assert_eq!(result, Err(Error::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_aborts_sleep() {
        let scope = Scope::with_timeout(Duration::from_millis(50));
        let result = scope.sleep(Duration::from_secs(10)).await;
        assert_eq!(result, Err(Error::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_child_is_cancelled_with_parent() {
        let parent = Scope::new();
        let child = parent.child();

        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn test_child_cancel_does_not_reach_parent() {
        let parent = Scope::new();
        let child = parent.child();

        child.cancel();
        assert!(!parent.is_cancelled());
        assert!(parent.check().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_keeps_earlier_deadline() {
        let parent = Scope::with_timeout(Duration::from_secs(1));
        let child = parent.child_with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());

        let tighter = parent.child_with_timeout(Duration::from_millis(10));
        assert!(tighter.deadline() < parent.deadline());
    }
}
