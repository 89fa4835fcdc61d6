//! Cooperative cancellation.

use std::future::Future;
use std::time::Duration;

use crate::error::Error;
use crate::rt;

/// A shared, monotonic cancel flag.
///
/// Clones observe the same flag. Once cancelled a token stays cancelled;
/// cancelling again is a no-op. Waiters select on [`cancelled`] together
/// with whatever they are waiting for, so a cancel wakes them as quickly
/// as data arrival would.
///
/// The token never fails anything itself. Components that observe it
/// report [`Error::Cancelled`].
///
/// [`cancelled`]: CancellationToken::cancelled
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(tokio_util::sync::CancellationToken);

impl CancellationToken {
    pub fn new() -> Self {
        Self(tokio_util::sync::CancellationToken::new())
    }

    /// Signal cancellation to every holder of this token and its children.
    pub fn cancel(&self) {
        if !self.0.is_cancelled() {
            tracing::debug!("cancellation requested");
        }
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        self.0.cancelled().await
    }

    /// A token cancelled whenever this one is, but which can also be
    /// cancelled on its own without affecting the parent.
    pub fn child_token(&self) -> Self {
        Self(self.0.child_token())
    }

    /// Run `future` unless the token fires first.
    pub async fn guard<F: Future>(&self, future: F) -> Result<F::Output, Error> {
        tokio::select! {
            biased;
            _ = self.0.cancelled() => Err(Error::Cancelled),
            output = future => Ok(output),
        }
    }

    /// Block the calling thread until the token is cancelled.
    pub fn wait(&self) {
        rt::block_on(self.cancelled())
    }

    /// Block for at most `timeout`; returns whether the token was cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        rt::block_on(async { tokio::time::timeout(timeout, self.cancelled()).await.is_ok() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_monotonic_and_idempotent() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn clones_share_the_flag() {
        let token = CancellationToken::new();
        let observer = token.clone();
        token.cancel();
        assert!(observer.is_cancelled());
    }

    #[test]
    fn child_follows_parent_but_not_the_reverse() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        child.cancel();
        assert!(!parent.is_cancelled());

        let second = parent.child_token();
        parent.cancel();
        assert!(second.is_cancelled());
    }

    #[tokio::test]
    async fn guard_prefers_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let result = token.guard(async { 1 }).await;
        assert_eq!(result, Err(Error::Cancelled));
    }

    #[tokio::test]
    async fn guard_returns_output_when_not_cancelled() {
        let token = CancellationToken::new();
        assert_eq!(token.guard(async { 5 }).await, Ok(5));
    }

    #[test]
    fn wait_unblocks_when_another_thread_cancels() {
        let token = CancellationToken::new();
        let canceller = {
            let token = token.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                token.cancel();
            })
        };
        token.wait();
        assert!(token.is_cancelled());
        canceller.join().unwrap();
    }

    #[test]
    fn wait_timeout_expires_without_cancel() {
        let token = CancellationToken::new();
        assert!(!token.wait_timeout(Duration::from_millis(10)));
        token.cancel();
        assert!(token.wait_timeout(Duration::from_millis(10)));
    }
}
