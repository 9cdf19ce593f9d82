//! Cancellation contexts
//!
//! Every suspending operation in the SDK takes a [`Ctx`]: a cancellation
//! token paired with an optional deadline. Contexts form a tree — children
//! inherit cancellation from their parent and may only tighten the deadline,
//! never loosen it.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// A cancellation context with an optional deadline.
///
/// Cloning is cheap and clones observe the same cancellation. Dropping a
/// `Ctx` does not cancel it; cancellation is explicit via [`Ctx::cancel`] or
/// inherited from a parent.
#[derive(Debug, Clone)]
pub struct Ctx {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Ctx {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Ctx {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Derive a child context. Cancelling the parent cancels the child;
    /// cancelling the child leaves the parent untouched.
    pub fn child(&self) -> Ctx {
        Ctx {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derive a child whose deadline is `timeout` from now (or the parent's
    /// deadline, whichever comes first).
    pub fn with_timeout(&self, timeout: Duration) -> Ctx {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a child with an absolute deadline, tightened against the
    /// parent's.
    pub fn with_deadline(&self, deadline: Instant) -> Ctx {
        let deadline = match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        };
        Ctx {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Any-of composition: the returned context is done as soon as either
    /// `self` or `other` is done. The deadline is the earlier of the two.
    pub fn merge(&self, other: &Ctx) -> Ctx {
        let child = self.token.child_token();
        let linked = child.clone();
        let other_token = other.token.clone();
        tokio::spawn(async move {
            other_token.cancelled().await;
            linked.cancel();
        });
        let deadline = match (self.deadline, other.deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Ctx {
            token: child,
            deadline,
        }
    }

    /// Cancel this context and all contexts derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the context has been cancelled or its deadline has passed.
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the context is done. Completes immediately if it
    /// already is.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// The error this context is done with: [`Error::Cancelled`] for explicit
    /// cancellation, [`Error::DeadlineExceeded`] for an elapsed deadline.
    pub fn err(&self) -> Error {
        if self.token.is_cancelled() {
            Error::Cancelled
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Error::DeadlineExceeded
        } else {
            Error::Cancelled
        }
    }

    /// Fail fast if the context is already done.
    pub fn check(&self) -> Result<()> {
        if self.is_done() {
            Err(self.err())
        } else {
            Ok(())
        }
    }

    /// Await `fut`, aborting with this context's error if it fires first.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            res = fut => res,
            _ = self.done() => Err(self.err()),
        }
    }
}

impl Default for Ctx {
    fn default() -> Self {
        Ctx::background()
    }
}
