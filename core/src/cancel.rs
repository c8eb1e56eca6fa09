//! Cooperative cancellation tokens, threaded through every async operation
//! that can outlive the caller's interest in it.
//!
//! There is no stdlib or `futures` equivalent, so we model one here: cheap
//! to clone, cheap to poll, and composable via [`CancellationToken::linked`]
//! so a callsite can wait on "my token OR the swarm's shutdown token".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::{self, Either};
use futures::FutureExt;

struct Inner {
    cancelled: AtomicBool,
    waiters: parking_lot::Mutex<Vec<oneshot::Sender<()>>>,
}

enum Kind {
    Leaf(Arc<Inner>),
    Linked(Box<CancellationToken>, Box<CancellationToken>),
}

/// A cooperative cancellation signal. Clones observe the same cancellation.
#[derive(Clone)]
pub struct CancellationToken {
    kind: Arc<Kind>,
}

/// The other half of a leaf [`CancellationToken`], used to trigger it.
#[derive(Clone)]
pub struct CancellationHandle {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// Creates a fresh, unlinked token paired with the handle that cancels it.
    pub fn new() -> (CancellationToken, CancellationHandle) {
        let inner = Arc::new(Inner {
            cancelled: AtomicBool::new(false),
            waiters: parking_lot::Mutex::new(Vec::new()),
        });
        (
            CancellationToken {
                kind: Arc::new(Kind::Leaf(inner.clone())),
            },
            CancellationHandle { inner },
        )
    }

    /// A token that never cancels. Used as a default at call sites that
    /// don't have a real token to thread through yet.
    pub fn never() -> CancellationToken {
        CancellationToken::new().0
    }

    /// Fast, non-blocking cancellation check.
    pub fn is_cancelled(&self) -> bool {
        match &*self.kind {
            Kind::Leaf(inner) => inner.cancelled.load(Ordering::Acquire),
            Kind::Linked(a, b) => a.is_cancelled() || b.is_cancelled(),
        }
    }

    /// Resolves once this token is cancelled. Resolves immediately if it
    /// already is.
    pub async fn cancelled(&self) {
        match &*self.kind {
            Kind::Leaf(inner) => {
                if inner.cancelled.load(Ordering::Acquire) {
                    return;
                }
                let (tx, rx) = oneshot::channel();
                {
                    let mut guard = inner.waiters.lock();
                    if inner.cancelled.load(Ordering::Acquire) {
                        return;
                    }
                    guard.push(tx);
                }
                let _ = rx.await;
            }
            Kind::Linked(a, b) => {
                future::select(a.cancelled().boxed(), b.cancelled().boxed()).await;
            }
        }
    }

    /// Races `fut` against cancellation, returning `None` if cancelled first.
    pub async fn race<F: std::future::Future>(&self, fut: F) -> Option<F::Output> {
        futures::pin_mut!(fut);
        match future::select(fut, self.cancelled().boxed()).await {
            Either::Left((out, _)) => Some(out),
            Either::Right(_) => None,
        }
    }

    /// Returns a token that cancels when either `self` or `other` does.
    pub fn linked(&self, other: &CancellationToken) -> CancellationToken {
        CancellationToken {
            kind: Arc::new(Kind::Linked(Box::new(self.clone()), Box::new(other.clone()))),
        }
    }
}

impl CancellationHandle {
    /// Cancels the token. Idempotent.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        for tx in self.inner.waiters.lock().drain(..) {
            let _ = tx.send(());
        }
    }

    /// Whether two handles control the same underlying token — used to find
    /// every listener address sharing one `start_listening` call's handle.
    pub fn ptr_eq(&self, other: &CancellationHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[async_std::test]
    async fn cancels_once() {
        let (token, handle) = CancellationToken::new();
        assert!(!token.is_cancelled());
        handle.cancel();
        handle.cancel(); // idempotent
        assert!(token.is_cancelled());
        token.cancelled().await;
    }

    #[async_std::test]
    async fn race_returns_none_when_cancelled_first() {
        let (token, handle) = CancellationToken::new();
        handle.cancel();
        let out = token.race(future::pending::<()>()).await;
        assert!(out.is_none());
    }

    #[async_std::test]
    async fn linked_cancels_from_either_side() {
        let (a, ah) = CancellationToken::new();
        let (b, _bh) = CancellationToken::new();
        let linked = a.linked(&b);
        assert!(!linked.is_cancelled());
        ah.cancel();
        assert!(linked.is_cancelled());
        linked.cancelled().await;
    }
}
