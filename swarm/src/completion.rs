//! One-shot completion slots: pending → resolved or pending → cancelled,
//! never both.

use futures::channel::oneshot;
use parking_lot::Mutex;

enum State<T> {
    Pending(Vec<oneshot::Sender<Option<T>>>),
    Resolved(T),
    Cancelled,
}

pub struct CompletionSlot<T: Clone> {
    state: Mutex<State<T>>,
}

impl<T: Clone> Default for CompletionSlot<T> {
    fn default() -> CompletionSlot<T> {
        CompletionSlot { state: Mutex::new(State::Pending(Vec::new())) }
    }
}

impl<T: Clone> CompletionSlot<T> {
    pub fn new() -> CompletionSlot<T> {
        CompletionSlot::default()
    }

    /// Resolves the slot. Returns `false` (and leaves the slot untouched) if
    /// it was already resolved or cancelled — callers that might race (the
    /// plaintext variant can complete `security-established` from more than
    /// one call site) must use this guard rather than assume single-shot.
    pub fn try_resolve(&self, value: T) -> bool {
        let mut guard = self.state.lock();
        match std::mem::replace(&mut *guard, State::Resolved(value.clone())) {
            State::Pending(waiters) => {
                for tx in waiters {
                    let _ = tx.send(Some(value.clone()));
                }
                true
            }
            other => {
                *guard = other;
                false
            }
        }
    }

    pub fn cancel(&self) {
        let mut guard = self.state.lock();
        if !matches!(&*guard, State::Pending(_)) {
            return;
        }
        if let State::Pending(waiters) = std::mem::replace(&mut *guard, State::Cancelled) {
            for tx in waiters {
                let _ = tx.send(None);
            }
        }
    }

    pub fn peek(&self) -> Option<T> {
        match &*self.state.lock() {
            State::Resolved(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Resolves to `Some(value)`, or `None` if the slot was/becomes cancelled.
    pub async fn wait(&self) -> Option<T> {
        let rx = {
            let mut guard = self.state.lock();
            match &mut *guard {
                State::Resolved(value) => return Some(value.clone()),
                State::Cancelled => return None,
                State::Pending(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    rx
                }
            }
        };
        rx.await.unwrap_or(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[async_std::test]
    async fn resolves_once_and_further_resolves_are_ignored() {
        let slot: CompletionSlot<u32> = CompletionSlot::new();
        assert!(slot.try_resolve(1));
        assert!(!slot.try_resolve(2));
        assert_eq!(slot.wait().await, Some(1));
    }

    #[async_std::test]
    async fn cancel_resolves_waiters_to_none() {
        let slot: CompletionSlot<u32> = CompletionSlot::new();
        slot.cancel();
        assert_eq!(slot.wait().await, None);
    }
}
