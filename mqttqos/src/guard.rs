//! Run-once guards.
//!
//! [`Completion`] is the single-shot continuation every pending operation
//! carries. It fires exactly once: explicitly through [`Completion::fire`],
//! or with [`Error::Abandoned`] when dropped unfired.
//!
//! [`ScopeGuard`] and [`SharedScopeGuard`] run a cleanup action when the
//! (last) owner goes away.

use std::fmt;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::error::{Error, Result};

type Callback<T> = Box<dyn FnOnce(Result<T>) + Send>;

/// Single-shot continuation for one pending operation.
pub struct Completion<T> {
    callback: Option<Callback<T>>,
}

impl<T> Completion<T> {
    /// Wrap a continuation.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        Self {
            callback: Some(Box::new(f)),
        }
    }

    /// Whether the continuation has run.
    pub fn is_fired(&self) -> bool {
        self.callback.is_none()
    }

    /// Deliver `result` to the continuation.
    ///
    /// Fails with [`Error::AlreadyCompleted`] if it already ran; the result
    /// is dropped in that case.
    pub fn fire(&mut self, result: Result<T>) -> Result<()> {
        match self.callback.take() {
            Some(callback) => {
                callback(result);
                Ok(())
            }
            None => Err(Error::AlreadyCompleted),
        }
    }
}

impl<T: Send + 'static> Completion<T> {
    /// Completion that forwards the result to a oneshot receiver.
    ///
    /// A receiver that has gone away (cancelled caller) is not an error.
    pub fn from_sender(tx: oneshot::Sender<Result<T>>) -> Self {
        Self::new(move |result| {
            let _ = tx.send(result);
        })
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback(Err(Error::Abandoned));
        }
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").field("fired", &self.is_fired()).finish()
    }
}

/// Runs an action when dropped, unless dismissed.
#[must_use = "the action runs as soon as the guard is dropped"]
pub struct ScopeGuard<F: FnOnce()> {
    action: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    /// Arm a guard.
    pub fn new(action: F) -> Self {
        Self { action: Some(action) }
    }

    /// Disarm the guard without running the action.
    pub fn dismiss(mut self) {
        self.action = None;
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }
}

/// Clonable guard whose action runs once, when the last clone drops.
#[derive(Clone)]
pub struct SharedScopeGuard {
    _inner: Arc<ScopeGuard<Box<dyn FnOnce() + Send + Sync>>>,
}

impl SharedScopeGuard {
    /// Arm a shared guard.
    pub fn new<F>(action: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        let action: Box<dyn FnOnce() + Send + Sync> = Box::new(action);
        Self {
            _inner: Arc::new(ScopeGuard::new(action)),
        }
    }
}

impl fmt::Debug for SharedScopeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedScopeGuard")
            .field("owners", &Arc::strong_count(&self._inner))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting() -> (Arc<AtomicUsize>, Arc<parking_lot::Mutex<Vec<String>>>) {
        (Arc::new(AtomicUsize::new(0)), Arc::new(parking_lot::Mutex::new(Vec::new())))
    }

    fn recording(
        calls: &Arc<AtomicUsize>,
        outcomes: &Arc<parking_lot::Mutex<Vec<String>>>,
    ) -> Completion<u32> {
        let calls = Arc::clone(calls);
        let outcomes = Arc::clone(outcomes);
        Completion::new(move |result: Result<u32>| {
            calls.fetch_add(1, Ordering::SeqCst);
            outcomes.lock().push(match result {
                Ok(v) => v.to_string(),
                Err(e) => e.to_string(),
            });
        })
    }

    #[test]
    fn test_fire_once() {
        let (calls, outcomes) = counting();
        let mut completion = recording(&calls, &outcomes);

        completion.fire(Ok(7)).unwrap();
        assert!(completion.is_fired());
        assert!(matches!(completion.fire(Ok(8)), Err(Error::AlreadyCompleted)));
        drop(completion);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*outcomes.lock(), vec!["7".to_string()]);
    }

    #[test]
    fn test_drop_fires_abandoned() {
        let (calls, outcomes) = counting();
        let completion = recording(&calls, &outcomes);
        drop(completion);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*outcomes.lock(), vec![Error::Abandoned.to_string()]);
    }

    #[test]
    fn test_move_keeps_single_invocation() {
        let (calls, outcomes) = counting();
        let completion = recording(&calls, &outcomes);
        let mut holder = vec![completion];
        let mut moved = holder.pop().unwrap();
        moved.fire(Err(Error::Cancelled)).unwrap();
        drop(moved);
        drop(holder);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*outcomes.lock(), vec![Error::Cancelled.to_string()]);
    }

    #[tokio::test]
    async fn test_from_sender() {
        let (tx, rx) = oneshot::channel();
        let mut completion = Completion::from_sender(tx);
        completion.fire(Ok("done")).unwrap();
        assert_eq!(rx.await.unwrap().unwrap(), "done");

        let (tx, rx) = oneshot::channel::<Result<()>>();
        drop(Completion::from_sender(tx));
        assert!(matches!(rx.await.unwrap(), Err(Error::Abandoned)));

        // Receiver gone: firing still succeeds.
        let (tx, rx) = oneshot::channel::<Result<()>>();
        drop(rx);
        Completion::from_sender(tx).fire(Ok(())).unwrap();
    }

    #[test]
    fn test_scope_guard() {
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = Arc::clone(&calls);
            let _guard = ScopeGuard::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let guard = {
            let calls = Arc::clone(&calls);
            ScopeGuard::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        guard.dismiss();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shared_guard_fires_on_last_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let guard = {
            let calls = Arc::clone(&calls);
            SharedScopeGuard::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        let a = guard.clone();
        let b = guard.clone();

        drop(guard);
        drop(a);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let handle = std::thread::spawn(move || drop(b));
        handle.join().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
