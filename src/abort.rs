//! Cooperative cancellation.
//!
//! An [`AbortSignal`] is a cheaply clonable handle shared by everything that
//! works on behalf of one logical operation. Long-running await points observe
//! it either by polling [`AbortSignal::throw_if_aborted`] at checkpoints or by
//! awaiting [`AbortSignal::aborted`] inside a `select!`.
//!
//! Timeouts reuse the same path: [`with_timeout`] races the operation against a
//! timer that aborts the signal with [`AbortReason::Timeout`].

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{FetchError, TimeoutPhase};

/// Why a signal was aborted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// Explicit cancellation with a caller-supplied reason.
    Cancelled(String),
    /// A timer fired.
    Timeout(TimeoutPhase),
}

impl AbortReason {
    /// Converts the reason into the error surfaced to callers.
    #[must_use]
    pub fn into_error(self) -> FetchError {
        match self {
            Self::Cancelled(reason) => FetchError::Cancelled { reason },
            Self::Timeout(phase) => FetchError::Timeout { phase },
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled(reason) => f.write_str(reason),
            Self::Timeout(phase) => write!(f, "{phase} timeout"),
        }
    }
}

impl From<&str> for AbortReason {
    fn from(reason: &str) -> Self {
        Self::Cancelled(reason.to_string())
    }
}

impl From<String> for AbortReason {
    fn from(reason: String) -> Self {
        Self::Cancelled(reason)
    }
}

/// Handle returned by [`AbortSignal::on_abort`], used to unregister a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AbortRegistration {
    id: u64,
}

type Callback = Box<dyn FnOnce(&AbortReason) + Send + 'static>;

struct State {
    reason: Option<AbortReason>,
    callbacks: Vec<(u64, Callback)>,
    next_id: u64,
    dispatching: bool,
    /// Callbacks unregistered while the list is being dispatched.
    pending_removal: HashSet<u64>,
}

struct Inner {
    state: Mutex<State>,
    aborted_tx: watch::Sender<bool>,
    /// Registrations this signal holds on parents (see [`AbortSignal::any`]).
    parents: Mutex<Vec<(AbortSignal, AbortRegistration)>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let parents = std::mem::take(
            self.parents
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for (parent, registration) in parents {
            parent.remove(registration);
        }
    }
}

/// Cancellation token with registered callbacks.
///
/// `abort` is idempotent: the first call fixes the reason, later calls are
/// no-ops. Callbacks run exactly once, in registration order, and a panicking
/// callback does not stop its siblings.
#[derive(Clone)]
pub struct AbortSignal {
    inner: Arc<Inner>,
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .field("reason", &self.reason())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn invoke(callback: Callback, reason: &AbortReason) {
    if catch_unwind(AssertUnwindSafe(|| callback(reason))).is_err() {
        warn!(%reason, "abort callback panicked; remaining callbacks still run");
    }
}

impl AbortSignal {
    /// Creates a signal that is not aborted.
    #[must_use]
    pub fn new() -> Self {
        let (aborted_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    reason: None,
                    callbacks: Vec::new(),
                    next_id: 0,
                    dispatching: false,
                    pending_removal: HashSet::new(),
                }),
                aborted_tx,
                parents: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Creates a signal that is already aborted with `reason`.
    #[must_use]
    pub fn aborted_with(reason: impl Into<AbortReason>) -> Self {
        let signal = Self::new();
        signal.abort(reason);
        signal
    }

    /// Creates a signal that aborts with a request timeout after `duration`.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    #[must_use]
    pub fn timeout(duration: Duration) -> Self {
        let signal = Self::new();
        let weak = Arc::downgrade(&signal.inner);
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if let Some(inner) = weak.upgrade() {
                Self { inner }.abort(AbortReason::Timeout(TimeoutPhase::Request));
            }
        });
        signal
    }

    /// Creates a signal that aborts as soon as any of `parents` aborts.
    ///
    /// The child only holds weak references from the parents' side, and
    /// unregisters itself from every parent when its last handle is dropped.
    #[must_use]
    pub fn any(parents: &[AbortSignal]) -> Self {
        let child = Self::new();
        for parent in parents {
            let weak: Weak<Inner> = Arc::downgrade(&child.inner);
            let registration = parent.on_abort(move |reason| {
                if let Some(inner) = weak.upgrade() {
                    Self { inner }.abort(reason.clone());
                }
            });
            lock(&child.inner.parents).push((parent.clone(), registration));
        }
        child
    }

    /// Aborts the signal. Returns `false` if it was already aborted.
    pub fn abort(&self, reason: impl Into<AbortReason>) -> bool {
        let reason = reason.into();
        let callbacks = {
            let mut state = lock(&self.inner.state);
            if state.reason.is_some() {
                return false;
            }
            state.reason = Some(reason.clone());
            state.dispatching = true;
            std::mem::take(&mut state.callbacks)
        };

        debug!(%reason, callbacks = callbacks.len(), "signal aborted");
        self.inner.aborted_tx.send_replace(true);

        for (id, callback) in callbacks {
            if lock(&self.inner.state).pending_removal.contains(&id) {
                continue;
            }
            invoke(callback, &reason);
        }

        let mut state = lock(&self.inner.state);
        state.dispatching = false;
        state.pending_removal.clear();
        true
    }

    /// Returns whether the signal has been aborted.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        lock(&self.inner.state).reason.is_some()
    }

    /// Returns the abort reason, if aborted.
    #[must_use]
    pub fn reason(&self) -> Option<AbortReason> {
        lock(&self.inner.state).reason.clone()
    }

    /// Fails with the abort error if the signal has been aborted.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Cancelled`] or [`FetchError::Timeout`] depending on
    /// the recorded reason.
    pub fn throw_if_aborted(&self) -> Result<(), FetchError> {
        match self.reason() {
            Some(reason) => Err(reason.into_error()),
            None => Ok(()),
        }
    }

    /// Returns the error matching the abort reason (a generic cancellation if
    /// the signal is not aborted).
    #[must_use]
    pub fn abort_error(&self) -> FetchError {
        self.reason()
            .map_or_else(|| FetchError::cancelled("aborted"), AbortReason::into_error)
    }

    /// Registers a callback run once when the signal aborts.
    ///
    /// If the signal is already aborted the callback runs synchronously before
    /// this method returns.
    pub fn on_abort<F>(&self, callback: F) -> AbortRegistration
    where
        F: FnOnce(&AbortReason) + Send + 'static,
    {
        let mut state = lock(&self.inner.state);
        let id = state.next_id;
        state.next_id += 1;
        let registration = AbortRegistration { id };

        if let Some(reason) = state.reason.clone() {
            drop(state);
            invoke(Box::new(callback), &reason);
            return registration;
        }

        state.callbacks.push((id, Box::new(callback)));
        registration
    }

    /// Unregisters a callback. Unknown or already-run registrations are ignored.
    pub fn remove(&self, registration: AbortRegistration) {
        let mut state = lock(&self.inner.state);
        if state.dispatching {
            state.pending_removal.insert(registration.id);
        } else {
            state.callbacks.retain(|(id, _)| *id != registration.id);
        }
    }

    /// Resolves once the signal is aborted.
    pub async fn aborted(&self) {
        let mut rx = self.inner.aborted_tx.subscribe();
        // The sender lives in `inner`, which `self` keeps alive.
        let _ = rx.wait_for(|aborted| *aborted).await;
    }

    #[cfg(test)]
    fn callback_count(&self) -> usize {
        lock(&self.inner.state).callbacks.len()
    }
}

/// Races `operation` against `signal` and an optional timer.
///
/// When the timer wins it aborts `signal` with [`AbortReason::Timeout`], so
/// everything else listening on the signal unwinds too.
///
/// # Errors
///
/// Returns the operation's own error, or the abort error when the signal is
/// (or becomes) aborted first.
pub async fn with_timeout<T, F>(
    signal: &AbortSignal,
    timeout: Option<Duration>,
    phase: TimeoutPhase,
    operation: F,
) -> Result<T, FetchError>
where
    F: Future<Output = Result<T, FetchError>>,
{
    signal.throw_if_aborted()?;

    let timer = async {
        match timeout {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        biased;
        () = signal.aborted() => Err(signal.abort_error()),
        result = operation => result,
        () = timer => {
            signal.abort(AbortReason::Timeout(phase));
            Err(signal.abort_error())
        }
    }
}

/// Races `operation` against `signal` with no timer.
///
/// # Errors
///
/// Same as [`with_timeout`].
pub async fn race<T, F>(signal: &AbortSignal, operation: F) -> Result<T, FetchError>
where
    F: Future<Output = Result<T, FetchError>>,
{
    with_timeout(signal, None, TimeoutPhase::Request, operation).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_abort_twice_keeps_first_reason() {
        let signal = AbortSignal::new();
        assert!(signal.abort("x"));
        assert!(!signal.abort("y"));
        assert_eq!(signal.reason(), Some(AbortReason::from("x")));
    }

    #[test]
    fn test_callback_registered_after_abort_runs_synchronously() {
        let signal = AbortSignal::aborted_with("done");
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        signal.on_abort(move |reason| *sink.lock().unwrap() = Some(reason.clone()));
        assert_eq!(*seen.lock().unwrap(), Some(AbortReason::from("done")));
    }

    #[test]
    fn test_callbacks_run_once_in_registration_order() {
        let signal = AbortSignal::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            signal.on_abort(move |_| order.lock().unwrap().push(i));
        }
        signal.abort("stop");
        signal.abort("stop again");
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_panicking_callback_does_not_block_siblings() {
        let signal = AbortSignal::new();
        let count = Arc::new(AtomicUsize::new(0));
        signal.on_abort(|_| panic!("callback failure"));
        let counter = Arc::clone(&count);
        signal.on_abort(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        signal.abort("stop");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_removed_callback_is_not_invoked() {
        let signal = AbortSignal::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let registration = signal.on_abort(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        signal.remove(registration);
        signal.abort("stop");
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_removal_during_dispatch_skips_pending_callback() {
        let signal = AbortSignal::new();
        let count = Arc::new(AtomicUsize::new(0));
        let later = Arc::new(Mutex::new(None::<AbortRegistration>));

        let handle = signal.clone();
        let target = Arc::clone(&later);
        signal.on_abort(move |_| {
            if let Some(registration) = *target.lock().unwrap() {
                handle.remove(registration);
            }
        });
        let counter = Arc::clone(&count);
        let registration = signal.on_abort(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        *later.lock().unwrap() = Some(registration);

        signal.abort("stop");
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_throw_if_aborted() {
        let signal = AbortSignal::new();
        assert!(signal.throw_if_aborted().is_ok());
        signal.abort(AbortReason::Timeout(TimeoutPhase::Connect));
        let error = signal.throw_if_aborted().unwrap_err();
        assert!(matches!(
            error,
            FetchError::Timeout {
                phase: TimeoutPhase::Connect
            }
        ));
    }

    #[test]
    fn test_any_follows_parent() {
        let parent = AbortSignal::new();
        let child = AbortSignal::any(&[parent.clone()]);
        assert!(!child.is_aborted());
        parent.abort("parent gone");
        assert_eq!(child.reason(), Some(AbortReason::from("parent gone")));
    }

    #[test]
    fn test_any_does_not_abort_parent() {
        let parent = AbortSignal::new();
        let child = AbortSignal::any(&[parent.clone()]);
        child.abort("child only");
        assert!(!parent.is_aborted());
    }

    #[test]
    fn test_any_of_aborted_parent_is_aborted() {
        let parent = AbortSignal::aborted_with("early");
        let child = AbortSignal::any(&[parent]);
        assert!(child.is_aborted());
    }

    #[test]
    fn test_dropping_child_releases_parent_registration() {
        let parent = AbortSignal::new();
        let child = AbortSignal::any(&[parent.clone()]);
        assert_eq!(parent.callback_count(), 1);
        drop(child);
        assert_eq!(parent.callback_count(), 0);
    }

    #[tokio::test]
    async fn test_aborted_future_resolves_after_abort() {
        let signal = AbortSignal::new();
        let waiter = signal.clone();
        let task = tokio::spawn(async move { waiter.aborted().await });
        tokio::task::yield_now().await;
        signal.abort("stop");
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_with_timeout_aborts_signal_on_expiry() {
        let signal = AbortSignal::new();
        let result: Result<(), FetchError> = with_timeout(
            &signal,
            Some(Duration::from_millis(20)),
            TimeoutPhase::Request,
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;
        assert!(result.unwrap_err().is_timeout());
        assert_eq!(
            signal.reason(),
            Some(AbortReason::Timeout(TimeoutPhase::Request))
        );
    }

    #[tokio::test]
    async fn test_race_returns_operation_result() {
        let signal = AbortSignal::new();
        let value = race(&signal, async { Ok::<_, FetchError>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_race_fails_fast_when_already_aborted() {
        let signal = AbortSignal::aborted_with("gone");
        let polled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&polled);
        let result = race(&signal, async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, FetchError>(())
        })
        .await;
        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(polled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_signal_timeout_fires() {
        let signal = AbortSignal::timeout(Duration::from_millis(10));
        tokio::time::timeout(Duration::from_secs(1), signal.aborted())
            .await
            .unwrap();
        assert!(signal.throw_if_aborted().unwrap_err().is_timeout());
    }
}
