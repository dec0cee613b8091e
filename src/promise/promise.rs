//! Promise and resolver implementation.

use crate::error::{Error, Result};
use crate::runtime::{self as vat, VatHandle};
use crate::types::Outcome;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll, Waker};

/// A callback notified with the outcome of a promise.
pub type Listener<T> = Box<dyn FnOnce(&Outcome<T>) + Send + 'static>;

struct State<T> {
    outcome: Option<Outcome<T>>,
    listeners: SmallVec<[Listener<T>; 2]>,
    resolver_acquired: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
}

/// A single-assignment asynchronous value.
///
/// Cloning a promise yields another handle to the same cell. A promise is
/// also a [`Future`] resolving to `Result<T>`.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
    waker: Option<Arc<Mutex<Option<Waker>>>>,
}

/// The exclusive write side of a [`Promise`].
///
/// Only the first resolution takes effect; later calls are ignored.
pub struct Resolver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            waker: None,
        }
    }
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

fn guarded<R>(f: impl FnOnce() -> R) -> Result<R> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| Error::from_panic(payload.as_ref()))
}

fn dispatch(target: Option<VatHandle>, job: impl FnOnce() + Send + 'static) {
    match target {
        Some(vat) => vat.run_or_execute(job),
        None => job(),
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    fn with_state(outcome: Option<Outcome<T>>, resolver_acquired: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    outcome,
                    listeners: SmallVec::new(),
                    resolver_acquired,
                }),
            }),
            waker: None,
        }
    }

    /// Creates an unresolved promise whose resolver has not been handed out.
    #[must_use]
    pub fn new() -> Self {
        Self::with_state(None, false)
    }

    /// Creates an unresolved promise together with its resolver.
    #[must_use]
    pub fn pending() -> (Self, Resolver<T>) {
        let promise = Self::new();
        let resolver = promise.resolver();
        (promise, resolver)
    }

    /// Hands out the resolver of this promise.
    ///
    /// # Panics
    ///
    /// Panics if the resolver was already acquired.
    #[must_use]
    pub fn resolver(&self) -> Resolver<T> {
        let mut state = self.shared.state.lock();
        assert!(!state.resolver_acquired, "resolver already acquired");
        state.resolver_acquired = true;
        drop(state);
        Resolver {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Creates a promise already resolved with `outcome`.
    #[must_use]
    pub fn from_outcome(outcome: Outcome<T>) -> Self {
        Self::with_state(Some(outcome), true)
    }

    /// Creates a promise already resolved with a value.
    #[must_use]
    pub fn value(value: T) -> Self {
        Self::from_outcome(Outcome::Success(value))
    }

    /// Creates a promise already failed with `error`.
    #[must_use]
    pub fn failure(error: Error) -> Self {
        Self::from_outcome(Outcome::Failure(error))
    }

    /// Creates a resolved promise from a `Result`.
    #[must_use]
    pub fn from_result(result: Result<T>) -> Self {
        Self::from_outcome(result.into())
    }

    /// Returns true once the promise has an outcome.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.shared.state.lock().outcome.is_some()
    }

    /// Returns true once the promise has a successful outcome.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.shared
            .state
            .lock()
            .outcome
            .as_ref()
            .is_some_and(Outcome::is_success)
    }

    /// Returns true once the promise has a failed outcome.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.shared
            .state
            .lock()
            .outcome
            .as_ref()
            .is_some_and(Outcome::is_failure)
    }

    /// Returns a copy of the outcome, if resolved.
    #[must_use]
    pub fn outcome(&self) -> Option<Outcome<T>> {
        self.shared.state.lock().outcome.clone()
    }

    /// Returns true if both handles refer to the same promise cell.
    #[must_use]
    pub fn same_promise(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Registers a listener notified on the resolving call stack.
    ///
    /// Listeners registered before resolution run in registration order.
    /// A listener registered after resolution runs immediately.
    pub fn listen_sync(&self, listener: impl FnOnce(&Outcome<T>) + Send + 'static) {
        let mut state = self.shared.state.lock();
        match state.outcome.clone() {
            Some(outcome) => {
                drop(state);
                if let Err(error) = guarded(|| listener(&outcome)) {
                    tracing::error!(error = %error, "promise listener panicked");
                }
            }
            None => state.listeners.push(Box::new(listener)),
        }
    }

    /// Registers a listener that runs as a task on `vat`.
    pub fn listen(&self, vat: &VatHandle, listener: impl FnOnce(Outcome<T>) + Send + 'static) {
        let vat = vat.clone();
        self.listen_sync(move |outcome| {
            let outcome = outcome.clone();
            vat.execute(move || listener(outcome));
        });
    }

    /// Resolves `resolver` with this promise's outcome once available.
    pub fn forward(&self, resolver: Resolver<T>) {
        self.listen_sync(move |outcome| {
            resolver.resolve(outcome.clone());
        });
    }

    /// Maps the success value; failures bypass `f`.
    pub fn map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.try_map(move |value| Ok(f(value)))
    }

    /// Maps the success value with a fallible function; failures bypass `f`.
    pub fn try_map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        let (promise, resolver) = Promise::pending();
        let target = vat::current();
        self.listen_sync(move |outcome| match outcome {
            Outcome::Success(value) => {
                let value = value.clone();
                dispatch(target, move || {
                    resolver.complete(guarded(move || f(value)).and_then(|r| r));
                });
            }
            Outcome::Failure(error) => {
                resolver.fail(error.clone());
            }
        });
        promise
    }

    /// Chains a promise-returning function; failures bypass `f`.
    pub fn flat_map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        let (promise, resolver) = Promise::pending();
        let target = vat::current();
        self.listen_sync(move |outcome| match outcome {
            Outcome::Success(value) => {
                let value = value.clone();
                dispatch(target, move || match guarded(move || f(value)) {
                    Ok(next) => next.forward(resolver),
                    Err(error) => {
                        resolver.fail(error);
                    }
                });
            }
            Outcome::Failure(error) => {
                resolver.fail(error.clone());
            }
        });
        promise
    }

    /// Maps the raw outcome, seeing both success and failure.
    pub fn map_outcome<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(Outcome<T>) -> Outcome<U> + Send + 'static,
    {
        let (promise, resolver) = Promise::pending();
        let target = vat::current();
        self.listen_sync(move |outcome| {
            let outcome = outcome.clone();
            dispatch(target, move || match guarded(move || f(outcome)) {
                Ok(mapped) => {
                    resolver.resolve(mapped);
                }
                Err(error) => {
                    resolver.fail(error);
                }
            });
        });
        promise
    }

    /// Chains a promise-returning function over the raw outcome.
    pub fn flat_map_outcome<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(Outcome<T>) -> Promise<U> + Send + 'static,
    {
        let (promise, resolver) = Promise::pending();
        let target = vat::current();
        self.listen_sync(move |outcome| {
            let outcome = outcome.clone();
            dispatch(target, move || match guarded(move || f(outcome)) {
                Ok(next) => next.forward(resolver),
                Err(error) => {
                    resolver.fail(error);
                }
            });
        });
        promise
    }

    /// Rewrites a failure; successes pass through untouched.
    pub fn map_failure<F>(&self, f: F) -> Self
    where
        F: FnOnce(Error) -> Error + Send + 'static,
    {
        self.map_outcome(move |outcome| match outcome {
            Outcome::Success(value) => Outcome::Success(value),
            Outcome::Failure(error) => Outcome::Failure(f(error)),
        })
    }

    /// Replaces the success value with `value`.
    pub fn then_value<U: Clone + Send + 'static>(&self, value: U) -> Promise<U> {
        self.map(move |_| value)
    }

    /// Discards the success value.
    pub fn to_void(&self) -> Promise<()> {
        self.map(|_| ())
    }

    /// Evaluates a promise-returning action, converting a panic into a failure.
    pub fn now(action: impl FnOnce() -> Self) -> Self {
        guarded(action).unwrap_or_else(Self::failure)
    }

    /// Evaluates a promise-returning action as a task on `vat`.
    pub fn later<F>(vat: &VatHandle, action: F) -> Self
    where
        F: FnOnce() -> Self + Send + 'static,
    {
        let (promise, resolver) = Self::pending();
        vat.execute(move || Self::now(action).forward(resolver));
        promise
    }
}

impl<T: Clone + Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl Promise<()> {
    /// The shared, already resolved unit promise.
    #[must_use]
    pub fn void() -> Self {
        static VOID: OnceLock<Promise<()>> = OnceLock::new();
        VOID.get_or_init(|| Self::value(())).clone()
    }
}

impl Promise<bool> {
    /// The shared, already resolved boolean promise for `value`.
    #[must_use]
    pub fn from_bool(value: bool) -> Self {
        static TRUE: OnceLock<Promise<bool>> = OnceLock::new();
        static FALSE: OnceLock<Promise<bool>> = OnceLock::new();
        let cell = if value { &TRUE } else { &FALSE };
        cell.get_or_init(|| Self::value(value)).clone()
    }
}

impl<U: Clone + Send + 'static> Promise<Option<U>> {
    /// An already resolved empty optional.
    #[must_use]
    pub fn none() -> Self {
        Self::value(None)
    }
}

impl<T: Clone + Send + 'static> Future for Promise<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(outcome) = this.outcome() {
            return Poll::Ready(outcome.force());
        }
        let first = this.waker.is_none();
        let slot = Arc::clone(this.waker.get_or_insert_with(|| Arc::new(Mutex::new(None))));
        *slot.lock() = Some(cx.waker().clone());
        if first {
            this.listen_sync(move |_| {
                let waker = slot.lock().take();
                if let Some(waker) = waker {
                    waker.wake();
                }
            });
        }
        this.outcome()
            .map_or(Poll::Pending, |outcome| Poll::Ready(outcome.force()))
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        let status = match &state.outcome {
            None => "pending",
            Some(Outcome::Success(_)) => "success",
            Some(Outcome::Failure(_)) => "failure",
        };
        f.debug_struct("Promise")
            .field("status", &status)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

impl<T: Clone + Send + 'static> Resolver<T> {
    /// Resolves the promise. Returns false if it was already resolved.
    pub fn resolve(&self, outcome: Outcome<T>) -> bool {
        let listeners = {
            let mut state = self.shared.state.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome.clone());
            std::mem::take(&mut state.listeners)
        };
        for listener in listeners {
            if let Err(error) = guarded(|| listener(&outcome)) {
                tracing::error!(error = %error, "promise listener panicked");
            }
        }
        true
    }

    /// Resolves with a value.
    pub fn success(&self, value: T) -> bool {
        self.resolve(Outcome::Success(value))
    }

    /// Resolves with a failure.
    pub fn fail(&self, error: Error) -> bool {
        self.resolve(Outcome::Failure(error))
    }

    /// Resolves from a `Result`.
    pub fn complete(&self, result: Result<T>) -> bool {
        self.resolve(result.into())
    }

    /// Returns true once the promise has an outcome.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.shared.state.lock().outcome.is_some()
    }

    /// Returns a read handle to the promise this resolver completes.
    #[must_use]
    pub fn promise(&self) -> Promise<T> {
        Promise {
            shared: Arc::clone(&self.shared),
            waker: None,
        }
    }
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("resolved", &self.shared.state.lock().outcome.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn init_test(test_name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(test_name);
    }

    #[test]
    fn listeners_fire_in_registration_order() {
        init_test("listeners_fire_in_registration_order");
        let (promise, resolver) = Promise::<u32>::pending();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for id in 0..4 {
            let seen = Arc::clone(&seen);
            promise.listen_sync(move |outcome| seen.lock().push((id, *outcome.value())));
        }
        resolver.success(9);
        let late = Arc::clone(&seen);
        promise.listen_sync(move |outcome| late.lock().push((99, *outcome.value())));
        let seen = seen.lock().clone();
        crate::assert_with_log!(
            seen == vec![(0, 9), (1, 9), (2, 9), (3, 9), (99, 9)],
            "registration order",
            "[0,1,2,3,99]",
            seen
        );
        crate::test_complete!("listeners_fire_in_registration_order");
    }

    #[test]
    fn map_never_sees_failures() {
        init_test("map_never_sees_failures");
        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let failed = Promise::<u32>::failure(Error::protocol("bad frame"));
        let mapped = failed.map(move |v| {
            flag.store(true, Ordering::SeqCst);
            v + 1
        });
        let outcome = mapped.outcome().expect("resolved");
        crate::assert_with_log!(
            !called.load(Ordering::SeqCst),
            "mapper not invoked",
            false,
            called.load(Ordering::SeqCst)
        );
        assert_eq!(outcome.failure().message(), "bad frame");
        crate::test_complete!("map_never_sees_failures");
    }

    #[test]
    fn flat_map_chains_pending_promises() {
        init_test("flat_map_chains_pending_promises");
        let (first, first_resolver) = Promise::<u32>::pending();
        let (second, second_resolver) = Promise::<String>::pending();
        let chained = first.flat_map(move |v| second.map(move |s| format!("{s}{v}")));
        first_resolver.success(7);
        assert!(!chained.is_resolved());
        second_resolver.success("n=".into());
        assert_eq!(chained.outcome().unwrap().force().unwrap(), "n=7");
        crate::test_complete!("flat_map_chains_pending_promises");
    }

    #[test]
    fn outcome_mappers_recover_failures() {
        init_test("outcome_mappers_recover_failures");
        let recovered = Promise::<u32>::failure(Error::closed("x")).map_outcome(|o| match o {
            Outcome::Success(v) => Outcome::Success(v),
            Outcome::Failure(_) => Outcome::Success(0),
        });
        assert_eq!(*recovered.outcome().unwrap().value(), 0);
        let relabeled = Promise::<u32>::failure(Error::closed("x"))
            .map_failure(|e| Error::protocol(format!("wrapped {}", e.message())));
        assert_eq!(
            relabeled.outcome().unwrap().failure().message(),
            "wrapped x"
        );
        crate::test_complete!("outcome_mappers_recover_failures");
    }

    #[test]
    fn panics_become_failures() {
        init_test("panics_become_failures");
        let mapped = Promise::value(1_u8).map(|_| -> u8 { panic!("mapper exploded") });
        let outcome = mapped.outcome().expect("resolved");
        crate::assert_with_log!(
            outcome.failure().kind() == ErrorKind::Panic,
            "panic kind",
            ErrorKind::Panic,
            outcome.failure().kind()
        );
        let now = Promise::<u8>::now(|| panic!("action exploded"));
        assert_eq!(now.outcome().unwrap().failure().message(), "action exploded");
        crate::test_complete!("panics_become_failures");
    }

    #[test]
    fn panicking_listener_is_contained_before_and_after_resolution() {
        init_test("panicking_listener_is_contained_before_and_after_resolution");
        let (promise, resolver) = Promise::<u8>::pending();
        let after = Arc::new(AtomicBool::new(false));
        promise.listen_sync(|_| panic!("early listener exploded"));
        let flag = Arc::clone(&after);
        promise.listen_sync(move |_| flag.store(true, Ordering::SeqCst));
        resolver.success(3);
        let ran = after.load(Ordering::SeqCst);
        crate::assert_with_log!(ran, "listener after the panicking one", true, ran);

        promise.listen_sync(|_| panic!("late listener exploded"));
        let value = promise.outcome().expect("resolved").force().expect("value");
        crate::assert_with_log!(value == 3, "value intact", 3, value);
        crate::test_complete!("panicking_listener_is_contained_before_and_after_resolution");
    }

    #[test]
    #[should_panic(expected = "resolver already acquired")]
    fn resolver_is_handed_out_once() {
        let (promise, _resolver) = Promise::<u8>::pending();
        let _second = promise.resolver();
    }

    #[test]
    fn constants_are_shared() {
        init_test("constants_are_shared");
        assert!(Promise::void().same_promise(&Promise::void()));
        assert!(Promise::from_bool(true).same_promise(&Promise::from_bool(true)));
        assert!(!Promise::from_bool(true).same_promise(&Promise::from_bool(false)));
        assert_eq!(Promise::<Option<u8>>::none().outcome().unwrap().force().unwrap(), None);
        crate::test_complete!("constants_are_shared");
    }

    #[test]
    fn promise_is_a_future() {
        init_test("promise_is_a_future");
        let (promise, resolver) = Promise::<u32>::pending();
        let handle = std::thread::spawn(move || futures_lite::future::block_on(promise));
        resolver.success(5);
        assert_eq!(handle.join().unwrap().unwrap(), 5);
        crate::test_complete!("promise_is_a_future");
    }

    proptest! {
        #[test]
        fn first_resolution_wins(first in any::<i64>(), second in any::<i64>(), fail_first in any::<bool>()) {
            let (promise, resolver) = Promise::<i64>::pending();
            let seen = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&seen);
            promise.listen_sync(move |o| sink.lock().push(o.clone()));
            let expected = if fail_first {
                resolver.fail(Error::protocol(first.to_string()));
                Outcome::Failure(Error::protocol(first.to_string()))
            } else {
                resolver.success(first);
                Outcome::Success(first)
            };
            prop_assert!(!resolver.success(second));
            let late = Arc::clone(&seen);
            promise.listen_sync(move |o| late.lock().push(o.clone()));
            let seen = seen.lock().clone();
            prop_assert_eq!(seen.len(), 2);
            prop_assert!(seen.iter().all(|o| *o == expected));
        }
    }
}
