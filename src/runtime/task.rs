//! Driving futures on vats.
//!
//! [`spawn`] turns a `Send` future into a [`Promise`]. The future is polled
//! only on the target vat; its waker re-posts the poll through
//! [`Vat::execute`](super::Vat::execute), so a wake-up from a foreign thread
//! never polls in place.

use super::vat::VatHandle;
use crate::error::{Error, Result};
use crate::promise::{Promise, Resolver};
use parking_lot::Mutex;
use pin_project::pin_project;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Wake, Waker};

/// Future adapter converting a panic during `poll` into a `Panic` failure.
#[pin_project]
pub struct CatchUnwind<F> {
    #[pin]
    inner: F,
}

impl<F> CatchUnwind<F> {
    /// Wraps `inner`.
    pub const fn new(inner: F) -> Self {
        Self { inner }
    }
}

impl<T, F: Future<Output = Result<T>>> Future for CatchUnwind<F> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = self.project().inner;
        match catch_unwind(AssertUnwindSafe(|| inner.poll(cx))) {
            Ok(poll) => poll,
            Err(payload) => Poll::Ready(Err(Error::from_panic(payload.as_ref()))),
        }
    }
}

type BoxedAction<T> = Pin<Box<CatchUnwind<Pin<Box<dyn Future<Output = Result<T>> + Send>>>>>;

struct SpawnedTask<T: Clone + Send + 'static> {
    vat: VatHandle,
    future: Mutex<Option<BoxedAction<T>>>,
    resolver: Resolver<T>,
    scheduled: AtomicBool,
}

impl<T: Clone + Send + 'static> SpawnedTask<T> {
    fn schedule(self: &Arc<Self>) {
        if !self.scheduled.swap(true, Ordering::AcqRel) {
            let task = Arc::clone(self);
            self.vat.execute(move || task.run());
        }
    }

    fn run(self: &Arc<Self>) {
        self.scheduled.store(false, Ordering::Release);
        let waker = Waker::from(Arc::clone(self));
        let mut cx = Context::from_waker(&waker);
        let mut slot = self.future.lock();
        let Some(future) = slot.as_mut() else {
            return;
        };
        if let Poll::Ready(result) = future.as_mut().poll(&mut cx) {
            *slot = None;
            drop(slot);
            self.resolver.complete(result);
        }
    }
}

impl<T: Clone + Send + 'static> Wake for SpawnedTask<T> {
    fn wake(self: Arc<Self>) {
        self.schedule();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.schedule();
    }
}

impl<T: Clone + Send + 'static> Drop for SpawnedTask<T> {
    fn drop(&mut self) {
        if self.future.get_mut().is_some() {
            self.resolver
                .fail(Error::cancelled("task dropped before completion"));
        }
    }
}

/// Drives `future` on `vat`, returning a promise for its result.
pub fn spawn<T, F>(vat: &VatHandle, future: F) -> Promise<T>
where
    T: Clone + Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    let (promise, resolver) = Promise::pending();
    let boxed: Pin<Box<dyn Future<Output = Result<T>> + Send>> = Box::pin(future);
    let task = Arc::new(SpawnedTask {
        vat: vat.clone(),
        future: Mutex::new(Some(Box::pin(CatchUnwind::new(boxed)))),
        resolver,
        scheduled: AtomicBool::new(false),
    });
    task.schedule();
    promise
}

/// Drives `future` on the current vat, or on the shared daemon vat when the
/// calling thread runs none.
pub fn spawn_default<T, F>(future: F) -> Promise<T>
where
    T: Clone + Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    spawn(&super::default_vat(), future)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::runtime::SingleThreadVat;

    fn init_test(test_name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(test_name);
    }

    #[test]
    fn spawned_future_resolves_promise() {
        init_test("spawned_future_resolves_promise");
        let vat = SingleThreadVat::new("spawn");
        let promise = spawn(&vat.handle(), async { Ok::<_, Error>(40 + 2) });
        let stopper = vat.clone();
        promise.listen_sync(move |_| stopper.stop());
        vat.run_in_current_thread();
        assert_eq!(promise.outcome().unwrap().force().unwrap(), 42);
        crate::test_complete!("spawned_future_resolves_promise");
    }

    #[test]
    fn panicking_future_fails_promise() {
        init_test("panicking_future_fails_promise");
        let result = SingleThreadVat::run_action(async {
            let inner = spawn(&crate::runtime::current().expect("on vat"), async {
                if true {
                    panic!("poll exploded");
                }
                Ok::<u8, Error>(0)
            });
            Ok(inner.await.unwrap_err().kind())
        });
        assert_eq!(result.unwrap(), ErrorKind::Panic);
        crate::test_complete!("panicking_future_fails_promise");
    }
}
