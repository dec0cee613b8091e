//! A vat driven by the thread that calls [`SingleThreadVat::run_in_current_thread`].

use super::batched::TaskQueue;
use super::task::spawn;
use super::vat::{CurrentGuard, Task, Vat, VatHandle};
use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::types::Outcome;
use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

struct Inner {
    name: String,
    queue: TaskQueue,
    stopped: AtomicBool,
    signaled: Mutex<bool>,
    wakeup: Condvar,
}

impl Inner {
    fn signal(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.wakeup.notify_one();
    }
}

impl Vat for Inner {
    fn execute(&self, task: Task) {
        self.queue.push(task);
        self.signal();
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A cooperative vat whose loop runs on the caller's thread.
#[derive(Clone)]
pub struct SingleThreadVat {
    inner: Arc<Inner>,
}

impl SingleThreadVat {
    /// Creates a vat with default settings.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, &RuntimeConfig::default())
    }

    /// Creates a vat with explicit settings.
    #[must_use]
    pub fn with_config(name: impl Into<String>, config: &RuntimeConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                queue: TaskQueue::new(config.batch_size),
                stopped: AtomicBool::new(false),
                signaled: Mutex::new(false),
                wakeup: Condvar::new(),
            }),
        }
    }

    /// Returns a shareable handle for posting tasks.
    #[must_use]
    pub fn handle(&self) -> VatHandle {
        VatHandle::new(self.inner.clone())
    }

    /// Requests the loop to stop once the queued work is drained.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        self.inner.signal();
    }

    /// Returns true once [`stop`](Self::stop) was requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Runs queued tasks until stopped and drained.
    pub fn run_in_current_thread(&self) {
        let _current = CurrentGuard::enter(self.handle());
        tracing::debug!(vat = %self.inner.name, "vat loop started");
        loop {
            self.inner.queue.run_batch(&self.inner.name);
            if !self.inner.queue.is_empty() {
                continue;
            }
            if self.is_stopped() {
                break;
            }
            let mut signaled = self.inner.signaled.lock();
            while !*signaled && self.inner.queue.is_empty() && !self.is_stopped() {
                self.inner.wakeup.wait(&mut signaled);
            }
            *signaled = false;
        }
        tracing::debug!(vat = %self.inner.name, "vat loop stopped");
    }

    /// Runs `action` on a fresh vat owned by the calling thread.
    ///
    /// The loop stops as soon as the action resolves.
    pub fn run_action<T, F>(action: F) -> Result<T>
    where
        T: Clone + Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let vat = Self::new("action");
        let promise = spawn(&vat.handle(), action);
        let stopper = vat.clone();
        promise.listen_sync(move |_| stopper.stop());
        vat.run_in_current_thread();
        promise
            .outcome()
            .unwrap_or_else(|| {
                Outcome::Failure(Error::cancelled("vat stopped before the action completed"))
            })
            .force()
    }
}

impl std::fmt::Debug for SingleThreadVat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleThreadVat")
            .field("name", &self.inner.name)
            .field("queued", &self.inner.queue.len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promise::Promise;
    use crate::runtime::vat::current;

    fn init_test(test_name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(test_name);
    }

    #[test]
    fn runs_tasks_in_order_then_stops() {
        init_test("runs_tasks_in_order_then_stops");
        let vat = SingleThreadVat::new("ordered");
        let handle = vat.handle();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let seen = Arc::clone(&seen);
            handle.execute(move || seen.lock().push(i));
        }
        let stopper = vat.clone();
        handle.execute(move || stopper.stop());
        vat.run_in_current_thread();
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
        crate::test_complete!("runs_tasks_in_order_then_stops");
    }

    #[test]
    fn run_action_exposes_current_vat() {
        init_test("run_action_exposes_current_vat");
        let name = SingleThreadVat::run_action(async {
            Ok(current().map(|vat| vat.name().to_owned()))
        })
        .expect("action succeeds");
        assert_eq!(name.as_deref(), Some("action"));
        crate::test_complete!("run_action_exposes_current_vat");
    }

    #[test]
    fn cross_thread_resolution_is_marshaled_back() {
        init_test("cross_thread_resolution_is_marshaled_back");
        let result = SingleThreadVat::run_action(async {
            let home = std::thread::current().id();
            let (promise, resolver) = Promise::<u32>::pending();
            let mapped = promise.map(move |v| (v, std::thread::current().id() == home));
            std::thread::spawn(move || resolver.success(3));
            mapped.await
        })
        .expect("action succeeds");
        assert_eq!(result, (3, true));
        crate::test_complete!("cross_thread_resolution_is_marshaled_back");
    }

    #[test]
    fn panicking_task_does_not_kill_loop() {
        init_test("panicking_task_does_not_kill_loop");
        let vat = SingleThreadVat::new("sturdy");
        let handle = vat.handle();
        handle.execute(|| panic!("bad task"));
        let stopper = vat.clone();
        handle.execute(move || stopper.stop());
        vat.run_in_current_thread();
        assert!(vat.is_stopped());
        crate::test_complete!("panicking_task_does_not_kill_loop");
    }
}
