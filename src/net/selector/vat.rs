//! The selector vat: a single-thread vat that waits on a readiness poller
//! whenever its task queue is empty.
//!
//! # Loop
//!
//! 1. Run a batch of queued tasks.
//! 2. If more tasks are queued, poll readiness without blocking and repeat.
//! 3. Otherwise block in the poller for at most the configured idle wait.
//!    [`Vat::execute`] interrupts the wait.
//!
//! The blocking wait is shortened to the earliest pending deadline, and due
//! deadlines fire after every batch and every poll.
//!
//! On stop the remaining tasks are drained, then every registered channel and
//! pending deadline is failed with a `Closed` error.
//!
//! # Scratch buffer
//!
//! Each vat owns one read buffer shared by its sockets. It is borrowed with
//! [`SelectorVat::acquire_scratch`] and must be handed back with
//! [`SelectorVat::release_scratch`] before the next borrow.

use super::timer::{DeadlineHeap, TimerKey};
use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::promise::Promise;
use crate::runtime::io_driver::IoDriver;
use crate::runtime::{CurrentGuard, Task, TaskQueue, Vat, VatHandle, spawn};
use crate::types::Outcome;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

static NEXT_VAT_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static CURRENT_SELECTOR: RefCell<Option<SelectorVat>> = const { RefCell::new(None) };
}

/// The scratch buffer of a selector vat.
///
/// Dereferences to its bytes. Must be returned to the vat it came from.
#[derive(Debug)]
pub struct ScratchBuffer {
    data: Vec<u8>,
    owner: usize,
}

impl std::ops::Deref for ScratchBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl std::ops::DerefMut for ScratchBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

struct Inner {
    id: usize,
    name: String,
    queue: TaskQueue,
    driver: Arc<IoDriver>,
    stopped: AtomicBool,
    idle_wait: Duration,
    spurious_threshold: u32,
    spurious: AtomicU32,
    scratch: Mutex<Option<Vec<u8>>>,
    deadlines: Mutex<DeadlineHeap>,
}

impl Vat for Inner {
    fn execute(&self, task: Task) {
        self.queue.push(task);
        if let Err(error) = self.driver.notify() {
            tracing::warn!(vat = %self.name, error = %error, "failed to wake selector");
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A vat multiplexing non-blocking sockets.
#[derive(Clone)]
pub struct SelectorVat {
    inner: Arc<Inner>,
}

impl SelectorVat {
    /// Creates a selector vat with default settings.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        Self::with_config(name, &RuntimeConfig::default())
    }

    /// Creates a selector vat with explicit settings.
    pub fn with_config(name: impl Into<String>, config: &RuntimeConfig) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(Inner {
                id: NEXT_VAT_ID.fetch_add(1, Ordering::Relaxed),
                name: name.into(),
                queue: TaskQueue::new(config.batch_size),
                driver: Arc::new(IoDriver::new()?),
                stopped: AtomicBool::new(false),
                idle_wait: config.selector_idle_wait(),
                spurious_threshold: config.spurious_wakeup_threshold,
                spurious: AtomicU32::new(0),
                scratch: Mutex::new(Some(vec![0; config.scratch_buffer_size.max(1)])),
                deadlines: Mutex::new(DeadlineHeap::default()),
            }),
        })
    }

    /// The selector vat running on the calling thread, if any.
    #[must_use]
    pub fn current() -> Option<Self> {
        CURRENT_SELECTOR.with(|cell| cell.borrow().clone())
    }

    /// Returns a shareable handle for posting tasks.
    #[must_use]
    pub fn handle(&self) -> VatHandle {
        VatHandle::new(self.inner.clone())
    }

    /// Diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub(crate) fn driver(&self) -> &Arc<IoDriver> {
        &self.inner.driver
    }

    /// Drives `future` on this vat.
    pub fn spawn<T, F>(&self, future: F) -> crate::promise::Promise<T>
    where
        T: Clone + Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        spawn(&self.handle(), future)
    }

    /// Requests the loop to stop once queued work is drained.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        let _ = self.inner.driver.notify();
    }

    /// Returns true once [`stop`](Self::stop) was requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Borrows the scratch buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is already borrowed.
    #[must_use]
    pub fn acquire_scratch(&self) -> ScratchBuffer {
        let data = self
            .inner
            .scratch
            .lock()
            .take()
            .unwrap_or_else(|| panic!("The buffer was allocated but not freed!"));
        ScratchBuffer {
            data,
            owner: self.inner.id,
        }
    }

    /// Returns the scratch buffer.
    ///
    /// # Panics
    ///
    /// Panics if `buffer` belongs to another vat or the buffer was not borrowed.
    pub fn release_scratch(&self, buffer: ScratchBuffer) {
        assert!(
            buffer.owner == self.inner.id,
            "The wrong buffer is released!"
        );
        let mut slot = self.inner.scratch.lock();
        assert!(slot.is_none(), "The buffer was not allocated yet!");
        *slot = Some(buffer.data);
    }

    /// Records a readiness report that turned out to be false.
    ///
    /// Once more than the configured threshold accumulate in a row, the
    /// poller is replaced and every channel re-registered. Returns true if
    /// that happened.
    pub fn note_spurious_wakeup(&self) -> bool {
        let seen = self.inner.spurious.fetch_add(1, Ordering::AcqRel) + 1;
        if seen <= self.inner.spurious_threshold {
            return false;
        }
        self.inner.spurious.store(0, Ordering::Release);
        tracing::debug!(vat = %self.inner.name, seen, "changing selector after spurious wakeups");
        if let Err(error) = self.inner.driver.rebuild() {
            tracing::error!(vat = %self.inner.name, error = %error, "failed to rebuild selector");
        }
        true
    }

    /// Resets the spurious readiness counter after a productive operation.
    pub fn note_progress(&self) {
        self.inner.spurious.store(0, Ordering::Release);
    }

    /// Resolves after `delay`, measured by this vat's loop.
    pub fn sleep(&self, delay: Duration) -> Promise<()> {
        self.schedule(delay).1
    }

    /// Schedules a deadline `delay` from now.
    ///
    /// The key cancels it through [`cancel_timer`](Self::cancel_timer).
    pub fn schedule(&self, delay: Duration) -> (TimerKey, Promise<()>) {
        let (promise, resolver) = Promise::pending();
        let deadline = Instant::now() + delay;
        let (key, earliest) = {
            let mut deadlines = self.inner.deadlines.lock();
            let key = deadlines.insert(deadline, resolver);
            (key, deadlines.peek_deadline() == Some(deadline))
        };
        let on_vat = Self::current().is_some_and(|vat| vat.inner.id == self.inner.id);
        if earliest && !on_vat {
            if let Err(error) = self.inner.driver.notify() {
                tracing::warn!(vat = %self.inner.name, error = %error, "failed to wake selector");
            }
        }
        (key, promise)
    }

    /// Drops a pending deadline. Returns false if it already fired.
    pub fn cancel_timer(&self, key: TimerKey) -> bool {
        self.inner.deadlines.lock().cancel(key)
    }

    /// Number of pending deadlines.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.inner.deadlines.lock().len()
    }

    fn fire_deadlines(&self) {
        let due = self.inner.deadlines.lock().pop_expired(Instant::now());
        for resolver in due {
            resolver.success(());
        }
    }

    fn idle_wait(&self) -> Duration {
        let next = self.inner.deadlines.lock().peek_deadline();
        next.map_or(self.inner.idle_wait, |deadline| {
            deadline
                .saturating_duration_since(Instant::now())
                .min(self.inner.idle_wait)
        })
    }

    /// Blocks in the poller for at most the idle wait and dispatches readiness.
    fn idle(&self) {
        if let Err(error) = self.inner.driver.turn(Some(self.idle_wait())) {
            tracing::error!(vat = %self.inner.name, error = %error, "selector failed");
            self.inner.driver.fail_all(&Error::from(error));
        }
    }

    /// Dispatches readiness without blocking.
    pub fn poll_idle(&self) {
        if let Err(error) = self.inner.driver.turn(Some(Duration::ZERO)) {
            self.inner.driver.fail_all(&Error::from(error));
        }
    }

    /// Runs the loop on the calling thread until stopped.
    pub fn run_in_current_thread(&self) {
        let _current = CurrentGuard::enter(self.handle());
        let previous = CURRENT_SELECTOR.with(|cell| cell.borrow_mut().replace(self.clone()));
        tracing::debug!(vat = %self.inner.name, "selector vat started");
        loop {
            self.inner.queue.run_batch(&self.inner.name);
            self.fire_deadlines();
            if !self.inner.queue.is_empty() {
                self.poll_idle();
                continue;
            }
            if self.is_stopped() {
                break;
            }
            self.idle();
            self.fire_deadlines();
        }
        self.poll_idle();
        while !self.inner.queue.is_empty() {
            self.inner.queue.run_batch(&self.inner.name);
        }
        let closed = Error::closed("The vat is closed");
        self.inner.driver.fail_all(&closed);
        let abandoned = self.inner.deadlines.lock().drain();
        for resolver in abandoned {
            resolver.fail(closed.clone());
        }
        CURRENT_SELECTOR.with(|cell| *cell.borrow_mut() = previous);
        tracing::debug!(vat = %self.inner.name, "selector vat stopped");
    }

    /// Starts a selector vat on a dedicated thread.
    pub fn start(name: impl Into<String>, config: &RuntimeConfig) -> Result<Self> {
        let vat = Self::with_config(name, config)?;
        let runner = vat.clone();
        std::thread::Builder::new()
            .name(vat.inner.name.clone())
            .spawn(move || runner.run_in_current_thread())?;
        Ok(vat)
    }

    /// Runs `action` on a fresh selector vat owned by the calling thread,
    /// stopping the loop once the action resolves.
    pub fn run_action<T, F, A>(action: A) -> Result<T>
    where
        T: Clone + Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
        A: FnOnce(Self) -> F,
    {
        let vat = Self::new("selector-action")?;
        let promise = vat.spawn(action(vat.clone()));
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

impl std::fmt::Debug for SelectorVat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectorVat")
            .field("name", &self.inner.name)
            .field("queued", &self.inner.queue.len())
            .field("channels", &self.inner.driver.len())
            .field("timers", &self.pending_timers())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::current;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn run_action_installs_selector_context() {
        init_test("run_action_installs_selector_context");
        let name = SelectorVat::run_action(|vat| async move {
            let current_name = current().map(|h| h.name().to_owned());
            assert_eq!(SelectorVat::current().map(|v| v.name().to_owned()), Some(vat.name().to_owned()));
            Ok(current_name)
        })
        .expect("action");
        assert_eq!(name.as_deref(), Some("selector-action"));
        crate::test_complete!("run_action_installs_selector_context");
    }

    #[test]
    fn tasks_from_other_threads_wake_the_selector() {
        init_test("tasks_from_other_threads_wake_the_selector");
        let config = RuntimeConfig {
            selector_idle_wait_ms: 60_000,
            ..RuntimeConfig::default()
        };
        let vat = SelectorVat::start("wake", &config).expect("start");
        let (promise, resolver) = crate::promise::Promise::pending();
        vat.handle().execute(move || {
            resolver.success(current().map(|h| h.name().to_owned()));
        });
        let ran_on = crate::test_utils::wait_for(&promise, Duration::from_secs(5)).expect("task");
        vat.stop();
        assert_eq!(ran_on.as_deref(), Some("wake"));
        crate::test_complete!("tasks_from_other_threads_wake_the_selector");
    }

    #[test]
    fn deadlines_fire_in_order_while_idle() {
        init_test("deadlines_fire_in_order_while_idle");
        let config = RuntimeConfig {
            selector_idle_wait_ms: 60_000,
            ..RuntimeConfig::default()
        };
        let vat = SelectorVat::start("deadlines", &config).expect("start");
        let started = Instant::now();
        let order = Arc::new(Mutex::new(Vec::new()));
        let (key, never) = vat.schedule(Duration::from_millis(5));
        let cancelled = vat.cancel_timer(key);
        let late = vat.sleep(Duration::from_millis(40));
        let early = vat.sleep(Duration::from_millis(10));
        for (name, timer) in [("late", &late), ("early", &early)] {
            let order = Arc::clone(&order);
            timer.listen_sync(move |_| order.lock().push(name));
        }
        crate::test_utils::wait_for(&late, Duration::from_secs(5)).expect("late deadline");
        let elapsed = started.elapsed();
        vat.stop();
        let order = order.lock().clone();
        crate::assert_with_log!(order == ["early", "late"], "order", "[early, late]", order);
        crate::assert_with_log!(cancelled, "cancelled", true, cancelled);
        crate::assert_with_log!(!never.is_resolved(), "cancelled stays silent", false, never);
        crate::assert_with_log!(
            elapsed < Duration::from_secs(5),
            "idle wait shortened to deadline",
            "< 5s",
            elapsed
        );
        crate::test_complete!("deadlines_fire_in_order_while_idle");
    }

    #[test]
    fn scratch_is_single_borrower() {
        init_test("scratch_is_single_borrower");
        let vat = SelectorVat::new("scratch").expect("vat");
        let buffer = vat.acquire_scratch();
        assert_eq!(buffer.len(), 16 * 1024);
        let second = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| vat.acquire_scratch()));
        assert!(second.is_err());
        vat.release_scratch(buffer);
        let again = vat.acquire_scratch();
        vat.release_scratch(again);
        crate::test_complete!("scratch_is_single_borrower");
    }

    #[test]
    #[should_panic(expected = "The wrong buffer is released!")]
    fn foreign_scratch_release_panics() {
        let one = SelectorVat::new("one").expect("vat");
        let two = SelectorVat::new("two").expect("vat");
        let buffer = one.acquire_scratch();
        two.release_scratch(buffer);
    }

    #[test]
    fn spurious_threshold_triggers_rebuild() {
        init_test("spurious_threshold_triggers_rebuild");
        let config = RuntimeConfig {
            spurious_wakeup_threshold: 2,
            ..RuntimeConfig::default()
        };
        let vat = SelectorVat::with_config("spurious", &config).expect("vat");
        assert!(!vat.note_spurious_wakeup());
        assert!(!vat.note_spurious_wakeup());
        assert!(vat.note_spurious_wakeup());
        assert!(!vat.note_spurious_wakeup());
        crate::test_complete!("spurious_threshold_triggers_rebuild");
    }
}
