//! The vat abstraction and the current-vat context.
//!
//! A vat is a single-threaded cooperative executor: tasks handed to
//! [`Vat::execute`] run one at a time, to completion, on the vat's owning
//! thread. While a vat runs a task it is installed as the *current vat* of
//! that thread, so continuations registered from inside the task know where
//! to post themselves back to.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

/// A unit of work queued on a vat.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A single-threaded cooperative executor.
pub trait Vat: Send + Sync + 'static {
    /// Enqueues a task. Safe to call from any thread.
    fn execute(&self, task: Task);

    /// Diagnostic name of the vat.
    fn name(&self) -> &str;
}

/// A shared, cloneable handle to a vat.
#[derive(Clone)]
pub struct VatHandle {
    vat: Arc<dyn Vat>,
}

impl VatHandle {
    /// Wraps a vat implementation.
    #[must_use]
    pub fn new(vat: Arc<dyn Vat>) -> Self {
        Self { vat }
    }

    /// Enqueues a closure on the vat.
    pub fn execute(&self, task: impl FnOnce() + Send + 'static) {
        self.vat.execute(Box::new(task));
    }

    /// Diagnostic name of the vat.
    #[must_use]
    pub fn name(&self) -> &str {
        self.vat.name()
    }

    /// Returns true if both handles refer to the same vat.
    #[must_use]
    pub fn same_vat(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.vat), Arc::as_ptr(&other.vat))
    }

    /// Returns true if this vat is the calling thread's current vat.
    #[must_use]
    pub fn is_current(&self) -> bool {
        current().is_some_and(|vat| vat.same_vat(self))
    }

    /// Runs `task` inline when this vat is current, otherwise enqueues it.
    pub fn run_or_execute(&self, task: impl FnOnce() + Send + 'static) {
        if self.is_current() {
            task();
        } else {
            self.execute(task);
        }
    }
}

impl fmt::Debug for VatHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VatHandle")
            .field("name", &self.name())
            .finish()
    }
}

thread_local! {
    static CURRENT: RefCell<Option<VatHandle>> = const { RefCell::new(None) };
}

/// Returns the vat running on the calling thread, if any.
#[must_use]
pub fn current() -> Option<VatHandle> {
    CURRENT.with(|cell| cell.borrow().clone())
}

/// Installs a vat as current for the lifetime of the guard.
pub(crate) struct CurrentGuard {
    previous: Option<VatHandle>,
}

impl CurrentGuard {
    pub(crate) fn enter(vat: VatHandle) -> Self {
        let previous = CURRENT.with(|cell| cell.borrow_mut().replace(vat));
        Self { previous }
    }
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|cell| *cell.borrow_mut() = previous);
    }
}
