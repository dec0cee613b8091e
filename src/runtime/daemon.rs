//! Background vats that do not keep the application alive.
//!
//! A [`DaemonVat`] starts a worker thread lazily on the first task and lets
//! it exit after an idle period. The process-wide daemon returned by
//! [`daemon`] is the fallback vat for code that runs outside any vat, and
//! [`run_blocking`] moves blocking work off the cooperative loops entirely.

use super::batched::TaskQueue;
use super::vat::{CurrentGuard, Task, Vat, VatHandle};
use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::promise::Promise;
use parking_lot::{Condvar, Mutex};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

struct Inner {
    me: Weak<Inner>,
    name: String,
    queue: TaskQueue,
    running: Mutex<bool>,
    wakeup: Condvar,
    idle_expiry: Duration,
}

impl Inner {
    fn worker_loop(self: &Arc<Self>) {
        let handle = VatHandle::new(Arc::clone(self) as Arc<dyn Vat>);
        let _current = CurrentGuard::enter(handle);
        tracing::trace!(vat = %self.name, "daemon worker started");
        loop {
            self.queue.run_batch(&self.name);
            let mut running = self.running.lock();
            if !self.queue.is_empty() {
                continue;
            }
            let timed_out = self
                .wakeup
                .wait_for(&mut running, self.idle_expiry)
                .timed_out();
            if timed_out && self.queue.is_empty() {
                *running = false;
                break;
            }
        }
        tracing::trace!(vat = %self.name, "daemon worker expired");
    }
}

impl Vat for Inner {
    fn execute(&self, task: Task) {
        self.queue.push(task);
        let mut running = self.running.lock();
        if *running {
            self.wakeup.notify_one();
            return;
        }
        *running = true;
        drop(running);
        let Some(me) = self.me.upgrade() else {
            return;
        };
        let spawned = std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || me.worker_loop());
        if let Err(error) = spawned {
            tracing::error!(vat = %self.name, error = %error, "failed to start daemon worker");
            *self.running.lock() = false;
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A vat backed by a lazily started, self-expiring worker thread.
#[derive(Clone)]
pub struct DaemonVat {
    inner: Arc<Inner>,
}

impl DaemonVat {
    /// Creates a daemon vat.
    #[must_use]
    pub fn new(name: impl Into<String>, config: &RuntimeConfig) -> Self {
        let name = name.into();
        let inner = Arc::new_cyclic(|me| Inner {
            me: me.clone(),
            name,
            queue: TaskQueue::new(config.batch_size),
            running: Mutex::new(false),
            wakeup: Condvar::new(),
            idle_expiry: config.daemon_idle_expiry(),
        });
        Self { inner }
    }

    /// Returns a shareable handle for posting tasks.
    #[must_use]
    pub fn handle(&self) -> VatHandle {
        VatHandle::new(self.inner.clone())
    }

    /// Returns true while a worker thread is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        *self.inner.running.lock()
    }
}

/// The process-wide daemon vat.
#[must_use]
pub fn daemon() -> VatHandle {
    static DAEMON: OnceLock<DaemonVat> = OnceLock::new();
    DAEMON
        .get_or_init(|| DaemonVat::new("vatflow-daemon", &RuntimeConfig::default()))
        .handle()
}

/// The current vat, or the process-wide daemon when none is running.
#[must_use]
pub fn default_vat() -> VatHandle {
    super::vat::current().unwrap_or_else(daemon)
}

/// Runs a blocking closure on a dedicated thread and resolves the result.
///
/// Continuations registered on the returned promise from inside a vat run
/// back on that vat.
pub fn run_blocking<T, F>(f: F) -> Promise<T>
where
    T: Clone + Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (promise, resolver) = Promise::pending();
    let failed = resolver.clone();
    let spawned = std::thread::Builder::new()
        .name("vatflow-blocking".into())
        .spawn(move || {
            let result = catch_unwind(AssertUnwindSafe(f))
                .unwrap_or_else(|payload| Err(Error::from_panic(payload.as_ref())));
            resolver.complete(result);
        });
    if let Err(error) = spawned {
        failed.fail(error.into());
    }
    promise
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::wait_for;

    fn init_test(test_name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(test_name);
    }

    #[test]
    fn daemon_worker_runs_and_expires() {
        init_test("daemon_worker_runs_and_expires");
        let config = RuntimeConfig {
            daemon_idle_expiry_ms: 20,
            ..RuntimeConfig::default()
        };
        let vat = DaemonVat::new("expiring", &config);
        let (promise, resolver) = Promise::<String>::pending();
        vat.handle().execute(move || {
            let name = crate::runtime::current().map(|v| v.name().to_owned());
            resolver.success(name.unwrap_or_default());
        });
        let name = wait_for(&promise, Duration::from_secs(5)).expect("task ran");
        assert_eq!(name, "expiring");
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while vat.is_running() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!vat.is_running());
        crate::test_complete!("daemon_worker_runs_and_expires");
    }

    #[test]
    fn run_blocking_reports_value_and_panic() {
        init_test("run_blocking_reports_value_and_panic");
        let ok = run_blocking(|| Ok(6 * 7));
        assert_eq!(wait_for(&ok, Duration::from_secs(5)).unwrap(), 42);
        let boom = run_blocking(|| -> Result<u8> { panic!("blocking exploded") });
        let err = wait_for(&boom, Duration::from_secs(5)).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Panic);
        crate::test_complete!("run_blocking_reports_value_and_panic");
    }
}
