//! Test helpers shared by unit and integration tests.
//!
//! Exposed under the `test-internals` feature so `tests/common` can reuse the
//! same logging setup and phase macros as the in-crate `#[cfg(test)]` modules.

use crate::error::Result;
use crate::promise::Promise;
use crate::runtime::SingleThreadVat;
use std::future::Future;
use std::sync::Once;
use std::time::Duration;

static INIT_LOGGING: Once = Once::new();

/// Installs a `tracing` subscriber writing to the test harness.
///
/// Honors `RUST_LOG`; defaults to `vatflow=debug`. Safe to call repeatedly.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("vatflow=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Runs `fut` on a fresh single-thread vat driven by the calling thread.
pub fn run_on_vat<T, F>(fut: F) -> Result<T>
where
    T: Clone + Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    SingleThreadVat::run_action(fut)
}

/// Lets every task already queued on the current vat run first.
pub async fn yield_to_vat() {
    crate::runtime::yield_now().await;
}

/// Blocks the calling thread until `promise` resolves or `timeout` elapses.
///
/// # Panics
///
/// Panics on timeout.
pub fn wait_for<T: Clone + Send + 'static>(promise: &Promise<T>, timeout: Duration) -> Result<T> {
    let (tx, rx) = std::sync::mpsc::channel();
    promise.listen_sync(move |outcome| {
        let _ = tx.send(outcome.clone());
    });
    rx.recv_timeout(timeout)
        .unwrap_or_else(|_| panic!("promise not resolved within {timeout:?}"))
        .force()
}

/// Logs the start of a test phase.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        ::tracing::info!(phase = %$name, "========== TEST PHASE ==========");
    };
}

/// Logs a section inside a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        ::tracing::info!(section = %$name, "---------- section ----------");
    };
}

/// Logs successful test completion with optional key/value fields.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        ::tracing::info!(test = %$name, "test complete");
    };
    ($name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        ::tracing::info!(test = %$name, $($key = ?$value),+, "test complete");
    };
}

/// Asserts a condition, logging the expectation before failing.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $label:expr, $expected:expr, $actual:expr) => {{
        let passed = $cond;
        ::tracing::debug!(
            check = %$label,
            expected = ?$expected,
            actual = ?$actual,
            passed,
            "assertion"
        );
        assert!(
            passed,
            "{}: expected {:?}, actual {:?}",
            $label,
            $expected,
            $actual
        );
    }};
}
