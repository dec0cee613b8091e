//! Shared harness for integration tests.

#![allow(dead_code)]

pub use vatflow::test_utils::{init_test_logging, wait_for, yield_to_vat};
pub use vatflow::{assert_with_log, test_complete, test_phase, test_section};

use std::future::Future;
use vatflow::Result;

/// Logs the start of `name` with the shared subscriber installed.
pub fn init_test(name: &str) {
    init_test_logging();
    test_phase!(name);
}

/// Drives `fut` to completion on a fresh single-thread vat.
pub fn run_test<T, F>(fut: F) -> Result<T>
where
    T: Clone + Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    vatflow::test_utils::run_on_vat(fut)
}

/// An unused loopback address for binding servers.
pub fn loopback() -> std::net::SocketAddr {
    std::net::SocketAddr::from(([127, 0, 0, 1], 0))
}
