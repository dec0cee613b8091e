//! Vats and task driving.
//!
//! # Vat variants
//!
//! - [`SingleThreadVat`]: loop driven by the thread calling
//!   [`run_in_current_thread`](SingleThreadVat::run_in_current_thread)
//! - [`DaemonVat`]: lazily started background worker that expires when idle
//! - [`SelectorVat`](crate::net::selector::SelectorVat): adds a readiness
//!   selector polled whenever the task queue is empty
//!
//! # Driving futures
//!
//! [`spawn`] polls a future on a vat and exposes its result as a
//! [`Promise`](crate::Promise). [`run_blocking`] hands blocking work to a
//! dedicated thread and resolves back into the promise world.

mod batched;
mod daemon;
#[cfg(not(target_arch = "wasm32"))]
pub mod io_driver;
mod single_thread;
mod task;
mod vat;
mod yield_now;

pub(crate) use batched::TaskQueue;
pub(crate) use vat::CurrentGuard;

pub use daemon::{DaemonVat, daemon, default_vat, run_blocking};
pub use single_thread::SingleThreadVat;
pub use task::{CatchUnwind, spawn, spawn_default};
pub use vat::{Task, Vat, VatHandle, current};
pub use yield_now::{YieldNow, yield_now};
