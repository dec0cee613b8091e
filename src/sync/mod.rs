//! Sequencing primitives built from promises.

mod request_queue;

pub use request_queue::{Acquire, RequestGuard, RequestQueue};
