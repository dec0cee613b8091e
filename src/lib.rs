//! Vatflow: promise-based asynchronous I/O on single-threaded event loops.
//!
//! # Overview
//!
//! Work runs on *vats*: event loops that execute their tasks one at a time
//! on a single thread. Operations return [`Promise`]s that can be awaited,
//! listened to, or composed, and resolve on the vat that resolves them.
//! Ordering between concurrent callers is expressed with a
//! [`RequestQueue`](sync::RequestQueue) rather than locks held across
//! suspension points.
//!
//! # Module Structure
//!
//! - [`promise`]: [`Promise`], [`Resolver`] and combinators
//! - [`runtime`]: vats, the daemon vat pool and blocking offload
//! - [`sync`]: request queues serializing asynchronous actions
//! - [`stream`]: asynchronous streams and sinks
//! - [`io`]: byte channels, pipes, parsers and generators
//! - [`net`]: socket traits and the selector-based implementation
//! - [`http`]: HTTP/1.x server and client
//! - [`config`]: runtime and HTTP settings
//! - [`error`](mod@error): error types
//!
//! # Example
//!
//! ```ignore
//! use vatflow::runtime::SingleThreadVat;
//! use vatflow::Promise;
//!
//! let answer = SingleThreadVat::run_action(async {
//!     Promise::value(20).map(|v| v + 22).await
//! })?;
//! assert_eq!(answer, 42);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod config;
pub mod error;
pub mod http;
pub mod io;
pub mod net;
pub mod promise;
pub mod runtime;
pub mod stream;
pub mod sync;
pub mod types;

#[cfg(any(test, feature = "test-internals"))]
pub mod test_utils;

pub use config::{ConfigError, HttpConfig, RuntimeConfig};
pub use error::{Error, ErrorKind, Result};
pub use promise::{Promise, Resolver};
pub use types::{ACloseable, Outcome};
