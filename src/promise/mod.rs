//! Single-assignment promises.
//!
//! A [`Promise`] starts empty and is resolved exactly once through its
//! [`Resolver`]. Every listener, whether registered before or after the
//! resolution, observes the same [`Outcome`](crate::Outcome).
//!
//! # Composition
//!
//! Transformations ([`Promise::map`], [`Promise::flat_map`] and friends)
//! produce new promises. A failure short-circuits through `map`/`flat_map`
//! without ever invoking the mapping function; only the `*_outcome` variants
//! see both branches. Panics raised by a mapping function are caught and turn
//! into a [`Panic`](crate::ErrorKind::Panic) failure of the result.
//!
//! Continuations registered while a vat is current are posted back to that
//! vat when the source resolves on another thread, so they always run where
//! they were registered.
//!
//! # Example
//!
//! ```ignore
//! use vatflow::Promise;
//!
//! let (promise, resolver) = Promise::<u32>::pending();
//! let doubled = promise.map(|v| v * 2);
//! resolver.success(21);
//! assert_eq!(doubled.outcome().unwrap().force().unwrap(), 42);
//! ```

mod promise;

pub use promise::{Listener, Promise, Resolver};
