//! Core types shared by every layer of vatflow.
//!
//! - [`outcome`]: two-valued success/failure result carried by promises
//! - [`closeable`]: the close capability every asynchronous resource exposes

pub mod closeable;
pub mod outcome;

pub use closeable::ACloseable;
pub use outcome::Outcome;
