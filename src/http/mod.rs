//! HTTP protocol support.
//!
//! The [`h1`] module implements HTTP/1.x on top of the promise-based
//! channels in [`crate::io`]: a server dispatching exchanges to an
//! [`AHttpHandler`](h1::AHttpHandler) and a client with connection pooling.

pub mod h1;
