//! The pull and push sequence traits.
//!
//! # EOF
//!
//! `None` from [`AStream::next`] marks the end of the sequence and is sticky:
//! every later `next` yields `None` again, unless the stream was closed in
//! the meantime, in which case it fails with a `Closed` error.
//!
//! # Sequential reads
//!
//! Callers never issue a `next` before the previous one resolved; wrap reads
//! in a [`RequestQueue`](crate::sync::RequestQueue) when several parties share
//! one stream.

use super::{All, FlatMap, Map, Window, collect, consume};
use crate::error::Error;
use crate::promise::Promise;
use crate::types::ACloseable;
use std::sync::Arc;

/// Pull-based asynchronous sequence.
pub trait AStream<T>: ACloseable {
    /// Requests the next element; `None` denotes EOF.
    fn next(&self) -> Promise<Option<T>>;
}

/// Push-based asynchronous sequence consumer.
pub trait ASink<T>: ACloseable {
    /// Offers a value; resolves once the sink is ready for the next one.
    fn put(&self, value: T) -> Promise<()>;

    /// Closes the sink with a failure reason.
    fn fail(&self, error: Error) -> Promise<()>;

    /// Resolves once the sink accepts no more values.
    fn finished(&self) -> Promise<()>;
}

/// Shared, type-erased stream.
pub type BoxStream<T> = Arc<dyn AStream<T>>;

/// Shared, type-erased sink.
pub type BoxSink<T> = Arc<dyn ASink<T>>;

impl<T, S: AStream<T> + ?Sized> AStream<T> for Arc<S> {
    fn next(&self) -> Promise<Option<T>> {
        (**self).next()
    }
}

impl<T, S: ASink<T> + ?Sized> ASink<T> for Arc<S> {
    fn put(&self, value: T) -> Promise<()> {
        (**self).put(value)
    }

    fn fail(&self, error: Error) -> Promise<()> {
        (**self).fail(error)
    }

    fn finished(&self) -> Promise<()> {
        (**self).finished()
    }
}

/// Composition helpers for [`AStream`].
pub trait AStreamExt<T: Clone + Send + 'static>: AStream<T> + Sized + 'static {
    /// Maps each element.
    fn map<U, F>(self, f: F) -> Map<Self, F, T>
    where
        U: Clone + Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        Map::new(self, f)
    }

    /// Maps each element through a promise-returning function.
    fn flat_map<U, F>(self, f: F) -> FlatMap<Self, F, T>
    where
        U: Clone + Send + 'static,
        F: Fn(T) -> Promise<U> + Send + Sync + 'static,
    {
        FlatMap::new(self, f)
    }

    /// Prefetches up to `size` elements ahead of the consumer.
    fn window(self, size: usize) -> Window<Self, T> {
        Window::new(self, size)
    }

    /// Surfaces element failures as values instead of failing the read.
    fn all(self) -> All<Self, T> {
        All::new(self)
    }

    /// Feeds elements to `f` until EOF or until `f` resolves to `false`.
    fn consume<F>(self, f: F) -> Promise<()>
    where
        F: FnMut(T) -> Promise<bool> + Send + 'static,
    {
        consume(self, f)
    }

    /// Reads the stream to EOF.
    fn collect(self) -> Promise<Vec<T>> {
        collect(self)
    }
}

impl<T: Clone + Send + 'static, S: AStream<T> + 'static> AStreamExt<T> for S {}
