//! Element-wise stream transformations.

use super::AStream;
use crate::promise::Promise;
use crate::types::ACloseable;
use std::marker::PhantomData;
use std::sync::Arc;

/// Stream for [`AStreamExt::map`](super::AStreamExt::map).
pub struct Map<S, F, T> {
    stream: S,
    f: Arc<F>,
    _item: PhantomData<fn(T)>,
}

impl<S, F, T> Map<S, F, T> {
    pub(crate) fn new(stream: S, f: F) -> Self {
        Self {
            stream,
            f: Arc::new(f),
            _item: PhantomData,
        }
    }

    /// Returns the underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }
}

impl<S, F, T, U> AStream<U> for Map<S, F, T>
where
    S: AStream<T>,
    T: Clone + Send + 'static,
    U: Clone + Send + 'static,
    F: Fn(T) -> U + Send + Sync + 'static,
{
    fn next(&self) -> Promise<Option<U>> {
        let f = Arc::clone(&self.f);
        self.stream.next().map(move |item| item.map(|value| f(value)))
    }
}

impl<S: ACloseable, F: Send + Sync, T> ACloseable for Map<S, F, T> {
    fn close(&self) -> Promise<()> {
        self.stream.close()
    }
}

/// Stream for [`AStreamExt::flat_map`](super::AStreamExt::flat_map).
pub struct FlatMap<S, F, T> {
    stream: S,
    f: Arc<F>,
    _item: PhantomData<fn(T)>,
}

impl<S, F, T> FlatMap<S, F, T> {
    pub(crate) fn new(stream: S, f: F) -> Self {
        Self {
            stream,
            f: Arc::new(f),
            _item: PhantomData,
        }
    }
}

impl<S, F, T, U> AStream<U> for FlatMap<S, F, T>
where
    S: AStream<T>,
    T: Clone + Send + 'static,
    U: Clone + Send + 'static,
    F: Fn(T) -> Promise<U> + Send + Sync + 'static,
{
    fn next(&self) -> Promise<Option<U>> {
        let f = Arc::clone(&self.f);
        self.stream.next().flat_map(move |item| match item {
            Some(value) => f(value).map(Some),
            None => Promise::none(),
        })
    }
}

impl<S: ACloseable, F: Send + Sync, T> ACloseable for FlatMap<S, F, T> {
    fn close(&self) -> Promise<()> {
        self.stream.close()
    }
}
