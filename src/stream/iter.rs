//! Convert iterators into streams.

use super::AStream;
use crate::error::Error;
use crate::promise::Promise;
use crate::types::ACloseable;
use parking_lot::Mutex;
use std::iter::Fuse;

struct IterState<I> {
    iter: Fuse<I>,
    closed: bool,
}

/// A stream that yields the items of an iterator.
///
/// Created by [`iter_stream`].
pub struct IterStream<I> {
    state: Mutex<IterState<I>>,
}

impl<I> AStream<I::Item> for IterStream<I>
where
    I: Iterator + Send,
    I::Item: Clone + Send + 'static,
{
    fn next(&self) -> Promise<Option<I::Item>> {
        let mut state = self.state.lock();
        if state.closed {
            return Promise::failure(Error::closed("Stream is closed"));
        }
        Promise::value(state.iter.next())
    }
}

impl<I: Send> ACloseable for IterStream<I> {
    fn close(&self) -> Promise<()> {
        self.state.lock().closed = true;
        Promise::void()
    }
}

impl<I> std::fmt::Debug for IterStream<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IterStream")
            .field("closed", &self.state.lock().closed)
            .finish_non_exhaustive()
    }
}

/// Converts an iterator into a stream.
///
/// Items are available immediately, which makes this handy for tests and for
/// bridging synchronous data sources.
///
/// ```ignore
/// use vatflow::stream::{iter_stream, AStream};
///
/// let stream = iter_stream(vec![1, 2, 3]);
/// // next() resolves to Some(1), Some(2), Some(3), None, None, ...
/// ```
pub fn iter_stream<I>(items: I) -> IterStream<I::IntoIter>
where
    I: IntoIterator,
{
    IterStream {
        state: Mutex::new(IterState {
            iter: items.into_iter().fuse(),
            closed: false,
        }),
    }
}
