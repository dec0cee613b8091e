//! One-writer, one-reader hand-off between a sink and a stream.
//!
//! A value put into the [`RandezvousSink`] is delivered straight to a pending
//! `next` on the [`RandezvousStream`]; `put` resolves only once a reader took
//! the value. Nothing is buffered.
//!
//! # Closing
//!
//! - Closing the sink ends the stream: the pending and later reads see EOF.
//! - Failing the sink fails the pending and later reads.
//! - Closing the stream makes the sink drop later values silently, so a
//!   writer racing a shutdown never observes an error from `put`.
//!
//! ```ignore
//! let (sink, stream) = RandezvousQueue::<String>::split();
//! let put = sink.put("x".to_owned());   // pending
//! let read = stream.next();             // Some("x"), put now resolves
//! ```

use super::{ASink, AStream};
use crate::error::Error;
use crate::promise::{Promise, Resolver};
use crate::sync::RequestQueue;
use crate::types::{ACloseable, Outcome};
use parking_lot::Mutex;
use std::sync::Arc;

struct QueueState<T> {
    pending_read: Option<Resolver<Option<T>>>,
    stream_closed: bool,
    sink_outcome: Option<Outcome<()>>,
}

struct Shared<T> {
    state: Mutex<QueueState<T>>,
    reads: RequestQueue,
    writes: RequestQueue,
    finished: Resolver<()>,
}

/// Constructor namespace for the sink/stream pair.
pub struct RandezvousQueue<T>(std::marker::PhantomData<fn(T)>);

impl<T: Clone + Send + 'static> RandezvousQueue<T> {
    /// Creates a connected sink and stream.
    #[must_use]
    pub fn split() -> (RandezvousSink<T>, RandezvousStream<T>) {
        let (_, finished) = Promise::pending();
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                pending_read: None,
                stream_closed: false,
                sink_outcome: None,
            }),
            reads: RequestQueue::new(),
            writes: RequestQueue::new(),
            finished,
        });
        (
            RandezvousSink {
                shared: Arc::clone(&shared),
            },
            RandezvousStream { shared },
        )
    }
}

/// Writing half of a [`RandezvousQueue`].
pub struct RandezvousSink<T> {
    shared: Arc<Shared<T>>,
}

/// Reading half of a [`RandezvousQueue`].
pub struct RandezvousStream<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for RandezvousSink<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Clone for RandezvousStream<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

fn read_step<T: Clone + Send + 'static>(shared: &Shared<T>) -> Promise<Option<T>> {
    let mut state = shared.state.lock();
    if state.stream_closed {
        return Promise::failure(Error::closed("Stream is closed"));
    }
    match &state.sink_outcome {
        Some(Outcome::Success(())) => return Promise::none(),
        Some(Outcome::Failure(error)) => return Promise::failure(error.clone()),
        None => {}
    }
    let (promise, resolver) = Promise::pending();
    state.pending_read = Some(resolver);
    drop(state);
    shared.writes.resume();
    promise
}

fn put_step<T: Clone + Send + 'static>(shared: &Shared<T>, value: &mut Option<T>) -> Promise<bool> {
    let mut state = shared.state.lock();
    if state.stream_closed {
        value.take();
        return Promise::from_bool(false);
    }
    if state.sink_outcome.is_some() {
        return Promise::failure(Error::closed("Sink is closed"));
    }
    if let Some(reader) = state.pending_read.take() {
        drop(state);
        reader.success(value.take());
        return Promise::from_bool(false);
    }
    let parked = shared.writes.suspend_then_true();
    drop(state);
    parked
}

impl<T: Clone + Send + 'static> Shared<T> {
    fn finish_sink(&self, outcome: Outcome<()>) {
        let reader = {
            let mut state = self.state.lock();
            if state.sink_outcome.is_some() {
                return;
            }
            state.sink_outcome = Some(outcome.clone());
            state.pending_read.take()
        };
        if let Some(reader) = reader {
            match &outcome {
                Outcome::Success(()) => {
                    reader.success(None);
                }
                Outcome::Failure(error) => {
                    reader.fail(error.clone());
                }
            }
        }
        self.writes.resume();
        self.finished.resolve(outcome);
    }
}

impl<T: Clone + Send + 'static> AStream<T> for RandezvousStream<T> {
    fn next(&self) -> Promise<Option<T>> {
        let shared = Arc::clone(&self.shared);
        self.shared.reads.run(move || read_step(&shared))
    }
}

impl<T: Clone + Send + 'static> ACloseable for RandezvousStream<T> {
    fn close(&self) -> Promise<()> {
        let reader = {
            let mut state = self.shared.state.lock();
            state.stream_closed = true;
            state.pending_read.take()
        };
        if let Some(reader) = reader {
            reader.fail(Error::closed("Stream is closed"));
        }
        self.shared.writes.resume();
        self.shared.finished.success(());
        Promise::void()
    }
}

impl<T: Clone + Send + 'static> ASink<T> for RandezvousSink<T> {
    fn put(&self, value: T) -> Promise<()> {
        let shared = Arc::clone(&self.shared);
        let mut value = Some(value);
        self.shared
            .writes
            .run_seq_while(move || put_step(&shared, &mut value))
    }

    fn fail(&self, error: Error) -> Promise<()> {
        self.shared.finish_sink(Outcome::Failure(error));
        Promise::void()
    }

    fn finished(&self) -> Promise<()> {
        self.shared.finished.promise()
    }
}

impl<T: Clone + Send + 'static> ACloseable for RandezvousSink<T> {
    fn close(&self) -> Promise<()> {
        self.shared.finish_sink(Outcome::Success(()));
        Promise::void()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_utils::run_on_vat;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn put_resolves_after_read() {
        init_test("put_resolves_after_read");
        run_on_vat(async {
            let (sink, stream) = RandezvousQueue::<String>::split();
            let put = sink.put("x".to_owned());
            crate::test_utils::yield_to_vat().await;
            crate::assert_with_log!(!put.is_resolved(), "put pending", false, put.is_resolved());
            let read = stream.next().await?;
            assert_eq!(read.as_deref(), Some("x"));
            put.await?;
            Ok::<_, Error>(())
        })
        .expect("randezvous");
        crate::test_complete!("put_resolves_after_read");
    }

    #[test]
    fn sink_close_is_eof() {
        init_test("sink_close_is_eof");
        run_on_vat(async {
            let (sink, stream) = RandezvousQueue::<u32>::split();
            let read = stream.next();
            sink.close().await?;
            assert_eq!(read.await?, None);
            assert_eq!(stream.next().await?, None);
            sink.finished().await?;
            Ok::<_, Error>(())
        })
        .expect("eof");
        crate::test_complete!("sink_close_is_eof");
    }

    #[test]
    fn sink_failure_reaches_reader() {
        init_test("sink_failure_reaches_reader");
        let err = run_on_vat(async {
            let (sink, stream) = RandezvousQueue::<u32>::split();
            let _ = sink.fail(Error::protocol("upstream broke"));
            stream.next().await
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        crate::test_complete!("sink_failure_reaches_reader");
    }

    #[test]
    fn put_after_stream_close_is_dropped() {
        init_test("put_after_stream_close_is_dropped");
        run_on_vat(async {
            let (sink, stream) = RandezvousQueue::<u32>::split();
            stream.close().await?;
            sink.put(7).await?;
            let err = stream.next().await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Closed);
            Ok::<_, Error>(())
        })
        .expect("silent drop");
        crate::test_complete!("put_after_stream_close_is_dropped");
    }
}
