//! Prefetching stream adapter.
//!
//! [`Window`] keeps up to `size` elements read ahead of the consumer. A
//! producer loop and a consumer loop run on two [`RequestQueue`]s and hand
//! off through suspend/resume: the producer parks when the buffer is full,
//! the consumer parks when it is empty.
//!
//! The first failure read from the inner stream discards the buffered
//! elements and is reported by every later `next`.

use super::AStream;
use crate::error::Error;
use crate::promise::Promise;
use crate::sync::RequestQueue;
use crate::types::{ACloseable, Outcome};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

struct WindowState<T> {
    items: VecDeque<T>,
    end: Option<Outcome<()>>,
    started: bool,
    closed: bool,
}

struct Shared<S, T> {
    stream: S,
    size: usize,
    state: Mutex<WindowState<T>>,
    producer: RequestQueue,
    consumer: RequestQueue,
    _item: PhantomData<fn(T)>,
}

/// Stream for [`AStreamExt::window`](super::AStreamExt::window).
pub struct Window<S, T> {
    shared: Arc<Shared<S, T>>,
}

impl<S, T> Window<S, T>
where
    S: AStream<T> + 'static,
    T: Clone + Send + 'static,
{
    pub(crate) fn new(stream: S, size: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                stream,
                size: size.max(1),
                state: Mutex::new(WindowState {
                    items: VecDeque::new(),
                    end: None,
                    started: false,
                    closed: false,
                }),
                producer: RequestQueue::new(),
                consumer: RequestQueue::new(),
                _item: PhantomData,
            }),
        }
    }

    /// Number of elements currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.shared.state.lock().items.len()
    }
}

fn start_producer<S, T>(shared: &Arc<Shared<S, T>>)
where
    S: AStream<T> + 'static,
    T: Clone + Send + 'static,
{
    let weak = Arc::downgrade(shared);
    let done = shared.producer.run_seq_while(move || produce_step(&weak));
    done.listen_sync(|outcome| {
        if let Outcome::Failure(error) = outcome {
            tracing::debug!(error = %error, "window producer stopped");
        }
    });
}

fn produce_step<S, T>(weak: &Weak<Shared<S, T>>) -> Promise<bool>
where
    S: AStream<T> + 'static,
    T: Clone + Send + 'static,
{
    let Some(shared) = weak.upgrade() else {
        return Promise::from_bool(false);
    };
    let state = shared.state.lock();
    if state.closed || state.end.is_some() {
        return Promise::from_bool(false);
    }
    if state.items.len() >= shared.size {
        let parked = shared.producer.suspend_then_true();
        drop(state);
        return parked;
    }
    drop(state);
    let next = shared.stream.next();
    next.map_outcome(move |read| {
        let mut state = shared.state.lock();
        let more = match read {
            Outcome::Success(Some(value)) => {
                if !state.closed {
                    state.items.push_back(value);
                }
                !state.closed
            }
            Outcome::Success(None) => {
                state.end = Some(Outcome::Success(()));
                false
            }
            Outcome::Failure(error) => {
                state.items.clear();
                state.end = Some(Outcome::Failure(error));
                false
            }
        };
        drop(state);
        shared.consumer.resume();
        Outcome::Success(more)
    })
}

fn take_step<S, T>(shared: &Arc<Shared<S, T>>) -> Promise<Option<Option<T>>>
where
    S: AStream<T> + 'static,
    T: Clone + Send + 'static,
{
    let mut state = shared.state.lock();
    if state.closed {
        return Promise::failure(Error::closed("Stream is closed"));
    }
    let start = !state.started;
    state.started = true;
    if let Some(value) = state.items.pop_front() {
        drop(state);
        shared.producer.resume();
        return Promise::value(Some(Some(value)));
    }
    match &state.end {
        Some(Outcome::Success(())) => Promise::value(Some(None)),
        Some(Outcome::Failure(error)) => Promise::failure(error.clone()),
        None => {
            let parked = shared.consumer.suspend_then_empty();
            drop(state);
            if start {
                start_producer(shared);
            }
            parked
        }
    }
}

impl<S, T> AStream<T> for Window<S, T>
where
    S: AStream<T> + 'static,
    T: Clone + Send + 'static,
{
    fn next(&self) -> Promise<Option<T>> {
        let shared = Arc::clone(&self.shared);
        self.shared
            .consumer
            .run_seq_until_value(move || take_step(&shared))
    }
}

impl<S, T> ACloseable for Window<S, T>
where
    S: AStream<T> + 'static,
    T: Clone + Send + 'static,
{
    fn close(&self) -> Promise<()> {
        {
            let mut state = self.shared.state.lock();
            state.closed = true;
            state.items.clear();
        }
        self.shared.producer.resume();
        self.shared.consumer.resume();
        self.shared.stream.close()
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{Error, ErrorKind};
    use crate::promise::Promise;
    use crate::stream::{AStream, AStreamExt, iter_stream};
    use crate::test_utils::run_on_vat;
    use crate::types::ACloseable;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn window_preserves_order() {
        init_test("window_preserves_order");
        let items = run_on_vat(async { iter_stream(0..50).window(4).collect().await })
            .expect("collect through window");
        let expected: Vec<i32> = (0..50).collect();
        crate::assert_with_log!(items == expected, "order", expected, items);
        crate::test_complete!("window_preserves_order");
    }

    #[test]
    fn window_reports_failure_after_buffered_prefix() {
        init_test("window_reports_failure_after_buffered_prefix");
        let result = run_on_vat(async {
            let stream = iter_stream(0..10)
                .flat_map(|v| {
                    if v == 3 {
                        Promise::<i32>::failure(Error::protocol("broken element"))
                    } else {
                        Promise::value(v)
                    }
                })
                .window(2);
            let mut seen = Vec::new();
            let failure = loop {
                match stream.next().await {
                    Ok(Some(v)) => seen.push(v),
                    Ok(None) => break None,
                    Err(error) => break Some(error),
                }
            };
            let again = stream.next().await;
            Ok::<_, Error>((seen, failure, again.is_err()))
        })
        .expect("window test");
        let (seen, failure, sticky) = result;
        assert!(seen.len() <= 3);
        assert!(seen.iter().enumerate().all(|(i, v)| usize::try_from(*v) == Ok(i)));
        assert_eq!(failure.map(|e| e.kind()), Some(ErrorKind::Protocol));
        assert!(sticky);
        crate::test_complete!("window_reports_failure_after_buffered_prefix");
    }

    #[test]
    fn reads_after_close_fail() {
        init_test("window_reads_after_close_fail");
        let err = run_on_vat(async {
            let stream = iter_stream(0..10).window(3);
            assert_eq!(stream.next().await?, Some(0));
            stream.close().await?;
            stream.next().await.map(|_| ())
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Closed);
        crate::test_complete!("window_reads_after_close_fail");
    }
}
