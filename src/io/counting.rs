//! Byte-counting wrappers.
//!
//! [`CountingInput`] and [`CountingOutput`] forward to a wrapped stream and
//! report a [`StreamFinishedEvent`] exactly once, when the wrapper is closed.

use super::{AInput, AOutput, BoxInput, BoxOutput};
use crate::error::Error;
use crate::promise::Promise;
use crate::types::{ACloseable, Outcome};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Summary of a finished stream.
#[derive(Debug, Clone)]
pub struct StreamFinishedEvent {
    /// When the wrapper was created.
    pub start: DateTime<Utc>,
    /// When the wrapper was closed.
    pub end: DateTime<Utc>,
    /// Bytes moved through the wrapper.
    pub bytes: u64,
    /// The first failure observed, if any.
    pub failure: Option<Error>,
}

type FinishedListener = Arc<dyn Fn(StreamFinishedEvent) + Send + Sync>;

struct Counter {
    start: DateTime<Utc>,
    bytes: u64,
    failure: Option<Error>,
    reported: bool,
    listener: FinishedListener,
}

impl Counter {
    fn new(listener: FinishedListener) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            start: Utc::now(),
            bytes: 0,
            failure: None,
            reported: false,
            listener,
        }))
    }
}

fn record(counter: &Mutex<Counter>, outcome: &Outcome<u64>) {
    let mut counter = counter.lock();
    match outcome {
        Outcome::Success(n) => counter.bytes += n,
        Outcome::Failure(error) => {
            if counter.failure.is_none() {
                counter.failure = Some(error.clone());
            }
        }
    }
}

fn report(counter: &Mutex<Counter>, close_failure: Option<&Error>) {
    let (event, listener) = {
        let mut counter = counter.lock();
        if counter.reported {
            return;
        }
        counter.reported = true;
        if counter.failure.is_none() {
            counter.failure = close_failure.cloned();
        }
        (
            StreamFinishedEvent {
                start: counter.start,
                end: Utc::now(),
                bytes: counter.bytes,
                failure: counter.failure.clone(),
            },
            Arc::clone(&counter.listener),
        )
    };
    listener(event);
}

fn close_and_report(inner: Promise<()>, counter: Arc<Mutex<Counter>>) -> Promise<()> {
    inner.map_outcome(move |outcome| {
        report(&counter, outcome.as_result().err());
        outcome
    })
}

/// Input counting the bytes read through it.
pub struct CountingInput {
    input: BoxInput,
    counter: Arc<Mutex<Counter>>,
}

impl CountingInput {
    /// Wraps `input`; `listener` receives the event on close.
    pub fn new(
        input: BoxInput,
        listener: impl Fn(StreamFinishedEvent) + Send + Sync + 'static,
    ) -> Self {
        Self {
            input,
            counter: Counter::new(Arc::new(listener)),
        }
    }

    /// Bytes read so far.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.counter.lock().bytes
    }
}

impl AInput for CountingInput {
    fn read(&self, limit: usize) -> Promise<Option<Vec<u8>>> {
        let counter = Arc::clone(&self.counter);
        self.input.read(limit).map_outcome(move |outcome| {
            let counted = match &outcome {
                Outcome::Success(data) => {
                    Outcome::Success(data.as_ref().map_or(0, |d| d.len() as u64))
                }
                Outcome::Failure(error) => Outcome::Failure(error.clone()),
            };
            record(&counter, &counted);
            outcome
        })
    }
}

impl ACloseable for CountingInput {
    fn close(&self) -> Promise<()> {
        close_and_report(self.input.close(), Arc::clone(&self.counter))
    }
}

impl fmt::Debug for CountingInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountingInput")
            .field("bytes", &self.bytes())
            .finish_non_exhaustive()
    }
}

/// Output counting the bytes written through it.
pub struct CountingOutput {
    output: BoxOutput,
    counter: Arc<Mutex<Counter>>,
}

impl CountingOutput {
    /// Wraps `output`; `listener` receives the event on close.
    pub fn new(
        output: BoxOutput,
        listener: impl Fn(StreamFinishedEvent) + Send + Sync + 'static,
    ) -> Self {
        Self {
            output,
            counter: Counter::new(Arc::new(listener)),
        }
    }

    /// Bytes written so far.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.counter.lock().bytes
    }
}

impl AOutput for CountingOutput {
    fn write(&self, data: Vec<u8>) -> Promise<()> {
        let counter = Arc::clone(&self.counter);
        let len = data.len() as u64;
        self.output.write(data).map_outcome(move |outcome| {
            let counted = match &outcome {
                Outcome::Success(()) => Outcome::Success(len),
                Outcome::Failure(error) => Outcome::Failure(error.clone()),
            };
            record(&counter, &counted);
            outcome
        })
    }

    fn flush(&self) -> Promise<()> {
        self.output.flush()
    }
}

impl ACloseable for CountingOutput {
    fn close(&self) -> Promise<()> {
        close_and_report(self.output.close(), Arc::clone(&self.counter))
    }
}

impl fmt::Debug for CountingOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountingOutput")
            .field("bytes", &self.bytes())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{buffered_pipe, discard};
    use crate::test_utils::run_on_vat;

    #[test]
    fn events_report_byte_counts_once() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("events_report_byte_counts_once");
        let events = Arc::new(Mutex::new(Vec::new()));
        let (in_events, out_events) = (Arc::clone(&events), Arc::clone(&events));
        run_on_vat(async move {
            let (input, output) = buffered_pipe(64);
            let output = CountingOutput::new(Arc::new(output), move |e| {
                out_events.lock().push(("out", e.bytes));
            });
            let input = Arc::new(CountingInput::new(Arc::new(input), move |e| {
                in_events.lock().push(("in", e.bytes));
            }));
            output.write(b"12345".to_vec()).await?;
            output.write(b"678".to_vec()).await?;
            output.close().await?;
            output.close().await?;
            let read = discard(input.clone()).await?;
            input.close().await?;
            Ok(read)
        })
        .expect("counting");
        let events = events.lock().clone();
        assert_eq!(events, vec![("out", 8), ("in", 8)]);
        crate::test_complete!("events_report_byte_counts_once");
    }
}
