//! Bounded in-memory byte pipe.
//!
//! Writers park on the output's [`RequestQueue`] while the pipe is full,
//! readers park on the input's queue while it is empty; each side resumes the
//! other after moving bytes. Closing either end wakes both.

use super::{AInput, AOutput, SimpleChannel};
use crate::error::Error;
use crate::promise::Promise;
use crate::sync::RequestQueue;
use crate::types::ACloseable;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

struct PipeState {
    buffer: VecDeque<u8>,
    capacity: usize,
    input_closed: bool,
    output_closed: bool,
}

struct Shared {
    state: Mutex<PipeState>,
    reads: RequestQueue,
    writes: RequestQueue,
}

impl Shared {
    fn wake_both(&self) {
        self.reads.resume();
        self.writes.resume();
    }
}

/// Read end of a [`buffered_pipe`].
#[derive(Clone)]
pub struct PipeInput {
    shared: Arc<Shared>,
}

/// Write end of a [`buffered_pipe`].
#[derive(Clone)]
pub struct PipeOutput {
    shared: Arc<Shared>,
}

/// Creates a pipe holding at most `capacity` unread bytes.
#[must_use]
pub fn buffered_pipe(capacity: usize) -> (PipeInput, PipeOutput) {
    let shared = Arc::new(Shared {
        state: Mutex::new(PipeState {
            buffer: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            input_closed: false,
            output_closed: false,
        }),
        reads: RequestQueue::new(),
        writes: RequestQueue::new(),
    });
    (
        PipeInput {
            shared: Arc::clone(&shared),
        },
        PipeOutput { shared },
    )
}

/// Two channels connected back to back through a pair of pipes.
///
/// Bytes written to one channel's output are read from the other channel's
/// input.
#[must_use]
pub fn channel_pair(capacity: usize) -> (SimpleChannel, SimpleChannel) {
    let (left_in, right_out) = buffered_pipe(capacity);
    let (right_in, left_out) = buffered_pipe(capacity);
    (
        SimpleChannel::new(Arc::new(left_in), Arc::new(left_out)),
        SimpleChannel::new(Arc::new(right_in), Arc::new(right_out)),
    )
}

fn read_step(shared: &Shared, limit: usize) -> Promise<Option<Option<Vec<u8>>>> {
    let mut state = shared.state.lock();
    if state.input_closed {
        return Promise::failure(Error::closed("The stream is closed"));
    }
    if limit == 0 {
        return Promise::value(Some(Some(Vec::new())));
    }
    if !state.buffer.is_empty() {
        let count = limit.min(state.buffer.len());
        let data: Vec<u8> = state.buffer.drain(..count).collect();
        drop(state);
        shared.writes.resume();
        return Promise::value(Some(Some(data)));
    }
    if state.output_closed {
        return Promise::value(Some(None));
    }
    let parked = shared.reads.suspend_then_empty();
    drop(state);
    parked
}

fn write_step(shared: &Shared, data: &mut VecDeque<u8>) -> Promise<bool> {
    let mut state = shared.state.lock();
    if state.output_closed {
        return Promise::failure(Error::closed("The output stream is closed"));
    }
    if data.is_empty() {
        return Promise::from_bool(false);
    }
    if state.input_closed {
        return Promise::failure(Error::closed(
            "The input stream is closed: write is impossible",
        ));
    }
    let room = state.capacity.saturating_sub(state.buffer.len());
    let count = room.min(data.len());
    state.buffer.extend(data.drain(..count));
    let parked = (!data.is_empty()).then(|| shared.writes.suspend_then_true());
    drop(state);
    if count > 0 {
        shared.reads.resume();
    }
    parked.unwrap_or_else(|| Promise::from_bool(false))
}

fn flush_step(shared: &Shared) -> Promise<bool> {
    let state = shared.state.lock();
    if state.buffer.is_empty() {
        return Promise::from_bool(false);
    }
    if state.output_closed {
        return Promise::failure(Error::closed("The output stream is closed"));
    }
    if state.input_closed {
        return Promise::failure(Error::closed(
            "The input stream is closed: flush is impossible",
        ));
    }
    let parked = shared.writes.suspend_then_true();
    drop(state);
    parked
}

impl AInput for PipeInput {
    fn read(&self, limit: usize) -> Promise<Option<Vec<u8>>> {
        let shared = Arc::clone(&self.shared);
        self.shared
            .reads
            .run_seq_until_value(move || read_step(&shared, limit))
    }
}

impl ACloseable for PipeInput {
    fn close(&self) -> Promise<()> {
        self.shared.state.lock().input_closed = true;
        self.shared.wake_both();
        Promise::void()
    }
}

impl AOutput for PipeOutput {
    fn write(&self, data: Vec<u8>) -> Promise<()> {
        let shared = Arc::clone(&self.shared);
        let mut data = VecDeque::from(data);
        self.shared
            .writes
            .run_seq_while(move || write_step(&shared, &mut data))
    }

    fn flush(&self) -> Promise<()> {
        let shared = Arc::clone(&self.shared);
        self.shared.writes.run_seq_while(move || flush_step(&shared))
    }
}

impl ACloseable for PipeOutput {
    fn close(&self) -> Promise<()> {
        self.shared.state.lock().output_closed = true;
        self.shared.wake_both();
        Promise::void()
    }
}

impl std::fmt::Debug for PipeInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("PipeInput")
            .field("buffered", &state.buffer.len())
            .field("closed", &state.input_closed)
            .finish()
    }
}

impl std::fmt::Debug for PipeOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("PipeOutput")
            .field("buffered", &state.buffer.len())
            .field("closed", &state.output_closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::io::read_all;
    use crate::runtime::{current, spawn};
    use crate::test_utils::run_on_vat;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn writer_larger_than_capacity_streams_through() {
        init_test("writer_larger_than_capacity_streams_through");
        let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let expected = payload.clone();
        let received = run_on_vat(async move {
            let (input, output) = buffered_pipe(64);
            let vat = current().expect("on vat");
            let writer = spawn(&vat, async move {
                output.write(payload).await?;
                output.flush().await?;
                output.close().await
            });
            let data = read_all(Arc::new(input)).await?;
            writer.await?;
            Ok(data)
        })
        .expect("pipe transfer");
        crate::assert_with_log!(received == expected, "bytes", expected.len(), received.len());
        crate::test_complete!("writer_larger_than_capacity_streams_through", bytes = received.len());
    }

    #[test]
    fn write_after_input_close_fails() {
        init_test("write_after_input_close_fails");
        let err = run_on_vat(async {
            let (input, output) = buffered_pipe(8);
            input.close().await?;
            output.write(b"abc".to_vec()).await
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Closed);
        crate::test_complete!("write_after_input_close_fails");
    }

    #[test]
    fn read_on_closed_output_is_eof_after_drain() {
        init_test("read_on_closed_output_is_eof_after_drain");
        let reads = run_on_vat(async {
            let (input, output) = buffered_pipe(8);
            output.write(b"hi".to_vec()).await?;
            output.close().await?;
            let first = input.read(16).await?;
            let second = input.read(16).await?;
            Ok((first, second))
        })
        .expect("pipe eof");
        assert_eq!(reads, (Some(b"hi".to_vec()), None));
        crate::test_complete!("read_on_closed_output_is_eof_after_drain");
    }
}
