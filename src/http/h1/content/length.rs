use super::{InputState, Lifecycle, OutputState, StateListener};
use crate::error::{Error, Result};
use crate::io::{AInput, AOutput, ByteGeneratorContext, ByteParserContext};
use crate::promise::Promise;
use crate::sync::RequestQueue;
use crate::types::ACloseable;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

#[derive(Default)]
struct ReadProgress {
    read: u64,
    eof_reported: bool,
}

struct InputInner {
    parser: Arc<ByteParserContext>,
    life: Lifecycle<InputState>,
    length: u64,
    progress: Mutex<ReadProgress>,
}

impl InputInner {
    async fn read(&self, limit: usize) -> Result<Option<Vec<u8>>> {
        self.life.ensure_valid_and_open()?;
        let remaining = {
            let mut progress = self.progress.lock();
            let remaining = self.length - progress.read;
            if remaining == 0 {
                let first = !std::mem::replace(&mut progress.eof_reported, true);
                drop(progress);
                if first {
                    self.life.changed(InputState::EofNoTrailers);
                }
                return Ok(None);
            }
            remaining
        };
        self.life.changed(InputState::Data);
        let max = usize::try_from(remaining).map_or(limit, |r| r.min(limit));
        match self.parser.read_some(max).await? {
            Some(data) => {
                self.progress.lock().read += data.len() as u64;
                Ok(Some(data))
            }
            None => Err(Error::truncated(format!(
                "EOF before all data is read: {remaining}"
            ))),
        }
    }
}

/// Body input of exactly `Content-Length` bytes.
pub struct ContentLengthInput {
    inner: Arc<InputInner>,
    reads: RequestQueue,
}

impl ContentLengthInput {
    /// Reads `length` bytes from `parser`.
    #[must_use]
    pub fn new(
        parser: Arc<ByteParserContext>,
        length: u64,
        listener: Option<StateListener<InputState>>,
    ) -> Self {
        let life = Lifecycle::new(listener);
        let mut progress = ReadProgress::default();
        if length == 0 {
            life.changed(InputState::EofNoTrailers);
            progress.eof_reported = true;
        }
        Self {
            inner: Arc::new(InputInner {
                parser,
                life,
                length,
                progress: Mutex::new(progress),
            }),
            reads: RequestQueue::new(),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> InputState {
        self.inner.life.current()
    }
}

impl AInput for ContentLengthInput {
    fn read(&self, limit: usize) -> Promise<Option<Vec<u8>>> {
        let inner = Arc::clone(&self.inner);
        self.reads.run_future(async move {
            let result = inner.read(limit).await;
            inner.life.check(result)
        })
    }
}

impl ACloseable for ContentLengthInput {
    fn close(&self) -> Promise<()> {
        let inner = Arc::clone(&self.inner);
        self.reads.run_future(async move {
            if inner.life.start_closing() {
                let complete = inner.progress.lock().read == inner.length;
                inner.life.changed(if complete {
                    InputState::Closed
                } else {
                    InputState::ClosedBeforeEof
                });
            }
            Ok(())
        })
    }
}

impl fmt::Debug for ContentLengthInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentLengthInput")
            .field("length", &self.inner.length)
            .field("read", &self.inner.progress.lock().read)
            .field("state", &self.inner.life.current())
            .finish()
    }
}

struct OutputInner {
    generator: Arc<ByteGeneratorContext>,
    life: Lifecycle<OutputState>,
    length: u64,
    written: Mutex<u64>,
}

impl OutputInner {
    async fn write(&self, data: Vec<u8>) -> Result<()> {
        self.life.ensure_valid_and_open()?;
        if data.is_empty() {
            return Ok(());
        }
        let total = {
            let mut written = self.written.lock();
            let total = *written + data.len() as u64;
            if total > self.length {
                return Err(Error::protocol(format!(
                    "Writing too much for Content-Length: {total} > {}",
                    self.length
                )));
            }
            *written = total;
            total
        };
        self.life.changed(OutputState::Data);
        self.generator.send().await?;
        self.generator.output().write(data).await?;
        if total == self.length {
            self.life.changed(OutputState::DataCloseable);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.life.start_closing() {
            return Ok(());
        }
        let complete = *self.written.lock() == self.length;
        self.life.changed(if complete {
            OutputState::Closed
        } else {
            OutputState::ClosedLast
        });
        if self.life.is_valid() {
            self.generator.send().await?;
        }
        Ok(())
    }
}

/// Body output of exactly `Content-Length` bytes.
///
/// Closing with fewer bytes written moves to
/// [`ClosedLast`](OutputState::ClosedLast): the peer can only detect the
/// end of such a body by the connection closing.
pub struct ContentLengthOutput {
    inner: Arc<OutputInner>,
    writes: RequestQueue,
}

impl ContentLengthOutput {
    /// Writes `length` bytes through `generator`.
    #[must_use]
    pub fn new(
        generator: Arc<ByteGeneratorContext>,
        length: u64,
        listener: Option<StateListener<OutputState>>,
    ) -> Self {
        let life = Lifecycle::new(listener);
        if length == 0 {
            life.changed(OutputState::DataCloseable);
        }
        Self {
            inner: Arc::new(OutputInner {
                generator,
                life,
                length,
                written: Mutex::new(0),
            }),
            writes: RequestQueue::new(),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> OutputState {
        self.inner.life.current()
    }
}

impl AOutput for ContentLengthOutput {
    fn write(&self, data: Vec<u8>) -> Promise<()> {
        let inner = Arc::clone(&self.inner);
        self.writes.run_future(async move {
            let result = inner.write(data).await;
            inner.life.check(result)
        })
    }

    fn flush(&self) -> Promise<()> {
        let inner = Arc::clone(&self.inner);
        self.writes.run_future(async move {
            inner.life.ensure_valid_and_open()?;
            let result = inner.generator.flush().await;
            inner.life.check(result)
        })
    }
}

impl ACloseable for ContentLengthOutput {
    fn close(&self) -> Promise<()> {
        let inner = Arc::clone(&self.inner);
        self.writes.run_future(async move { inner.close().await })
    }
}

impl fmt::Debug for ContentLengthOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentLengthOutput")
            .field("length", &self.inner.length)
            .field("written", &*self.inner.written.lock())
            .field("state", &self.inner.life.current())
            .finish()
    }
}
