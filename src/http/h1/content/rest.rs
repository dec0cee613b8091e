use super::{InputState, Lifecycle, OutputState, StateListener};
use crate::error::Result;
use crate::io::{AInput, AOutput, ByteGeneratorContext, ByteParserContext};
use crate::promise::Promise;
use crate::sync::RequestQueue;
use crate::types::ACloseable;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

struct InputInner {
    parser: Arc<ByteParserContext>,
    life: Lifecycle<InputState>,
    eof: AtomicBool,
}

impl InputInner {
    async fn read(&self, limit: usize) -> Result<Option<Vec<u8>>> {
        self.life.ensure_valid_and_open()?;
        if self.eof.load(Ordering::Acquire) {
            return Ok(None);
        }
        self.life.changed(InputState::Data);
        let data = self.parser.read_some(limit).await?;
        if data.is_none() {
            self.eof.store(true, Ordering::Release);
            self.life.changed(InputState::EofNoTrailers);
        }
        Ok(data)
    }
}

/// Body input ending with the connection input.
pub struct RestOfStreamInput {
    inner: Arc<InputInner>,
    reads: RequestQueue,
}

impl RestOfStreamInput {
    /// Reads everything left in `parser`.
    #[must_use]
    pub fn new(parser: Arc<ByteParserContext>, listener: Option<StateListener<InputState>>) -> Self {
        Self {
            inner: Arc::new(InputInner {
                parser,
                life: Lifecycle::new(listener),
                eof: AtomicBool::new(false),
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

impl AInput for RestOfStreamInput {
    fn read(&self, limit: usize) -> Promise<Option<Vec<u8>>> {
        let inner = Arc::clone(&self.inner);
        self.reads.run_future(async move {
            let result = inner.read(limit).await;
            inner.life.check(result)
        })
    }
}

impl ACloseable for RestOfStreamInput {
    fn close(&self) -> Promise<()> {
        let inner = Arc::clone(&self.inner);
        self.reads.run_future(async move {
            if inner.life.start_closing() {
                inner.life.changed(if inner.eof.load(Ordering::Acquire) {
                    InputState::Closed
                } else {
                    InputState::ClosedBeforeEof
                });
            }
            Ok(())
        })
    }
}

impl fmt::Debug for RestOfStreamInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestOfStreamInput")
            .field("state", &self.inner.life.current())
            .finish_non_exhaustive()
    }
}

struct OutputInner {
    generator: Arc<ByteGeneratorContext>,
    life: Lifecycle<OutputState>,
}

/// Body output whose end is signalled by closing the connection.
///
/// Closing always moves to [`ClosedLast`](OutputState::ClosedLast).
pub struct RestOfStreamOutput {
    inner: Arc<OutputInner>,
    writes: RequestQueue,
}

impl RestOfStreamOutput {
    /// Writes through `generator`.
    #[must_use]
    pub fn new(
        generator: Arc<ByteGeneratorContext>,
        listener: Option<StateListener<OutputState>>,
    ) -> Self {
        Self {
            inner: Arc::new(OutputInner {
                generator,
                life: Lifecycle::new(listener),
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

impl AOutput for RestOfStreamOutput {
    fn write(&self, data: Vec<u8>) -> Promise<()> {
        let inner = Arc::clone(&self.inner);
        self.writes.run_future(async move {
            inner.life.ensure_valid_and_open()?;
            if data.is_empty() {
                return Ok(());
            }
            inner.life.changed(OutputState::DataCloseable);
            let result = async {
                inner.generator.send().await?;
                inner.generator.output().write(data).await
            }
            .await;
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

impl ACloseable for RestOfStreamOutput {
    fn close(&self) -> Promise<()> {
        let inner = Arc::clone(&self.inner);
        self.writes.run_future(async move {
            if !inner.life.start_closing() {
                return Ok(());
            }
            let sent = inner.generator.send().await;
            inner.life.changed(OutputState::ClosedLast);
            sent
        })
    }
}

impl fmt::Debug for RestOfStreamOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestOfStreamOutput")
            .field("state", &self.inner.life.current())
            .finish_non_exhaustive()
    }
}
