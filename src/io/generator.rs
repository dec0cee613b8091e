use super::BoxOutput;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::fmt;

struct GeneratorState {
    buffer: Vec<u8>,
    failure: Option<Error>,
}

/// Write-behind buffer over an output.
///
/// Protocol writers [`put`](Self::put) small pieces and call
/// [`send`](Self::send) once a logical unit is complete or
/// [`is_send_needed`](Self::is_send_needed) reports a full buffer.
pub struct ByteGeneratorContext {
    output: BoxOutput,
    buffer_size: usize,
    state: Mutex<GeneratorState>,
}

impl ByteGeneratorContext {
    /// Creates a context that prefers sending once `buffer_size` bytes are
    /// pending.
    #[must_use]
    pub fn new(output: BoxOutput, buffer_size: usize) -> Self {
        Self {
            output,
            buffer_size: buffer_size.max(1),
            state: Mutex::new(GeneratorState {
                buffer: Vec::with_capacity(buffer_size),
                failure: None,
            }),
        }
    }

    /// The underlying output.
    #[must_use]
    pub fn output(&self) -> &BoxOutput {
        &self.output
    }

    /// Appends bytes to the pending buffer.
    pub fn put(&self, data: &[u8]) {
        self.state.lock().buffer.extend_from_slice(data);
    }

    /// Appends a string encoded as ISO-8859-1; characters outside the range
    /// are written as `?`.
    pub fn put_latin1(&self, text: &str) {
        let mut state = self.state.lock();
        state
            .buffer
            .extend(text.chars().map(|c| u8::try_from(c).unwrap_or(b'?')));
    }

    /// Number of pending bytes.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lock().buffer.len()
    }

    /// Returns true once the pending data fills the preferred buffer size.
    #[must_use]
    pub fn is_send_needed(&self) -> bool {
        self.pending() >= self.buffer_size
    }

    /// Writes the pending bytes to the output.
    pub async fn send(&self) -> Result<()> {
        let data = {
            let mut state = self.state.lock();
            if let Some(error) = &state.failure {
                return Err(error.clone());
            }
            if state.buffer.is_empty() {
                return Ok(());
            }
            std::mem::take(&mut state.buffer)
        };
        if let Err(error) = self.output.write(data).await {
            self.state.lock().failure = Some(error.clone());
            return Err(error);
        }
        Ok(())
    }

    /// Sends pending bytes and flushes the output.
    pub async fn flush(&self) -> Result<()> {
        self.send().await?;
        self.output.flush().await
    }
}

impl fmt::Debug for ByteGeneratorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ByteGeneratorContext")
            .field("pending", &state.buffer.len())
            .field("failed", &state.failure.is_some())
            .finish()
    }
}
