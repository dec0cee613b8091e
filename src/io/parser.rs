//! Buffered reading for protocol parsers.
//!
//! [`ByteParserContext`] owns a read-ahead buffer over an [`AInput`]. Parsers
//! pull lines or fixed-size slices from it and may push unconsumed bytes
//! back, which is how a body parser returns the bytes of the next pipelined
//! message to the connection.
//!
//! The context is shared by one logical reader at a time. A failed read is
//! remembered: every later read reports the same failure.

use super::BoxInput;
use crate::error::{Error, ErrorKind, Result};
use parking_lot::Mutex;
use std::fmt;

/// Default read-ahead size.
pub const DEFAULT_BUFFER_SIZE: usize = 8096;

struct ParserState {
    buffer: Vec<u8>,
    pos: usize,
    eof_read: bool,
    failure: Option<Error>,
}

impl ParserState {
    fn available(&self) -> &[u8] {
        &self.buffer[self.pos..]
    }

    fn consume(&mut self, count: usize) -> Vec<u8> {
        let data = self.buffer[self.pos..self.pos + count].to_vec();
        self.pos += count;
        if self.pos == self.buffer.len() {
            self.buffer.clear();
            self.pos = 0;
        }
        data
    }
}

/// Read-ahead buffer over an input.
pub struct ByteParserContext {
    input: BoxInput,
    buffer_size: usize,
    state: Mutex<ParserState>,
}

impl ByteParserContext {
    /// Creates a context reading at most `buffer_size` bytes per refill.
    #[must_use]
    pub fn new(input: BoxInput, buffer_size: usize) -> Self {
        Self {
            input,
            buffer_size: buffer_size.max(1),
            state: Mutex::new(ParserState {
                buffer: Vec::with_capacity(buffer_size),
                pos: 0,
                eof_read: false,
                failure: None,
            }),
        }
    }

    /// The underlying input.
    #[must_use]
    pub fn input(&self) -> &BoxInput {
        &self.input
    }

    /// Reads more data into the buffer.
    ///
    /// Resolves to `false` if EOF was reached instead.
    pub async fn read_more(&self) -> Result<bool> {
        {
            let state = self.state.lock();
            if let Some(error) = &state.failure {
                return Err(error.clone());
            }
            if state.eof_read {
                return Ok(false);
            }
        }
        let read = self.input.read(self.buffer_size).await;
        let mut state = self.state.lock();
        match read {
            Ok(Some(data)) => {
                state.buffer.extend_from_slice(&data);
                Ok(true)
            }
            Ok(None) => {
                state.eof_read = true;
                Ok(false)
            }
            Err(error) => {
                state.failure = Some(error.clone());
                Err(error)
            }
        }
    }

    /// Ensures `amount` bytes are buffered, failing with `StreamTruncated` if
    /// EOF comes first.
    pub async fn ensure_available(&self, amount: usize) -> Result<()> {
        while self.remaining() < amount {
            if !self.read_more().await? {
                return Err(Error::truncated(format!(
                    "EOF while {amount} bytes were expected"
                )));
            }
        }
        Ok(())
    }

    /// Number of buffered, unconsumed bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.state.lock().available().len()
    }

    /// Returns true if buffered bytes are available.
    #[must_use]
    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    /// Returns true once the input reported EOF.
    #[must_use]
    pub fn is_eof_seen(&self) -> bool {
        self.state.lock().eof_read
    }

    /// Returns true once the input reported EOF and the buffer is drained.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        let state = self.state.lock();
        state.eof_read && state.available().is_empty()
    }

    /// Takes up to `max` buffered bytes without reading more.
    pub fn take(&self, max: usize) -> Vec<u8> {
        let mut state = self.state.lock();
        let count = max.min(state.available().len());
        state.consume(count)
    }

    /// Returns bytes to the front of the buffer.
    pub fn push_back(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        let pos = state.pos;
        let mut rebuilt = Vec::with_capacity(data.len() + state.buffer.len() - pos);
        rebuilt.extend_from_slice(data);
        rebuilt.extend_from_slice(&state.buffer[pos..]);
        state.buffer = rebuilt;
        state.pos = 0;
    }

    /// Reads up to `max` bytes, refilling the buffer once if it is empty.
    ///
    /// Resolves to `None` at EOF.
    pub async fn read_some(&self, max: usize) -> Result<Option<Vec<u8>>> {
        if !self.has_remaining() && !self.read_more().await? {
            return Ok(None);
        }
        Ok(Some(self.take(max)))
    }

    /// Reads a line terminated by CRLF, returning it without the terminator.
    ///
    /// Bytes are decoded as ISO-8859-1. Resolves to `None` if EOF is reached
    /// before any byte of the line. A line whose content, not counting the
    /// CRLF, is longer than `max` bytes fails with `LimitExceeded`; EOF inside
    /// a line fails with `StreamTruncated`.
    pub async fn read_line_crlf(&self, max: usize) -> Result<Option<String>> {
        let mut scanned = 0;
        loop {
            {
                let mut state = self.state.lock();
                let available = state.available();
                if let Some(offset) = memchr::memchr(b'\n', &available[scanned..]) {
                    let end = scanned + offset;
                    if end.saturating_sub(1) > max {
                        return Err(line_too_long(max));
                    }
                    if end == 0 || available[end - 1] != b'\r' {
                        return Err(Error::protocol("Line is not terminated by CRLF"));
                    }
                    let line = state.consume(end + 1);
                    return Ok(Some(latin1(&line[..end - 1])));
                }
                scanned = available.len();
                // The last byte may be the CR of a line that is exactly `max`.
                if scanned > max.saturating_add(1) {
                    return Err(line_too_long(max));
                }
            }
            if !self.read_more().await? {
                return if scanned == 0 {
                    Ok(None)
                } else {
                    Err(Error::truncated("EOF in the middle of the line"))
                };
            }
        }
    }
}

fn line_too_long(max: usize) -> Error {
    Error::new(
        ErrorKind::LimitExceeded,
        format!("Line is longer than {max} bytes"),
    )
}

/// Decodes ISO-8859-1 bytes.
#[must_use]
pub fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

impl fmt::Debug for ByteParserContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ByteParserContext")
            .field("remaining", &state.available().len())
            .field("eof_read", &state.eof_read)
            .field("failed", &state.failure.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::buffered_pipe;
    use crate::io::AOutput;
    use crate::test_utils::run_on_vat;
    use crate::types::ACloseable;
    use std::sync::Arc;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    fn context_over(data: &'static [u8]) -> impl std::future::Future<Output = Result<ByteParserContext>> {
        async move {
            let (input, output) = buffered_pipe(data.len().max(1));
            output.write(data.to_vec()).await?;
            output.close().await?;
            Ok(ByteParserContext::new(Arc::new(input), 4))
        }
    }

    #[test]
    fn lines_span_refills() {
        init_test("lines_span_refills");
        let lines = run_on_vat(async {
            let ctx = context_over(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n").await?;
            let mut lines = Vec::new();
            while let Some(line) = ctx.read_line_crlf(100).await? {
                lines.push(line);
            }
            Ok(lines)
        })
        .expect("lines");
        assert_eq!(lines, vec!["GET / HTTP/1.1", "Host: a", ""]);
        crate::test_complete!("lines_span_refills");
    }

    #[test]
    fn long_line_is_rejected() {
        init_test("long_line_is_rejected");
        let err = run_on_vat(async {
            let ctx = context_over(b"0123456789abcdef\r\n").await?;
            ctx.read_line_crlf(8).await
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LimitExceeded);
        crate::test_complete!("long_line_is_rejected");
    }

    #[test]
    fn line_of_exactly_max_bytes_is_accepted() {
        init_test("line_of_exactly_max_bytes_is_accepted");
        let (exact, over) = run_on_vat(async {
            let ctx = context_over(b"01234567\r\n").await?;
            let exact = ctx.read_line_crlf(8).await?;
            let ctx = context_over(b"012345678\r\n").await?;
            let over = ctx.read_line_crlf(8).await.map_err(|e| e.kind());
            Ok((exact, over))
        })
        .expect("lines");
        crate::assert_with_log!(
            exact.as_deref() == Some("01234567"),
            "exact",
            "01234567",
            exact
        );
        crate::assert_with_log!(
            over == Err(ErrorKind::LimitExceeded),
            "one over",
            "LimitExceeded",
            over
        );
        crate::test_complete!("line_of_exactly_max_bytes_is_accepted");
    }

    #[test]
    fn eof_inside_line_is_truncation() {
        init_test("eof_inside_line_is_truncation");
        let err = run_on_vat(async {
            let ctx = context_over(b"partial").await?;
            ctx.read_line_crlf(100).await
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StreamTruncated);
        crate::test_complete!("eof_inside_line_is_truncation");
    }

    #[test]
    fn push_back_is_read_first() {
        init_test("push_back_is_read_first");
        let data = run_on_vat(async {
            let ctx = context_over(b"world").await?;
            ctx.ensure_available(2).await?;
            let head = ctx.take(2);
            ctx.push_back(&head);
            ctx.push_back(b"hello ");
            let mut all = Vec::new();
            while let Some(chunk) = ctx.read_some(3).await? {
                all.extend(chunk);
            }
            Ok(all)
        })
        .expect("push back");
        assert_eq!(data, b"hello world");
        crate::test_complete!("push_back_is_read_first");
    }
}
