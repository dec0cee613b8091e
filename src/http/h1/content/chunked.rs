use super::{InputState, Lifecycle, OutputState, StateListener};
use crate::config::HttpConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::http::h1::headers::HttpHeaders;
use crate::http::h1::scope::TrailersProvider;
use crate::io::{AInput, AOutput, ByteGeneratorContext, ByteParserContext};
use crate::promise::{Promise, Resolver};
use crate::sync::RequestQueue;
use crate::types::ACloseable;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Longest chunk terminator line read between chunks.
const CHUNK_END_LIMIT: usize = 0;

struct ChunkProgress {
    remaining: u64,
    first: bool,
    eof: bool,
}

struct InputInner {
    parser: Arc<ByteParserContext>,
    life: Lifecycle<InputState>,
    trailers: Option<Resolver<Option<HttpHeaders>>>,
    chunk_line_limit: usize,
    trailers_limit: usize,
    progress: Mutex<ChunkProgress>,
}

/// Parses the hexadecimal size of a chunk header, ignoring extensions.
fn parse_chunk_size(line: &str) -> Result<u64> {
    let digits = line
        .split(';')
        .next()
        .unwrap_or_default()
        .trim_matches(|c| c == ' ' || c == '\t');
    if digits.is_empty() || !digits.bytes().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::protocol(format!(
            "Failed to parse chunk header: {line}"
        )));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|_| Error::protocol(format!("The chunk size is too big: {line}")))
}

impl InputInner {
    fn fail_trailers(&self, error: Error) {
        if let Some(trailers) = &self.trailers {
            trailers.fail(error);
        }
    }

    fn invalidate(&self, error: Error) {
        self.fail_trailers(error.clone());
        self.life.invalidate(error);
    }

    fn check<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(error) = &result {
            if self.life.is_valid() {
                self.fail_trailers(error.clone());
            }
        }
        self.life.check(result)
    }

    async fn read_chunk_header(&self, end_previous: bool) -> Result<u64> {
        let header = async {
            if end_previous {
                match self.parser.read_line_crlf(CHUNK_END_LIMIT).await {
                    Ok(None) => return Err(Error::protocol("EOF instead of a chunk header")),
                    Ok(Some(line)) if line.is_empty() => {}
                    Ok(Some(_)) => {
                        return Err(Error::protocol("CRLF is expected after chunk end"));
                    }
                    Err(error) if error.kind() == ErrorKind::LimitExceeded => {
                        return Err(Error::protocol("CRLF is expected after chunk end"));
                    }
                    Err(error) => return Err(error),
                }
            }
            match self.parser.read_line_crlf(self.chunk_line_limit).await? {
                None => Err(Error::protocol("EOF instead of a chunk header")),
                Some(line) => parse_chunk_size(&line),
            }
        };
        header.await.map_err(|error| match error.kind() {
            ErrorKind::LimitExceeded | ErrorKind::StreamTruncated => error,
            _ if error.is_protocol() => error,
            _ => Error::protocol("Failed to parse chunk header").with_source(error),
        })
    }

    /// Reads the next chunk header. Returns true once the last chunk and
    /// the trailers were consumed.
    async fn next_chunk(&self) -> Result<bool> {
        let first = self.progress.lock().first;
        let size = self.read_chunk_header(!first).await?;
        self.progress.lock().first = false;
        if size != 0 {
            self.progress.lock().remaining = size;
            return Ok(false);
        }
        let trailers = HttpHeaders::read(&self.parser, self.trailers_limit).await?;
        self.progress.lock().eof = true;
        if let Some(resolver) = &self.trailers {
            resolver.success(Some(trailers));
        }
        self.life.changed(InputState::TrailersRead);
        self.life.changed(InputState::Eof);
        Ok(true)
    }

    async fn read(&self, limit: usize) -> Result<Option<Vec<u8>>> {
        loop {
            self.life.ensure_valid_and_open()?;
            let remaining = {
                let progress = self.progress.lock();
                if progress.eof {
                    return Ok(None);
                }
                progress.remaining
            };
            if limit == 0 {
                return Ok(Some(Vec::new()));
            }
            self.life.changed(InputState::Data);
            if remaining == 0 {
                if self.next_chunk().await? {
                    return Ok(None);
                }
                continue;
            }
            let max = usize::try_from(remaining).map_or(limit, |r| r.min(limit));
            return match self.parser.read_some(max).await? {
                Some(data) => {
                    self.progress.lock().remaining -= data.len() as u64;
                    Ok(Some(data))
                }
                None => Err(Error::truncated("EOF before end of chunk")),
            };
        }
    }

    fn closed_before_eof(&self) {
        self.fail_trailers(Error::protocol(
            "Trailers not read, because closed before EOF",
        ));
        self.life.changed(InputState::ClosedBeforeEof);
    }

    async fn close(&self) {
        if !self.life.start_closing() {
            return;
        }
        let (eof, remaining) = {
            let progress = self.progress.lock();
            (progress.eof, progress.remaining)
        };
        if eof {
            self.life.changed(InputState::Closed);
        } else if remaining == 0 && self.life.is_valid() {
            match self.next_chunk().await {
                Ok(true) => self.life.changed(InputState::Closed),
                Ok(false) => self.closed_before_eof(),
                Err(error) => self.invalidate(error),
            }
        } else {
            self.closed_before_eof();
        }
    }
}

/// Body input decoding the `chunked` transfer coding.
///
/// The trailers after the last chunk resolve the trailers resolver; closing
/// before reaching them fails it.
pub struct ChunkedInput {
    inner: Arc<InputInner>,
    reads: RequestQueue,
}

impl ChunkedInput {
    /// Reads chunks from `parser`.
    #[must_use]
    pub fn new(
        parser: Arc<ByteParserContext>,
        config: &HttpConfig,
        listener: Option<StateListener<InputState>>,
        trailers: Option<Resolver<Option<HttpHeaders>>>,
    ) -> Self {
        Self {
            inner: Arc::new(InputInner {
                parser,
                life: Lifecycle::new(listener),
                trailers,
                chunk_line_limit: config.max_chunk_line,
                trailers_limit: config.max_headers_size,
                progress: Mutex::new(ChunkProgress {
                    remaining: 0,
                    first: true,
                    eof: false,
                }),
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

impl AInput for ChunkedInput {
    fn read(&self, limit: usize) -> Promise<Option<Vec<u8>>> {
        let inner = Arc::clone(&self.inner);
        self.reads.run_future(async move {
            let result = inner.read(limit).await;
            inner.check(result)
        })
    }
}

impl ACloseable for ChunkedInput {
    fn close(&self) -> Promise<()> {
        let inner = Arc::clone(&self.inner);
        self.reads.run_future(async move {
            inner.close().await;
            Ok(())
        })
    }
}

impl fmt::Debug for ChunkedInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let progress = self.inner.progress.lock();
        f.debug_struct("ChunkedInput")
            .field("chunk_remaining", &progress.remaining)
            .field("eof", &progress.eof)
            .field("state", &self.inner.life.current())
            .finish()
    }
}

struct OutputInner {
    generator: Arc<ByteGeneratorContext>,
    life: Lifecycle<OutputState>,
    trailers: Option<TrailersProvider>,
    needs_new_line: Mutex<bool>,
}

impl OutputInner {
    async fn write(&self, data: Vec<u8>) -> Result<()> {
        self.life.ensure_valid_and_open()?;
        if data.is_empty() {
            return Ok(());
        }
        self.life.changed(OutputState::DataCloseable);
        let header = if std::mem::replace(&mut *self.needs_new_line.lock(), true) {
            format!("\r\n{:x}\r\n", data.len())
        } else {
            format!("{:x}\r\n", data.len())
        };
        self.generator.put_latin1(&header);
        self.generator.send().await?;
        self.generator.output().write(data).await
    }

    async fn finish(&self) -> Result<()> {
        let last = if *self.needs_new_line.lock() {
            "\r\n0\r\n"
        } else {
            "0\r\n"
        };
        self.generator.put_latin1(last);
        let trailers = match &self.trailers {
            Some(provider) => provider().await?,
            None => None,
        };
        match trailers {
            Some(trailers) => {
                trailers.write_to(&self.generator);
                self.life.changed(OutputState::TrailersAdded);
            }
            None => self.generator.put_latin1("\r\n"),
        }
        self.generator.send().await
    }

    async fn close(&self) {
        if !self.life.start_closing() {
            return;
        }
        if !self.life.is_valid() {
            self.life.changed(OutputState::ClosedLast);
            return;
        }
        match self.finish().await {
            Ok(()) => self.life.changed(OutputState::Closed),
            Err(error) => self.life.invalidate(error),
        }
    }
}

/// Body output encoding the `chunked` transfer coding.
///
/// Every non-empty write becomes one chunk. Closing writes the last chunk
/// followed by the trailers from the provider, if any.
pub struct ChunkedOutput {
    inner: Arc<OutputInner>,
    writes: RequestQueue,
}

impl ChunkedOutput {
    /// Writes chunks through `generator`.
    #[must_use]
    pub fn new(
        generator: Arc<ByteGeneratorContext>,
        listener: Option<StateListener<OutputState>>,
        trailers: Option<TrailersProvider>,
    ) -> Self {
        Self {
            inner: Arc::new(OutputInner {
                generator,
                life: Lifecycle::new(listener),
                trailers,
                needs_new_line: Mutex::new(false),
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

impl AOutput for ChunkedOutput {
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

impl ACloseable for ChunkedOutput {
    fn close(&self) -> Promise<()> {
        let inner = Arc::clone(&self.inner);
        self.writes.run_future(async move {
            inner.close().await;
            Ok(())
        })
    }
}

impl fmt::Debug for ChunkedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkedOutput")
            .field("state", &self.inner.life.current())
            .finish_non_exhaustive()
    }
}
