//! Message body framing.
//!
//! Each body stream implements [`AInput`](crate::io::AInput) or
//! [`AOutput`](crate::io::AOutput) over the connection's shared
//! [`ByteParserContext`] / [`ByteGeneratorContext`] and differs only in how
//! the end of the body is found:
//!
//! | framing          | input                  | output                  |
//! |------------------|------------------------|-------------------------|
//! | `Content-Length` | [`ContentLengthInput`] | [`ContentLengthOutput`] |
//! | `chunked`        | [`ChunkedInput`]       | [`ChunkedOutput`]       |
//! | connection EOF   | [`RestOfStreamInput`]  | [`RestOfStreamOutput`]  |
//!
//! Every stream walks a forward-only state machine ([`InputState`],
//! [`OutputState`]) and reports each transition to an optional listener.
//! The exchange owning the connection uses those reports to decide whether
//! the connection may carry another message.

mod chunked;
mod length;
mod rest;

pub use chunked::{ChunkedInput, ChunkedOutput};
pub use length::{ContentLengthInput, ContentLengthOutput};
pub use rest::{RestOfStreamInput, RestOfStreamOutput};

use crate::config::HttpConfig;
use crate::error::{Error, Result};
use crate::http::h1::headers::HttpHeaders;
use crate::http::h1::scope::TrailersProvider;
use crate::http::h1::transfer::{CHUNKED, TransferEncoding};
use crate::http::h1::types::{Method, Version, status};
use crate::io::{BoxInput, BoxOutput, ByteGeneratorContext, ByteParserContext, ContentCoding};
use crate::promise::Resolver;
use crate::types::Outcome;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Lifecycle of a body being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InputState {
    /// Nothing read yet.
    Idle,
    /// Some data was requested.
    Data,
    /// End of body reached; the framing carries no trailers.
    EofNoTrailers,
    /// Trailers were parsed.
    TrailersRead,
    /// End of body reached after the trailers.
    Eof,
    /// Closed after the end of the body; the connection may be reused.
    Closed,
    /// Closed before the end of the body.
    ClosedBeforeEof,
    /// Failed.
    Error,
}

impl InputState {
    /// Returns true for states after which no more transitions follow.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::ClosedBeforeEof | Self::Error)
    }

    /// Returns true once the end of the body was observed.
    #[must_use]
    pub const fn is_eof(self) -> bool {
        matches!(self, Self::EofNoTrailers | Self::TrailersRead | Self::Eof | Self::Closed)
    }
}

/// Lifecycle of a body being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OutputState {
    /// Nothing written yet.
    NotStarted,
    /// Data written; closing now would cut the body short.
    Data,
    /// Data written; closing now completes the body.
    DataCloseable,
    /// Trailers were written.
    TrailersAdded,
    /// Closed with a complete body; the connection may be reused.
    Closed,
    /// Closed in a way that ends the connection.
    ClosedLast,
    /// Failed.
    Error,
}

impl OutputState {
    /// Returns true for states after which no more transitions follow.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::ClosedLast | Self::Error)
    }
}

/// A body state enumeration.
pub trait BodyState: Copy + Ord + fmt::Debug + Send + Sync + 'static {
    /// The starting state.
    const INITIAL: Self;
    /// The failure state.
    const ERROR: Self;
}

impl BodyState for InputState {
    const INITIAL: Self = Self::Idle;
    const ERROR: Self = Self::Error;
}

impl BodyState for OutputState {
    const INITIAL: Self = Self::NotStarted;
    const ERROR: Self = Self::Error;
}

/// Receives every state transition of a body stream, then its failure if
/// it is invalidated.
pub type StateListener<S> = Arc<dyn Fn(Outcome<S>) + Send + Sync>;

struct LifecycleState<S> {
    state: S,
    failure: Option<Error>,
    closed: bool,
}

/// Validity, open/closed flag and forward-only state of one body stream.
pub(crate) struct Lifecycle<S> {
    inner: Mutex<LifecycleState<S>>,
    listener: Option<StateListener<S>>,
}

impl<S: BodyState> Lifecycle<S> {
    pub(crate) fn new(listener: Option<StateListener<S>>) -> Self {
        Self {
            inner: Mutex::new(LifecycleState {
                state: S::INITIAL,
                failure: None,
                closed: false,
            }),
            listener,
        }
    }

    pub(crate) fn current(&self) -> S {
        self.inner.lock().state
    }

    /// Moves to `next`. Repeating the current state is a no-op; changes
    /// after invalidation are ignored.
    ///
    /// # Panics
    ///
    /// Panics if `next` precedes the current state.
    pub(crate) fn changed(&self, next: S) {
        {
            let mut inner = self.inner.lock();
            if inner.failure.is_some() || inner.state == next {
                return;
            }
            assert!(
                next > inner.state,
                "Shifting state backward: {:?} -> {:?}",
                inner.state,
                next
            );
            inner.state = next;
        }
        if let Some(listener) = &self.listener {
            listener(Outcome::Success(next));
        }
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.inner.lock().failure.is_none()
    }

    pub(crate) fn ensure_valid_and_open(&self) -> Result<()> {
        let inner = self.inner.lock();
        if let Some(failure) = &inner.failure {
            return Err(failure.clone());
        }
        if inner.closed {
            return Err(Error::closed("The body stream is closed"));
        }
        Ok(())
    }

    /// Marks the stream failed; only the first failure is kept.
    pub(crate) fn invalidate(&self, error: Error) {
        {
            let mut inner = self.inner.lock();
            if inner.failure.is_some() {
                return;
            }
            inner.failure = Some(error.clone());
            inner.state = S::ERROR;
        }
        tracing::trace!(error = %error, "body stream invalidated");
        if let Some(listener) = &self.listener {
            listener(Outcome::Failure(error));
        }
    }

    /// Invalidates the stream if `result` failed while it was open.
    pub(crate) fn check<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(error) = &result {
            if !self.inner.lock().closed {
                self.invalidate(error.clone());
            }
        }
        result
    }

    /// Marks the stream closed; returns false if it already was.
    pub(crate) fn start_closing(&self) -> bool {
        let mut inner = self.inner.lock();
        !std::mem::replace(&mut inner.closed, true)
    }
}

/// A selected body stream and how it is framed.
#[derive(Clone)]
pub struct StreamInfo<S> {
    /// The stream, with content codings applied.
    pub stream: S,
    /// Declared length, when framed by `Content-Length`.
    pub content_length: Option<u64>,
    /// True when the body ends with the connection.
    pub rest_of_stream: bool,
    /// Transfer codings in header order.
    pub encodings: Vec<TransferEncoding>,
}

impl<S> fmt::Debug for StreamInfo<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamInfo")
            .field("content_length", &self.content_length)
            .field("rest_of_stream", &self.rest_of_stream)
            .field("encodings", &self.encodings)
            .finish_non_exhaustive()
    }
}

/// Framing inputs taken from a message head.
#[derive(Debug, Clone)]
pub struct Framing<'a> {
    /// Method of the request, or of the request answered by a response.
    pub method: &'a Method,
    /// Response status; `None` for requests.
    pub status: Option<u16>,
    /// Parsed `Transfer-Encoding`.
    pub encodings: Vec<TransferEncoding>,
    /// Parsed `Content-Length`.
    pub content_length: Option<u64>,
}

impl Framing<'_> {
    fn validate(&self) -> Result<()> {
        if !self.encodings.is_empty() && self.content_length.is_some() {
            return Err(Error::protocol(
                "Both Transfer-Encoding and Content-Length specified",
            ));
        }
        Ok(())
    }

    fn is_head_response(&self) -> bool {
        self.status.is_some() && self.method.is_head()
    }

    fn is_no_content(&self) -> Result<bool> {
        match self.status {
            None => {
                let has_body =
                    !self.encodings.is_empty() || self.content_length.is_some_and(|n| n > 0);
                if self.method.is_trace() && has_body {
                    return Err(Error::protocol("The TRACE method could not have content"));
                }
                Ok(self.encodings.is_empty() && self.content_length.is_none())
            }
            Some(code) => Ok(code == status::NO_CONTENT
                || code == status::NOT_MODIFIED
                || status::is_informational(code)
                || (self.method.is_connect() && status::is_success(code))),
        }
    }

    fn is_request(&self) -> bool {
        self.status.is_none()
    }

    /// Splits the codings into the framing coding and the content codings
    /// to apply on top of it, last applied first.
    fn split_codings(&self) -> Result<(bool, Vec<ContentCoding>)> {
        let chunked = TransferEncoding::is_chunked(&self.encodings);
        if !chunked && self.is_request() {
            return Err(Error::protocol(
                "The chunked encoding must be last for the request.",
            ));
        }
        let codings = if chunked {
            &self.encodings[..self.encodings.len() - 1]
        } else {
            &self.encodings[..]
        };
        let mut content = Vec::with_capacity(codings.len());
        for encoding in codings.iter().rev() {
            if encoding.name() == CHUNKED {
                return Err(Error::protocol(
                    "The chunked encoding must happen only once.",
                ));
            }
            let coding = ContentCoding::from_name(encoding.name()).ok_or_else(|| {
                Error::unknown_encoding(format!("The unsupported encoding: {}", encoding.name()))
            })?;
            content.push(coding);
        }
        Ok((chunked, content))
    }
}

/// Limits and trailers plumbing for [`select_input`].
pub struct InputContext {
    /// Connection read buffer.
    pub parser: Arc<ByteParserContext>,
    /// Receives the input state transitions.
    pub listener: Option<StateListener<InputState>>,
    /// Resolved with the trailers, or `None` when the framing has none.
    pub trailers: Option<Resolver<Option<HttpHeaders>>>,
    /// Header and chunk line limits.
    pub config: HttpConfig,
}

/// Chooses and builds the body input for a received message head.
pub fn select_input(framing: &Framing<'_>, context: InputContext) -> Result<StreamInfo<BoxInput>> {
    framing.validate()?;
    let InputContext {
        parser,
        listener,
        trailers,
        config,
    } = context;
    let no_trailers = |trailers: Option<Resolver<Option<HttpHeaders>>>| {
        if let Some(trailers) = trailers {
            trailers.success(None);
        }
    };
    if framing.is_head_response() || framing.is_no_content()? {
        no_trailers(trailers);
        return Ok(StreamInfo {
            stream: Arc::new(ContentLengthInput::new(parser, 0, listener)),
            content_length: Some(0),
            rest_of_stream: false,
            encodings: Vec::new(),
        });
    }
    if !framing.encodings.is_empty() {
        let (chunked, codings) = framing.split_codings()?;
        let (mut stream, rest_of_stream): (BoxInput, bool) = if chunked {
            (
                Arc::new(ChunkedInput::new(parser, &config, listener, trailers)),
                false,
            )
        } else {
            no_trailers(trailers);
            (Arc::new(RestOfStreamInput::new(parser, listener)), true)
        };
        for coding in codings {
            stream = coding.decode(stream);
        }
        return Ok(StreamInfo {
            stream,
            content_length: None,
            rest_of_stream,
            encodings: framing.encodings.clone(),
        });
    }
    no_trailers(trailers);
    if let Some(length) = framing.content_length {
        return Ok(StreamInfo {
            stream: Arc::new(ContentLengthInput::new(parser, length, listener)),
            content_length: Some(length),
            rest_of_stream: false,
            encodings: Vec::new(),
        });
    }
    Ok(StreamInfo {
        stream: Arc::new(RestOfStreamInput::new(parser, listener)),
        content_length: None,
        rest_of_stream: true,
        encodings: Vec::new(),
    })
}

/// Trailers plumbing for [`select_output`].
pub struct OutputContext {
    /// Connection write buffer.
    pub generator: Arc<ByteGeneratorContext>,
    /// Receives the output state transitions.
    pub listener: Option<StateListener<OutputState>>,
    /// Trailers to write after a chunked body.
    pub trailers: Option<TrailersProvider>,
}

/// Chooses and builds the body output for a message head being written.
pub fn select_output(
    framing: &Framing<'_>,
    context: OutputContext,
) -> Result<StreamInfo<BoxOutput>> {
    framing.validate()?;
    let OutputContext {
        generator,
        listener,
        trailers,
    } = context;
    if framing.is_head_response() || framing.is_no_content()? {
        return Ok(StreamInfo {
            stream: Arc::new(ContentLengthOutput::new(generator, 0, listener)),
            content_length: Some(0),
            rest_of_stream: false,
            encodings: Vec::new(),
        });
    }
    if !framing.encodings.is_empty() {
        let (chunked, codings) = framing.split_codings()?;
        let (mut stream, rest_of_stream): (BoxOutput, bool) = if chunked {
            (
                Arc::new(ChunkedOutput::new(generator, listener, trailers)),
                false,
            )
        } else {
            (Arc::new(RestOfStreamOutput::new(generator, listener)), true)
        };
        for coding in codings {
            stream = coding.encode(stream);
        }
        return Ok(StreamInfo {
            stream,
            content_length: None,
            rest_of_stream,
            encodings: framing.encodings.clone(),
        });
    }
    if let Some(length) = framing.content_length {
        return Ok(StreamInfo {
            stream: Arc::new(ContentLengthOutput::new(generator, length, listener)),
            content_length: Some(length),
            rest_of_stream: false,
            encodings: Vec::new(),
        });
    }
    Ok(StreamInfo {
        stream: Arc::new(RestOfStreamOutput::new(generator, listener)),
        content_length: None,
        rest_of_stream: true,
        encodings: Vec::new(),
    })
}

/// Transfer codings for an outgoing body: none when the length is known or
/// the peer speaks HTTP/1.0, otherwise `chunked`.
#[must_use]
pub fn transfer_encodings_for(version: Version, length: Option<u64>) -> Vec<TransferEncoding> {
    if length.is_some() || version == Version::Http10 {
        Vec::new()
    } else {
        vec![TransferEncoding::chunked()]
    }
}
