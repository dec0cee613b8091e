//! Error types for vatflow.
//!
//! Every fallible asynchronous step resolves to a [`Result`] whose error side
//! is the crate-wide [`Error`]. Errors are cheap to clone because a single
//! failure is broadcast to every listener of a promise.
//!
//! # Taxonomy
//!
//! - [`ErrorKind::Closed`]: reads or writes after an explicit close.
//! - [`ErrorKind::Protocol`], [`ErrorKind::HttpStatus`],
//!   [`ErrorKind::StreamTruncated`], [`ErrorKind::LimitExceeded`],
//!   [`ErrorKind::UnknownTransferEncoding`]: wire-level violations.
//! - [`ErrorKind::Io`]: operating system failures.
//! - [`ErrorKind::Panic`]: a panic caught at a composition boundary.
//! - [`ErrorKind::Cancelled`]: work dropped before it produced a value.
//! - [`ErrorKind::Usage`]: recoverable misuse reported to the caller.

use std::fmt;
use std::sync::Arc;

/// Classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The resource was closed or invalidated.
    Closed,
    /// The API was used in a way the resource does not allow.
    Usage,
    /// An operating system I/O failure.
    Io,
    /// A protocol violation without a dedicated status.
    Protocol,
    /// A protocol violation that maps onto an HTTP status code.
    HttpStatus(u16),
    /// The peer closed the stream in the middle of a framed message.
    StreamTruncated,
    /// A protocol limit (line length, header block size) was exceeded.
    LimitExceeded,
    /// The message uses a transfer coding this stack does not implement.
    UnknownTransferEncoding,
    /// A panic was caught and converted into a failure.
    Panic,
    /// The operation was dropped before completion.
    Cancelled,
}

impl ErrorKind {
    /// Returns true for the protocol error category.
    #[must_use]
    pub const fn is_protocol(self) -> bool {
        matches!(
            self,
            Self::Protocol
                | Self::HttpStatus(_)
                | Self::StreamTruncated
                | Self::LimitExceeded
                | Self::UnknownTransferEncoding
        )
    }

    fn label(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Usage => "usage",
            Self::Io => "io",
            Self::Protocol => "protocol",
            Self::HttpStatus(_) => "http status",
            Self::StreamTruncated => "stream truncated",
            Self::LimitExceeded => "limit exceeded",
            Self::UnknownTransferEncoding => "unknown transfer encoding",
            Self::Panic => "panic",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HttpStatus(code) => write!(f, "http status {code}"),
            other => f.write_str(other.label()),
        }
    }
}

/// The crate-wide error type.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    /// Creates an error of the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attaches an underlying cause.
    #[must_use]
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    /// Resource-closed error.
    #[must_use]
    pub fn closed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Closed, message)
    }

    /// Usage error.
    #[must_use]
    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Usage, message)
    }

    /// Generic protocol error.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }

    /// Protocol error carrying the HTTP status that should be reported.
    #[must_use]
    pub fn http_status(status: u16, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::HttpStatus(status), message)
    }

    /// Truncated framed stream.
    #[must_use]
    pub fn truncated(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StreamTruncated, message)
    }

    /// Protocol limit exceeded.
    #[must_use]
    pub fn limit(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LimitExceeded, message)
    }

    /// Unsupported transfer coding.
    #[must_use]
    pub fn unknown_encoding(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownTransferEncoding, message)
    }

    /// Work dropped before completion.
    #[must_use]
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Converts a caught panic payload into an error.
    #[must_use]
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "opaque panic payload".to_owned());
        Self::new(ErrorKind::Panic, message)
    }

    /// Returns the error classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the human readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the HTTP status code when the error carries one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self.kind {
            ErrorKind::HttpStatus(code) => Some(code),
            _ => None,
        }
    }

    /// Returns true if the error belongs to the protocol category.
    #[must_use]
    pub fn is_protocol(&self) -> bool {
        self.kind.is_protocol()
    }

    /// Returns true if this is a resource-closed error.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.kind == ErrorKind::Closed
    }

    /// Re-labels a protocol failure as an HTTP status failure, keeping other kinds.
    #[must_use]
    pub fn into_http_status(self, status: u16) -> Self {
        match self.kind {
            kind if kind.is_protocol() && !matches!(kind, ErrorKind::HttpStatus(_)) => Self {
                kind: ErrorKind::HttpStatus(status),
                ..self
            },
            _ => self,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let message = err.to_string();
        Self::new(ErrorKind::Io, message).with_source(err)
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.message == other.message
    }
}

/// A specialized result type for vatflow operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_keep_their_source() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe").into();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(std::error::Error::source(&err).is_some());
        let copy = err.clone();
        assert_eq!(copy.message(), "pipe");
    }

    #[test]
    fn protocol_category() {
        assert!(Error::truncated("eof").is_protocol());
        assert!(Error::http_status(400, "bad").is_protocol());
        assert!(!Error::closed("gone").is_protocol());
        assert_eq!(Error::http_status(501, "x").status(), Some(501));
    }

    #[test]
    fn status_relabel_keeps_existing_status() {
        let err = Error::http_status(404, "missing").into_http_status(400);
        assert_eq!(err.status(), Some(404));
        let err = Error::protocol("bad header").into_http_status(400);
        assert_eq!(err.status(), Some(400));
        assert_eq!(err.to_string(), "http status 400: bad header");
    }

    #[test]
    fn panic_payloads_are_readable() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        let err = Error::from_panic(payload.as_ref());
        assert_eq!(err.kind(), ErrorKind::Panic);
        assert_eq!(err.message(), "boom");
    }
}
