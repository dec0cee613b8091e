use crate::http::h1::headers::HttpHeaders;
use crate::http::h1::types::Version;
use crate::io::{BoxChannel, BoxInput};
use crate::promise::Promise;
use std::fmt;

/// A response head with access to what follows it.
#[derive(Clone)]
pub struct HttpResponse {
    /// Protocol version of the response.
    pub version: Version,
    /// Status code.
    pub status: u16,
    /// Reason phrase.
    pub reason: String,
    /// Header fields.
    pub headers: HttpHeaders,
    /// Declared body length, when framed by `Content-Length`.
    pub content_length: Option<u64>,
    /// Response body; `None` after a protocol switch.
    pub input: Option<BoxInput>,
    /// The raw connection after a protocol switch.
    pub channel: Option<BoxChannel>,
    /// Response trailers, resolved once the body was read to its end.
    pub trailers: Promise<Option<HttpHeaders>>,
}

impl HttpResponse {
    /// Returns true if the response switched the connection to another
    /// protocol.
    #[must_use]
    pub const fn is_switched(&self) -> bool {
        self.channel.is_some()
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("version", &self.version)
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("headers", &self.headers)
            .field("content_length", &self.content_length)
            .field("switched", &self.channel.is_some())
            .finish_non_exhaustive()
    }
}
