//! HTTP/1.x protocol vocabulary.
//!
//! Provides [`Method`], [`Version`] and the status-code predicates used to
//! pick body framing and connection reuse.

use std::fmt;

/// HTTP request method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET
    Get,
    /// HEAD
    Head,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
    /// CONNECT
    Connect,
    /// OPTIONS
    Options,
    /// TRACE
    Trace,
    /// PATCH
    Patch,
    /// Extension method not covered by the standard set.
    Extension(String),
}

impl Method {
    /// Parse a method from its ASCII representation.
    #[must_use]
    pub fn from_bytes(src: &[u8]) -> Option<Self> {
        match src {
            b"GET" => Some(Self::Get),
            b"HEAD" => Some(Self::Head),
            b"POST" => Some(Self::Post),
            b"PUT" => Some(Self::Put),
            b"DELETE" => Some(Self::Delete),
            b"CONNECT" => Some(Self::Connect),
            b"OPTIONS" => Some(Self::Options),
            b"TRACE" => Some(Self::Trace),
            b"PATCH" => Some(Self::Patch),
            other => std::str::from_utf8(other)
                .ok()
                .map(|s| Self::Extension(s.to_owned())),
        }
    }

    /// Returns the method as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Connect => "CONNECT",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
            Self::Patch => "PATCH",
            Self::Extension(s) => s,
        }
    }
}

impl Method {
    /// Returns true for `HEAD`.
    #[must_use]
    pub const fn is_head(&self) -> bool {
        matches!(self, Self::Head)
    }

    /// Returns true for `CONNECT`.
    #[must_use]
    pub const fn is_connect(&self) -> bool {
        matches!(self, Self::Connect)
    }

    /// Returns true for `TRACE`.
    #[must_use]
    pub const fn is_trace(&self) -> bool {
        matches!(self, Self::Trace)
    }

    /// Returns true for `OPTIONS`.
    #[must_use]
    pub const fn is_options(&self) -> bool {
        matches!(self, Self::Options)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    /// HTTP/1.0
    Http10,
    /// HTTP/1.1
    Http11,
}

impl Version {
    /// Parse a version from its ASCII representation (e.g. `HTTP/1.1`).
    #[must_use]
    pub fn from_bytes(src: &[u8]) -> Option<Self> {
        match src {
            b"HTTP/1.0" => Some(Self::Http10),
            b"HTTP/1.1" => Some(Self::Http11),
            _ => None,
        }
    }

    /// Parses a version token, trimming surrounding whitespace.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        Self::from_bytes(text.trim().as_bytes())
    }

    /// Returns the version as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns the standard reason phrase for a status code.
#[must_use]
pub fn default_reason(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        102 => "Processing",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        411 => "Length Required",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        505 => "HTTP Version Not Supported",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Well-known status codes.
pub mod status {
    /// 100 Continue
    pub const CONTINUE: u16 = 100;
    /// 101 Switching Protocols
    pub const SWITCHING_PROTOCOLS: u16 = 101;
    /// 200 OK
    pub const OK: u16 = 200;
    /// 202 Accepted
    pub const ACCEPTED: u16 = 202;
    /// 204 No Content
    pub const NO_CONTENT: u16 = 204;
    /// 304 Not Modified
    pub const NOT_MODIFIED: u16 = 304;
    /// 400 Bad Request
    pub const BAD_REQUEST: u16 = 400;
    /// 404 Not Found
    pub const NOT_FOUND: u16 = 404;
    /// 500 Internal Server Error
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
    /// 501 Not Implemented
    pub const NOT_IMPLEMENTED: u16 = 501;

    /// Returns true for 1xx codes.
    #[must_use]
    pub const fn is_informational(status: u16) -> bool {
        status >= 100 && status < 200
    }

    /// Returns true for 2xx codes.
    #[must_use]
    pub const fn is_success(status: u16) -> bool {
        status >= 200 && status < 300
    }

    /// Returns true for 4xx codes.
    #[must_use]
    pub const fn is_client_error(status: u16) -> bool {
        status >= 400 && status < 500
    }

    /// Returns true for 5xx codes.
    #[must_use]
    pub const fn is_server_error(status: u16) -> bool {
        status >= 500 && status < 600
    }

    /// Returns true for codes a status line may carry.
    #[must_use]
    pub const fn is_valid(status: u16) -> bool {
        status >= 100 && status < 600
    }
}

/// Returns true if a response with `status` to a `method` request hands the
/// connection over to another protocol.
#[must_use]
pub fn is_switch_protocol(method: &Method, status: u16) -> bool {
    status == status::SWITCHING_PROTOCOLS || (method.is_connect() && status::is_success(status))
}
