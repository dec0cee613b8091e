//! Request and response heads.
//!
//! A head is the start line plus the header block. Bodies are handled
//! separately by [`content`](super::content).

use crate::config::HttpConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::http::h1::headers::{HOST, HttpHeaders};
use crate::http::h1::transfer::is_token_char;
use crate::http::h1::types::{Method, Version, default_reason, status};
use crate::http::h1::uri::{Authority, Uri};
use crate::io::{ByteGeneratorContext, ByteParserContext};
use std::fmt;
use std::net::SocketAddr;

/// A request line with its headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMessage {
    /// Request method.
    pub method: Method,
    /// Request target exactly as sent.
    pub target: String,
    /// Protocol version.
    pub version: Version,
    /// Header fields.
    pub headers: HttpHeaders,
}

impl RequestMessage {
    /// A request with empty headers.
    #[must_use]
    pub fn new(method: Method, target: impl Into<String>, version: Version) -> Self {
        Self {
            method,
            target: target.into(),
            version,
            headers: HttpHeaders::new(),
        }
    }

    /// Reads a request head, skipping empty lines before it.
    ///
    /// Resolves to `None` if the connection ends before a request starts.
    /// Malformed heads fail with status 400.
    pub async fn read(parser: &ByteParserContext, config: &HttpConfig) -> Result<Option<Self>> {
        Self::read_head(parser, config)
            .await
            .map_err(|error| error.into_http_status(status::BAD_REQUEST))
    }

    async fn read_head(parser: &ByteParserContext, config: &HttpConfig) -> Result<Option<Self>> {
        let line = loop {
            match parser.read_line_crlf(config.max_start_line).await {
                Ok(None) => return Ok(None),
                Ok(Some(line)) if line.is_empty() => {}
                Ok(Some(line)) => break line,
                Err(error) if error.kind() == ErrorKind::Closed => return Ok(None),
                Err(error) => return Err(error),
            }
        };
        let mut message = Self::parse_request_line(&line)?;
        message.headers = HttpHeaders::read(parser, config.max_headers_size).await?;
        Ok(Some(message))
    }

    fn parse_request_line(line: &str) -> Result<Self> {
        let (method, rest) = line
            .split_once(' ')
            .ok_or_else(|| Error::protocol("No method in the request line"))?;
        let (target, version) = rest
            .rsplit_once(' ')
            .ok_or_else(|| Error::protocol("No version in the request line"))?;
        if method.is_empty() || !method.bytes().all(is_token_char) {
            return Err(Error::protocol(format!("Invalid method: {method}")));
        }
        let target = target.trim();
        if target.is_empty() {
            return Err(Error::protocol("Empty request target"));
        }
        let version = Version::parse(version)
            .ok_or_else(|| Error::protocol(format!("Unknown version of HTTP: {version}")))?;
        let method = Method::from_bytes(method.as_bytes())
            .ok_or_else(|| Error::protocol(format!("Invalid method: {method}")))?;
        Ok(Self::new(method, target, version))
    }

    /// Reconstructs the absolute request URI seen by a server.
    ///
    /// `protocol` is the scheme of the listening socket. HTTP/1.0 requests
    /// without `Host` fall back to the server address.
    pub fn effective_uri(&self, protocol: &str, server_address: Option<SocketAddr>) -> Result<Uri> {
        self.resolve_uri(protocol, server_address)
            .map_err(|error| error.into_http_status(status::BAD_REQUEST))
    }

    fn resolve_uri(&self, protocol: &str, server_address: Option<SocketAddr>) -> Result<Uri> {
        let hosts = self.headers.get(HOST);
        if hosts.len() > 1 {
            return Err(Error::protocol("Multiple Host headers detected"));
        }
        let host = match hosts.first() {
            Some(host) => {
                let authority = Authority::parse(host.trim())?;
                if authority.userinfo.is_some() {
                    return Err(Error::protocol("User info presents in host header"));
                }
                authority.to_string()
            }
            None if self.version == Version::Http11 => {
                return Err(Error::protocol("No 'Host' header for HTTP/1.1 request"));
            }
            None => server_address.map_or_else(|| "localhost".to_owned(), |a| a.to_string()),
        };
        if self.method.is_connect() {
            let authority = Authority::parse(&self.target)?;
            if !authority.to_string().eq_ignore_ascii_case(&host) {
                return Err(Error::protocol(format!(
                    "The CONNECT target does not match Host: {} != {host}",
                    self.target
                )));
            }
            return Uri::from_authority(protocol, &host);
        }
        if self.target.starts_with('/') {
            return Ok(Uri::parse(&format!("{protocol}://{host}{}", self.target))?.without_fragment());
        }
        if self.target == "*" {
            return Uri::from_authority(protocol, &host);
        }
        let uri = Uri::parse(&self.target)?;
        if !uri.is_absolute() {
            return Err(Error::protocol(format!(
                "Invalid request target: {}",
                self.target
            )));
        }
        Ok(uri.without_fragment())
    }

    /// Builds the head a client sends for `uri`.
    ///
    /// Sets `Host` to the URI authority. The target is origin-form when the
    /// connection goes straight to that authority, absolute-form when
    /// `connection_host` names some other host, and authority-form for
    /// `CONNECT`.
    pub fn for_client(
        method: Method,
        uri: &Uri,
        version: Version,
        mut headers: HttpHeaders,
        connection_host: Option<&str>,
    ) -> Result<Self> {
        if !uri.is_absolute() {
            return Err(Error::usage(format!("The URI must be absolute: {uri}")));
        }
        if uri.userinfo().is_some() {
            return Err(Error::usage(format!("User info is not supported: {uri}")));
        }
        let authority = uri
            .authority()
            .ok_or_else(|| Error::usage(format!("The URI has no host: {uri}")))?;
        headers.set_first(HOST, authority.clone());
        let target = if method.is_connect() {
            authority
        } else if connection_host.is_none_or(|host| host.eq_ignore_ascii_case(&authority)) {
            if uri.path().is_empty() {
                if method.is_options() && uri.query().is_none() {
                    "*".to_owned()
                } else {
                    format!("/{}", uri.query().map_or_else(String::new, |q| format!("?{q}")))
                }
            } else {
                uri.path_and_query()
            }
        } else {
            uri.clone().without_fragment().to_string()
        };
        Ok(Self {
            method,
            target,
            version,
            headers,
        })
    }

    /// Queues the head on `generator`.
    pub fn write_to(&self, generator: &ByteGeneratorContext) {
        generator.put_latin1(&format!("{} {} {}\r\n", self.method, self.target, self.version));
        self.headers.write_to(generator);
    }
}

impl fmt::Display for RequestMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}\r\n{}", self.method, self.target, self.version, self.headers)
    }
}

/// A status line with its headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMessage {
    /// Protocol version.
    pub version: Version,
    /// Status code.
    pub status: u16,
    /// Reason phrase.
    pub reason: String,
    /// Header fields.
    pub headers: HttpHeaders,
}

impl ResponseMessage {
    /// A response with the default reason phrase and empty headers.
    #[must_use]
    pub fn new(version: Version, status: u16) -> Self {
        Self {
            version,
            status,
            reason: default_reason(status).to_owned(),
            headers: HttpHeaders::new(),
        }
    }

    /// Reads a response head.
    ///
    /// EOF before the status line fails with `StreamTruncated`.
    pub async fn read(parser: &ByteParserContext, config: &HttpConfig) -> Result<Self> {
        let line = parser
            .read_line_crlf(config.max_start_line)
            .await?
            .ok_or_else(|| Error::truncated("EOF before the status line"))?;
        let mut message = Self::parse_status_line(&line)?;
        message.headers = HttpHeaders::read(parser, config.max_headers_size).await?;
        Ok(message)
    }

    fn parse_status_line(line: &str) -> Result<Self> {
        let (version, rest) = line
            .split_once(' ')
            .ok_or_else(|| Error::protocol(format!("Invalid status line: {line}")))?;
        let version = Version::parse(version)
            .ok_or_else(|| Error::protocol(format!("Unknown response version: {version}")))?;
        let (code, reason) = rest.split_once(' ').unwrap_or((rest, ""));
        let status = code
            .parse::<u16>()
            .ok()
            .filter(|&s| code.len() == 3 && status::is_valid(s))
            .ok_or_else(|| Error::protocol(format!("Bad status code: {code}")))?;
        Ok(Self {
            version,
            status,
            reason: reason.to_owned(),
            headers: HttpHeaders::new(),
        })
    }

    /// Queues the head on `generator`.
    pub fn write_to(&self, generator: &ByteGeneratorContext) {
        generator.put_latin1(&format!("{} {} {}\r\n", self.version, self.status, self.reason));
        self.headers.write_to(generator);
    }
}

impl fmt::Display for ResponseMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}\r\n{}", self.version, self.status, self.reason, self.headers)
    }
}
