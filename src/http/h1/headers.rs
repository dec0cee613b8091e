//! Header fields.
//!
//! [`HttpHeaders`] keeps field names lowercased and in first-insertion
//! order; every name maps to one or more values. The block parser accepts
//! obsolete line folding and enforces a total size limit.

use crate::error::{Error, Result};
use crate::http::h1::transfer::TransferEncoding;
use crate::http::h1::types::Version;
use crate::io::{ByteGeneratorContext, ByteParserContext};
use chrono::{DateTime, Utc};
use std::fmt::{self, Write as _};

/// `Host`
pub const HOST: &str = "host";
/// `Content-Length`
pub const CONTENT_LENGTH: &str = "content-length";
/// `Content-Type`
pub const CONTENT_TYPE: &str = "content-type";
/// `Transfer-Encoding`
pub const TRANSFER_ENCODING: &str = "transfer-encoding";
/// `Connection`
pub const CONNECTION: &str = "connection";
/// `Expect`
pub const EXPECT: &str = "expect";
/// `TE`
pub const TE: &str = "te";
/// `Trailer`
pub const TRAILER: &str = "trailer";
/// `User-Agent`
pub const USER_AGENT: &str = "user-agent";
/// `Server`
pub const SERVER: &str = "server";
/// `Date`
pub const DATE: &str = "date";
/// `Upgrade`
pub const UPGRADE: &str = "upgrade";
/// `Allow`
pub const ALLOW: &str = "allow";

/// `Expect` value requesting an intermediate 100 response.
pub const EXPECT_CONTINUE: &str = "100-continue";
/// `Connection` token ending the connection after the exchange.
pub const CONNECTION_CLOSE: &str = "close";
/// `Connection` token keeping an HTTP/1.0 connection open.
pub const CONNECTION_KEEP_ALIVE: &str = "keep-alive";
/// `TE` token accepting trailers.
pub const TE_TRAILERS: &str = "trailers";
/// Content type of generated HTML pages.
pub const CONTENT_TYPE_HTML_UTF8: &str = "text/html; charset=utf-8";

/// An ordered, case-insensitive, multi-valued header collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpHeaders {
    fields: Vec<(String, Vec<String>)>,
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

impl HttpHeaders {
    /// Creates an empty collection.
    #[must_use]
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    fn position(&self, name: &str) -> Option<usize> {
        let name = normalize(name);
        self.fields.iter().position(|(n, _)| *n == name)
    }

    /// All values of `name`, in insertion order.
    #[must_use]
    pub fn get(&self, name: &str) -> &[String] {
        self.position(name)
            .map_or(&[][..], |i| self.fields[i].1.as_slice())
    }

    /// The first value of `name`.
    #[must_use]
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name).first().map(String::as_str)
    }

    /// Returns true if `name` has at least one value.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Field names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    /// Number of distinct field names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if there are no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Appends a value to `name`.
    pub fn add(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        let value = value.into();
        match self.position(name) {
            Some(i) => self.fields[i].1.push(value),
            None => self.fields.push((normalize(name), vec![value])),
        }
        self
    }

    /// Replaces every value of `name` with `value`.
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.set_all(name, vec![value.into()])
    }

    /// Replaces every value of `name`; an empty list removes the field.
    pub fn set_all(&mut self, name: &str, values: Vec<String>) -> &mut Self {
        if values.is_empty() {
            self.remove(name);
            return self;
        }
        match self.position(name) {
            Some(i) => self.fields[i].1 = values,
            None => self.fields.push((normalize(name), values)),
        }
        self
    }

    /// Sets `name` and moves it to the front of the collection.
    pub fn set_first(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.remove(name);
        self.fields.insert(0, (normalize(name), vec![value.into()]));
        self
    }

    /// Sets `name` unless it already has a value.
    pub fn set_if_missing(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        if !self.contains(name) {
            self.set(name, value);
        }
        self
    }

    /// Removes `name`, returning its values.
    pub fn remove(&mut self, name: &str) -> Vec<String> {
        self.position(name)
            .map(|i| self.fields.remove(i).1)
            .unwrap_or_default()
    }

    /// Values of `name` split on commas, trimmed, blanks dropped.
    #[must_use]
    pub fn comma_separated_values(&self, name: &str) -> Vec<String> {
        self.get(name)
            .iter()
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// Returns true if a comma-separated value of `name` equals `token`,
    /// ignoring ASCII case.
    #[must_use]
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.comma_separated_values(name)
            .iter()
            .any(|v| v.eq_ignore_ascii_case(token))
    }

    /// Appends the header block, including the terminating empty line.
    pub fn write_to(&self, generator: &ByteGeneratorContext) {
        generator.put_latin1(&self.to_string());
    }

    /// Reads a header block terminated by an empty line.
    ///
    /// Fails with `LimitExceeded` if the block is `limit` bytes or longer and
    /// with `StreamTruncated` on EOF.
    pub async fn read(parser: &ByteParserContext, limit: usize) -> Result<Self> {
        let mut block = BlockParser::new(limit);
        loop {
            if !parser.has_remaining() && !parser.read_more().await? {
                return Err(Error::truncated("EOF before headers ends"));
            }
            let chunk = parser.take(usize::MAX);
            for (i, &byte) in chunk.iter().enumerate() {
                if block.feed(byte)? {
                    parser.push_back(&chunk[i + 1..]);
                    return Ok(block.headers);
                }
            }
        }
    }
}

impl fmt::Display for HttpHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, values) in &self.fields {
            let name = capitalized_name(name);
            for value in values {
                write!(f, "{name}: {value}\r\n")?;
            }
        }
        f.write_str("\r\n")
    }
}

impl<N: AsRef<str>, V: Into<String>> FromIterator<(N, V)> for HttpHeaders {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.add(name.as_ref(), value);
        }
        headers
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    LineStart,
    Name,
    Value,
    ValueAfterCr,
    EndAfterCr,
    LineSkip,
    LineSkipAfterCr,
}

struct BlockParser {
    headers: HttpHeaders,
    current: String,
    name: Option<String>,
    size: usize,
    limit: usize,
    state: BlockState,
}

const fn is_lwsp(c: u8) -> bool {
    c == b' ' || c == b'\t'
}

const fn is_field_name_char(c: u8) -> bool {
    c > b' ' && c < 0x7f && c != b':'
}

impl BlockParser {
    const fn new(limit: usize) -> Self {
        Self {
            headers: HttpHeaders::new(),
            current: String::new(),
            name: None,
            size: 0,
            limit,
            state: BlockState::LineStart,
        }
    }

    /// Consumes one byte; returns true once the empty line was read.
    fn feed(&mut self, c: u8) -> Result<bool> {
        if self.size + 1 >= self.limit {
            return Err(Error::limit(format!(
                "The headers total size is more than {}",
                self.limit
            )));
        }
        self.size += 1;
        self.step(c)
    }

    fn step(&mut self, c: u8) -> Result<bool> {
        match self.state {
            BlockState::LineStart => {
                if is_lwsp(c) {
                    self.state = if self.name.is_some() {
                        BlockState::Value
                    } else {
                        BlockState::LineSkip
                    };
                    return self.step(c);
                }
                if let Some(name) = self.name.take() {
                    self.headers.add(&name, self.current.trim());
                }
                self.current.clear();
                if c == b'\r' {
                    self.state = BlockState::EndAfterCr;
                    return Ok(false);
                }
                self.state = BlockState::Name;
                self.step(c)
            }
            BlockState::Name => {
                if c == b':' {
                    if self.current.is_empty() {
                        return Err(Error::protocol("Empty header is encountered"));
                    }
                    self.name = Some(std::mem::take(&mut self.current));
                    self.state = BlockState::Value;
                } else if is_field_name_char(c) {
                    self.current.push(char::from(c));
                } else {
                    return Err(Error::protocol(format!(
                        "Invalid header name character is encountered: {c}"
                    )));
                }
                Ok(false)
            }
            BlockState::Value => {
                if c == b'\r' {
                    self.state = BlockState::ValueAfterCr;
                } else {
                    self.current.push(char::from(c));
                }
                Ok(false)
            }
            BlockState::ValueAfterCr => {
                if c != b'\n' {
                    return Err(Error::protocol(format!(
                        "CR must be followed by LF in header: {}",
                        self.name.as_deref().unwrap_or_default()
                    )));
                }
                self.state = BlockState::LineStart;
                Ok(false)
            }
            BlockState::EndAfterCr => {
                if c == b'\n' {
                    Ok(true)
                } else {
                    Err(Error::protocol("CR must be followed by LF after headers"))
                }
            }
            BlockState::LineSkip => {
                if c == b'\r' {
                    self.state = BlockState::LineSkipAfterCr;
                }
                Ok(false)
            }
            BlockState::LineSkipAfterCr => {
                if c != b'\n' {
                    return Err(Error::protocol("CR must be followed by LF in header"));
                }
                self.state = BlockState::LineStart;
                Ok(false)
            }
        }
    }
}

/// `content-length` → `Content-Length`.
#[must_use]
pub fn capitalized_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        upper = c == '-';
    }
    out
}

/// Parses `Content-Length`; repeated values must agree.
pub fn content_length(headers: &HttpHeaders) -> Result<Option<u64>> {
    let mut length = None;
    for value in headers.comma_separated_values(CONTENT_LENGTH) {
        let parsed: u64 = value
            .parse()
            .map_err(|_| Error::protocol(format!("Invalid Content-Length: {value}")))?;
        match length {
            Some(previous) if previous != parsed => {
                return Err(Error::protocol(format!(
                    "Conflicting Content-Length values: {previous} and {parsed}"
                )));
            }
            _ => length = Some(parsed),
        }
    }
    Ok(length)
}

/// Parses `Transfer-Encoding`.
pub fn transfer_encodings(headers: &HttpHeaders) -> Result<Vec<TransferEncoding>> {
    TransferEncoding::parse(headers.get(TRANSFER_ENCODING))
}

/// Returns true if the message lets the connection carry another exchange.
#[must_use]
pub fn keeps_alive(version: Version, headers: &HttpHeaders) -> bool {
    match version {
        Version::Http10 => headers.has_token(CONNECTION, CONNECTION_KEEP_ALIVE),
        Version::Http11 => !headers.has_token(CONNECTION, CONNECTION_CLOSE),
    }
}

/// Writes the `Connection` header announcing whether the exchange is last.
pub fn set_last_message_header(headers: &mut HttpHeaders, version: Version, last: bool) {
    match (version, last) {
        (Version::Http11, true) => {
            headers.set(CONNECTION, CONNECTION_CLOSE);
        }
        (Version::Http10, false) => {
            headers.set(CONNECTION, CONNECTION_KEEP_ALIVE);
        }
        _ => {}
    }
}

/// Writes `Content-Length` or `Transfer-Encoding` for the chosen framing.
pub fn set_message_body_headers(
    headers: &mut HttpHeaders,
    encodings: &[TransferEncoding],
    length: Option<u64>,
) {
    if let Some(length) = length {
        headers.set(CONTENT_LENGTH, length.to_string());
    } else if !encodings.is_empty() {
        headers.set(TRANSFER_ENCODING, list_value(encodings));
    }
}

/// Joins values with `", "`.
#[must_use]
pub fn list_value<T: fmt::Display>(values: &[T]) -> String {
    let mut out = String::new();
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{value}");
    }
    out
}

/// Formats an IMF-fixdate for the `Date` header.
#[must_use]
pub fn format_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::io::{AOutput, BoxInput, buffered_pipe};
    use crate::types::ACloseable;
    use crate::test_utils::run_on_vat;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    fn parse(text: &'static [u8], limit: usize) -> Result<(HttpHeaders, Vec<u8>)> {
        run_on_vat(async move {
            let (input, output) = buffered_pipe(1024);
            output.write(text.to_vec()).await?;
            output.close().await?;
            let parser = ByteParserContext::new(Arc::new(input) as BoxInput, 64);
            let headers = HttpHeaders::read(&parser, limit).await?;
            let rest = parser.take(usize::MAX);
            Ok((headers, rest))
        })
    }

    #[test]
    fn names_are_case_insensitive_and_ordered() {
        init_test("names_are_case_insensitive_and_ordered");
        let mut headers = HttpHeaders::new();
        headers.add("Host", "a").add("X-Test", "1").add("x-test", "2");
        assert_eq!(headers.get("X-TEST"), ["1", "2"]);
        assert_eq!(headers.names().collect::<Vec<_>>(), ["host", "x-test"]);
        headers.set_first("Date", "now");
        assert_eq!(headers.names().next(), Some("date"));
        headers.set_if_missing("host", "b");
        assert_eq!(headers.first("host"), Some("a"));
        assert_eq!(headers.remove("X-Test"), ["1", "2"]);
        assert!(!headers.contains("x-test"));
        crate::test_complete!("names_are_case_insensitive_and_ordered");
    }

    #[test]
    fn comma_values_split_and_trim() {
        init_test("comma_values_split_and_trim");
        let headers: HttpHeaders = [("Connection", "keep-alive, , Upgrade"), ("Connection", "TE")]
            .into_iter()
            .collect();
        assert_eq!(
            headers.comma_separated_values(CONNECTION),
            ["keep-alive", "Upgrade", "TE"]
        );
        assert!(headers.has_token(CONNECTION, "upgrade"));
        crate::test_complete!("comma_values_split_and_trim");
    }

    #[test]
    fn writer_capitalizes_names() {
        init_test("writer_capitalizes_names");
        let headers: HttpHeaders = [("content-length", "5"), ("x-a", "1"), ("x-a", "2")]
            .into_iter()
            .collect();
        assert_eq!(
            headers.to_string(),
            "Content-Length: 5\r\nX-A: 1\r\nX-A: 2\r\n\r\n"
        );
        crate::test_complete!("writer_capitalizes_names");
    }

    #[test]
    fn block_parser_reads_fields_and_leaves_body() {
        init_test("block_parser_reads_fields_and_leaves_body");
        let (headers, rest) = parse(
            b"Host: example.com\r\nX-Fold: a\r\n  b\r\nEmpty:\r\n\r\nBODY",
            1024,
        )
        .expect("parse");
        assert_eq!(headers.first("host"), Some("example.com"));
        assert_eq!(headers.first("x-fold"), Some("a  b"));
        assert_eq!(headers.first("empty"), Some(""));
        assert_eq!(rest, b"BODY");
        crate::test_complete!("block_parser_reads_fields_and_leaves_body");
    }

    #[test]
    fn block_parser_rejects_bad_input() {
        init_test("block_parser_rejects_bad_input");
        let kind = |text: &'static [u8], limit| parse(text, limit).map(|_| ()).map_err(|e| e.kind());
        assert_eq!(kind(b": x\r\n\r\n", 1024), Err(ErrorKind::Protocol));
        assert_eq!(kind(b"Bad Name: x\r\n\r\n", 1024), Err(ErrorKind::Protocol));
        assert_eq!(kind(b"A: x\rB\r\n\r\n", 1024), Err(ErrorKind::Protocol));
        assert_eq!(kind(b"A: x\r\n", 1024), Err(ErrorKind::StreamTruncated));
        assert_eq!(kind(b"A: 0123456789\r\n\r\n", 10), Err(ErrorKind::LimitExceeded));
        crate::test_complete!("block_parser_rejects_bad_input");
    }

    #[test]
    fn content_length_values_must_agree() {
        init_test("content_length_values_must_agree");
        let same: HttpHeaders = [("Content-Length", "5, 5")].into_iter().collect();
        assert_eq!(content_length(&same).expect("same"), Some(5));
        let different: HttpHeaders = [("Content-Length", "5"), ("Content-Length", "6")]
            .into_iter()
            .collect();
        assert!(content_length(&different).is_err());
        let negative: HttpHeaders = [("Content-Length", "-1")].into_iter().collect();
        assert!(content_length(&negative).is_err());
        assert_eq!(content_length(&HttpHeaders::new()).expect("none"), None);
        crate::test_complete!("content_length_values_must_agree");
    }

    #[test]
    fn connection_reuse_rules() {
        init_test("connection_reuse_rules");
        let empty = HttpHeaders::new();
        let close: HttpHeaders = [("Connection", "Close")].into_iter().collect();
        let keep: HttpHeaders = [("Connection", "Keep-Alive")].into_iter().collect();
        assert!(keeps_alive(Version::Http11, &empty));
        assert!(!keeps_alive(Version::Http11, &close));
        assert!(!keeps_alive(Version::Http10, &empty));
        assert!(keeps_alive(Version::Http10, &keep));

        let mut headers = HttpHeaders::new();
        set_last_message_header(&mut headers, Version::Http11, true);
        assert_eq!(headers.first(CONNECTION), Some("close"));
        let mut headers = HttpHeaders::new();
        set_last_message_header(&mut headers, Version::Http10, false);
        assert_eq!(headers.first(CONNECTION), Some("keep-alive"));
        crate::test_complete!("connection_reuse_rules");
    }

    #[test]
    fn date_is_imf_fixdate() {
        init_test("date_is_imf_fixdate");
        let time = Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).single().expect("time");
        assert_eq!(format_date(time), "Sun, 06 Nov 1994 08:49:37 GMT");
        crate::test_complete!("date_is_imf_fixdate");
    }
}
