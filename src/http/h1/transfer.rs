//! `Transfer-Encoding` values.

use crate::error::{Error, Result};
use std::fmt;

/// The `chunked` coding name.
pub const CHUNKED: &str = "chunked";

/// One transfer coding with its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEncoding {
    name: String,
    parameters: Vec<(String, String)>,
}

impl TransferEncoding {
    /// A coding without parameters. The name is lowercased.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_ascii_lowercase(),
            parameters: Vec::new(),
        }
    }

    /// The `chunked` coding.
    #[must_use]
    pub fn chunked() -> Self {
        Self::new(CHUNKED)
    }

    /// Lowercased coding name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameters in header order; quoted values keep their quotes.
    #[must_use]
    pub fn parameters(&self) -> &[(String, String)] {
        &self.parameters
    }

    /// Parses every coding listed by a set of header values.
    ///
    /// Grammar: `token *( OWS ";" OWS token OWS "=" OWS ( token / quoted-string ) )`,
    /// comma separated, empty list elements allowed.
    pub fn parse<S: AsRef<str>>(values: &[S]) -> Result<Vec<Self>> {
        let mut encodings = Vec::new();
        for value in values {
            let mut cursor = Cursor::new(value.as_ref());
            loop {
                loop {
                    cursor.ows();
                    if !cursor.try_char(b',') {
                        break;
                    }
                }
                if !cursor.has_next() {
                    break;
                }
                encodings.push(Self::parse_value(&mut cursor)?);
            }
        }
        Ok(encodings)
    }

    fn parse_value(cursor: &mut Cursor<'_>) -> Result<Self> {
        let mut encoding = Self::new(cursor.token()?);
        cursor.ows();
        while cursor.try_char(b';') {
            cursor.ows();
            let key = cursor.token()?.to_ascii_lowercase();
            cursor.ows();
            cursor.expect_char(b'=')?;
            cursor.ows();
            let value = cursor.token_or_string()?.to_owned();
            cursor.ows();
            encoding.parameters.push((key, value));
        }
        if cursor.has_next() && cursor.peek() != Some(b',') {
            return Err(cursor.error("',' or ';' is expected"));
        }
        Ok(encoding)
    }

    /// Returns true if the last coding is `chunked`.
    #[must_use]
    pub fn is_chunked(encodings: &[Self]) -> bool {
        encodings.last().is_some_and(|e| e.name == CHUNKED)
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for (key, value) in &self.parameters {
            write!(f, ";{key}={value}")?;
        }
        Ok(())
    }
}

/// Returns true for RFC 7230 `tchar`.
#[must_use]
pub const fn is_token_char(c: u8) -> bool {
    matches!(
        c,
        b'!' | b'#'
            | b'$'
            | b'%'
            | b'&'
            | b'\''
            | b'*'
            | b'+'
            | b'-'
            | b'.'
            | b'^'
            | b'_'
            | b'`'
            | b'|'
            | b'~'
    ) || c.is_ascii_alphanumeric()
}

struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    const fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.text.as_bytes().get(self.pos).copied()
    }

    const fn has_next(&self) -> bool {
        self.pos < self.text.len()
    }

    fn error(&self, what: &str) -> Error {
        Error::protocol(format!("{what} at {}: {}", self.pos, self.text))
    }

    fn ows(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t')) {
            self.pos += 1;
        }
    }

    fn try_char(&mut self, c: u8) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_char(&mut self, c: u8) -> Result<()> {
        if self.try_char(c) {
            Ok(())
        } else {
            Err(self.error(&format!("'{}' is expected", char::from(c))))
        }
    }

    fn try_token(&mut self) -> Option<&'a str> {
        let start = self.pos;
        while self.peek().is_some_and(is_token_char) {
            self.pos += 1;
        }
        (self.pos != start).then(|| &self.text[start..self.pos])
    }

    fn token(&mut self) -> Result<&'a str> {
        self.try_token().ok_or_else(|| self.error("token is expected"))
    }

    fn try_string(&mut self) -> Result<Option<&'a str>> {
        if self.peek() != Some(b'"') {
            return Ok(None);
        }
        let start = self.pos;
        self.pos += 1;
        let bytes = self.text.as_bytes();
        while let Some(c) = self.peek() {
            match c {
                b'"' => {
                    self.pos += 1;
                    return Ok(Some(&self.text[start..self.pos]));
                }
                b'\\' => {
                    if self.pos + 1 >= bytes.len() {
                        return Err(self.error("EOF on escape"));
                    }
                    self.pos += 2;
                }
                c if c == b'\t' || (c >= b' ' && c != 0x7f) => self.pos += 1,
                _ => return Err(self.error("Unexpected character in the string")),
            }
        }
        Err(self.error("Unterminated string"))
    }

    fn token_or_string(&mut self) -> Result<&'a str> {
        if let Some(token) = self.try_token() {
            return Ok(token);
        }
        self.try_string()?
            .ok_or_else(|| self.error("token or string are expected"))
    }
}
