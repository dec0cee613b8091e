//! Content codings.
//!
//! Decoding inputs and encoding outputs for the `gzip` (`x-gzip`) and
//! `deflate` codings, built on the `flate2` write-side codecs: compressed
//! bytes are written into the codec and the produced bytes drained from its
//! `Vec<u8>` sink.
//!
//! `deflate` is the zlib format, as HTTP defines it.

use super::{AInput, AOutput, BoxInput, BoxOutput};
use crate::error::{Error, Result};
use crate::promise::Promise;
use crate::runtime::spawn_default;
use crate::types::ACloseable;
use flate2::Compression;
use flate2::write::{GzDecoder, GzEncoder, ZlibDecoder, ZlibEncoder};
use parking_lot::Mutex;
use std::fmt;
use std::io::Write;
use std::sync::Arc;

/// A supported compression coding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentCoding {
    /// `gzip` or `x-gzip`.
    Gzip,
    /// `deflate` (zlib).
    Deflate,
}

impl ContentCoding {
    /// Looks up a coding by its case-insensitive token.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("gzip") || name.eq_ignore_ascii_case("x-gzip") {
            Some(Self::Gzip)
        } else if name.eq_ignore_ascii_case("deflate") {
            Some(Self::Deflate)
        } else {
            None
        }
    }

    /// The canonical token.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Deflate => "deflate",
        }
    }

    /// Wraps `input` so that it yields decoded bytes.
    #[must_use]
    pub fn decode(self, input: BoxInput) -> BoxInput {
        Arc::new(DecodingInput::new(input, self))
    }

    /// Wraps `output` so that written bytes are encoded.
    #[must_use]
    pub fn encode(self, output: BoxOutput) -> BoxOutput {
        Arc::new(EncodingOutput::new(output, self))
    }
}

impl fmt::Display for ContentCoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

enum Decoder {
    Gzip(GzDecoder<Vec<u8>>),
    Zlib(ZlibDecoder<Vec<u8>>),
}

impl Decoder {
    fn new(coding: ContentCoding) -> Self {
        match coding {
            ContentCoding::Gzip => Self::Gzip(GzDecoder::new(Vec::new())),
            ContentCoding::Deflate => Self::Zlib(ZlibDecoder::new(Vec::new())),
        }
    }

    fn feed(&mut self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        match self {
            Self::Gzip(d) => {
                d.write_all(data)?;
                Ok(std::mem::take(d.get_mut()))
            }
            Self::Zlib(d) => {
                d.write_all(data)?;
                Ok(std::mem::take(d.get_mut()))
            }
        }
    }

    fn finish(&mut self) -> std::io::Result<Vec<u8>> {
        match self {
            Self::Gzip(d) => {
                d.try_finish()?;
                Ok(std::mem::take(d.get_mut()))
            }
            Self::Zlib(d) => {
                d.try_finish()?;
                Ok(std::mem::take(d.get_mut()))
            }
        }
    }
}

struct DecodeState {
    decoder: Decoder,
    decoded: Vec<u8>,
    eof: bool,
    closed: bool,
}

/// Input yielding the decoded form of a compressed input.
pub struct DecodingInput {
    input: BoxInput,
    coding: ContentCoding,
    state: Arc<Mutex<DecodeState>>,
}

impl DecodingInput {
    /// Decodes `input` with `coding`.
    #[must_use]
    pub fn new(input: BoxInput, coding: ContentCoding) -> Self {
        Self {
            input,
            coding,
            state: Arc::new(Mutex::new(DecodeState {
                decoder: Decoder::new(coding),
                decoded: Vec::new(),
                eof: false,
                closed: false,
            })),
        }
    }
}

fn corrupt(coding: ContentCoding, error: &std::io::Error) -> Error {
    Error::protocol(format!("Invalid {coding} data: {error}"))
}

impl AInput for DecodingInput {
    fn read(&self, limit: usize) -> Promise<Option<Vec<u8>>> {
        let input = self.input.clone();
        let state = Arc::clone(&self.state);
        let coding = self.coding;
        spawn_default(async move {
            loop {
                {
                    let mut st = state.lock();
                    if st.closed {
                        return Err(Error::closed("The stream is closed"));
                    }
                    if !st.decoded.is_empty() {
                        let count = limit.min(st.decoded.len());
                        return Ok(Some(st.decoded.drain(..count).collect()));
                    }
                    if st.eof {
                        return Ok(None);
                    }
                }
                let chunk = input.read(super::util::DEFAULT_CHUNK).await?;
                let mut st = state.lock();
                let produced = match &chunk {
                    Some(data) => st.decoder.feed(data),
                    None => {
                        st.eof = true;
                        st.decoder.finish()
                    }
                };
                let produced = produced.map_err(|e| corrupt(coding, &e))?;
                st.decoded.extend(produced);
            }
        })
    }
}

impl ACloseable for DecodingInput {
    fn close(&self) -> Promise<()> {
        {
            let mut state = self.state.lock();
            state.closed = true;
            state.decoded.clear();
        }
        self.input.close()
    }
}

impl fmt::Debug for DecodingInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodingInput")
            .field("coding", &self.coding)
            .finish_non_exhaustive()
    }
}

enum Encoder {
    Gzip(GzEncoder<Vec<u8>>),
    Zlib(ZlibEncoder<Vec<u8>>),
}

impl Encoder {
    fn new(coding: ContentCoding) -> Self {
        match coding {
            ContentCoding::Gzip => Self::Gzip(GzEncoder::new(Vec::new(), Compression::default())),
            ContentCoding::Deflate => {
                Self::Zlib(ZlibEncoder::new(Vec::new(), Compression::default()))
            }
        }
    }

    fn feed(&mut self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        match self {
            Self::Gzip(e) => {
                e.write_all(data)?;
                Ok(std::mem::take(e.get_mut()))
            }
            Self::Zlib(e) => {
                e.write_all(data)?;
                Ok(std::mem::take(e.get_mut()))
            }
        }
    }

    fn sync_flush(&mut self) -> std::io::Result<Vec<u8>> {
        match self {
            Self::Gzip(e) => {
                e.flush()?;
                Ok(std::mem::take(e.get_mut()))
            }
            Self::Zlib(e) => {
                e.flush()?;
                Ok(std::mem::take(e.get_mut()))
            }
        }
    }

    fn finish(&mut self) -> std::io::Result<Vec<u8>> {
        match self {
            Self::Gzip(e) => {
                e.try_finish()?;
                Ok(std::mem::take(e.get_mut()))
            }
            Self::Zlib(e) => {
                e.try_finish()?;
                Ok(std::mem::take(e.get_mut()))
            }
        }
    }
}

struct EncodeState {
    encoder: Encoder,
    closed: bool,
}

/// Output compressing everything written to it.
///
/// Closing writes the coding trailer and closes the wrapped output.
pub struct EncodingOutput {
    output: BoxOutput,
    coding: ContentCoding,
    state: Arc<Mutex<EncodeState>>,
}

impl EncodingOutput {
    /// Encodes into `output` with `coding`.
    #[must_use]
    pub fn new(output: BoxOutput, coding: ContentCoding) -> Self {
        Self {
            output,
            coding,
            state: Arc::new(Mutex::new(EncodeState {
                encoder: Encoder::new(coding),
                closed: false,
            })),
        }
    }

    fn step(&self, op: impl FnOnce(&mut Encoder) -> std::io::Result<Vec<u8>>) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::closed("The output stream is closed"));
        }
        op(&mut state.encoder).map_err(Error::from)
    }
}

fn forward(output: BoxOutput, produced: Result<Vec<u8>>) -> Promise<()> {
    match produced {
        Ok(data) if data.is_empty() => Promise::void(),
        Ok(data) => output.write(data),
        Err(error) => Promise::failure(error),
    }
}

impl AOutput for EncodingOutput {
    fn write(&self, data: Vec<u8>) -> Promise<()> {
        forward(self.output.clone(), self.step(|e| e.feed(&data)))
    }

    fn flush(&self) -> Promise<()> {
        let output = self.output.clone();
        forward(self.output.clone(), self.step(Encoder::sync_flush))
            .flat_map(move |()| output.flush())
    }
}

impl ACloseable for EncodingOutput {
    fn close(&self) -> Promise<()> {
        let tail = {
            let mut state = self.state.lock();
            if state.closed {
                return Promise::void();
            }
            state.closed = true;
            state.encoder.finish().map_err(Error::from)
        };
        let output = self.output.clone();
        forward(self.output.clone(), tail).flat_map_outcome(move |written| {
            output.close().map_outcome(move |closed| match written {
                crate::types::Outcome::Failure(error) => crate::types::Outcome::Failure(error),
                crate::types::Outcome::Success(()) => closed,
            })
        })
    }
}

impl fmt::Debug for EncodingOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodingOutput")
            .field("coding", &self.coding)
            .field("closed", &self.state.lock().closed)
            .finish()
    }
}
