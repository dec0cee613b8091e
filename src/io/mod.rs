//! Asynchronous byte I/O.
//!
//! [`AInput`], [`AOutput`] and [`AChannel`] are the boundary between the
//! promise runtime and anything that moves bytes: sockets, in-memory pipes,
//! HTTP message bodies. Adapters in this module compose over those traits.
//!
//! # Buffers
//!
//! Reads return owned `Vec<u8>` chunks; `None` marks EOF. Writes take
//! ownership of the chunk. Protocol code layers [`ByteParserContext`] and
//! [`ByteGeneratorContext`] on top to parse lines and batch small writes.

mod channel;
pub mod codec;
mod counting;
mod generator;
mod parser;
mod pipe;
mod traits;
mod util;

pub use channel::SimpleChannel;
pub use codec::{ContentCoding, DecodingInput, EncodingOutput};
pub use counting::{CountingInput, CountingOutput, StreamFinishedEvent};
pub use generator::ByteGeneratorContext;
pub use parser::{ByteParserContext, DEFAULT_BUFFER_SIZE, latin1};
pub use pipe::{PipeInput, PipeOutput, buffered_pipe, channel_pair};
pub use traits::{AChannel, AInput, AOutput, BoxChannel, BoxInput, BoxOutput};
pub use util::{DEFAULT_CHUNK, copy, discard, read_all};
