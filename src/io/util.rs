//! Whole-stream helpers.

use super::{AInput, AOutput};
use crate::promise::Promise;
use crate::runtime::spawn_default;

/// Default read size used by [`copy`], [`read_all`] and [`discard`].
pub const DEFAULT_CHUNK: usize = 4096;

/// Copies `input` to `output` until EOF, returning the number of bytes.
///
/// Neither side is closed.
pub fn copy<I, O>(input: I, output: O, chunk: usize) -> Promise<u64>
where
    I: AInput + 'static,
    O: AOutput + 'static,
{
    spawn_default(async move {
        let mut total = 0u64;
        while let Some(data) = input.read(chunk).await? {
            total += data.len() as u64;
            output.write(data).await?;
        }
        Ok(total)
    })
}

/// Reads `input` to EOF.
pub fn read_all<I: AInput + 'static>(input: I) -> Promise<Vec<u8>> {
    spawn_default(async move {
        let mut collected = Vec::new();
        while let Some(data) = input.read(DEFAULT_CHUNK).await? {
            collected.extend_from_slice(&data);
        }
        Ok(collected)
    })
}

/// Reads `input` to EOF, dropping the data. Resolves to the number of bytes.
pub fn discard<I: AInput + 'static>(input: I) -> Promise<u64> {
    spawn_default(async move {
        let mut total = 0u64;
        while let Some(data) = input.read(DEFAULT_CHUNK).await? {
            total += data.len() as u64;
        }
        Ok(total)
    })
}
