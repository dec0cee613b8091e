//! Byte stream capabilities.

use crate::promise::Promise;
use crate::types::ACloseable;
use std::sync::Arc;

/// Asynchronous byte source.
///
/// At most one `read` is outstanding at a time; callers sequence reads the
/// same way they sequence [`AStream::next`](crate::stream::AStream::next).
pub trait AInput: ACloseable {
    /// Reads up to `limit` bytes.
    ///
    /// Resolves to `None` at EOF. A successful read of a non-zero `limit`
    /// never yields an empty buffer.
    fn read(&self, limit: usize) -> Promise<Option<Vec<u8>>>;
}

/// Asynchronous byte sink.
pub trait AOutput: ACloseable {
    /// Writes all of `data`; resolves once the bytes were accepted.
    fn write(&self, data: Vec<u8>) -> Promise<()>;

    /// Resolves once previously written bytes reached the underlying target.
    fn flush(&self) -> Promise<()>;
}

/// A bidirectional byte channel, such as a connected socket.
pub trait AChannel: ACloseable {
    /// The read half.
    fn input(&self) -> BoxInput;

    /// The write half.
    fn output(&self) -> BoxOutput;
}

/// Shared, type-erased input.
pub type BoxInput = Arc<dyn AInput>;

/// Shared, type-erased output.
pub type BoxOutput = Arc<dyn AOutput>;

/// Shared, type-erased channel.
pub type BoxChannel = Arc<dyn AChannel>;

impl<I: AInput + ?Sized> AInput for Arc<I> {
    fn read(&self, limit: usize) -> Promise<Option<Vec<u8>>> {
        (**self).read(limit)
    }
}

impl<O: AOutput + ?Sized> AOutput for Arc<O> {
    fn write(&self, data: Vec<u8>) -> Promise<()> {
        (**self).write(data)
    }

    fn flush(&self) -> Promise<()> {
        (**self).flush()
    }
}

impl<C: AChannel + ?Sized> AChannel for Arc<C> {
    fn input(&self) -> BoxInput {
        (**self).input()
    }

    fn output(&self) -> BoxOutput {
        (**self).output()
    }
}
