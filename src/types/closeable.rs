//! The close capability.

use crate::promise::Promise;

/// An asynchronous resource that can be closed.
///
/// Closing is idempotent: closing twice resolves the second call without
/// repeating side effects. Operations issued after close fail with a
/// [`Closed`](crate::ErrorKind::Closed) error instead of hanging.
pub trait ACloseable: Send + Sync {
    /// Starts closing the resource; the promise resolves once it is closed.
    fn close(&self) -> Promise<()>;
}

impl<C: ACloseable + ?Sized> ACloseable for std::sync::Arc<C> {
    fn close(&self) -> Promise<()> {
        (**self).close()
    }
}
