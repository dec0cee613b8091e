//! Draining a stream.

use super::AStream;
use crate::promise::Promise;
use crate::runtime::spawn_default;

/// Feeds every element of `stream` to `f` until EOF or until `f` resolves to
/// `false`. A failed read or a failed `f` fails the returned promise.
pub fn consume<T, S, F>(stream: S, mut f: F) -> Promise<()>
where
    T: Clone + Send + 'static,
    S: AStream<T> + 'static,
    F: FnMut(T) -> Promise<bool> + Send + 'static,
{
    spawn_default(async move {
        while let Some(item) = stream.next().await? {
            if !Promise::now(|| f(item)).await? {
                break;
            }
        }
        Ok(())
    })
}

/// Reads `stream` to EOF, collecting its elements in order.
pub fn collect<T, S>(stream: S) -> Promise<Vec<T>>
where
    T: Clone + Send + 'static,
    S: AStream<T> + 'static,
{
    spawn_default(async move {
        let mut items = Vec::new();
        while let Some(item) = stream.next().await? {
            items.push(item);
        }
        Ok(items)
    })
}
