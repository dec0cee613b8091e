//! Failure-preserving stream view.

use super::AStream;
use crate::promise::Promise;
use crate::types::{ACloseable, Outcome};
use std::marker::PhantomData;

/// Stream for [`AStreamExt::all`](super::AStreamExt::all).
///
/// Each element becomes an [`Outcome`]; a failed read is delivered as an
/// `Outcome::Failure` element instead of failing the `next` promise.
pub struct All<S, T> {
    stream: S,
    _item: PhantomData<fn(T)>,
}

impl<S, T> All<S, T> {
    pub(crate) fn new(stream: S) -> Self {
        Self {
            stream,
            _item: PhantomData,
        }
    }
}

impl<S, T> AStream<Outcome<T>> for All<S, T>
where
    S: AStream<T>,
    T: Clone + Send + 'static,
{
    fn next(&self) -> Promise<Option<Outcome<T>>> {
        self.stream.next().map_outcome(|read| {
            Outcome::Success(match read {
                Outcome::Success(Some(value)) => Some(Outcome::Success(value)),
                Outcome::Success(None) => None,
                Outcome::Failure(error) => Some(Outcome::Failure(error)),
            })
        })
    }
}

impl<S: ACloseable, T> ACloseable for All<S, T> {
    fn close(&self) -> Promise<()> {
        self.stream.close()
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::promise::Promise;
    use crate::stream::{AStream, AStreamExt, iter_stream};

    #[test]
    fn failures_become_elements() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("failures_become_elements");
        let stream = iter_stream(vec![1, 2, 3])
            .flat_map(|v| {
                if v == 2 {
                    Promise::<i32>::failure(Error::protocol("bad element"))
                } else {
                    Promise::value(v)
                }
            })
            .all();
        let mut seen = Vec::new();
        while let Some(item) = stream.next().outcome().unwrap().force().unwrap() {
            seen.push(item.is_success());
        }
        assert_eq!(seen, vec![true, false, true]);
        crate::test_complete!("failures_become_elements");
    }
}
