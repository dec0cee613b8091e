use super::{AChannel, BoxInput, BoxOutput};
use crate::promise::Promise;
use crate::runtime::spawn_default;
use crate::types::ACloseable;
use std::fmt;

/// A channel assembled from an independent input and output.
///
/// Closing the channel closes both halves; the first failure wins.
#[derive(Clone)]
pub struct SimpleChannel {
    input: BoxInput,
    output: BoxOutput,
}

impl SimpleChannel {
    /// Pairs `input` and `output`.
    #[must_use]
    pub fn new(input: BoxInput, output: BoxOutput) -> Self {
        Self { input, output }
    }
}

impl AChannel for SimpleChannel {
    fn input(&self) -> BoxInput {
        self.input.clone()
    }

    fn output(&self) -> BoxOutput {
        self.output.clone()
    }
}

impl ACloseable for SimpleChannel {
    fn close(&self) -> Promise<()> {
        let input = self.input.close();
        let output = self.output.close();
        spawn_default(async move {
            let input = input.await;
            let output = output.await;
            input.and(output)
        })
    }
}

impl fmt::Debug for SimpleChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleChannel").finish_non_exhaustive()
    }
}
