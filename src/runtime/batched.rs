//! Lock-free task queue shared by the vat implementations.

use super::vat::Task;
use crossbeam_queue::SegQueue;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Unbounded multi-producer task queue drained by one owning thread.
pub(crate) struct TaskQueue {
    tasks: SegQueue<Task>,
    batch_size: usize,
}

impl TaskQueue {
    pub(crate) fn new(batch_size: usize) -> Self {
        Self {
            tasks: SegQueue::new(),
            batch_size: batch_size.max(1),
        }
    }

    pub(crate) fn push(&self, task: Task) {
        self.tasks.push(task);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Runs up to one batch of tasks. Panicking tasks are logged and skipped.
    pub(crate) fn run_batch(&self, vat_name: &str) -> usize {
        let mut ran = 0;
        while ran < self.batch_size {
            let Some(task) = self.tasks.pop() else {
                break;
            };
            ran += 1;
            if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
                let error = crate::error::Error::from_panic(payload.as_ref());
                tracing::error!(vat = vat_name, error = %error, "vat task panicked");
            }
        }
        ran
    }

    /// Drops every queued task without running it.
    pub(crate) fn clear(&self) -> usize {
        let mut dropped = 0;
        while self.tasks.pop().is_some() {
            dropped += 1;
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn batch_is_bounded_and_survives_panics() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("batch_is_bounded_and_survives_panics");
        let queue = TaskQueue::new(2);
        let hits = Arc::new(AtomicUsize::new(0));
        queue.push(Box::new(|| panic!("task failure")));
        for _ in 0..3 {
            let hits = Arc::clone(&hits);
            queue.push(Box::new(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(queue.run_batch("test"), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(queue.run_batch("test"), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(queue.is_empty());
        crate::test_complete!("batch_is_bounded_and_survives_panics");
    }
}
