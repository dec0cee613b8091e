use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Future returned by [`yield_now`].
#[derive(Debug)]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Re-posts the calling task to the back of its vat queue, letting every
/// task queued before it run first.
#[must_use]
pub const fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::runtime::{SingleThreadVat, current, spawn};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn queued_tasks_run_before_yielding_task_resumes() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("queued_tasks_run_before_yielding_task_resumes");
        let log = Arc::new(Mutex::new(Vec::new()));
        let inner_log = Arc::clone(&log);
        SingleThreadVat::run_action(async move {
            let vat = current().expect("on vat");
            let other_log = Arc::clone(&inner_log);
            let other = spawn(&vat, async move {
                other_log.lock().push("other");
                Ok::<_, Error>(())
            });
            inner_log.lock().push("before yield");
            yield_now().await;
            inner_log.lock().push("after yield");
            other.await
        })
        .expect("yield");
        assert_eq!(*log.lock(), vec!["before yield", "other", "after yield"]);
        crate::test_complete!("queued_tasks_run_before_yielding_task_resumes");
    }
}
