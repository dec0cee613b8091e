//! FIFO mutual exclusion for asynchronous operations.
//!
//! A [`RequestQueue`] admits one asynchronous body at a time. Bodies are
//! admitted in the order their requests were submitted, and each holds the
//! queue until its promise resolves.
//!
//! # Suspend and resume
//!
//! The running body may [`suspend`](RequestQueue::suspend) itself: it keeps
//! the queue but parks until some other party calls
//! [`resume`](RequestQueue::resume). Only one suspension may be pending at a
//! time. Resuming with nobody parked is a no-op; wake-ups never accumulate.
//!
//! # Example
//!
//! ```ignore
//! use vatflow::sync::RequestQueue;
//!
//! let queue = RequestQueue::new();
//! let first = queue.run(|| write_header());
//! let second = queue.run(|| write_body()); // starts after `first` resolves
//! ```

use crate::error::Result;
use crate::promise::{Promise, Resolver};
use crate::runtime::spawn_default;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

#[derive(Default)]
struct QueueState {
    busy: bool,
    waiters: VecDeque<(u64, Resolver<()>)>,
    next_id: u64,
    suspended: Option<Resolver<()>>,
}

/// A FIFO mutual-exclusion and suspend/resume primitive.
#[derive(Clone, Default)]
pub struct RequestQueue {
    state: Arc<Mutex<QueueState>>,
}

impl RequestQueue {
    /// Creates an idle queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true while some body holds the queue.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.lock().busy
    }

    /// Reserves a place in the queue.
    ///
    /// The place is taken at call time; awaiting the returned future yields
    /// a guard once every earlier request has released the queue. Dropping
    /// the future gives the place up.
    #[must_use]
    pub fn acquire(&self) -> Acquire {
        let mut state = self.state.lock();
        let ticket = if !state.busy && state.waiters.is_empty() {
            state.busy = true;
            Ticket::Granted
        } else {
            let id = state.next_id;
            state.next_id += 1;
            let (promise, resolver) = Promise::pending();
            state.waiters.push_back((id, resolver));
            Ticket::Waiting { id, promise }
        };
        drop(state);
        Acquire {
            queue: self.clone(),
            ticket,
        }
    }

    fn release(&self) {
        let mut state = self.state.lock();
        if let Some((_, next)) = state.waiters.pop_front() {
            drop(state);
            next.success(());
        } else {
            state.busy = false;
        }
    }

    /// Runs `body` once the queue is free.
    pub fn run<T, F>(&self, body: F) -> Promise<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> Promise<T> + Send + 'static,
    {
        let ticket = self.acquire();
        spawn_default(async move {
            let _guard = ticket.await;
            Promise::now(body).await
        })
    }

    /// Runs a future once the queue is free.
    pub fn run_future<T, F>(&self, body: F) -> Promise<T>
    where
        T: Clone + Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let ticket = self.acquire();
        spawn_default(async move {
            let _guard = ticket.await;
            body.await
        })
    }

    /// Repeats `body` while it resolves to `true`, holding the queue throughout.
    pub fn run_seq_while<F>(&self, mut body: F) -> Promise<()>
    where
        F: FnMut() -> Promise<bool> + Send + 'static,
    {
        let ticket = self.acquire();
        spawn_default(async move {
            let _guard = ticket.await;
            while Promise::now(&mut body).await? {}
            Ok(())
        })
    }

    /// Repeats `body` until it resolves to a value, holding the queue throughout.
    pub fn run_seq_until_value<T, F>(&self, mut body: F) -> Promise<T>
    where
        T: Clone + Send + 'static,
        F: FnMut() -> Promise<Option<T>> + Send + 'static,
    {
        let ticket = self.acquire();
        spawn_default(async move {
            let _guard = ticket.await;
            loop {
                if let Some(value) = Promise::now(&mut body).await? {
                    return Ok(value);
                }
            }
        })
    }

    /// Parks the running body until [`resume`](Self::resume) is called.
    ///
    /// # Panics
    ///
    /// Panics if a suspension is already pending.
    pub fn suspend(&self) -> Promise<()> {
        let mut state = self.state.lock();
        assert!(state.suspended.is_none(), "Suspend is already in progress");
        let (promise, resolver) = Promise::pending();
        state.suspended = Some(resolver);
        promise
    }

    /// Suspends, then resolves to `true`; handy as a loop step.
    pub fn suspend_then_true(&self) -> Promise<bool> {
        self.suspend().then_value(true)
    }

    /// Suspends, then resolves to an empty optional; handy as a loop step.
    pub fn suspend_then_empty<T: Clone + Send + 'static>(&self) -> Promise<Option<T>> {
        self.suspend().then_value(None)
    }

    /// Wakes the pending suspension, if any.
    pub fn resume(&self) {
        let suspended = self.state.lock().suspended.take();
        if let Some(resolver) = suspended {
            resolver.success(());
        }
    }

    /// Returns true while a suspension is pending.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.state.lock().suspended.is_some()
    }
}

impl fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RequestQueue")
            .field("busy", &state.busy)
            .field("waiters", &state.waiters.len())
            .field("suspended", &state.suspended.is_some())
            .finish()
    }
}

enum Ticket {
    Granted,
    Waiting { id: u64, promise: Promise<()> },
    Done,
}

/// Future returned by [`RequestQueue::acquire`].
#[must_use = "a reserved place is released when the future is dropped"]
pub struct Acquire {
    queue: RequestQueue,
    ticket: Ticket,
}

impl Future for Acquire {
    type Output = RequestGuard;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let granted = match &mut this.ticket {
            Ticket::Granted => true,
            Ticket::Waiting { promise, .. } => Pin::new(promise).poll(cx).is_ready(),
            Ticket::Done => panic!("request queue ticket polled after completion"),
        };
        if granted {
            this.ticket = Ticket::Done;
            Poll::Ready(RequestGuard {
                queue: this.queue.clone(),
            })
        } else {
            Poll::Pending
        }
    }
}

impl Drop for Acquire {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.ticket, Ticket::Done) {
            Ticket::Done => {}
            Ticket::Granted => self.queue.release(),
            Ticket::Waiting { id, .. } => {
                let mut state = self.queue.state.lock();
                let position = state.waiters.iter().position(|(waiter, _)| *waiter == id);
                if let Some(position) = position {
                    state.waiters.remove(position);
                } else {
                    // Ownership was already handed to this ticket.
                    drop(state);
                    self.queue.release();
                }
            }
        }
    }
}

/// Exclusive hold on a [`RequestQueue`]; released on drop.
#[must_use = "the queue is released as soon as the guard is dropped"]
pub struct RequestGuard {
    queue: RequestQueue,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.queue.release();
    }
}

impl fmt::Debug for RequestGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestGuard").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::runtime::SingleThreadVat;

    fn init_test(test_name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(test_name);
    }

    #[test]
    fn bodies_never_overlap_and_finish_in_order() {
        init_test("bodies_never_overlap_and_finish_in_order");
        let log = SingleThreadVat::run_action(async {
            let queue = RequestQueue::new();
            let log = Arc::new(Mutex::new(Vec::new()));
            let mut gates = Vec::new();
            let mut done = Vec::new();
            for i in 0..4 {
                let (gate, opener) = Promise::<()>::pending();
                gates.push(opener);
                let log = Arc::clone(&log);
                done.push(queue.run(move || {
                    log.lock().push(format!("start {i}"));
                    let log = Arc::clone(&log);
                    gate.map(move |()| log.lock().push(format!("end {i}")))
                }));
            }
            // Open the gates in reverse; admission order still rules.
            for opener in gates.into_iter().rev() {
                opener.success(());
            }
            for promise in done {
                promise.await?;
            }
            let log = log.lock().clone();
            Ok::<_, Error>(log)
        })
        .expect("queue run");
        let expected: Vec<String> = (0..4)
            .flat_map(|i| [format!("start {i}"), format!("end {i}")])
            .collect();
        crate::assert_with_log!(log == expected, "strict alternation", expected, log);
        crate::test_complete!("bodies_never_overlap_and_finish_in_order");
    }

    #[test]
    fn suspend_parks_until_resume() {
        init_test("suspend_parks_until_resume");
        let result = SingleThreadVat::run_action(async {
            let queue = RequestQueue::new();
            let waiting = {
                let queue = queue.clone();
                queue.clone().run(move || queue.suspend_then_true())
            };
            let next = queue.run(|| Promise::value("after"));
            crate::runtime::spawn_default(async { Ok::<(), Error>(()) }).await?;
            assert!(!waiting.is_resolved());
            assert!(!next.is_resolved());
            queue.resume();
            queue.resume();
            Ok::<_, Error>((waiting.await?, next.await?))
        })
        .expect("suspend/resume");
        assert_eq!(result, (true, "after"));
        crate::test_complete!("suspend_parks_until_resume");
    }

    #[test]
    #[should_panic(expected = "Suspend is already in progress")]
    fn double_suspend_panics() {
        let queue = RequestQueue::new();
        let _first = queue.suspend();
        let _second = queue.suspend();
    }

    #[test]
    fn seq_loops_hold_the_queue() {
        init_test("seq_loops_hold_the_queue");
        let (count, value) = SingleThreadVat::run_action(async {
            let queue = RequestQueue::new();
            let counter = Arc::new(Mutex::new(0));
            let c = Arc::clone(&counter);
            let looped = queue.run_seq_while(move || {
                let mut n = c.lock();
                *n += 1;
                Promise::from_bool(*n < 5)
            });
            let mut attempts = 0;
            let found = queue.run_seq_until_value(move || {
                attempts += 1;
                Promise::value((attempts == 3).then_some(attempts))
            });
            looped.await?;
            let count = *counter.lock();
            Ok::<_, Error>((count, found.await?))
        })
        .expect("seq loops");
        assert_eq!(count, 5);
        assert_eq!(value, 3);
        crate::test_complete!("seq_loops_hold_the_queue");
    }

    #[test]
    fn dropped_ticket_gives_its_place_up() {
        init_test("dropped_ticket_gives_its_place_up");
        let queue = RequestQueue::new();
        let first = queue.acquire();
        let second = queue.acquire();
        let third = queue.acquire();
        drop(second);
        let guard = futures_lite::future::block_on(first);
        assert!(queue.is_running());
        drop(guard);
        let third_guard = futures_lite::future::block_on(third);
        assert!(queue.is_running());
        drop(third_guard);
        assert!(!queue.is_running());
        crate::test_complete!("dropped_ticket_gives_its_place_up");
    }
}
