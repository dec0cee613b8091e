//! Readiness driver behind the selector vats.
//!
//! [`IoDriver`] wraps a [`polling::Poller`] and a slab of registrations. Each
//! registration key doubles as the poller event key. Sources are registered
//! in oneshot mode: a delivered event disarms the source until its
//! [`IoSource`] re-arms interest.
//!
//! Readiness is collected under the driver locks and dispatched after they
//! are released, so a source may re-register or deregister from inside
//! [`IoSource::ready`].

#![allow(unsafe_code)]

use crate::error::Error;
use parking_lot::Mutex;
use polling::{Events, Poller};
use slab::Slab;
use std::io;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Readiness reported for one registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ready {
    /// The source can be read from (or accepted on).
    pub readable: bool,
    /// The source can be written to (or finished connecting).
    pub writable: bool,
}

/// A handle registered with an [`IoDriver`].
pub trait IoSource: Send + Sync {
    /// Delivers readiness.
    fn ready(&self, ready: Ready);

    /// Fails every pending wait of the source.
    fn fail(&self, error: &Error);

    /// Adds the source to a freshly created poller under `key`.
    fn reregister(&self, poller: &Poller, key: usize) -> io::Result<()>;
}

/// Poller plus registration table.
pub struct IoDriver {
    poller: Mutex<Arc<Poller>>,
    registrations: Mutex<Slab<Weak<dyn IoSource>>>,
    events: Mutex<Events>,
}

impl IoDriver {
    /// Creates a driver with a new poller.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poller: Mutex::new(Arc::new(Poller::new()?)),
            registrations: Mutex::new(Slab::new()),
            events: Mutex::new(Events::new()),
        })
    }

    /// The poller currently in use.
    #[must_use]
    pub fn poller(&self) -> Arc<Poller> {
        Arc::clone(&self.poller.lock())
    }

    /// Allocates a key and registers the source built for it.
    ///
    /// `make` receives the key and the current poller; it is expected to add
    /// its handle to the poller under that key.
    pub fn register<S, F>(&self, make: F) -> io::Result<Arc<S>>
    where
        S: IoSource + 'static,
        F: FnOnce(usize, &Poller) -> io::Result<Arc<S>>,
    {
        let mut registrations = self.registrations.lock();
        let entry = registrations.vacant_entry();
        let key = entry.key();
        let poller = self.poller();
        let source = make(key, &poller)?;
        let weak: Weak<dyn IoSource> = Arc::downgrade(&source) as Weak<dyn IoSource>;
        entry.insert(weak);
        Ok(source)
    }

    /// Forgets a registration. Unknown keys are ignored.
    pub fn deregister(&self, key: usize) {
        let mut registrations = self.registrations.lock();
        if registrations.contains(key) {
            registrations.remove(key);
        }
    }

    /// Number of live registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.lock().len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Interrupts a blocking [`turn`](Self::turn).
    pub fn notify(&self) -> io::Result<()> {
        self.poller().notify()
    }

    /// Waits for readiness at most `timeout` and dispatches it.
    ///
    /// Returns the number of events received.
    pub fn turn(&self, timeout: Option<Duration>) -> io::Result<usize> {
        let poller = self.poller();
        let ready: Vec<(usize, Ready)> = {
            let mut events = self.events.lock();
            events.clear();
            poller.wait(&mut events, timeout)?;
            events
                .iter()
                .map(|event| {
                    (
                        event.key,
                        Ready {
                            readable: event.readable,
                            writable: event.writable,
                        },
                    )
                })
                .collect()
        };
        let count = ready.len();
        let targets: Vec<(Arc<dyn IoSource>, Ready)> = {
            let registrations = self.registrations.lock();
            ready
                .into_iter()
                .filter_map(|(key, ready)| {
                    registrations
                        .get(key)
                        .and_then(Weak::upgrade)
                        .map(|source| (source, ready))
                })
                .collect()
        };
        for (source, ready) in targets {
            source.ready(ready);
        }
        Ok(count)
    }

    /// Fails every registered source.
    pub fn fail_all(&self, error: &Error) {
        let sources: Vec<Arc<dyn IoSource>> = self
            .registrations
            .lock()
            .iter()
            .filter_map(|(_, weak)| weak.upgrade())
            .collect();
        for source in sources {
            source.fail(error);
        }
    }

    /// Replaces the poller and re-registers every live source with it.
    pub fn rebuild(&self) -> io::Result<()> {
        let fresh = Arc::new(Poller::new()?);
        let sources: Vec<(usize, Arc<dyn IoSource>)> = {
            let mut registrations = self.registrations.lock();
            registrations.retain(|_, weak| weak.strong_count() > 0);
            registrations
                .iter()
                .filter_map(|(key, weak)| weak.upgrade().map(|source| (key, source)))
                .collect()
        };
        for (key, source) in &sources {
            if let Err(error) = source.reregister(&fresh, *key) {
                tracing::error!(key, error = %error, "failed to move source to the new selector");
                source.fail(&Error::from(error));
            }
        }
        *self.poller.lock() = fresh;
        tracing::debug!(sources = sources.len(), "selector rebuilt");
        Ok(())
    }
}

impl std::fmt::Debug for IoDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoDriver")
            .field("registrations", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use polling::Event;
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        stream: UnixStream,
        ready: AtomicUsize,
        failed: AtomicUsize,
    }

    impl IoSource for CountingSource {
        fn ready(&self, ready: Ready) {
            if ready.readable {
                self.ready.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn fail(&self, _error: &Error) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }

        fn reregister(&self, poller: &Poller, key: usize) -> io::Result<()> {
            // SAFETY: the stream outlives its registration; the source deletes
            // nothing and is dropped with the poller in this test.
            unsafe { poller.add(self.stream.as_raw_fd(), Event::readable(key)) }
        }
    }

    fn counting_source(driver: &IoDriver, stream: UnixStream) -> Arc<CountingSource> {
        driver
            .register(|key, poller| {
                let source = Arc::new(CountingSource {
                    stream,
                    ready: AtomicUsize::new(0),
                    failed: AtomicUsize::new(0),
                });
                source.reregister(poller, key)?;
                Ok(source)
            })
            .expect("register source")
    }

    #[test]
    fn readiness_reaches_registered_source() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("readiness_reaches_registered_source");
        let driver = IoDriver::new().expect("poller");
        let (left, mut right) = UnixStream::pair().expect("pair");
        let source = counting_source(&driver, left);
        right.write_all(b"x").expect("write");
        let events = driver
            .turn(Some(Duration::from_secs(1)))
            .expect("turn");
        assert_eq!(events, 1);
        assert_eq!(source.ready.load(Ordering::SeqCst), 1);
        crate::test_complete!("readiness_reaches_registered_source");
    }

    #[test]
    fn rebuild_keeps_sources_armed() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("rebuild_keeps_sources_armed");
        let driver = IoDriver::new().expect("poller");
        let (left, mut right) = UnixStream::pair().expect("pair");
        let source = counting_source(&driver, left);
        driver.rebuild().expect("rebuild");
        right.write_all(b"y").expect("write");
        driver.turn(Some(Duration::from_secs(1))).expect("turn");
        assert_eq!(source.ready.load(Ordering::SeqCst), 1);
        driver.fail_all(&Error::closed("The vat is closed"));
        assert_eq!(source.failed.load(Ordering::SeqCst), 1);
        crate::test_complete!("rebuild_keeps_sources_armed");
    }

    #[test]
    fn dropped_sources_are_skipped() {
        let driver = IoDriver::new().expect("poller");
        let (left, mut right) = UnixStream::pair().expect("pair");
        let source = counting_source(&driver, left);
        let key = 0;
        drop(source);
        right.write_all(b"z").expect("write");
        let _ = driver.turn(Some(Duration::from_millis(50)));
        driver.deregister(key);
        assert!(driver.is_empty());
    }
}
