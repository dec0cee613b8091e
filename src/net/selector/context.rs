//! Per-channel readiness bookkeeping.
//!
//! A [`ChannelContext`] owns one non-blocking OS socket registered with its
//! vat's [`IoDriver`]. Socket operations try the syscall first; on
//! `WouldBlock` they wait for the matching readiness through
//! `wait_for_read`/`wait_for_write`/`wait_for_connect`/`wait_for_accept`.
//! At most one waiter per kind may be pending, and the poller interest is
//! always the union of the pending kinds.

#![allow(unsafe_code)]

use super::SelectorVat;
use crate::error::{Error, Result};
use crate::promise::{Promise, Resolver};
use crate::runtime::io_driver::{IoDriver, IoSource, Ready};
use parking_lot::Mutex;
use polling::{Event, Poller};
use std::io;
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::sync::Arc;

/// The OS socket behind a channel.
#[derive(Debug)]
pub(crate) enum Source {
    Stream(TcpStream),
    Listener(TcpListener),
    Datagram(UdpSocket),
}

#[cfg(unix)]
impl Source {
    fn raw(&self) -> std::os::fd::RawFd {
        use std::os::fd::AsRawFd;
        match self {
            Self::Stream(s) => s.as_raw_fd(),
            Self::Listener(s) => s.as_raw_fd(),
            Self::Datagram(s) => s.as_raw_fd(),
        }
    }

    fn borrowed(&self) -> std::os::fd::BorrowedFd<'_> {
        use std::os::fd::AsFd;
        match self {
            Self::Stream(s) => s.as_fd(),
            Self::Listener(s) => s.as_fd(),
            Self::Datagram(s) => s.as_fd(),
        }
    }
}

#[cfg(windows)]
impl Source {
    fn raw(&self) -> std::os::windows::io::RawSocket {
        use std::os::windows::io::AsRawSocket;
        match self {
            Self::Stream(s) => s.as_raw_socket(),
            Self::Listener(s) => s.as_raw_socket(),
            Self::Datagram(s) => s.as_raw_socket(),
        }
    }

    fn borrowed(&self) -> std::os::windows::io::BorrowedSocket<'_> {
        use std::os::windows::io::AsSocket;
        match self {
            Self::Stream(s) => s.as_socket(),
            Self::Listener(s) => s.as_socket(),
            Self::Datagram(s) => s.as_socket(),
        }
    }
}

#[derive(Default)]
struct Waiters {
    read: Option<Resolver<()>>,
    write: Option<Resolver<()>>,
    connect: Option<Resolver<()>>,
    accept: Option<Resolver<()>>,
    closed: bool,
}

impl Waiters {
    fn interest(&self, key: usize) -> Event {
        Event::new(
            key,
            self.read.is_some() || self.accept.is_some(),
            self.write.is_some() || self.connect.is_some(),
        )
    }

    fn take_all(&mut self) -> Vec<Resolver<()>> {
        [
            self.read.take(),
            self.write.take(),
            self.connect.take(),
            self.accept.take(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

#[derive(Clone, Copy)]
enum WaitKind {
    Read,
    Write,
    Connect,
    Accept,
}

impl WaitKind {
    const fn name(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Connect => "connect",
            Self::Accept => "accept",
        }
    }
}

/// Readiness waiters of one registered socket.
pub struct ChannelContext {
    vat: SelectorVat,
    driver: Arc<IoDriver>,
    key: usize,
    source: Source,
    waiters: Mutex<Waiters>,
}

impl ChannelContext {
    /// Registers `source` with the vat's driver, initially with no interest.
    pub(crate) fn register(vat: &SelectorVat, source: Source) -> Result<Arc<Self>> {
        let driver = Arc::clone(vat.driver());
        let context = driver.register(|key, poller| {
            let context = Arc::new(Self {
                vat: vat.clone(),
                driver: Arc::clone(&driver),
                key,
                source,
                waiters: Mutex::new(Waiters::default()),
            });
            if let Err(error) = context.add_to(poller, Event::none(key)) {
                // Not registered: keep Drop away from the driver table.
                context.waiters.lock().closed = true;
                return Err(error);
            }
            Ok(context)
        })?;
        Ok(context)
    }

    fn add_to(&self, poller: &Poller, interest: Event) -> io::Result<()> {
        // SAFETY: the socket is owned by this context and is deleted from the
        // poller in `close` (or closed together with the context), so the
        // poller never observes a reused descriptor for this key.
        unsafe { poller.add(self.source.raw(), interest) }
    }

    /// The owning vat.
    #[must_use]
    pub fn vat(&self) -> &SelectorVat {
        &self.vat
    }

    pub(crate) const fn source(&self) -> &Source {
        &self.source
    }

    /// Returns true once the channel was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.waiters.lock().closed
    }

    fn arm(&self, waiters: &Waiters) -> io::Result<()> {
        self.driver
            .poller()
            .modify(self.source.borrowed(), waiters.interest(self.key))
    }

    fn wait(&self, kind: WaitKind) -> Promise<()> {
        let mut waiters = self.waiters.lock();
        if waiters.closed {
            return Promise::failure(Error::closed("Channel is closed"));
        }
        let slot = match kind {
            WaitKind::Read => &mut waiters.read,
            WaitKind::Write => &mut waiters.write,
            WaitKind::Connect => &mut waiters.connect,
            WaitKind::Accept => &mut waiters.accept,
        };
        assert!(slot.is_none(), "Double waiting for {}", kind.name());
        let (promise, resolver) = Promise::pending();
        *slot = Some(resolver);
        if let Err(error) = self.arm(&waiters) {
            let pending = waiters.take_all();
            drop(waiters);
            let error = Error::from(error);
            for resolver in pending {
                resolver.fail(error.clone());
            }
        }
        promise
    }

    /// Resolves once the socket may be readable.
    pub fn wait_for_read(&self) -> Promise<()> {
        self.wait(WaitKind::Read)
    }

    /// Resolves once the socket may be writable.
    pub fn wait_for_write(&self) -> Promise<()> {
        self.wait(WaitKind::Write)
    }

    /// Resolves once a pending connect may have finished.
    pub fn wait_for_connect(&self) -> Promise<()> {
        self.wait(WaitKind::Connect)
    }

    /// Resolves once a connection may be accepted.
    pub fn wait_for_accept(&self) -> Promise<()> {
        self.wait(WaitKind::Accept)
    }

    fn cancel(&self, kind: WaitKind) -> bool {
        let mut waiters = self.waiters.lock();
        let slot = match kind {
            WaitKind::Read => &mut waiters.read,
            WaitKind::Write => &mut waiters.write,
            WaitKind::Connect => &mut waiters.connect,
            WaitKind::Accept => &mut waiters.accept,
        };
        let Some(resolver) = slot.take() else {
            return false;
        };
        if !waiters.closed {
            if let Err(error) = self.arm(&waiters) {
                tracing::debug!(key = self.key, error = %error, "failed to narrow interest");
            }
        }
        drop(waiters);
        resolver.fail(Error::cancelled(format!("{} wait cancelled", kind.name())));
        true
    }

    /// Abandons a pending read wait. Returns false if none was pending.
    pub fn cancel_read(&self) -> bool {
        self.cancel(WaitKind::Read)
    }

    /// Abandons a pending write wait. Returns false if none was pending.
    pub fn cancel_write(&self) -> bool {
        self.cancel(WaitKind::Write)
    }

    /// Resolves the waiters matching `ready` and re-arms the rest.
    pub fn update_ready(&self, ready: Ready) {
        let mut waiters = self.waiters.lock();
        let mut fired = Vec::new();
        if ready.readable {
            fired.extend(waiters.read.take());
            fired.extend(waiters.accept.take());
        }
        if ready.writable {
            fired.extend(waiters.write.take());
            fired.extend(waiters.connect.take());
        }
        let rearm = if waiters.closed {
            Ok(())
        } else {
            self.arm(&waiters)
        };
        let failed = match rearm {
            Ok(()) => Vec::new(),
            Err(error) => {
                let error = Error::from(error);
                waiters
                    .take_all()
                    .into_iter()
                    .map(|resolver| (resolver, error.clone()))
                    .collect()
            }
        };
        drop(waiters);
        for resolver in fired {
            resolver.success(());
        }
        for (resolver, error) in failed {
            resolver.fail(error);
        }
    }

    /// Fails every pending waiter with `error`.
    pub fn fail(&self, error: &Error) {
        let pending = self.waiters.lock().take_all();
        for resolver in pending {
            resolver.fail(error.clone());
        }
    }

    /// Deregisters the socket and fails pending waiters with `Closed`.
    pub fn close(&self) {
        {
            let mut waiters = self.waiters.lock();
            if waiters.closed {
                return;
            }
            waiters.closed = true;
        }
        if let Err(error) = self.driver.poller().delete(self.source.borrowed()) {
            tracing::trace!(key = self.key, error = %error, "channel already gone from selector");
        }
        self.driver.deregister(self.key);
        self.fail(&Error::closed("Channel is closed"));
    }
}

impl IoSource for ChannelContext {
    fn ready(&self, ready: Ready) {
        self.update_ready(ready);
    }

    fn fail(&self, error: &Error) {
        Self::fail(self, error);
    }

    fn reregister(&self, poller: &Poller, key: usize) -> io::Result<()> {
        let waiters = self.waiters.lock();
        if waiters.closed {
            return Ok(());
        }
        self.add_to(poller, waiters.interest(key))
    }
}

impl Drop for ChannelContext {
    fn drop(&mut self) {
        if !self.waiters.get_mut().closed {
            let _ = self.driver.poller().delete(self.source.borrowed());
            self.driver.deregister(self.key);
        }
    }
}

impl std::fmt::Debug for ChannelContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let waiters = self.waiters.lock();
        f.debug_struct("ChannelContext")
            .field("key", &self.key)
            .field("read", &waiters.read.is_some())
            .field("write", &waiters.write.is_some())
            .field("connect", &waiters.connect.is_some())
            .field("accept", &waiters.accept.is_some())
            .field("closed", &waiters.closed)
            .finish()
    }
}
