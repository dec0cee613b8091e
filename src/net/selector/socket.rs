//! Non-blocking TCP socket on a selector vat.

use super::context::{ChannelContext, Source};
use super::SelectorVat;
use crate::error::{Error, Result};
use crate::io::{AChannel, AInput, AOutput, BoxInput, BoxOutput};
use crate::net::{ASocket, SocketOptions};
use crate::promise::Promise;
use crate::sync::RequestQueue;
use crate::types::ACloseable;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

#[cfg(unix)]
fn connect_in_progress(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::WouldBlock || error.raw_os_error() == Some(libc::EINPROGRESS)
}

#[cfg(not(unix))]
fn connect_in_progress(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::WouldBlock
}

#[derive(Clone, Copy)]
enum Direction {
    Read,
    Write,
}

/// Waits for readiness in `direction`, failing with `TimedOut` once `limit`
/// passes without it.
async fn ready_within(
    context: &ChannelContext,
    direction: Direction,
    limit: Option<Duration>,
) -> Result<()> {
    let ready = match direction {
        Direction::Read => context.wait_for_read(),
        Direction::Write => context.wait_for_write(),
    };
    let Some(limit) = limit else {
        return ready.await;
    };
    let vat = context.vat();
    let (key, expired) = vat.schedule(limit);
    let (first, winner) = Promise::<bool>::pending();
    let on_ready = winner.clone();
    ready.listen_sync(move |outcome| {
        on_ready.resolve(outcome.clone().map(|()| true));
    });
    expired.listen_sync(move |outcome| {
        winner.resolve(outcome.clone().map(|()| false));
    });
    let became_ready = first.await;
    vat.cancel_timer(key);
    if became_ready? {
        return Ok(());
    }
    let what = match direction {
        Direction::Read => {
            context.cancel_read();
            "Read timed out"
        }
        Direction::Write => {
            context.cancel_write();
            "Write timed out"
        }
    };
    tracing::debug!(?limit, "{what}");
    Err(io::Error::new(io::ErrorKind::TimedOut, what).into())
}

#[derive(Default)]
struct SocketState {
    options: SocketOptions,
    eof_seen: bool,
    input_closed: bool,
    output_closed: bool,
    closed: bool,
}

struct Shared {
    vat: SelectorVat,
    context: OnceLock<Arc<ChannelContext>>,
    connects: RequestQueue,
    reads: RequestQueue,
    writes: RequestQueue,
    state: Mutex<SocketState>,
}

impl Shared {
    fn timeouts(&self) -> (Option<Duration>, Option<Duration>) {
        let state = self.state.lock();
        (
            state.options.read_timeout_ms.map(Duration::from_millis),
            state.options.write_timeout_ms.map(Duration::from_millis),
        )
    }

    fn connected(&self) -> Result<Arc<ChannelContext>> {
        self.context
            .get()
            .cloned()
            .ok_or_else(|| Error::usage("Socket is not connected"))
    }

    fn on_vat<T, F>(self: &Arc<Self>, body: impl FnOnce(Arc<Self>) -> F) -> Promise<T>
    where
        T: Clone + Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        self.vat.spawn(body(Arc::clone(self)))
    }

    fn ensure_input_open(&self) -> Result<bool> {
        let state = self.state.lock();
        if state.input_closed || state.closed {
            return Err(Error::closed("The stream is closed"));
        }
        Ok(state.eof_seen)
    }

    fn ensure_output_open(&self) -> Result<()> {
        let state = self.state.lock();
        if state.output_closed || state.closed {
            return Err(Error::closed("The output stream is closed"));
        }
        Ok(())
    }
}

fn stream_of(context: &ChannelContext) -> Result<&TcpStream> {
    match context.source() {
        Source::Stream(stream) => Ok(stream),
        _ => Err(Error::usage("Channel is not a stream socket")),
    }
}

fn shutdown(context: &ChannelContext, how: Shutdown) -> Result<()> {
    match stream_of(context)?.shutdown(how) {
        Err(error) if error.kind() != io::ErrorKind::NotConnected => Err(error.into()),
        _ => Ok(()),
    }
}

async fn connect(shared: Arc<Shared>, address: SocketAddr) -> Result<()> {
    let _guard = shared.connects.acquire().await;
    if shared.context.get().is_some() {
        return Err(Error::usage("Socket is already connected"));
    }
    let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    let pending = match socket.connect(&address.into()) {
        Ok(()) => false,
        Err(error) if connect_in_progress(&error) => true,
        Err(error) => return Err(error.into()),
    };
    let stream: TcpStream = socket.into();
    let options = shared.state.lock().options.clone();
    options.apply_stream(&stream)?;
    let context = ChannelContext::register(&shared.vat, Source::Stream(stream))?;
    if shared.context.set(Arc::clone(&context)).is_err() {
        context.close();
        return Err(Error::usage("Socket is already connected"));
    }
    while pending {
        context.wait_for_connect().await?;
        let stream = stream_of(&context)?;
        if let Some(error) = stream.take_error()? {
            return Err(error.into());
        }
        match stream.peer_addr() {
            Ok(_) => break,
            Err(error) if error.kind() == io::ErrorKind::NotConnected => {}
            Err(error) => return Err(error.into()),
        }
    }
    let stream = stream_of(&context)?;
    tracing::debug!(
        local = ?stream.local_addr().ok(),
        remote = ?stream.peer_addr().ok(),
        "socket connected"
    );
    Ok(())
}

async fn read(shared: Arc<Shared>, limit: usize) -> Result<Option<Vec<u8>>> {
    let _guard = shared.reads.acquire().await;
    let context = shared.connected()?;
    let stream = stream_of(&context)?;
    let vat = context.vat().clone();
    let (timeout, _) = shared.timeouts();
    let mut woken = false;
    loop {
        if shared.ensure_input_open()? {
            return Ok(None);
        }
        if limit == 0 {
            return Ok(Some(Vec::new()));
        }
        let mut scratch = vat.acquire_scratch();
        let size = limit.min(scratch.len());
        let mut reader = stream;
        let result = reader
            .read(&mut scratch[..size])
            .map(|count| scratch[..count].to_vec());
        vat.release_scratch(scratch);
        match result {
            Ok(data) if data.is_empty() => {
                shared.state.lock().eof_seen = true;
                return Ok(None);
            }
            Ok(data) => {
                vat.note_progress();
                return Ok(Some(data));
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                if woken {
                    vat.note_spurious_wakeup();
                }
            }
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error.into()),
        }
        ready_within(&context, Direction::Read, timeout).await?;
        woken = true;
    }
}

async fn write(shared: Arc<Shared>, data: Vec<u8>) -> Result<()> {
    let _guard = shared.writes.acquire().await;
    let context = shared.connected()?;
    let stream = stream_of(&context)?;
    let (_, limit) = shared.timeouts();
    let mut offset = 0;
    while offset < data.len() {
        shared.ensure_output_open()?;
        let mut writer = stream;
        match writer.write(&data[offset..]) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
            Ok(count) => offset += count,
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                ready_within(&context, Direction::Write, limit).await?;
            }
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error.into()),
        }
    }
    Ok(())
}

/// A TCP socket driven by a [`SelectorVat`].
///
/// Every operation runs on the owning vat, whichever thread calls it.
#[derive(Clone)]
pub struct SelectorSocket {
    shared: Arc<Shared>,
}

impl SelectorSocket {
    /// Creates an unconnected socket owned by `vat`.
    #[must_use]
    pub fn new(vat: &SelectorVat) -> Self {
        Self {
            shared: Arc::new(Shared {
                vat: vat.clone(),
                context: OnceLock::new(),
                connects: RequestQueue::new(),
                reads: RequestQueue::new(),
                writes: RequestQueue::new(),
                state: Mutex::new(SocketState::default()),
            }),
        }
    }

    /// Wraps an accepted stream.
    pub(crate) fn from_stream(
        vat: &SelectorVat,
        stream: TcpStream,
        options: &SocketOptions,
    ) -> Result<Self> {
        stream.set_nonblocking(true)?;
        options.apply_stream(&stream)?;
        let socket = Self::new(vat);
        socket.shared.state.lock().options = options.clone();
        let context = ChannelContext::register(vat, Source::Stream(stream))?;
        let _ = socket.shared.context.set(context);
        Ok(socket)
    }

    fn addresses(&self) -> Result<(SocketAddr, SocketAddr)> {
        let context = self.shared.connected()?;
        let stream = stream_of(&context)?;
        Ok((stream.local_addr()?, stream.peer_addr()?))
    }
}

impl ASocket for SelectorSocket {
    fn connect(&self, address: SocketAddr) -> Promise<()> {
        self.shared.on_vat(move |shared| connect(shared, address))
    }

    fn set_options(&self, options: SocketOptions) -> Promise<()> {
        let applied = match self.shared.context.get() {
            Some(context) => stream_of(context).and_then(|s| options.apply_stream(s).map_err(Error::from)),
            None => Ok(()),
        };
        if applied.is_ok() {
            self.shared.state.lock().options = options;
        }
        Promise::from_result(applied)
    }

    fn local_address(&self) -> Promise<SocketAddr> {
        Promise::from_result(self.addresses().map(|(local, _)| local))
    }

    fn remote_address(&self) -> Promise<SocketAddr> {
        Promise::from_result(self.addresses().map(|(_, remote)| remote))
    }
}

impl AChannel for SelectorSocket {
    fn input(&self) -> BoxInput {
        Arc::new(SocketInput {
            shared: Arc::clone(&self.shared),
        })
    }

    fn output(&self) -> BoxOutput {
        Arc::new(SocketOutput {
            shared: Arc::clone(&self.shared),
        })
    }
}

impl ACloseable for SelectorSocket {
    fn close(&self) -> Promise<()> {
        {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Promise::void();
            }
            state.closed = true;
        }
        let Some(context) = self.shared.context.get() else {
            return Promise::void();
        };
        if let Ok(stream) = stream_of(context) {
            tracing::debug!(
                local = ?stream.local_addr().ok(),
                remote = ?stream.peer_addr().ok(),
                "closing socket"
            );
        }
        let result = shutdown(context, Shutdown::Both);
        context.close();
        Promise::from_result(result)
    }
}

impl std::fmt::Debug for SelectorSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectorSocket")
            .field("vat", &self.shared.vat.name())
            .field("connected", &self.shared.context.get().is_some())
            .field("closed", &self.shared.state.lock().closed)
            .finish()
    }
}

struct SocketInput {
    shared: Arc<Shared>,
}

impl AInput for SocketInput {
    fn read(&self, limit: usize) -> Promise<Option<Vec<u8>>> {
        self.shared.on_vat(move |shared| read(shared, limit))
    }
}

impl ACloseable for SocketInput {
    fn close(&self) -> Promise<()> {
        {
            let mut state = self.shared.state.lock();
            if state.input_closed || state.closed {
                return Promise::void();
            }
            state.input_closed = true;
        }
        Promise::from_result(self.shared.connected().and_then(|c| shutdown(&c, Shutdown::Read)))
    }
}

struct SocketOutput {
    shared: Arc<Shared>,
}

impl AOutput for SocketOutput {
    fn write(&self, data: Vec<u8>) -> Promise<()> {
        self.shared.on_vat(move |shared| write(shared, data))
    }

    fn flush(&self) -> Promise<()> {
        self.shared.on_vat(|shared| async move {
            let _guard = shared.writes.acquire().await;
            shared.ensure_output_open()
        })
    }
}

impl ACloseable for SocketOutput {
    fn close(&self) -> Promise<()> {
        // Queued writes go out before the write half is shut down.
        self.shared.on_vat(|shared| async move {
            let _guard = shared.writes.acquire().await;
            {
                let mut state = shared.state.lock();
                if state.output_closed || state.closed {
                    return Ok(());
                }
                state.output_closed = true;
            }
            shared.connected().and_then(|c| shutdown(&c, Shutdown::Write))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_connect_is_recognised() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("pending_connect_is_recognised");
        let would_block = io::Error::from(io::ErrorKind::WouldBlock);
        crate::assert_with_log!(connect_in_progress(&would_block), "would block", true, would_block);
        #[cfg(unix)]
        {
            let in_progress = io::Error::from_raw_os_error(libc::EINPROGRESS);
            crate::assert_with_log!(
                connect_in_progress(&in_progress),
                "in progress",
                true,
                in_progress
            );
        }
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        crate::assert_with_log!(!connect_in_progress(&refused), "refused", false, refused);
        crate::test_complete!("pending_connect_is_recognised");
    }
}
