//! UDP socket on a selector vat.

use super::context::{ChannelContext, Source};
use super::SelectorVat;
use crate::error::{Error, Result};
use crate::net::{ADatagramSocket, SocketOptions};
use crate::promise::Promise;
use crate::sync::RequestQueue;
use crate::types::ACloseable;
use parking_lot::Mutex;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, OnceLock};

struct Shared {
    vat: SelectorVat,
    context: OnceLock<Arc<ChannelContext>>,
    options: Mutex<SocketOptions>,
    sends: RequestQueue,
    receives: RequestQueue,
}

impl Shared {
    fn bound(&self) -> Result<Arc<ChannelContext>> {
        self.context
            .get()
            .cloned()
            .ok_or_else(|| Error::usage("Datagram socket is not bound"))
    }
}

fn socket_of(context: &ChannelContext) -> Result<&UdpSocket> {
    match context.source() {
        Source::Datagram(socket) => Ok(socket),
        _ => Err(Error::usage("Channel is not a datagram socket")),
    }
}

fn bind(shared: &Shared, address: SocketAddr) -> Result<SocketAddr> {
    if shared.context.get().is_some() {
        return Err(Error::usage("Datagram socket is already bound"));
    }
    let socket = UdpSocket::bind(address)?;
    socket.set_nonblocking(true)?;
    shared.options.lock().apply_datagram(&socket)?;
    let local = socket.local_addr()?;
    let context = ChannelContext::register(&shared.vat, Source::Datagram(socket))?;
    if shared.context.set(Arc::clone(&context)).is_err() {
        context.close();
        return Err(Error::usage("Datagram socket is already bound"));
    }
    Ok(local)
}

/// Retries `op` until it stops returning `WouldBlock`, waiting for the
/// readiness chosen by `write`.
async fn retry<T>(
    context: &ChannelContext,
    write: bool,
    mut op: impl FnMut(&UdpSocket) -> io::Result<T>,
) -> Result<T> {
    let socket = socket_of(context)?;
    loop {
        match op(socket) {
            Ok(value) => return Ok(value),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                if write {
                    context.wait_for_write().await?;
                } else {
                    context.wait_for_read().await?;
                }
            }
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error.into()),
        }
    }
}

/// A UDP socket driven by a [`SelectorVat`].
#[derive(Clone)]
pub struct SelectorDatagramSocket {
    shared: Arc<Shared>,
}

impl SelectorDatagramSocket {
    /// Creates an unbound datagram socket owned by `vat`.
    #[must_use]
    pub fn new(vat: &SelectorVat) -> Self {
        Self {
            shared: Arc::new(Shared {
                vat: vat.clone(),
                context: OnceLock::new(),
                options: Mutex::new(SocketOptions::default()),
                sends: RequestQueue::new(),
                receives: RequestQueue::new(),
            }),
        }
    }
}

impl ADatagramSocket for SelectorDatagramSocket {
    fn bind(&self, address: SocketAddr) -> Promise<SocketAddr> {
        let shared = Arc::clone(&self.shared);
        self.shared.vat.spawn(async move { bind(&shared, address) })
    }

    fn connect(&self, address: SocketAddr) -> Promise<()> {
        let shared = Arc::clone(&self.shared);
        self.shared.vat.spawn(async move {
            let context = shared.bound()?;
            socket_of(&context)?.connect(address)?;
            Ok(())
        })
    }

    fn set_options(&self, options: SocketOptions) -> Promise<()> {
        let applied = match self.shared.context.get() {
            Some(context) => {
                socket_of(context).and_then(|s| options.apply_datagram(s).map_err(Error::from))
            }
            None => Ok(()),
        };
        if applied.is_ok() {
            *self.shared.options.lock() = options;
        }
        Promise::from_result(applied)
    }

    fn local_address(&self) -> Promise<SocketAddr> {
        Promise::from_result(
            self.shared
                .bound()
                .and_then(|context| socket_of(&context)?.local_addr().map_err(Error::from)),
        )
    }

    fn send(&self, data: Vec<u8>) -> Promise<()> {
        let shared = Arc::clone(&self.shared);
        self.shared.vat.spawn(async move {
            let _guard = shared.sends.acquire().await;
            let context = shared.bound()?;
            retry(&context, true, |socket| socket.send(&data)).await?;
            Ok(())
        })
    }

    fn receive(&self, limit: usize) -> Promise<Vec<u8>> {
        let shared = Arc::clone(&self.shared);
        self.shared.vat.spawn(async move {
            let _guard = shared.receives.acquire().await;
            let context = shared.bound()?;
            let mut buffer = vec![0; limit];
            let count = retry(&context, false, |socket| socket.recv(&mut buffer)).await?;
            buffer.truncate(count);
            Ok(buffer)
        })
    }

    fn send_to(&self, data: Vec<u8>, address: SocketAddr) -> Promise<()> {
        let shared = Arc::clone(&self.shared);
        self.shared.vat.spawn(async move {
            let _guard = shared.sends.acquire().await;
            let context = shared.bound()?;
            retry(&context, true, |socket| socket.send_to(&data, address)).await?;
            Ok(())
        })
    }

    fn receive_from(&self, limit: usize) -> Promise<(Vec<u8>, SocketAddr)> {
        let shared = Arc::clone(&self.shared);
        self.shared.vat.spawn(async move {
            let _guard = shared.receives.acquire().await;
            let context = shared.bound()?;
            let mut buffer = vec![0; limit];
            let (count, from) =
                retry(&context, false, |socket| socket.recv_from(&mut buffer)).await?;
            buffer.truncate(count);
            Ok((buffer, from))
        })
    }
}

impl ACloseable for SelectorDatagramSocket {
    fn close(&self) -> Promise<()> {
        if let Some(context) = self.shared.context.get() {
            context.close();
        }
        Promise::void()
    }
}

impl std::fmt::Debug for SelectorDatagramSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectorDatagramSocket")
            .field("vat", &self.shared.vat.name())
            .field("bound", &self.shared.context.get().is_some())
            .finish()
    }
}
