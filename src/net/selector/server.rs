//! Listening TCP socket on a selector vat.

use super::context::{ChannelContext, Source};
use super::{SelectorSocket, SelectorVat};
use crate::error::{Error, Result};
use crate::net::{AServerSocket, BoxSocket, SocketOptions};
use crate::promise::Promise;
use crate::sync::RequestQueue;
use crate::types::ACloseable;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, OnceLock};

struct Shared {
    vat: SelectorVat,
    context: OnceLock<Arc<ChannelContext>>,
    accepts: RequestQueue,
    defaults: Mutex<SocketOptions>,
}

fn listener_of(context: &ChannelContext) -> Result<&TcpListener> {
    match context.source() {
        Source::Listener(listener) => Ok(listener),
        _ => Err(Error::usage("Channel is not a listening socket")),
    }
}

fn bind(shared: &Shared, address: SocketAddr, backlog: u32) -> Result<SocketAddr> {
    if shared.context.get().is_some() {
        return Err(Error::usage("Server socket is already bound"));
    }
    let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&address.into())?;
    socket.listen(i32::try_from(backlog).unwrap_or(i32::MAX))?;
    let listener: TcpListener = socket.into();
    let local = listener.local_addr()?;
    let context = ChannelContext::register(&shared.vat, Source::Listener(listener))?;
    if shared.context.set(Arc::clone(&context)).is_err() {
        context.close();
        return Err(Error::usage("Server socket is already bound"));
    }
    tracing::debug!(address = %local, backlog, "server socket bound");
    Ok(local)
}

async fn accept(shared: Arc<Shared>) -> Result<BoxSocket> {
    let _guard = shared.accepts.acquire().await;
    let context = shared
        .context
        .get()
        .cloned()
        .ok_or_else(|| Error::usage("Server socket is not bound"))?;
    let listener = listener_of(&context)?;
    loop {
        match listener.accept() {
            Ok((stream, remote)) => {
                let options = shared.defaults.lock().clone();
                let socket = SelectorSocket::from_stream(&shared.vat, stream, &options)?;
                tracing::trace!(remote = %remote, "connection accepted");
                return Ok(Arc::new(socket) as BoxSocket);
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                context.wait_for_accept().await?;
            }
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error.into()),
        }
    }
}

/// A listening socket driven by a [`SelectorVat`].
///
/// Accepted sockets belong to the same vat and get the default options set
/// through [`AServerSocket::set_default_options`].
#[derive(Clone)]
pub struct SelectorServerSocket {
    shared: Arc<Shared>,
}

impl SelectorServerSocket {
    /// Creates an unbound server socket owned by `vat`.
    #[must_use]
    pub fn new(vat: &SelectorVat) -> Self {
        Self {
            shared: Arc::new(Shared {
                vat: vat.clone(),
                context: OnceLock::new(),
                accepts: RequestQueue::new(),
                defaults: Mutex::new(SocketOptions::default()),
            }),
        }
    }
}

impl AServerSocket for SelectorServerSocket {
    fn bind(&self, address: SocketAddr, backlog: u32) -> Promise<SocketAddr> {
        let shared = Arc::clone(&self.shared);
        self.shared
            .vat
            .spawn(async move { bind(&shared, address, backlog) })
    }

    fn set_default_options(&self, options: SocketOptions) -> Promise<()> {
        *self.shared.defaults.lock() = options;
        Promise::void()
    }

    fn local_address(&self) -> Promise<SocketAddr> {
        let address = self
            .shared
            .context
            .get()
            .ok_or_else(|| Error::usage("Server socket is not bound"))
            .and_then(|context| listener_of(context)?.local_addr().map_err(Error::from));
        Promise::from_result(address)
    }

    fn accept(&self) -> Promise<BoxSocket> {
        let shared = Arc::clone(&self.shared);
        self.shared.vat.spawn(accept(shared))
    }
}

impl ACloseable for SelectorServerSocket {
    fn close(&self) -> Promise<()> {
        if let Some(context) = self.shared.context.get() {
            if !context.is_closed() {
                let address = listener_of(context).ok().and_then(|l| l.local_addr().ok());
                tracing::debug!(address = ?address, "closing server socket");
            }
            context.close();
        }
        Promise::void()
    }
}

impl std::fmt::Debug for SelectorServerSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectorServerSocket")
            .field("vat", &self.shared.vat.name())
            .field("bound", &self.shared.context.get().is_some())
            .finish()
    }
}
