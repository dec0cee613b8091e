//! HTTP/1.x server.
//!
//! [`HttpServer`] accepts connections from a server socket (or is handed
//! ready channels through [`HttpServer::serve`]) and runs each one as a
//! sequence of exchanges. Every exchange is passed to the configured
//! [`AHttpHandler`] as an [`HttpExchange`]; requests that cannot be parsed,
//! or whose handler fails before replying, go to the bad request handler.
//!
//! ```ignore
//! let server = HttpServer::new(HttpConfig::default());
//! server.set_handler(|exchange: HttpExchange| {
//!     short_reply(&exchange, 200, "<p>hello</p>".to_owned())
//! });
//! server.set_socket(listener);
//! server.run().await?;
//! ```

mod connection;
mod event;
mod exchange;
mod handlers;

pub use event::ExchangeFinishedEvent;
pub use exchange::HttpExchange;
pub use handlers::{
    BadRequestHandler, DelegatingHandler, HttpDelegate, NotFoundHandler, PathDelegate,
    ServerOptionsHandler, escape_html, short_reply, short_reply_with_headers,
};

use crate::config::HttpConfig;
use crate::error::Error;
use crate::http::h1::scope::{SERVER_ADDRESS, Scope};
use crate::io::BoxChannel;
use crate::net::{BoxServerSocket, BoxSocket, SocketChannel, SocketOptions};
use crate::promise::Promise;
use crate::runtime::spawn_default;
use crate::types::ACloseable;
use connection::HttpServerConnection;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Handles server exchanges.
///
/// The returned promise resolves once the handler is done with the
/// exchange; the exchange body streams are closed after that.
pub trait AHttpHandler: Send + Sync {
    /// Handles one exchange.
    fn handle(&self, exchange: HttpExchange) -> Promise<()>;
}

impl<F> AHttpHandler for F
where
    F: Fn(HttpExchange) -> Promise<()> + Send + Sync,
{
    fn handle(&self, exchange: HttpExchange) -> Promise<()> {
        self(exchange)
    }
}

/// Shared, type-erased handler.
pub type BoxHttpHandler = Arc<dyn AHttpHandler>;

type ExchangeListener = Arc<dyn Fn(&ExchangeFinishedEvent) + Send + Sync>;

pub(crate) struct ServerShared {
    config: HttpConfig,
    scope: Scope,
    handler: Mutex<BoxHttpHandler>,
    bad_request_handler: Mutex<BoxHttpHandler>,
    exchange_listener: Mutex<Option<ExchangeListener>>,
    socket: Mutex<Option<BoxServerSocket>>,
    connections: Mutex<HashMap<u64, BoxChannel>>,
    next_connection: AtomicU64,
    closed: AtomicBool,
}

impl ServerShared {
    pub(crate) fn config(&self) -> &HttpConfig {
        &self.config
    }

    pub(crate) fn scope(&self) -> &Scope {
        &self.scope
    }

    pub(crate) fn handler(&self) -> BoxHttpHandler {
        Arc::clone(&self.handler.lock())
    }

    pub(crate) fn bad_request_handler(&self) -> BoxHttpHandler {
        Arc::clone(&self.bad_request_handler.lock())
    }

    pub(crate) fn exchange_finished(&self, event: &ExchangeFinishedEvent) {
        tracing::info!(exchange = %event.id, event = %event, "exchange finished");
        let listener = self.exchange_listener.lock().clone();
        if let Some(listener) = listener {
            listener(event);
        }
    }
}

/// An HTTP/1.x server.
#[derive(Clone)]
pub struct HttpServer {
    shared: Arc<ServerShared>,
}

impl HttpServer {
    /// Creates a server with the default [`DelegatingHandler`]: `OPTIONS *`
    /// is answered with the server options, everything else with 404.
    #[must_use]
    pub fn new(config: HttpConfig) -> Self {
        Self {
            shared: Arc::new(ServerShared {
                config,
                scope: Scope::new(),
                handler: Mutex::new(Arc::new(DelegatingHandler::default())),
                bad_request_handler: Mutex::new(Arc::new(BadRequestHandler)),
                exchange_listener: Mutex::new(None),
                socket: Mutex::new(None),
                connections: Mutex::new(HashMap::new()),
                next_connection: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Server configuration.
    #[must_use]
    pub fn config(&self) -> &HttpConfig {
        &self.shared.config
    }

    /// Values shared by every exchange of this server.
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.shared.scope
    }

    /// Replaces the request handler.
    pub fn set_handler(&self, handler: impl AHttpHandler + 'static) {
        *self.shared.handler.lock() = Arc::new(handler);
    }

    /// Replaces the handler producing replies to malformed requests.
    ///
    /// The failure is available under
    /// [`BAD_REQUEST_PROBLEM`](crate::http::h1::scope::BAD_REQUEST_PROBLEM)
    /// in the exchange scope.
    pub fn set_bad_request_handler(&self, handler: impl AHttpHandler + 'static) {
        *self.shared.bad_request_handler.lock() = Arc::new(handler);
    }

    /// Receives every [`ExchangeFinishedEvent`] after it is logged.
    pub fn set_exchange_listener(
        &self,
        listener: impl Fn(&ExchangeFinishedEvent) + Send + Sync + 'static,
    ) {
        *self.shared.exchange_listener.lock() = Some(Arc::new(listener));
    }

    /// Sets the bound socket [`run`](Self::run) accepts from.
    pub fn set_socket(&self, socket: BoxServerSocket) {
        *self.shared.socket.lock() = Some(socket);
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.shared.connections.lock().len()
    }

    /// Accepts connections until the socket fails or the server is closed.
    pub fn run(&self) -> Promise<()> {
        let shared = Arc::clone(&self.shared);
        let server = self.clone();
        spawn_default(async move {
            let socket = shared
                .socket
                .lock()
                .clone()
                .ok_or_else(|| Error::usage("The server socket is not set"))?;
            let address = socket.local_address().await?;
            shared.scope.set(&SERVER_ADDRESS, address);
            tracing::debug!(%address, "http server started");
            loop {
                match socket.accept().await {
                    Ok(connection) => server.accept(connection),
                    Err(error) => {
                        if shared.closed.load(Ordering::Acquire) {
                            tracing::debug!(%address, "http server stopped");
                        } else {
                            tracing::debug!(%address, %error, "http server stopped with failure");
                        }
                        return Ok(());
                    }
                }
            }
        })
    }

    fn accept(&self, socket: BoxSocket) {
        let server = self.clone();
        let _finished = spawn_default(async move {
            socket.set_options(SocketOptions::no_delay()).await?;
            let local = socket.local_address().await.ok();
            let remote = socket.remote_address().await.ok();
            server
                .serve(Arc::new(SocketChannel(socket)), local, remote)
                .await
        });
    }

    /// Serves exchanges on an already connected channel until the
    /// connection can no longer be reused.
    pub fn serve(
        &self,
        channel: BoxChannel,
        local: Option<SocketAddr>,
        remote: Option<SocketAddr>,
    ) -> Promise<()> {
        let shared = Arc::clone(&self.shared);
        let id = shared.next_connection.fetch_add(1, Ordering::Relaxed);
        shared.connections.lock().insert(id, Arc::clone(&channel));
        let connection = HttpServerConnection::new(Arc::clone(&shared), id, channel, local, remote);
        spawn_default(async move {
            let result = connection.run().await;
            shared.connections.lock().remove(&id);
            result
        })
    }
}

impl ACloseable for HttpServer {
    fn close(&self) -> Promise<()> {
        let shared = Arc::clone(&self.shared);
        spawn_default(async move {
            if shared.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            tracing::debug!(address = ?shared.scope.get(&SERVER_ADDRESS), "stopping http server");
            let socket = shared.socket.lock().clone();
            if let Some(socket) = socket {
                if let Err(error) = socket.close().await {
                    tracing::debug!(%error, "problem with closing server socket");
                }
            }
            let connections: Vec<_> = shared.connections.lock().drain().collect();
            for (id, channel) in connections {
                tracing::debug!(connection = id, "closing server connection");
                if let Err(error) = channel.close().await {
                    tracing::debug!(connection = id, %error, "problem with closing connection");
                }
            }
            Ok(())
        })
    }
}

impl fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpServer")
            .field("address", &self.shared.scope.get(&SERVER_ADDRESS))
            .field("connections", &self.shared.connections.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
