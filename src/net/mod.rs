//! Asynchronous sockets.
//!
//! The traits here describe sockets in terms of promises; the
//! [`selector`] module implements them on top of a readiness poller.
//!
//! # Example
//!
//! ```ignore
//! use vatflow::net::selector::{SelectorSocketFactory, SelectorVat};
//! use vatflow::net::{ASocket, ASocketFactory};
//!
//! SelectorVat::run_action(|vat| async move {
//!     let socket = SelectorSocketFactory::new(vat).make_socket().await?;
//!     socket.connect("127.0.0.1:8080".parse().unwrap()).await?;
//!     Ok(())
//! })?;
//! ```

mod options;
#[cfg(not(target_arch = "wasm32"))]
pub mod selector;

pub use options::SocketOptions;

use crate::io::{AChannel, BoxInput, BoxOutput};
use crate::promise::Promise;
use crate::types::ACloseable;
use std::net::SocketAddr;
use std::sync::Arc;

/// A connected (or connectable) stream socket.
pub trait ASocket: AChannel {
    /// Connects to `address`.
    fn connect(&self, address: SocketAddr) -> Promise<()>;

    /// Applies options now and to the socket created by a later connect.
    fn set_options(&self, options: SocketOptions) -> Promise<()>;

    /// Local address of the connected socket.
    fn local_address(&self) -> Promise<SocketAddr>;

    /// Peer address of the connected socket.
    fn remote_address(&self) -> Promise<SocketAddr>;
}

/// A listening stream socket.
pub trait AServerSocket: ACloseable {
    /// Binds and starts listening; resolves to the bound address.
    fn bind(&self, address: SocketAddr, backlog: u32) -> Promise<SocketAddr>;

    /// Options applied to every accepted socket.
    fn set_default_options(&self, options: SocketOptions) -> Promise<()>;

    /// The bound address.
    fn local_address(&self) -> Promise<SocketAddr>;

    /// Resolves with the next accepted connection.
    fn accept(&self) -> Promise<BoxSocket>;
}

/// A datagram socket.
pub trait ADatagramSocket: ACloseable {
    /// Binds to `address`; resolves to the bound address.
    fn bind(&self, address: SocketAddr) -> Promise<SocketAddr>;

    /// Fixes the peer used by [`send`](Self::send) and [`receive`](Self::receive).
    fn connect(&self, address: SocketAddr) -> Promise<()>;

    /// Applies socket options.
    fn set_options(&self, options: SocketOptions) -> Promise<()>;

    /// The bound address.
    fn local_address(&self) -> Promise<SocketAddr>;

    /// Sends one datagram to the connected peer.
    fn send(&self, data: Vec<u8>) -> Promise<()>;

    /// Receives one datagram of at most `limit` bytes from the connected peer.
    fn receive(&self, limit: usize) -> Promise<Vec<u8>>;

    /// Sends one datagram to `address`.
    fn send_to(&self, data: Vec<u8>, address: SocketAddr) -> Promise<()>;

    /// Receives one datagram and its sender.
    fn receive_from(&self, limit: usize) -> Promise<(Vec<u8>, SocketAddr)>;
}

/// Creates sockets.
pub trait ASocketFactory: Send + Sync {
    /// A new unconnected stream socket.
    fn make_socket(&self) -> Promise<BoxSocket>;

    /// A new unbound server socket.
    fn make_server_socket(&self) -> Promise<BoxServerSocket>;

    /// A new unbound datagram socket.
    fn make_datagram_socket(&self) -> Promise<BoxDatagramSocket>;
}

/// Shared, type-erased stream socket.
pub type BoxSocket = Arc<dyn ASocket>;

/// Shared, type-erased server socket.
pub type BoxServerSocket = Arc<dyn AServerSocket>;

/// Shared, type-erased datagram socket.
pub type BoxDatagramSocket = Arc<dyn ADatagramSocket>;

/// Shared, type-erased socket factory.
pub type BoxSocketFactory = Arc<dyn ASocketFactory>;

/// A connected socket used as a plain [`AChannel`].
pub struct SocketChannel(pub BoxSocket);

impl AChannel for SocketChannel {
    fn input(&self) -> BoxInput {
        self.0.input()
    }

    fn output(&self) -> BoxOutput {
        self.0.output()
    }
}

impl ACloseable for SocketChannel {
    fn close(&self) -> Promise<()> {
        self.0.close()
    }
}

impl std::fmt::Debug for SocketChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SocketChannel").finish_non_exhaustive()
    }
}
