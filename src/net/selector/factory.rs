//! Socket factory bound to one selector vat.

use super::{SelectorDatagramSocket, SelectorServerSocket, SelectorSocket, SelectorVat};
use crate::net::{ASocketFactory, BoxDatagramSocket, BoxServerSocket, BoxSocket};
use crate::promise::Promise;
use std::sync::Arc;

/// Creates selector sockets owned by a single vat.
#[derive(Debug, Clone)]
pub struct SelectorSocketFactory {
    vat: SelectorVat,
}

impl SelectorSocketFactory {
    /// A factory for sockets on `vat`.
    #[must_use]
    pub const fn new(vat: SelectorVat) -> Self {
        Self { vat }
    }

    /// The vat owning created sockets.
    #[must_use]
    pub const fn vat(&self) -> &SelectorVat {
        &self.vat
    }
}

impl ASocketFactory for SelectorSocketFactory {
    fn make_socket(&self) -> Promise<BoxSocket> {
        Promise::value(Arc::new(SelectorSocket::new(&self.vat)) as BoxSocket)
    }

    fn make_server_socket(&self) -> Promise<BoxServerSocket> {
        Promise::value(Arc::new(SelectorServerSocket::new(&self.vat)) as BoxServerSocket)
    }

    fn make_datagram_socket(&self) -> Promise<BoxDatagramSocket> {
        Promise::value(Arc::new(SelectorDatagramSocket::new(&self.vat)) as BoxDatagramSocket)
    }
}
