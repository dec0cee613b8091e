//! Selector-based socket implementation.
//!
//! A [`SelectorVat`] runs tasks and, whenever its queue is empty, waits on a
//! readiness poller. Sockets created by a [`SelectorSocketFactory`] are owned
//! by that vat: all their operations are marshaled onto it, and readiness is
//! delivered through their [`ChannelContext`].

mod context;
mod datagram;
mod factory;
mod server;
mod socket;
mod timer;
mod vat;

pub use context::ChannelContext;
pub use datagram::SelectorDatagramSocket;
pub use factory::SelectorSocketFactory;
pub use server::SelectorServerSocket;
pub use socket::SelectorSocket;
pub use timer::TimerKey;
pub use vat::{ScratchBuffer, SelectorVat};
