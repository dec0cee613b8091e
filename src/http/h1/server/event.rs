use crate::http::h1::types::{Method, Version};
use crate::http::h1::uri::Uri;
use crate::io::StreamFinishedEvent;
use std::fmt;
use std::net::SocketAddr;

/// Summary of a finished server exchange.
#[derive(Debug, Clone)]
pub struct ExchangeFinishedEvent {
    /// Exchange id, `connection.exchange`.
    pub id: String,
    /// Peer address.
    pub remote: Option<SocketAddr>,
    /// Local address.
    pub local: Option<SocketAddr>,
    /// Request method.
    pub method: Method,
    /// Effective request URI.
    pub uri: Uri,
    /// Request version.
    pub version: Version,
    /// Response status, if a response was started.
    pub status: Option<u16>,
    /// Response reason phrase.
    pub reason: Option<String>,
    /// Request body counters.
    pub received: Option<StreamFinishedEvent>,
    /// Response body counters.
    pub sent: Option<StreamFinishedEvent>,
    /// Bytes read from the peer after a protocol switch.
    pub received_switched: Option<StreamFinishedEvent>,
    /// Bytes written to the peer after a protocol switch.
    pub sent_switched: Option<StreamFinishedEvent>,
}

fn bytes(event: Option<&StreamFinishedEvent>) -> u64 {
    event.map_or(0, |event| event.bytes)
}

impl fmt::Display for ExchangeFinishedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {}", self.id, self.method.as_str(), self.uri, self.version.as_str())?;
        match self.status {
            Some(status) => write!(f, " -> {status} {}", self.reason.as_deref().unwrap_or(""))?,
            None => f.write_str(" -> no response")?,
        }
        write!(
            f,
            " (in: {}, out: {}",
            bytes(self.received.as_ref()),
            bytes(self.sent.as_ref())
        )?;
        if self.received_switched.is_some() || self.sent_switched.is_some() {
            write!(
                f,
                ", switched in: {}, switched out: {}",
                bytes(self.received_switched.as_ref()),
                bytes(self.sent_switched.as_ref())
            )?;
        }
        f.write_str(")")
    }
}
