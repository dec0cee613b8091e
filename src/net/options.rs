//! Socket options.

use serde::Deserialize;
use socket2::SockRef;
use std::io;
use std::net::{TcpStream, UdpSocket};
use std::time::Duration;

/// Options applied to a socket; `None` leaves the OS default in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SocketOptions {
    /// `TCP_NODELAY`.
    pub tcp_no_delay: Option<bool>,
    /// `SO_KEEPALIVE`.
    pub keep_alive: Option<bool>,
    /// `SO_LINGER`, in seconds.
    pub linger_secs: Option<u64>,
    /// `SO_RCVTIMEO`, in milliseconds.
    pub read_timeout_ms: Option<u64>,
    /// `SO_SNDTIMEO`, in milliseconds.
    pub write_timeout_ms: Option<u64>,
    /// `SO_RCVBUF`.
    pub receive_buffer_size: Option<usize>,
    /// `SO_SNDBUF`.
    pub send_buffer_size: Option<usize>,
    /// `SO_BROADCAST`, datagram sockets only.
    pub broadcast: Option<bool>,
}

impl SocketOptions {
    /// Options with `TCP_NODELAY` set.
    #[must_use]
    pub fn no_delay() -> Self {
        Self {
            tcp_no_delay: Some(true),
            ..Self::default()
        }
    }

    /// Applies stream-socket options.
    pub fn apply_stream(&self, stream: &TcpStream) -> io::Result<()> {
        if let Some(value) = self.tcp_no_delay {
            stream.set_nodelay(value)?;
        }
        let socket = SockRef::from(stream);
        if let Some(value) = self.keep_alive {
            socket.set_keepalive(value)?;
        }
        if let Some(secs) = self.linger_secs {
            socket.set_linger(Some(Duration::from_secs(secs)))?;
        }
        self.apply_common(&socket)
    }

    /// Applies datagram-socket options.
    pub fn apply_datagram(&self, socket: &UdpSocket) -> io::Result<()> {
        let socket = SockRef::from(socket);
        if let Some(value) = self.broadcast {
            socket.set_broadcast(value)?;
        }
        self.apply_common(&socket)
    }

    fn apply_common(&self, socket: &SockRef<'_>) -> io::Result<()> {
        if let Some(ms) = self.read_timeout_ms {
            socket.set_read_timeout(Some(Duration::from_millis(ms)))?;
        }
        if let Some(ms) = self.write_timeout_ms {
            socket.set_write_timeout(Some(Duration::from_millis(ms)))?;
        }
        if let Some(size) = self.receive_buffer_size {
            socket.set_recv_buffer_size(size)?;
        }
        if let Some(size) = self.send_buffer_size {
            socket.set_send_buffer_size(size)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn options_reach_the_socket() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("options_reach_the_socket");
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let stream = TcpStream::connect(listener.local_addr().expect("addr")).expect("connect");
        let options = SocketOptions {
            keep_alive: Some(true),
            ..SocketOptions::no_delay()
        };
        options.apply_stream(&stream).expect("apply");
        assert!(stream.nodelay().expect("nodelay"));
        assert!(SockRef::from(&stream).keepalive().expect("keepalive"));
        crate::test_complete!("options_reach_the_socket");
    }
}
