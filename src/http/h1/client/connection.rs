use super::request::HttpRequest;
use crate::config::HttpConfig;
use crate::error::Error;
use crate::io::{BoxChannel, ByteGeneratorContext, ByteParserContext};
use crate::promise::Promise;
use crate::sync::RequestQueue;
use crate::types::{ACloseable, Outcome};
use parking_lot::Mutex;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub(crate) struct ConnectionShared {
    pub(crate) id: String,
    pub(crate) host: Option<String>,
    pub(crate) config: HttpConfig,
    pub(crate) channel: BoxChannel,
    pub(crate) parser: Arc<ByteParserContext>,
    pub(crate) generator: Arc<ByteGeneratorContext>,
    pub(crate) local: Option<SocketAddr>,
    pub(crate) remote: Option<SocketAddr>,
    queue: RequestQueue,
    finished: AtomicBool,
    closed: AtomicBool,
    current: Mutex<Option<HttpRequest>>,
}

/// Client side of one HTTP/1.x connection.
///
/// Requests run strictly one after another: [`next`](Self::next) yields a
/// new [`HttpRequest`] once the previous one finished and left the
/// connection reusable, and `None` after that stops being the case.
#[derive(Clone)]
pub struct HttpClientConnection {
    shared: Arc<ConnectionShared>,
}

impl HttpClientConnection {
    /// Wraps a connected channel.
    ///
    /// `host` is the authority the channel is connected to; requests for
    /// that authority use origin-form targets, others absolute-form.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        channel: BoxChannel,
        host: Option<String>,
        config: &HttpConfig,
    ) -> Self {
        Self::with_addresses(id, channel, host, config, None, None)
    }

    /// Like [`new`](Self::new), recording the socket addresses.
    #[must_use]
    pub fn with_addresses(
        id: impl Into<String>,
        channel: BoxChannel,
        host: Option<String>,
        config: &HttpConfig,
        local: Option<SocketAddr>,
        remote: Option<SocketAddr>,
    ) -> Self {
        let parser = Arc::new(ByteParserContext::new(channel.input(), config.buffer_size));
        let generator = Arc::new(ByteGeneratorContext::new(channel.output(), config.buffer_size));
        Self {
            shared: Arc::new(ConnectionShared {
                id: id.into(),
                host,
                config: config.clone(),
                channel,
                parser,
                generator,
                local,
                remote,
                queue: RequestQueue::new(),
                finished: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                current: Mutex::new(None),
            }),
        }
    }

    /// Connection id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Peer address, if known.
    #[must_use]
    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.shared.remote
    }

    /// Local address, if known.
    #[must_use]
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.shared.local
    }

    /// The next request on this connection, or `None` once the connection
    /// can no longer be reused.
    pub fn next(&self) -> Promise<Option<HttpRequest>> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Promise::failure(Error::closed("The connection is closed"));
        }
        let (promise, resolver) = Promise::pending();
        let shared = Arc::clone(&self.shared);
        let handed_out = resolver.clone();
        let exchange = self.shared.queue.run_future(async move {
            if shared.finished.load(Ordering::Acquire) || shared.closed.load(Ordering::Acquire) {
                handed_out.success(None);
                return Ok(());
            }
            let request = HttpRequest::new(Arc::clone(&shared));
            *shared.current.lock() = Some(request.clone());
            handed_out.success(Some(request.clone()));
            let finished = request.finished().await;
            shared.current.lock().take();
            match finished {
                Ok(true) => Ok(()),
                Ok(false) => {
                    shared.finished.store(true, Ordering::Release);
                    tracing::debug!(connection = %shared.id, "connection not reusable");
                    Ok(())
                }
                Err(error) => Err(error),
            }
        });
        let shared = Arc::clone(&self.shared);
        exchange.listen_sync(move |outcome| {
            if let Outcome::Failure(error) = outcome {
                shared.finished.store(true, Ordering::Release);
                shared.current.lock().take();
                tracing::debug!(connection = %shared.id, %error, "request failed, connection finished");
                resolver.fail(error.clone());
            }
        });
        promise
    }
}

impl ACloseable for HttpClientConnection {
    fn close(&self) -> Promise<()> {
        let shared = Arc::clone(&self.shared);
        crate::runtime::spawn_default(async move {
            if shared.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            shared.finished.store(true, Ordering::Release);
            let current = shared.current.lock().take();
            if let Some(request) = current {
                if let Err(error) = request.close().await {
                    tracing::debug!(connection = %shared.id, %error, "failed to close request");
                }
            }
            let sent = shared.generator.send().await;
            let closed = shared.channel.close().await;
            tracing::debug!(connection = %shared.id, "closed client connection");
            sent.and(closed)
        })
    }
}

impl fmt::Debug for HttpClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClientConnection")
            .field("id", &self.shared.id)
            .field("host", &self.shared.host)
            .field("finished", &self.shared.finished.load(Ordering::Relaxed))
            .field("closed", &self.shared.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
