//! Pooling client over [`HttpClientConnection`]s.

use super::connection::HttpClientConnection;
use super::request::{BodyLength, HttpRequest};
use super::response::HttpResponse;
use crate::config::HttpConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::http::h1::headers::HttpHeaders;
use crate::http::h1::scope::{CONNECTION_HOST, Scope};
use crate::http::h1::types::Method;
use crate::http::h1::uri::Uri;
use crate::io::BoxOutput;
use crate::net::{BoxSocketFactory, SocketChannel, SocketOptions};
use crate::promise::{Promise, Resolver};
use crate::runtime::{run_blocking, spawn_default};
use crate::types::ACloseable;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

/// Where a pooled connection goes: lowercased scheme and host plus port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PoolKey {
    scheme: String,
    host: String,
    port: u16,
}

impl PoolKey {
    fn of(uri: &Uri, connection_host: Option<&str>) -> Result<Self> {
        let scheme = uri
            .scheme()
            .ok_or_else(|| Error::usage(format!("The URI must be absolute: {uri}")))?
            .to_ascii_lowercase();
        let target = match connection_host {
            Some(authority) => Uri::from_authority(&scheme, authority)?,
            None => uri.clone(),
        };
        let host = target
            .host()
            .ok_or_else(|| Error::usage(format!("BAD URI: {uri}")))?
            .to_ascii_lowercase();
        let port = target
            .port_or_default()
            .ok_or_else(|| Error::usage(format!("BAD URI: {uri}")))?;
        Ok(Self { scheme, host, port })
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

struct PooledConnection {
    id: String,
    key: PoolKey,
    connection: HttpClientConnection,
    ready: Mutex<Option<(HttpRequest, Instant)>>,
}

impl PooledConnection {
    fn is_expired(&self, now: Instant, idle_limit: std::time::Duration) -> bool {
        !idle_limit.is_zero()
            && self
                .ready
                .lock()
                .as_ref()
                .is_some_and(|(_, since)| now.duration_since(*since) > idle_limit)
    }
}

struct ClientShared {
    factory: BoxSocketFactory,
    config: HttpConfig,
    pool: Mutex<HashMap<PoolKey, Vec<Arc<PooledConnection>>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl ClientShared {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::closed("The client is closed"));
        }
        Ok(())
    }

    /// Closes connections idle for longer than the configured timeout.
    fn sweep(&self) {
        let now = Instant::now();
        let idle_limit = self.config.idle_timeout();
        let mut expired = Vec::new();
        self.pool.lock().retain(|_, connections| {
            connections.retain(|pooled| {
                if pooled.is_expired(now, idle_limit) {
                    expired.push(Arc::clone(pooled));
                    false
                } else {
                    true
                }
            });
            !connections.is_empty()
        });
        for pooled in expired {
            tracing::debug!(
                connection = %pooled.id,
                local = ?pooled.connection.local_address(),
                remote = ?pooled.connection.remote_address(),
                "closing cached connection"
            );
            let _closed = pooled.connection.close();
        }
    }

    fn peek_ready(&self, key: &PoolKey) -> Option<(Arc<PooledConnection>, HttpRequest)> {
        self.sweep();
        let pool = self.pool.lock();
        pool.get(key)?.iter().find_map(|pooled| {
            let (request, _) = pooled.ready.lock().take()?;
            Some((Arc::clone(pooled), request))
        })
    }

    fn register(&self, pooled: &Arc<PooledConnection>) {
        self.pool
            .lock()
            .entry(pooled.key.clone())
            .or_default()
            .push(Arc::clone(pooled));
    }

    fn remove(&self, pooled: &Arc<PooledConnection>) {
        let mut pool = self.pool.lock();
        if let Some(connections) = pool.get_mut(&pooled.key) {
            connections.retain(|other| !Arc::ptr_eq(other, pooled));
            if connections.is_empty() {
                pool.remove(&pooled.key);
            }
        }
    }
}

fn resolve(host: String, port: u16) -> Promise<SocketAddr> {
    run_blocking(move || {
        (host.as_str(), port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::new(ErrorKind::Io, format!("No address for {host}:{port}")))
    })
}

/// `TCP_NODELAY`, plus the idle timeout on every socket read and write.
fn connection_options(config: &HttpConfig) -> SocketOptions {
    let timeout = (config.idle_timeout_ms > 0).then_some(config.idle_timeout_ms);
    SocketOptions {
        read_timeout_ms: timeout,
        write_timeout_ms: timeout,
        ..SocketOptions::no_delay()
    }
}

async fn connect(
    shared: &Arc<ClientShared>,
    key: &PoolKey,
) -> Result<(Arc<PooledConnection>, HttpRequest)> {
    shared.ensure_open()?;
    let socket = shared.factory.make_socket().await?;
    let connected = async {
        socket.set_options(connection_options(&shared.config)).await?;
        let address = resolve(key.host.clone(), key.port).await?;
        socket.connect(address).await?;
        let local = socket.local_address().await.ok();
        let id = format!("httpClient:{}", shared.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(connection = %id, %key, %address, "starting connection");
        let connection = HttpClientConnection::with_addresses(
            id.clone(),
            Arc::new(SocketChannel(Arc::clone(&socket))),
            None,
            &shared.config,
            local,
            Some(address),
        );
        let request = connection
            .next()
            .await?
            .ok_or_else(|| Error::protocol("Connection is broken!"))?;
        shared.ensure_open()?;
        Ok((
            Arc::new(PooledConnection {
                id,
                key: key.clone(),
                connection,
                ready: Mutex::new(None),
            }),
            request,
        ))
    }
    .await;
    if connected.is_err() {
        if let Err(error) = socket.close().await {
            tracing::debug!(%key, %error, "failed to close socket");
        }
    }
    connected
}

/// Parks the next request of `pooled` once `request` finished, or drops
/// the connection if it cannot be reused. Resolves with true once parked.
fn recycle(
    shared: &Arc<ClientShared>,
    pooled: Arc<PooledConnection>,
    request: &HttpRequest,
) -> Promise<bool> {
    let shared: Weak<ClientShared> = Arc::downgrade(shared);
    let finished = request.finished();
    spawn_default(async move {
        let reusable = finished.await.unwrap_or(false);
        let next = if reusable {
            pooled.connection.next().await.ok().flatten()
        } else {
            None
        };
        let shared = shared
            .upgrade()
            .filter(|shared| !shared.closed.load(Ordering::Acquire));
        match (shared, next) {
            (Some(_), Some(request)) => {
                *pooled.ready.lock() = Some((request, Instant::now()));
                Ok(true)
            }
            (shared, _) => {
                if let Some(shared) = shared {
                    shared.remove(&pooled);
                }
                tracing::debug!(connection = %pooled.id, key = %pooled.key, "connection finished");
                pooled.connection.close().await?;
                Ok(false)
            }
        }
    })
}

fn is_retryable(error: &Error) -> bool {
    matches!(error.kind(), ErrorKind::Io | ErrorKind::Closed)
}

/// An HTTP client keeping idle connections for reuse.
///
/// Connections are pooled per scheme, host and port. Only `http` URIs are
/// supported. A request that fails on a pooled connection with an I/O or
/// closed error is retried on another one.
#[derive(Clone)]
pub struct SimpleHttpClient {
    shared: Arc<ClientShared>,
}

impl SimpleHttpClient {
    /// Creates a client opening sockets with `factory`.
    #[must_use]
    pub fn new(factory: BoxSocketFactory, config: HttpConfig) -> Self {
        Self {
            shared: Arc::new(ClientShared {
                factory,
                config,
                pool: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Client configuration.
    #[must_use]
    pub fn config(&self) -> &HttpConfig {
        &self.shared.config
    }

    /// Number of pooled connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.shared.pool.lock().values().map(Vec::len).sum()
    }

    /// Starts a new request; the connection is chosen when the request
    /// head is sent.
    #[must_use]
    pub fn new_request(&self) -> ClientRequest {
        let (ready, ready_resolver) = Promise::pending();
        let (finished, finished_resolver) = Promise::pending();
        ClientRequest {
            inner: Arc::new(ClientRequestInner {
                client: Arc::clone(&self.shared),
                scope: Scope::new(),
                request: Mutex::new(None),
                ready,
                ready_resolver,
                finished,
                finished_resolver,
            }),
        }
    }
}

impl ACloseable for SimpleHttpClient {
    fn close(&self) -> Promise<()> {
        let shared = Arc::clone(&self.shared);
        spawn_default(async move {
            if shared.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            let pooled: Vec<_> = shared.pool.lock().drain().flat_map(|(_, list)| list).collect();
            for pooled in pooled {
                if let Err(error) = pooled.connection.close().await {
                    tracing::debug!(connection = %pooled.id, %error, "failed to close connection");
                }
            }
            Ok(())
        })
    }
}

impl fmt::Debug for SimpleHttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleHttpClient")
            .field("connections", &self.connection_count())
            .field("closed", &self.shared.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

struct ClientRequestInner {
    client: Arc<ClientShared>,
    scope: Scope,
    request: Mutex<Option<HttpRequest>>,
    ready: Promise<HttpRequest>,
    ready_resolver: Resolver<HttpRequest>,
    finished: Promise<bool>,
    finished_resolver: Resolver<bool>,
}

impl ClientRequestInner {
    fn attach(&self, request: &HttpRequest, recycled: &Promise<bool>) {
        tracing::debug!(request = ?request, "request ready");
        *self.request.lock() = Some(request.clone());
        recycled.forward(self.finished_resolver.clone());
        self.ready_resolver.success(request.clone());
    }

    async fn send(
        &self,
        method: Method,
        uri: &Uri,
        headers: HttpHeaders,
        length: BodyLength,
    ) -> Result<BoxOutput> {
        match uri.scheme() {
            Some(scheme) if scheme.eq_ignore_ascii_case("http") => {}
            scheme => {
                return Err(Error::usage(format!(
                    "Protocol not supported: {}",
                    scheme.unwrap_or("")
                )));
            }
        }
        if uri.userinfo().is_some() {
            return Err(Error::usage(
                "UserInfo component must be blank, use headers.",
            ));
        }
        let client = &self.client;
        let key = PoolKey::of(uri, self.scope.get(&CONNECTION_HOST).as_deref())?;
        loop {
            client.ensure_open()?;
            let Some((pooled, request)) = client.peek_ready(&key) else {
                break;
            };
            let recycled = recycle(client, pooled, &request);
            request.set_scope(self.scope.clone());
            match request
                .request(method.clone(), uri, headers.clone(), length)
                .await
            {
                Ok(output) => {
                    self.attach(&request, &recycled);
                    return Ok(output);
                }
                Err(error) if is_retryable(&error) => {
                    tracing::debug!(%key, %error, "retrying on another connection");
                }
                Err(error) => return Err(error),
            }
        }
        let (pooled, request) = connect(client, &key).await?;
        client.register(&pooled);
        let recycled = recycle(client, pooled, &request);
        request.set_scope(self.scope.clone());
        self.attach(&request, &recycled);
        request.request(method, uri, headers, length).await
    }
}

/// A request sent through [`SimpleHttpClient`].
#[derive(Clone)]
pub struct ClientRequest {
    inner: Arc<ClientRequestInner>,
}

impl ClientRequest {
    /// Values scoped to this request.
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.inner.scope
    }

    /// Picks or opens a connection, writes the request head and returns the
    /// body output.
    pub fn request(
        &self,
        method: Method,
        uri: &Uri,
        headers: HttpHeaders,
        length: BodyLength,
    ) -> Promise<BoxOutput> {
        let inner = Arc::clone(&self.inner);
        let uri = uri.clone();
        spawn_default(async move {
            let result = inner.send(method, &uri, headers, length).await;
            if let Err(error) = &result {
                inner.ready_resolver.fail(error.clone());
                if inner.request.lock().is_none() {
                    inner.finished_resolver.fail(error.clone());
                }
            }
            result
        })
    }

    /// Reads the response once the request was sent.
    pub fn get_response(&self) -> Promise<HttpResponse> {
        let ready = self.inner.ready.clone();
        spawn_default(async move { ready.await?.get_response().await })
    }

    /// Resolves once the underlying request finished; true once its
    /// connection is back in the pool.
    #[must_use]
    pub fn finished(&self) -> Promise<bool> {
        self.inner.finished.clone()
    }
}

impl ACloseable for ClientRequest {
    fn close(&self) -> Promise<()> {
        let request = self.inner.request.lock().clone();
        match request {
            Some(request) => request.close(),
            None => {
                let error = Error::closed("Request closed");
                self.inner.ready_resolver.fail(error.clone());
                self.inner.finished_resolver.fail(error);
                Promise::void()
            }
        }
    }
}

impl fmt::Debug for ClientRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRequest")
            .field("request", &*self.inner.request.lock())
            .finish_non_exhaustive()
    }
}
