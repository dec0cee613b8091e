//! Built-in handlers and reply helpers.

use super::{AHttpHandler, BoxHttpHandler, HttpExchange};
use crate::error::Error;
use crate::http::h1::headers::{ALLOW, CONTENT_TYPE, CONTENT_TYPE_HTML_UTF8, HttpHeaders, TE};
use crate::http::h1::scope::BAD_REQUEST_PROBLEM;
use crate::http::h1::types::{Method, default_reason, status};
use crate::io::AOutput;
use crate::promise::Promise;
use crate::runtime::spawn_default;
use std::fmt;
use std::sync::Arc;

/// Replies with a small HTML page of known length.
///
/// The body is skipped for `HEAD` requests; the headers still announce its
/// length.
pub fn short_reply(exchange: &HttpExchange, status_code: u16, html: String) -> Promise<()> {
    short_reply_with_headers(exchange, status_code, html, HttpHeaders::new())
}

/// Like [`short_reply`], with extra response headers.
///
/// `Content-Type` defaults to HTML when `headers` do not set it.
pub fn short_reply_with_headers(
    exchange: &HttpExchange,
    status_code: u16,
    html: String,
    mut headers: HttpHeaders,
) -> Promise<()> {
    if headers.first(CONTENT_TYPE).is_none() {
        headers.set(CONTENT_TYPE, CONTENT_TYPE_HTML_UTF8);
    }
    let body = html.into_bytes();
    let head = exchange.method().is_head();
    let output = exchange.respond(status_code, None, headers, Some(body.len() as u64));
    spawn_default(async move {
        let output = output.await?;
        if !head {
            output.write(body).await?;
        }
        Ok(())
    })
}

/// Escapes text for use inside HTML content.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Replies to requests that failed before a response started.
///
/// Uses the status carried by the failure when it is a 4xx or 5xx code, and
/// 500 otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct BadRequestHandler;

impl AHttpHandler for BadRequestHandler {
    fn handle(&self, exchange: HttpExchange) -> Promise<()> {
        let problem = exchange.exchange_scope().get(&BAD_REQUEST_PROBLEM);
        let code = problem
            .as_ref()
            .and_then(Error::status)
            .filter(|&code| status::is_client_error(code) || status::is_server_error(code))
            .unwrap_or(status::INTERNAL_SERVER_ERROR);
        let text = problem
            .as_ref()
            .map_or_else(|| "Unknown Problem".to_owned(), |problem| problem.message().to_owned());
        tracing::debug!(exchange = %exchange.id(), code, problem = ?problem, "bad request");
        let html = format!(
            "<html><head><title>Bad Request</title></head><body><h1>{code} {}</h1><p>{}</p></body></html>",
            default_reason(code),
            escape_html(&text)
        );
        short_reply(&exchange, code, html)
    }
}

/// Replies 404 to every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotFoundHandler;

impl AHttpHandler for NotFoundHandler {
    fn handle(&self, exchange: HttpExchange) -> Promise<()> {
        let html = format!(
            "<html><head><title>404 Not Found</title></head><body><table>\
             <h1>404 Not Found</h1>\
             <tr><td>Method:</td><td>{}</td></tr>\
             <tr><td>URL:</td><td>{}</td></tr>\
             </table></body></html>",
            escape_html(exchange.method().as_str()),
            escape_html(&exchange.request_uri().to_string())
        );
        short_reply(&exchange, status::NOT_FOUND, html)
    }
}

/// Answers `OPTIONS *` for the whole server.
///
/// Replies 200 with an empty body, the `Allow` method list and the transfer
/// codings the server decodes in `TE`.
#[derive(Debug, Clone)]
pub struct ServerOptionsHandler {
    allow: String,
}

impl ServerOptionsHandler {
    /// Advertises `methods` in `Allow`.
    #[must_use]
    pub fn new<'a>(methods: impl IntoIterator<Item = &'a Method>) -> Self {
        let allow = methods
            .into_iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        Self { allow }
    }

    /// The `Allow` header value.
    #[must_use]
    pub fn allow(&self) -> &str {
        &self.allow
    }
}

impl Default for ServerOptionsHandler {
    fn default() -> Self {
        Self::new(&[
            Method::Get,
            Method::Head,
            Method::Post,
            Method::Put,
            Method::Delete,
            Method::Options,
        ])
    }
}

impl AHttpHandler for ServerOptionsHandler {
    fn handle(&self, exchange: HttpExchange) -> Promise<()> {
        let mut headers = HttpHeaders::new();
        headers.set(ALLOW, self.allow.clone());
        headers.set(TE, "gzip;q=1, deflate;q=0.9");
        short_reply_with_headers(&exchange, status::OK, String::new(), headers)
    }
}

/// Picks a handler for an exchange, or declines it.
pub trait HttpDelegate: Send + Sync {
    /// Returns the handler for `exchange`, or `None` to try the next delegate.
    fn select(&self, exchange: &HttpExchange) -> Option<BoxHttpHandler>;
}

impl<F> HttpDelegate for F
where
    F: Fn(&HttpExchange) -> Option<BoxHttpHandler> + Send + Sync,
{
    fn select(&self, exchange: &HttpExchange) -> Option<BoxHttpHandler> {
        self(exchange)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathMatch {
    Exact,
    Prefix,
}

/// Routes on method, authority and path.
///
/// Each criterion left as `None` matches anything. The authority is compared
/// case-insensitively against `host[:port]` of the effective request URI.
/// `OPTIONS *` has an empty path.
#[derive(Clone)]
pub struct PathDelegate {
    method: Option<Method>,
    authority: Option<String>,
    path: Option<String>,
    matching: PathMatch,
    handler: BoxHttpHandler,
}

impl PathDelegate {
    /// Matches the request path exactly.
    pub fn exact(
        method: Option<Method>,
        authority: Option<&str>,
        path: Option<&str>,
        handler: impl AHttpHandler + 'static,
    ) -> Self {
        Self::build(method, authority, path, PathMatch::Exact, Arc::new(handler))
    }

    /// Matches requests whose path starts with `prefix`.
    pub fn prefix(
        method: Option<Method>,
        authority: Option<&str>,
        prefix: Option<&str>,
        handler: impl AHttpHandler + 'static,
    ) -> Self {
        Self::build(method, authority, prefix, PathMatch::Prefix, Arc::new(handler))
    }

    fn build(
        method: Option<Method>,
        authority: Option<&str>,
        path: Option<&str>,
        matching: PathMatch,
        handler: BoxHttpHandler,
    ) -> Self {
        Self {
            method,
            authority: authority.map(str::to_owned),
            path: path.map(str::to_owned),
            matching,
            handler,
        }
    }

    fn matches(&self, exchange: &HttpExchange) -> bool {
        let uri = exchange.request_uri();
        if let Some(expected) = &self.authority {
            let actual = uri.authority().unwrap_or_default();
            if !expected.eq_ignore_ascii_case(&actual) {
                return false;
            }
        }
        if let Some(path) = &self.path {
            let found = match self.matching {
                PathMatch::Exact => uri.path() == path,
                PathMatch::Prefix => uri.path().starts_with(path.as_str()),
            };
            if !found {
                return false;
            }
        }
        self.method
            .as_ref()
            .is_none_or(|method| method == exchange.method())
    }
}

impl HttpDelegate for PathDelegate {
    fn select(&self, exchange: &HttpExchange) -> Option<BoxHttpHandler> {
        self.matches(exchange).then(|| Arc::clone(&self.handler))
    }
}

impl fmt::Debug for PathDelegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathDelegate")
            .field("method", &self.method)
            .field("authority", &self.authority)
            .field("path", &self.path)
            .field("prefix", &(self.matching == PathMatch::Prefix))
            .finish_non_exhaustive()
    }
}

/// Hands each exchange to the first delegate that accepts it.
///
/// Exchanges nobody accepts go to the fallback. The default instance answers
/// `OPTIONS *` with [`ServerOptionsHandler`] and everything else with
/// [`NotFoundHandler`].
pub struct DelegatingHandler {
    delegates: Vec<Arc<dyn HttpDelegate>>,
    fallback: BoxHttpHandler,
}

impl DelegatingHandler {
    /// Creates a handler with no delegates.
    pub fn new(fallback: impl AHttpHandler + 'static) -> Self {
        Self {
            delegates: Vec::new(),
            fallback: Arc::new(fallback),
        }
    }

    /// Appends a delegate; earlier delegates are tried first.
    #[must_use]
    pub fn with_delegate(mut self, delegate: impl HttpDelegate + 'static) -> Self {
        self.delegates.push(Arc::new(delegate));
        self
    }

    /// Appends a delegate in place.
    pub fn add_delegate(&mut self, delegate: impl HttpDelegate + 'static) {
        self.delegates.push(Arc::new(delegate));
    }

    /// Replaces the fallback handler.
    pub fn set_fallback(&mut self, fallback: impl AHttpHandler + 'static) {
        self.fallback = Arc::new(fallback);
    }

    /// Number of delegates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.delegates.len()
    }

    /// Returns true if only the fallback is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.delegates.is_empty()
    }
}

impl Default for DelegatingHandler {
    fn default() -> Self {
        let server_options = PathDelegate::exact(
            Some(Method::Options),
            None,
            Some(""),
            ServerOptionsHandler::default(),
        );
        Self::new(Self::new(NotFoundHandler).with_delegate(server_options))
    }
}

impl AHttpHandler for DelegatingHandler {
    fn handle(&self, exchange: HttpExchange) -> Promise<()> {
        let selected = self
            .delegates
            .iter()
            .find_map(|delegate| delegate.select(&exchange));
        match selected {
            Some(handler) => handler.handle(exchange),
            None => self.fallback.handle(exchange),
        }
    }
}

impl fmt::Debug for DelegatingHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegatingHandler")
            .field("delegates", &self.delegates.len())
            .finish_non_exhaustive()
    }
}
