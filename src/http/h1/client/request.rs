//! One request/response exchange on a client connection.

use super::connection::ConnectionShared;
use super::response::HttpResponse;
use crate::error::{Error, Result};
use crate::http::h1::content::{
    Framing, InputContext, InputState, OutputContext, OutputState, RestOfStreamInput,
    RestOfStreamOutput, StateListener, select_input, select_output, transfer_encodings_for,
};
use crate::http::h1::headers::{self, EXPECT, EXPECT_CONTINUE, HttpHeaders, TRAILER, USER_AGENT};
use crate::http::h1::message::{RequestMessage, ResponseMessage};
use crate::http::h1::scope::{
    CONNECTION_HOST, CONTINUE_LISTENER, FORCE_VERSION, LAST_EXCHANGE, Scope, TRAILERS_NAMES,
    TRAILERS_PROVIDER,
};
use crate::http::h1::transfer::TransferEncoding;
use crate::http::h1::types::{Method, Version, is_switch_protocol, status};
use crate::http::h1::uri::Uri;
use crate::io::{BoxChannel, BoxInput, BoxOutput, SimpleChannel};
use crate::promise::{Promise, Resolver};
use crate::runtime::spawn_default;
use crate::types::{ACloseable, Outcome};
use parking_lot::Mutex;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// How the request body is framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLength {
    /// No body; no framing headers are sent.
    NoContent,
    /// A body of exactly this many bytes.
    Exact(u64),
    /// A body of unknown length, sent chunked.
    Streamed,
}

struct RequestState {
    request_started: bool,
    response_started: bool,
    switched: bool,
    can_continue: bool,
    closed: bool,
    failure: Option<Error>,
    method: Method,
    input: Option<BoxInput>,
    output: Option<BoxOutput>,
    input_state: Option<InputState>,
    output_state: Option<OutputState>,
}

struct RequestInner {
    connection: Arc<ConnectionShared>,
    scope: Mutex<Scope>,
    trailers: Promise<Option<HttpHeaders>>,
    trailers_resolver: Resolver<Option<HttpHeaders>>,
    finished: Promise<bool>,
    finished_resolver: Resolver<bool>,
    state: Mutex<RequestState>,
}

/// A request being sent on an [`HttpClientConnection`](super::HttpClientConnection).
///
/// Call [`request`](Self::request), write and close the returned body, then
/// call [`get_response`](Self::get_response) and read the response body to
/// its end. The request closes itself once both bodies are closed; closing
/// it earlier leaves the connection unusable for further requests.
#[derive(Clone)]
pub struct HttpRequest {
    inner: Arc<RequestInner>,
}

impl HttpRequest {
    pub(crate) fn new(connection: Arc<ConnectionShared>) -> Self {
        let (trailers, trailers_resolver) = Promise::pending();
        let (finished, finished_resolver) = Promise::pending();
        Self {
            inner: Arc::new(RequestInner {
                connection,
                scope: Mutex::new(Scope::new()),
                trailers,
                trailers_resolver,
                finished,
                finished_resolver,
                state: Mutex::new(RequestState {
                    request_started: false,
                    response_started: false,
                    switched: false,
                    can_continue: true,
                    closed: false,
                    failure: None,
                    method: Method::Get,
                    input: None,
                    output: None,
                    input_state: None,
                    output_state: None,
                }),
            }),
        }
    }

    /// Values scoped to this request, such as [`FORCE_VERSION`] or
    /// [`CONTINUE_LISTENER`].
    #[must_use]
    pub fn scope(&self) -> Scope {
        self.inner.scope.lock().clone()
    }

    pub(crate) fn set_scope(&self, scope: Scope) {
        *self.inner.scope.lock() = scope;
    }

    /// Peer address, if known.
    #[must_use]
    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.inner.connection.remote
    }

    /// Local address, if known.
    #[must_use]
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.inner.connection.local
    }

    /// Resolves with true once the request is closed and the connection
    /// may carry another request.
    #[must_use]
    pub fn finished(&self) -> Promise<bool> {
        self.inner.finished.clone()
    }

    /// Response trailers; `None` when the response body cannot carry them.
    #[must_use]
    pub fn trailers(&self) -> Promise<Option<HttpHeaders>> {
        self.inner.trailers.clone()
    }

    /// Writes the request head and returns the body output.
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
            let result = inner.request(method, &uri, headers, length).await;
            if let Err(error) = &result {
                inner.invalidate(error.clone());
            }
            result
        })
    }

    /// Reads the final response head, skipping informational responses.
    pub fn get_response(&self) -> Promise<HttpResponse> {
        let inner = Arc::clone(&self.inner);
        spawn_default(async move {
            let result = inner.get_response().await;
            if let Err(error) = &result {
                inner.invalidate(error.clone());
            }
            result
        })
    }
}

impl ACloseable for HttpRequest {
    fn close(&self) -> Promise<()> {
        RequestInner::close(&self.inner)
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("HttpRequest")
            .field("connection", &self.inner.connection.id)
            .field("input_state", &state.input_state)
            .field("output_state", &state.output_state)
            .field("can_continue", &state.can_continue)
            .finish_non_exhaustive()
    }
}

impl RequestInner {
    fn ensure_valid_and_open(&self) -> Result<()> {
        let state = self.state.lock();
        if let Some(failure) = &state.failure {
            return Err(failure.clone());
        }
        if state.closed {
            return Err(Error::closed("The request is closed"));
        }
        Ok(())
    }

    fn scope(&self) -> Scope {
        self.scope.lock().clone()
    }

    fn notify_continue(&self) {
        if let Some(listener) = self.scope().remove(&CONTINUE_LISTENER) {
            listener.success(());
        }
    }

    fn invalidate(self: &Arc<Self>, error: Error) {
        {
            let mut state = self.state.lock();
            if state.failure.is_some() {
                return;
            }
            state.failure = Some(error.clone());
            state.can_continue = false;
        }
        tracing::debug!(connection = %self.connection.id, %error, "client request invalidated");
        if let Some(listener) = self.scope().remove(&CONTINUE_LISTENER) {
            listener.fail(error);
        }
        let _closed = Self::close(self);
    }

    fn check_auto_close(self: &Arc<Self>) {
        let ready = {
            let state = self.state.lock();
            if state.closed {
                return;
            }
            let input_done = matches!(
                state.input_state,
                Some(InputState::Closed | InputState::ClosedBeforeEof | InputState::Error)
            );
            let output_done = matches!(
                state.output_state,
                Some(OutputState::Closed | OutputState::ClosedLast | OutputState::Error)
            );
            state.failure.is_some() || (input_done && output_done)
        };
        if ready {
            let _closed = Self::close(self);
        }
    }

    fn input_tracker(self: &Arc<Self>) -> StateListener<InputState> {
        let weak = Arc::downgrade(self);
        Arc::new(move |outcome| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let (current, switched) = {
                let mut state = inner.state.lock();
                let current = match &outcome {
                    Outcome::Success(current) => *current,
                    Outcome::Failure(_) => InputState::Error,
                };
                state.input_state = Some(current);
                (current, state.switched)
            };
            if switched && current.is_terminal() {
                let _closed = inner.connection.channel.input().close();
            }
            if let Outcome::Failure(error) = outcome {
                inner.invalidate(error);
            }
            inner.check_auto_close();
        })
    }

    fn output_tracker(self: &Arc<Self>) -> StateListener<OutputState> {
        let weak = Arc::downgrade(self);
        Arc::new(move |outcome| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let (current, switched) = {
                let mut state = inner.state.lock();
                let current = match &outcome {
                    Outcome::Success(current) => *current,
                    Outcome::Failure(_) => OutputState::Error,
                };
                state.output_state = Some(current);
                (current, state.switched)
            };
            if switched && current.is_terminal() {
                let _closed = inner.connection.channel.output().close();
            }
            if let Outcome::Failure(error) = outcome {
                inner.invalidate(error);
            }
            inner.check_auto_close();
        })
    }

    async fn request(
        self: &Arc<Self>,
        method: Method,
        uri: &Uri,
        headers: HttpHeaders,
        length: BodyLength,
    ) -> Result<BoxOutput> {
        {
            let mut state = self.state.lock();
            if state.request_started {
                return Err(Error::usage("The request is already started"));
            }
            state.request_started = true;
        }
        self.ensure_valid_and_open()?;
        let scope = self.scope();
        let version = scope.get(&FORCE_VERSION).unwrap_or(Version::Http11);
        let connection_host = scope
            .get(&CONNECTION_HOST)
            .or_else(|| self.connection.host.clone());
        let mut message = RequestMessage::for_client(
            method.clone(),
            uri,
            version,
            headers,
            connection_host.as_deref(),
        )?;
        let (content_length, encodings) = match length {
            BodyLength::NoContent => (Some(0), Vec::new()),
            BodyLength::Exact(length) => (Some(length), Vec::new()),
            BodyLength::Streamed if version == Version::Http10 => {
                return Err(Error::usage(
                    "HTTP/1.0 requests need a known body length",
                ));
            }
            BodyLength::Streamed => (None, transfer_encodings_for(version, None)),
        };
        let trailers = if TransferEncoding::is_chunked(&encodings) {
            scope.get(&TRAILERS_PROVIDER)
        } else {
            None
        };
        if trailers.is_some() {
            if let Some(names) = scope.get(&TRAILERS_NAMES) {
                message.headers.set(TRAILER, headers::list_value(names.as_slice()));
            }
        }
        let info = select_output(
            &Framing {
                method: &method,
                status: None,
                encodings,
                content_length,
            },
            OutputContext {
                generator: Arc::clone(&self.connection.generator),
                listener: Some(self.output_tracker()),
                trailers,
            },
        )?;
        if length != BodyLength::NoContent {
            headers::set_message_body_headers(
                &mut message.headers,
                &info.encodings,
                info.content_length,
            );
        }
        if version == Version::Http11 {
            if scope.contains(&CONTINUE_LISTENER) {
                message.headers.set(EXPECT, EXPECT_CONTINUE);
            } else {
                message.headers.remove(EXPECT);
            }
        } else {
            self.notify_continue();
        }
        let last = {
            let mut state = self.state.lock();
            state.method = method;
            if info.rest_of_stream || scope.get_or_default(&LAST_EXCHANGE) {
                state.can_continue = false;
            }
            state.output = Some(Arc::clone(&info.stream));
            !state.can_continue
        };
        headers::set_last_message_header(&mut message.headers, version, last);
        message
            .headers
            .set_if_missing(USER_AGENT, self.connection.config.user_agent.clone());
        tracing::debug!(
            connection = %self.connection.id,
            method = %message.method.as_str(),
            target = %message.target,
            "sending request"
        );
        let generator = &self.connection.generator;
        message.write_to(generator);
        generator.send().await?;
        Ok(info.stream)
    }

    async fn read_final_head(&self) -> Result<ResponseMessage> {
        loop {
            let response =
                ResponseMessage::read(&self.connection.parser, &self.connection.config).await?;
            match response.status {
                status::CONTINUE => self.notify_continue(),
                status::SWITCHING_PROTOCOLS => return Ok(response),
                code if status::is_informational(code) => {}
                _ => return Ok(response),
            }
        }
    }

    async fn get_response(self: &Arc<Self>) -> Result<HttpResponse> {
        {
            let mut state = self.state.lock();
            if state.response_started {
                return Err(Error::usage("Response could be requested only once"));
            }
            if !state.request_started {
                return Err(Error::usage("The request is not started"));
            }
            state.response_started = true;
        }
        self.ensure_valid_and_open()?;
        let response = self.read_final_head().await?;
        let method = self.state.lock().method.clone();
        if is_switch_protocol(&method, response.status) {
            self.switch_protocol(response).await
        } else {
            self.normal_response(&method, response)
        }
    }

    fn normal_response(
        self: &Arc<Self>,
        method: &Method,
        response: ResponseMessage,
    ) -> Result<HttpResponse> {
        if !headers::keeps_alive(response.version, &response.headers) {
            self.state.lock().can_continue = false;
        }
        let framing = Framing {
            method,
            status: Some(response.status),
            encodings: headers::transfer_encodings(&response.headers)?,
            content_length: headers::content_length(&response.headers)?,
        };
        let info = select_input(
            &framing,
            InputContext {
                parser: Arc::clone(&self.connection.parser),
                listener: Some(self.input_tracker()),
                trailers: Some(self.trailers_resolver.clone()),
                config: self.connection.config.clone(),
            },
        )?;
        {
            let mut state = self.state.lock();
            if info.rest_of_stream {
                state.can_continue = false;
            }
            state.input = Some(Arc::clone(&info.stream));
        }
        tracing::debug!(
            connection = %self.connection.id,
            status = response.status,
            "received response"
        );
        Ok(HttpResponse {
            version: response.version,
            status: response.status,
            reason: response.reason,
            headers: response.headers,
            content_length: info.content_length,
            input: Some(info.stream),
            channel: None,
            trailers: self.trailers.clone(),
        })
    }

    async fn switch_protocol(self: &Arc<Self>, response: ResponseMessage) -> Result<HttpResponse> {
        let output = self.state.lock().output.clone();
        if let Some(output) = output {
            output.close().await?;
        }
        let output_state = self.state.lock().output_state;
        if output_state != Some(OutputState::Closed) {
            return Err(Error::protocol(format!(
                "Output stream must be closed before switching protocols: {output_state:?}"
            )));
        }
        {
            let mut state = self.state.lock();
            state.can_continue = false;
            state.switched = true;
            state.output_state = None;
        }
        self.trailers_resolver.success(None);
        let input: BoxInput = Arc::new(RestOfStreamInput::new(
            Arc::clone(&self.connection.parser),
            Some(self.input_tracker()),
        ));
        let output: BoxOutput = Arc::new(RestOfStreamOutput::new(
            Arc::clone(&self.connection.generator),
            Some(self.output_tracker()),
        ));
        {
            let mut state = self.state.lock();
            state.input = Some(Arc::clone(&input));
            state.output = Some(Arc::clone(&output));
        }
        let channel: BoxChannel = Arc::new(SimpleChannel::new(input, output));
        Ok(HttpResponse {
            version: response.version,
            status: response.status,
            reason: response.reason,
            headers: response.headers,
            content_length: None,
            input: None,
            channel: Some(channel),
            trailers: self.trailers.clone(),
        })
    }

    fn close(this: &Arc<Self>) -> Promise<()> {
        {
            let mut state = this.state.lock();
            if state.closed {
                return this.finished.to_void();
            }
            state.closed = true;
        }
        let inner = Arc::clone(this);
        spawn_default(async move {
            let (input, output) = {
                let state = inner.state.lock();
                (state.input.clone(), state.output.clone())
            };
            match input {
                Some(input) => {
                    if let Err(error) = input.close().await {
                        tracing::debug!(connection = %inner.connection.id, %error, "failed to close response body");
                    }
                }
                None => inner.state.lock().can_continue = false,
            }
            match output {
                Some(output) => {
                    if let Err(error) = output.close().await {
                        tracing::debug!(connection = %inner.connection.id, %error, "failed to close request body");
                    }
                }
                None => inner.state.lock().can_continue = false,
            }
            let reusable = {
                let mut state = inner.state.lock();
                if state.failure.is_some()
                    || state.input_state != Some(InputState::Closed)
                    || state.output_state != Some(OutputState::Closed)
                {
                    state.can_continue = false;
                }
                state.can_continue
            };
            inner.trailers_resolver.success(None);
            inner.finished_resolver.success(reusable);
            Ok(())
        })
    }
}
