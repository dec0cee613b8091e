//! One request/response exchange on a server connection.

use super::connection::ConnectionContext;
use super::event::ExchangeFinishedEvent;
use crate::error::{Error, ErrorKind, Result};
use crate::http::h1::content::{
    Framing, InputContext, InputState, OutputContext, OutputState, RestOfStreamInput,
    RestOfStreamOutput, StateListener, select_input, select_output, transfer_encodings_for,
};
use crate::http::h1::headers::{
    self, CONTENT_LENGTH, DATE, EXPECT, EXPECT_CONTINUE, HttpHeaders, SERVER, TE, TE_TRAILERS,
    TRAILER, TRANSFER_ENCODING,
};
use crate::http::h1::message::{RequestMessage, ResponseMessage};
use crate::http::h1::scope::{
    BAD_REQUEST_PROBLEM, LAST_EXCHANGE, SWITCH_NO_REPLY, Scope, TRAILERS_NAMES,
    TRAILERS_PROVIDER,
};
use crate::http::h1::transfer::TransferEncoding;
use crate::http::h1::types::{Method, Version, is_switch_protocol, status};
use crate::http::h1::uri::Uri;
use crate::io::{
    BoxChannel, BoxInput, BoxOutput, CountingInput, CountingOutput, SimpleChannel,
    StreamFinishedEvent,
};
use crate::promise::{Promise, Resolver};
use crate::sync::RequestQueue;
use crate::types::{ACloseable, Outcome};
use chrono::Utc;
use parking_lot::Mutex;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

#[derive(Default)]
struct ExchangeState {
    can_continue: bool,
    response_started: bool,
    continue_sent: bool,
    switched: bool,
    input: Option<BoxInput>,
    output: Option<BoxOutput>,
    input_state: Option<InputState>,
    output_state: Option<OutputState>,
    input_length: Option<u64>,
    status: Option<u16>,
    reason: Option<String>,
    received: Option<StreamFinishedEvent>,
    sent: Option<StreamFinishedEvent>,
    received_switched: Option<StreamFinishedEvent>,
    sent_switched: Option<StreamFinishedEvent>,
}

struct ExchangeInner {
    id: String,
    connection: Arc<ConnectionContext>,
    request: RequestMessage,
    uri: Uri,
    scope: Scope,
    trailers: Promise<Option<HttpHeaders>>,
    trailers_resolver: Resolver<Option<HttpHeaders>>,
    responses: RequestQueue,
    state: Mutex<ExchangeState>,
}

/// A server exchange as seen by a handler.
///
/// Clones share the exchange. The handler reads the request body from
/// [`input`](Self::input), then starts the response with
/// [`respond`](Self::respond) and writes the returned body stream. Body
/// streams left open by the handler are closed when its promise resolves.
#[derive(Clone)]
pub struct HttpExchange {
    inner: Arc<ExchangeInner>,
}

impl HttpExchange {
    fn create(
        connection: &Arc<ConnectionContext>,
        number: u64,
        request: RequestMessage,
        uri: Uri,
    ) -> Self {
        let (trailers, trailers_resolver) = Promise::pending();
        Self {
            inner: Arc::new(ExchangeInner {
                id: format!("{}.{}", connection.id, number),
                connection: Arc::clone(connection),
                request,
                uri,
                scope: Scope::new(),
                trailers,
                trailers_resolver,
                responses: RequestQueue::new(),
                state: Mutex::new(ExchangeState {
                    can_continue: true,
                    ..ExchangeState::default()
                }),
            }),
        }
    }

    /// Exchange id, `connection.exchange`.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Request method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.inner.request.method
    }

    /// Request protocol version.
    #[must_use]
    pub fn version(&self) -> Version {
        self.inner.request.version
    }

    /// Effective request URI.
    #[must_use]
    pub fn request_uri(&self) -> &Uri {
        &self.inner.uri
    }

    /// Request headers.
    #[must_use]
    pub fn request_headers(&self) -> &HttpHeaders {
        &self.inner.request.headers
    }

    /// Request body; `None` if the request could not be framed.
    #[must_use]
    pub fn input(&self) -> Option<BoxInput> {
        self.inner.state.lock().input.clone()
    }

    /// Declared request body length.
    #[must_use]
    pub fn input_length(&self) -> Option<u64> {
        self.inner.state.lock().input_length
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

    /// Values scoped to this exchange.
    #[must_use]
    pub fn exchange_scope(&self) -> &Scope {
        &self.inner.scope
    }

    /// Values shared by the whole server.
    #[must_use]
    pub fn server_scope(&self) -> &Scope {
        self.inner.connection.server.scope()
    }

    /// Request trailers; `None` when the request body cannot carry them.
    ///
    /// Resolves once the request body was read to its end.
    #[must_use]
    pub fn read_trailers(&self) -> Promise<Option<HttpHeaders>> {
        self.inner.trailers.clone()
    }

    /// Sends a 1xx response ahead of the final one.
    ///
    /// Does nothing once the final response has started.
    pub fn intermediate_response(
        &self,
        status_code: u16,
        reason: Option<&str>,
        headers: HttpHeaders,
    ) -> Promise<()> {
        if !status::is_informational(status_code) || status_code == status::SWITCHING_PROTOCOLS {
            return Promise::failure(Error::usage(format!(
                "Not an intermediate status: {status_code}"
            )));
        }
        let inner = Arc::clone(&self.inner);
        let reason = reason.map(str::to_owned);
        self.inner.responses.run_future(async move {
            if inner.state.lock().response_started {
                return Ok(());
            }
            let mut response = ResponseMessage::new(Version::Http11, status_code);
            if let Some(reason) = reason {
                response.reason = reason;
            }
            response.headers = headers;
            let generator = &inner.connection.generator;
            response.write_to(generator);
            generator.send().await
        })
    }

    /// Starts the final response and returns its body output.
    ///
    /// `length` of `None` means the length is unknown: the body is chunked
    /// for HTTP/1.1 peers and ends with the connection otherwise.
    pub fn respond(
        &self,
        status_code: u16,
        reason: Option<&str>,
        headers: HttpHeaders,
        length: Option<u64>,
    ) -> Promise<BoxOutput> {
        let inner = Arc::clone(&self.inner);
        let reason = reason.map(str::to_owned);
        self.inner
            .responses
            .run_future(async move { inner.respond(status_code, reason, headers, length).await })
    }

    /// Switches the connection to another protocol.
    ///
    /// Allowed for `101` responses and for `2xx` answers to `CONNECT`, after
    /// the request body was read to its end. The returned channel carries
    /// the raw connection bytes from now on.
    pub fn switch_protocol(
        &self,
        status_code: u16,
        reason: Option<&str>,
        headers: HttpHeaders,
    ) -> Promise<BoxChannel> {
        let inner = Arc::clone(&self.inner);
        let reason = reason.map(str::to_owned);
        self.inner
            .responses
            .run_future(async move { inner.switch_protocol(status_code, reason, headers).await })
    }

    async fn process(&self) -> Result<bool> {
        let inner = &self.inner;
        let request = &inner.request;
        tracing::debug!(
            exchange = %inner.id,
            method = %request.method.as_str(),
            target = %request.target,
            version = %request.version.as_str(),
            "starting processing"
        );
        let keeps_alive = headers::keeps_alive(request.version, &request.headers);
        let framing = Framing {
            method: &request.method,
            status: None,
            encodings: headers::transfer_encodings(&request.headers)
                .map_err(|error| error.into_http_status(status::BAD_REQUEST))?,
            content_length: headers::content_length(&request.headers)
                .map_err(|error| error.into_http_status(status::BAD_REQUEST))?,
        };
        let info = select_input(
            &framing,
            InputContext {
                parser: Arc::clone(&inner.connection.parser),
                listener: Some(inner.input_tracker()),
                trailers: Some(inner.trailers_resolver.clone()),
                config: inner.connection.server.config().clone(),
            },
        )
        .map_err(|error| {
            if error.kind() == ErrorKind::UnknownTransferEncoding {
                error.into_http_status(status::NOT_IMPLEMENTED)
            } else {
                error.into_http_status(status::BAD_REQUEST)
            }
        })?;
        let weak = Arc::downgrade(inner);
        let input: BoxInput = Arc::new(CountingInput::new(info.stream, move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.state.lock().received = Some(event);
            }
        }));
        {
            let mut state = inner.state.lock();
            state.can_continue = state.can_continue && keeps_alive && !info.rest_of_stream;
            state.input = Some(input);
            state.input_length = info.content_length;
        }
        let handler = inner.connection.server.handler();
        let exchange = self.clone();
        Promise::now(move || handler.handle(exchange)).await?;
        if !inner.state.lock().response_started {
            return Err(Error::http_status(
                status::INTERNAL_SERVER_ERROR,
                format!("Handler did not started reply {}", inner.id),
            ));
        }
        Ok(true)
    }

    async fn fail(&self, error: Error) {
        let inner = &self.inner;
        tracing::debug!(exchange = %inner.id, %error, "failed to process request");
        let started = {
            let mut state = inner.state.lock();
            state.can_continue = false;
            state.response_started
        };
        if started {
            return;
        }
        inner.scope.set(&BAD_REQUEST_PROBLEM, error);
        let handler = inner.connection.server.bad_request_handler();
        let exchange = self.clone();
        if let Err(error) = Promise::now(move || handler.handle(exchange)).await {
            tracing::debug!(exchange = %inner.id, %error, "bad request handler failed");
        }
    }

    /// Closes the body streams and reports whether the connection can
    /// carry another exchange.
    async fn finish(&self) -> bool {
        let inner = &self.inner;
        let (input, output) = {
            let state = inner.state.lock();
            (state.input.clone(), state.output.clone())
        };
        if let Some(input) = input {
            if let Err(error) = input.close().await {
                tracing::debug!(exchange = %inner.id, %error, "failed to close request body");
            }
        }
        match output {
            Some(output) => {
                if let Err(error) = output.close().await {
                    tracing::debug!(exchange = %inner.id, %error, "failed to close response body");
                }
            }
            None => inner.state.lock().can_continue = false,
        }
        let event = {
            let mut state = inner.state.lock();
            if state.input_state != Some(InputState::Closed)
                || state.output_state != Some(OutputState::Closed)
            {
                state.can_continue = false;
            }
            ExchangeFinishedEvent {
                id: inner.id.clone(),
                remote: inner.connection.remote,
                local: inner.connection.local,
                method: inner.request.method.clone(),
                uri: inner.uri.clone(),
                version: inner.request.version,
                status: state.status,
                reason: state.reason.clone(),
                received: state.received.take(),
                sent: state.sent.take(),
                received_switched: state.received_switched.take(),
                sent_switched: state.sent_switched.take(),
            }
        };
        inner.connection.server.exchange_finished(&event);
        inner.state.lock().can_continue
    }
}

impl ExchangeInner {
    fn input_tracker(self: &Arc<Self>) -> StateListener<InputState> {
        let weak = Arc::downgrade(self);
        Arc::new(move |outcome| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match outcome {
                Outcome::Success(state) => {
                    let send_continue = {
                        let mut exchange = inner.state.lock();
                        let previous = exchange.input_state.replace(state);
                        let leaving_idle = matches!(previous, None | Some(InputState::Idle))
                            && state != InputState::Idle;
                        let wanted = leaving_idle
                            && !exchange.continue_sent
                            && !exchange.response_started
                            && inner.request.version == Version::Http11
                            && inner.request.headers.has_token(EXPECT, EXPECT_CONTINUE);
                        if wanted {
                            exchange.continue_sent = true;
                        }
                        wanted
                    };
                    if send_continue {
                        inner.send_continue();
                    }
                }
                Outcome::Failure(_) => {
                    let mut exchange = inner.state.lock();
                    exchange.input_state = Some(InputState::Error);
                    exchange.can_continue = false;
                }
            }
        })
    }

    fn output_tracker(self: &Arc<Self>) -> StateListener<OutputState> {
        let weak = Arc::downgrade(self);
        Arc::new(move |outcome| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let mut exchange = inner.state.lock();
            match outcome {
                Outcome::Success(state) => exchange.output_state = Some(state),
                Outcome::Failure(_) => {
                    exchange.output_state = Some(OutputState::Error);
                    exchange.can_continue = false;
                }
            }
        })
    }

    fn send_continue(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        let sent = self.responses.run_future(async move {
            if inner.state.lock().response_started {
                return Ok(());
            }
            let response = ResponseMessage::new(Version::Http11, status::CONTINUE);
            let generator = &inner.connection.generator;
            response.write_to(generator);
            generator.send().await
        });
        let id = self.id.clone();
        sent.listen_sync(move |outcome| {
            if let Outcome::Failure(error) = outcome {
                tracing::debug!(exchange = %id, %error, "failed to send 100-continue");
            }
        });
    }

    fn start_response(&self) -> Result<()> {
        if self.state.lock().response_started {
            return Err(Error::usage("The response is already started"));
        }
        Ok(())
    }

    async fn respond(
        self: &Arc<Self>,
        status_code: u16,
        reason: Option<String>,
        mut headers: HttpHeaders,
        length: Option<u64>,
    ) -> Result<BoxOutput> {
        if is_switch_protocol(&self.request.method, status_code) {
            return Err(Error::usage(
                "Switching protocols must use switch_protocol()",
            ));
        }
        if !status::is_valid(status_code) || status::is_informational(status_code) {
            return Err(Error::usage(format!(
                "Not a final response status: {status_code}"
            )));
        }
        self.start_response()?;
        let config = self.connection.server.config();
        let version = self.request.version;
        headers.remove(CONTENT_LENGTH);
        headers.remove(TRANSFER_ENCODING);
        headers.set_if_missing(SERVER, config.server_description.clone());
        headers.set(DATE, headers::format_date(Utc::now()));
        let encodings = transfer_encodings_for(version, length);
        let trailers = if TransferEncoding::is_chunked(&encodings)
            && self.request.headers.has_token(TE, TE_TRAILERS)
        {
            self.scope.get(&TRAILERS_PROVIDER)
        } else {
            None
        };
        if trailers.is_some() {
            if let Some(names) = self.scope.get(&TRAILERS_NAMES) {
                headers.set(TRAILER, headers::list_value(names.as_slice()));
            }
        }
        let framing = Framing {
            method: &self.request.method,
            status: Some(status_code),
            encodings: encodings.clone(),
            content_length: length,
        };
        let info = select_output(
            &framing,
            OutputContext {
                generator: Arc::clone(&self.connection.generator),
                listener: Some(self.output_tracker()),
                trailers,
            },
        )?;
        if self.request.method.is_head() {
            headers::set_message_body_headers(&mut headers, &encodings, length);
        } else if status_code != status::NO_CONTENT && status_code != status::NOT_MODIFIED {
            headers::set_message_body_headers(&mut headers, &info.encodings, info.content_length);
        }
        let mut response = ResponseMessage::new(Version::Http11, status_code);
        if let Some(reason) = reason {
            response.reason = reason;
        }
        let last = {
            let mut state = self.state.lock();
            state.response_started = true;
            if info.rest_of_stream || self.scope.get_or_default(&LAST_EXCHANGE) {
                state.can_continue = false;
            }
            state.status = Some(status_code);
            state.reason = Some(response.reason.clone());
            !state.can_continue
        };
        headers::set_last_message_header(&mut headers, version, last);
        response.headers = headers;
        let generator = &self.connection.generator;
        response.write_to(generator);
        generator.send().await?;
        let weak = Arc::downgrade(self);
        let output: BoxOutput = Arc::new(CountingOutput::new(info.stream, move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.state.lock().sent = Some(event);
            }
        }));
        self.state.lock().output = Some(Arc::clone(&output));
        Ok(output)
    }

    async fn switch_protocol(
        self: &Arc<Self>,
        status_code: u16,
        reason: Option<String>,
        headers: HttpHeaders,
    ) -> Result<BoxChannel> {
        if !is_switch_protocol(&self.request.method, status_code) {
            return Err(Error::usage(format!(
                "Status {status_code} does not switch protocols for {}",
                self.request.method.as_str()
            )));
        }
        self.start_response()?;
        let input = {
            let state = self.state.lock();
            let drained = matches!(
                state.input_state,
                Some(InputState::EofNoTrailers | InputState::TrailersRead | InputState::Closed)
            );
            if !drained {
                return Err(Error::usage("Read all input before switching protocols"));
            }
            state.input.clone()
        };
        if let Some(input) = input {
            input.close().await?;
        }
        let mut response = ResponseMessage::new(Version::Http11, status_code);
        if let Some(reason) = reason {
            response.reason = reason;
        }
        response.headers = headers;
        {
            let mut state = self.state.lock();
            state.response_started = true;
            state.switched = true;
            state.can_continue = false;
            state.status = Some(status_code);
            state.reason = Some(response.reason.clone());
        }
        let generator = &self.connection.generator;
        if !self.scope.get_or_default(&SWITCH_NO_REPLY) {
            response.write_to(generator);
            generator.send().await?;
        }
        let raw = &self.connection.channel;
        let raw_input = raw.input();
        let input_listener: StateListener<InputState> = Arc::new(move |outcome| {
            let done = match outcome {
                Outcome::Success(state) => state.is_terminal(),
                Outcome::Failure(_) => true,
            };
            if done {
                let _closed = raw_input.close();
            }
        });
        let raw_output = raw.output();
        let output_listener: StateListener<OutputState> = Arc::new(move |outcome| {
            let done = match outcome {
                Outcome::Success(state) => state.is_terminal(),
                Outcome::Failure(_) => true,
            };
            if done {
                let _closed = raw_output.close();
            }
        });
        let received = Arc::downgrade(self);
        let input: BoxInput = Arc::new(CountingInput::new(
            Arc::new(RestOfStreamInput::new(
                Arc::clone(&self.connection.parser),
                Some(input_listener),
            )),
            move |event| store_event(&received, |state| &mut state.received_switched, event),
        ));
        let sent = Arc::downgrade(self);
        let output: BoxOutput = Arc::new(CountingOutput::new(
            Arc::new(RestOfStreamOutput::new(
                Arc::clone(generator),
                Some(output_listener),
            )),
            move |event| store_event(&sent, |state| &mut state.sent_switched, event),
        ));
        Ok(Arc::new(SimpleChannel::new(input, output)))
    }
}

fn store_event(
    inner: &Weak<ExchangeInner>,
    slot: impl FnOnce(&mut ExchangeState) -> &mut Option<StreamFinishedEvent>,
    event: StreamFinishedEvent,
) {
    if let Some(inner) = inner.upgrade() {
        *slot(&mut inner.state.lock()) = Some(event);
    }
}

impl fmt::Debug for HttpExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("HttpExchange")
            .field("id", &self.inner.id)
            .field("method", &self.inner.request.method)
            .field("uri", &self.inner.uri)
            .field("input_state", &state.input_state)
            .field("output_state", &state.output_state)
            .field("switched", &state.switched)
            .finish_non_exhaustive()
    }
}

/// Reads and handles one request. Resolves to true if the connection can
/// carry the next exchange.
pub(crate) async fn run_exchange(connection: &Arc<ConnectionContext>, number: u64) -> Result<bool> {
    let config = connection.server.config();
    let (request, problem) = match RequestMessage::read(&connection.parser, config).await {
        Ok(None) => return Ok(false),
        Ok(Some(request)) => (request, None),
        Err(error) if error.is_protocol() => (
            RequestMessage::new(Method::Get, "", Version::Http11),
            Some(error),
        ),
        Err(error) => return Err(error),
    };
    let (uri, problem) = match problem {
        Some(problem) => (Uri::default(), Some(problem)),
        None => match request.effective_uri("http", connection.local) {
            Ok(uri) => (uri, None),
            Err(error) => (Uri::default(), Some(error)),
        },
    };
    let exchange = HttpExchange::create(connection, number, request, uri);
    let result = match problem {
        Some(problem) => {
            exchange.inner.trailers_resolver.success(None);
            Err(problem)
        }
        None => exchange.process().await,
    };
    if let Err(error) = result {
        exchange.fail(error).await;
    }
    Ok(exchange.finish().await)
}
