use super::*;
use crate::error::Result;
use crate::http::h1::headers::{HttpHeaders, UPGRADE};
use crate::http::h1::scope::{TRAILERS_NAMES, TRAILERS_PROVIDER, TrailersProvider};
use crate::http::h1::types::status;
use crate::io::{AChannel, AOutput, channel_pair, read_all};
use crate::test_utils::run_on_vat;

fn init_test(name: &str) {
    crate::test_utils::init_test_logging();
    crate::test_phase!(name);
}

/// Sends `request` over an in-memory connection, closes the client output
/// and returns everything the server wrote before closing.
fn converse(server: &HttpServer, request: &'static [u8]) -> Result<String> {
    let server = server.clone();
    run_on_vat(async move {
        let (client, server_side) = channel_pair(64 * 1024);
        let served = server.serve(Arc::new(server_side), None, None);
        let output = client.output();
        output.write(request.to_vec()).await?;
        output.close().await?;
        let reply = read_all(client.input()).await?;
        served.await?;
        client.close().await?;
        Ok(String::from_utf8_lossy(&reply).into_owned())
    })
}

fn echo_handler(exchange: HttpExchange) -> Promise<()> {
    spawn_default(async move {
        let body = match exchange.input() {
            Some(input) => read_all(input).await?,
            None => Vec::new(),
        };
        let output = exchange
            .respond(status::OK, None, HttpHeaders::new(), Some(body.len() as u64))
            .await?;
        output.write(body).await?;
        Ok(())
    })
}

fn streaming_handler(exchange: HttpExchange) -> Promise<()> {
    spawn_default(async move {
        let output = exchange
            .respond(status::OK, None, HttpHeaders::new(), None)
            .await?;
        output.write(b"hi".to_vec()).await?;
        Ok(())
    })
}

#[test]
fn answers_not_found_by_default() {
    init_test("answers_not_found_by_default");
    let server = HttpServer::new(HttpConfig::default());
    let reply = converse(
        &server,
        b"GET /missing HTTP/1.1\r\nHost: example.com\r\nConnection: close\r\n\r\n",
    )
    .expect("conversation");
    tracing::debug!(%reply, "reply");
    crate::assert_with_log!(
        reply.starts_with("HTTP/1.1 404 Not Found\r\n"),
        "status line",
        "HTTP/1.1 404 Not Found",
        reply
    );
    let has_uri = reply.contains("<td>http://example.com/missing</td>");
    crate::assert_with_log!(has_uri, "uri in page", true, has_uri);
    for header in ["\r\nServer: ", "\r\nDate: ", "\r\nConnection: close\r\n"] {
        let present = reply.contains(header);
        crate::assert_with_log!(present, "header present", header, present);
    }
    crate::test_complete!("answers_not_found_by_default");
}

#[test]
fn echoes_body_with_content_length() {
    init_test("echoes_body_with_content_length");
    let server = HttpServer::new(HttpConfig::default());
    server.set_handler(echo_handler);
    let reply = converse(
        &server,
        b"POST /echo HTTP/1.1\r\nHost: a\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
    )
    .expect("conversation");
    let ok = reply.starts_with("HTTP/1.1 200 OK\r\n")
        && reply.contains("\r\nContent-Length: 5\r\n")
        && reply.ends_with("\r\n\r\nhello");
    crate::assert_with_log!(ok, "echo reply", "200 with hello", reply);
    crate::test_complete!("echoes_body_with_content_length");
}

#[test]
fn keeps_connection_for_pipelined_requests() {
    init_test("keeps_connection_for_pipelined_requests");
    let server = HttpServer::new(HttpConfig::default());
    server.set_handler(streaming_handler);
    let reply = converse(
        &server,
        b"GET /1 HTTP/1.1\r\nHost: a\r\n\r\nGET /2 HTTP/1.1\r\nHost: a\r\n\r\n",
    )
    .expect("conversation");
    let responses = reply.matches("HTTP/1.1 200 OK\r\n").count();
    crate::assert_with_log!(responses == 2, "responses", 2, responses);
    let chunks = reply.matches("Transfer-Encoding: chunked\r\n\r\n2\r\nhi\r\n0\r\n\r\n").count();
    crate::assert_with_log!(chunks == 2, "chunked bodies", 2, chunks);
    let closing = reply.contains("Connection: close");
    crate::assert_with_log!(!closing, "no close header", false, closing);
    crate::test_complete!("keeps_connection_for_pipelined_requests");
}

#[test]
fn http10_peer_gets_body_until_close() {
    init_test("http10_peer_gets_body_until_close");
    let server = HttpServer::new(HttpConfig::default());
    server.set_handler(streaming_handler);
    let reply = converse(&server, b"GET / HTTP/1.0\r\n\r\n").expect("conversation");
    let framed = reply.contains("Transfer-Encoding") || reply.contains("Content-Length");
    crate::assert_with_log!(!framed, "no framing headers", false, reply);
    let body = reply.ends_with("\r\n\r\nhi");
    crate::assert_with_log!(body, "raw body", "ends with hi", reply);
    crate::test_complete!("http10_peer_gets_body_until_close");
}

#[test]
fn malformed_request_gets_bad_request_page() {
    init_test("malformed_request_gets_bad_request_page");
    let server = HttpServer::new(HttpConfig::default());
    let reply = converse(&server, b"BOGUS\r\n\r\n").expect("conversation");
    let ok = reply.starts_with("HTTP/1.1 400 Bad Request\r\n")
        && reply.contains("<title>Bad Request</title>")
        && reply.contains("\r\nConnection: close\r\n");
    crate::assert_with_log!(ok, "bad request reply", "400 page", reply);
    crate::test_complete!("malformed_request_gets_bad_request_page");
}

#[test]
fn missing_reply_becomes_internal_error() {
    init_test("missing_reply_becomes_internal_error");
    let server = HttpServer::new(HttpConfig::default());
    server.set_handler(|_exchange: HttpExchange| Promise::void());
    let reply = converse(&server, b"GET / HTTP/1.1\r\nHost: a\r\n\r\n").expect("conversation");
    let ok = reply.starts_with("HTTP/1.1 500 Internal Server Error\r\n")
        && reply.contains("Handler did not started reply");
    crate::assert_with_log!(ok, "500 reply", "500 page", reply);
    crate::test_complete!("missing_reply_becomes_internal_error");
}

#[test]
fn unknown_transfer_coding_is_not_implemented() {
    init_test("unknown_transfer_coding_is_not_implemented");
    let server = HttpServer::new(HttpConfig::default());
    server.set_handler(echo_handler);
    let reply = converse(
        &server,
        b"POST / HTTP/1.1\r\nHost: a\r\nTransfer-Encoding: rot13, chunked\r\n\r\n0\r\n\r\n",
    )
    .expect("conversation");
    let ok = reply.starts_with("HTTP/1.1 501 Not Implemented\r\n") && reply.contains("rot13");
    crate::assert_with_log!(ok, "501 reply", "501 page", reply);
    crate::test_complete!("unknown_transfer_coding_is_not_implemented");
}

#[test]
fn sends_continue_before_reading_body() {
    init_test("sends_continue_before_reading_body");
    let server = HttpServer::new(HttpConfig::default());
    server.set_handler(echo_handler);
    let reply = converse(
        &server,
        b"POST / HTTP/1.1\r\nHost: a\r\nExpect: 100-continue\r\nContent-Length: 3\r\n\
          Connection: close\r\n\r\nabc",
    )
    .expect("conversation");
    let ok = reply.starts_with("HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\n")
        && reply.ends_with("abc");
    crate::assert_with_log!(ok, "continue then ok", "100 then 200", reply);
    crate::test_complete!("sends_continue_before_reading_body");
}

#[test]
fn sends_continue_when_body_is_closed_unread() {
    init_test("sends_continue_when_body_is_closed_unread");
    let server = HttpServer::new(HttpConfig::default());
    server.set_handler(|exchange: HttpExchange| {
        spawn_default(async move {
            if let Some(input) = exchange.input() {
                input.close().await?;
            }
            let output = exchange
                .respond(status::OK, None, HttpHeaders::new(), Some(2))
                .await?;
            output.write(b"no".to_vec()).await?;
            Ok(())
        })
    });
    let reply = converse(
        &server,
        b"POST / HTTP/1.1\r\nHost: a\r\nExpect: 100-continue\r\nContent-Length: 3\r\n\
          Connection: close\r\n\r\nabc",
    )
    .expect("conversation");
    let ok = reply.starts_with("HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\n")
        && reply.ends_with("no");
    crate::assert_with_log!(ok, "continue then ok", "100 then 200", reply);
    crate::test_complete!("sends_continue_when_body_is_closed_unread");
}

fn trailers_handler(exchange: HttpExchange) -> Promise<()> {
    let provider: TrailersProvider = Arc::new(|| {
        let mut trailers = HttpHeaders::new();
        trailers.set("x-checksum", "42");
        Promise::value(Some(trailers))
    });
    exchange.exchange_scope().set(&TRAILERS_PROVIDER, provider);
    exchange
        .exchange_scope()
        .set(&TRAILERS_NAMES, vec!["X-Checksum".to_owned()]);
    streaming_handler(exchange)
}

#[test]
fn writes_trailers_only_when_accepted() {
    init_test("writes_trailers_only_when_accepted");
    let server = HttpServer::new(HttpConfig::default());
    server.set_handler(trailers_handler);

    crate::test_section!("accepted");
    let reply = converse(
        &server,
        b"GET / HTTP/1.1\r\nHost: a\r\nTE: trailers\r\nConnection: close\r\n\r\n",
    )
    .expect("conversation");
    let ok = reply.contains("\r\nTrailer: X-Checksum\r\n")
        && reply.ends_with("2\r\nhi\r\n0\r\nX-Checksum: 42\r\n\r\n");
    crate::assert_with_log!(ok, "trailers written", "X-Checksum trailer", reply);

    crate::test_section!("not accepted");
    let reply = converse(&server, b"GET / HTTP/1.1\r\nHost: a\r\nConnection: close\r\n\r\n")
        .expect("conversation");
    let ok = !reply.contains("Trailer") && reply.ends_with("2\r\nhi\r\n0\r\n\r\n");
    crate::assert_with_log!(ok, "no trailers", "plain last chunk", reply);
    crate::test_complete!("writes_trailers_only_when_accepted");
}

#[test]
fn switches_protocol_after_request_head() {
    init_test("switches_protocol_after_request_head");
    let server = HttpServer::new(HttpConfig::default());
    server.set_handler(|exchange: HttpExchange| {
        spawn_default(async move {
            let mut headers = HttpHeaders::new();
            headers.set(UPGRADE, "shout");
            let channel = exchange
                .switch_protocol(status::SWITCHING_PROTOCOLS, None, headers)
                .await?;
            let heard = read_all(channel.input()).await?;
            channel.output().write(heard.to_ascii_uppercase()).await?;
            channel.close().await
        })
    });
    let reply = converse(
        &server,
        b"GET /shout HTTP/1.1\r\nHost: a\r\nUpgrade: shout\r\nConnection: upgrade\r\n\r\nping",
    )
    .expect("conversation");
    crate::assert_with_log!(
        reply == "HTTP/1.1 101 Switching Protocols\r\nUpgrade: shout\r\n\r\nPING",
        "switched reply",
        "101 then PING",
        reply
    );
    crate::test_complete!("switches_protocol_after_request_head");
}

#[test]
fn reports_finished_exchanges() {
    init_test("reports_finished_exchanges");
    let server = HttpServer::new(HttpConfig::default());
    server.set_handler(echo_handler);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    server.set_exchange_listener(move |event| sink.lock().push(event.clone()));
    converse(
        &server,
        b"PUT /x HTTP/1.1\r\nHost: a\r\nContent-Length: 4\r\nConnection: close\r\n\r\ndata",
    )
    .expect("conversation");
    let events = events.lock();
    crate::assert_with_log!(events.len() == 1, "events", 1, events.len());
    let event = &events[0];
    crate::assert_with_log!(event.id == "0.0", "id", "0.0", event.id);
    crate::assert_with_log!(event.status == Some(200), "status", Some(200), event.status);
    let received = event.received.as_ref().map(|e| e.bytes);
    crate::assert_with_log!(received == Some(4), "received", Some(4), received);
    let sent = event.sent.as_ref().map(|e| e.bytes);
    crate::assert_with_log!(sent == Some(4), "sent", Some(4), sent);
    crate::test_complete!("reports_finished_exchanges");
}
