//! HTTP/1.x client.
//!
//! [`HttpClientConnection`] drives one connection and hands out
//! [`HttpRequest`]s one at a time. [`SimpleHttpClient`] keeps a pool of such
//! connections keyed by scheme, host and port.
//!
//! # Example
//!
//! ```ignore
//! use vatflow::http::h1::{BodyLength, HttpHeaders, Method, SimpleHttpClient, Uri};
//!
//! let client = SimpleHttpClient::new(factory, HttpConfig::default());
//! let request = client.new_request();
//! let uri = Uri::parse("http://localhost:8080/")?;
//! request
//!     .request(Method::Get, &uri, HttpHeaders::new(), BodyLength::NoContent)
//!     .await?
//!     .close()
//!     .await?;
//! let response = request.get_response().await?;
//! ```

mod connection;
mod pool;
mod request;
mod response;

pub use connection::HttpClientConnection;
pub use pool::{ClientRequest, SimpleHttpClient};
pub use request::{BodyLength, HttpRequest};
pub use response::HttpResponse;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpConfig;
    use crate::error::Result;
    use crate::http::h1::headers::{CONNECTION, HttpHeaders, TE, UPGRADE};
    use crate::http::h1::scope::{
        CONTINUE_LISTENER, LAST_EXCHANGE, TRAILERS_NAMES, TRAILERS_PROVIDER, TrailersProvider,
    };
    use crate::http::h1::server::{HttpExchange, HttpServer};
    use crate::http::h1::types::{Method, status};
    use crate::http::h1::uri::Uri;
    use crate::io::{AChannel, AOutput, BoxChannel, channel_pair, read_all};
    use crate::promise::Promise;
    use crate::runtime::spawn_default;
    use crate::test_utils::run_on_vat;
    use crate::types::ACloseable;
    use std::sync::Arc;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
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

    /// Connects a client connection to `server` over an in-memory channel.
    fn connect(server: &HttpServer) -> (HttpClientConnection, Promise<()>) {
        let (client, server_side) = channel_pair(64 * 1024);
        let served = server.serve(Arc::new(server_side), None, None);
        let channel: BoxChannel = Arc::new(client);
        let connection = HttpClientConnection::new("test", channel, None, server.config());
        (connection, served)
    }

    async fn post(request: &HttpRequest, body: &[u8]) -> Result<(u16, Vec<u8>)> {
        let uri = Uri::parse("http://server/echo")?;
        let output = request
            .request(
                Method::Post,
                &uri,
                HttpHeaders::new(),
                BodyLength::Exact(body.len() as u64),
            )
            .await?;
        output.write(body.to_vec()).await?;
        output.close().await?;
        let response = request.get_response().await?;
        let input = response.input.clone().expect("response body");
        let received = read_all(Arc::clone(&input)).await?;
        input.close().await?;
        Ok((response.status, received))
    }

    #[test]
    fn reuses_connection_for_sequential_requests() {
        init_test("reuses_connection_for_sequential_requests");
        let server = HttpServer::new(HttpConfig::default());
        server.set_handler(echo_handler);
        let results = run_on_vat(async move {
            let (connection, served) = connect(&server);
            let mut results = Vec::new();
            for body in [&b"first"[..], &b"second"[..]] {
                let request = connection.next().await?.expect("request");
                let (code, received) = post(&request, body).await?;
                let reusable = request.finished().await?;
                results.push((code, received, reusable));
            }
            connection.close().await?;
            served.await?;
            Ok(results)
        })
        .expect("conversation");
        for (code, _, reusable) in &results {
            crate::assert_with_log!(*code == 200, "status", 200, code);
            crate::assert_with_log!(*reusable, "reusable", true, reusable);
        }
        crate::assert_with_log!(results[1].1 == b"second", "second body", "second", results[1].1);
        crate::test_complete!("reuses_connection_for_sequential_requests");
    }

    #[test]
    fn last_exchange_stops_reuse() {
        init_test("last_exchange_stops_reuse");
        let server = HttpServer::new(HttpConfig::default());
        server.set_handler(echo_handler);
        let (reusable, next) = run_on_vat(async move {
            let (connection, served) = connect(&server);
            let request = connection.next().await?.expect("request");
            request.scope().set(&LAST_EXCHANGE, true);
            post(&request, b"bye").await?;
            let reusable = request.finished().await?;
            let next = connection.next().await?;
            connection.close().await?;
            served.await?;
            Ok((reusable, next.is_some()))
        })
        .expect("conversation");
        crate::assert_with_log!(!reusable, "reusable", false, reusable);
        crate::assert_with_log!(!next, "next request", false, next);
        crate::test_complete!("last_exchange_stops_reuse");
    }

    #[test]
    fn request_closed_mid_body_finishes_connection() {
        init_test("request_closed_mid_body_finishes_connection");
        let server = HttpServer::new(HttpConfig::default());
        server.set_handler(echo_handler);
        let (reusable, next) = run_on_vat(async move {
            let (connection, _served) = connect(&server);
            let request = connection.next().await?.expect("request");
            let uri = Uri::parse("http://server/echo")?;
            let output = request
                .request(Method::Post, &uri, HttpHeaders::new(), BodyLength::Exact(10))
                .await?;
            output.write(b"abc".to_vec()).await?;
            request.close().await?;
            let reusable = request.finished().await?;
            let next = connection.next().await?;
            connection.close().await?;
            Ok((reusable, next.is_some()))
        })
        .expect("conversation");
        crate::assert_with_log!(!reusable, "reusable", false, reusable);
        crate::assert_with_log!(!next, "next request", false, next);
        crate::test_complete!("request_closed_mid_body_finishes_connection");
    }

    #[test]
    fn exchanges_trailers_both_ways() {
        init_test("exchanges_trailers_both_ways");
        let server = HttpServer::new(HttpConfig::default());
        server.set_handler(|exchange: HttpExchange| {
            spawn_default(async move {
                if let Some(input) = exchange.input() {
                    read_all(input).await?;
                }
                let trailers = exchange.read_trailers().await?.unwrap_or_default();
                let sum = trailers.first("x-sum").unwrap_or("none").to_owned();
                let provider: TrailersProvider = Arc::new(move || {
                    let mut reply = HttpHeaders::new();
                    reply.set("x-seen", sum.clone());
                    Promise::value(Some(reply))
                });
                exchange.exchange_scope().set(&TRAILERS_PROVIDER, provider);
                let output = exchange
                    .respond(status::OK, None, HttpHeaders::new(), None)
                    .await?;
                output.write(b"ok".to_vec()).await?;
                Ok(())
            })
        });
        let (body, seen) = run_on_vat(async move {
            let (connection, served) = connect(&server);
            let request = connection.next().await?.expect("request");
            let provider: TrailersProvider = Arc::new(|| {
                let mut trailers = HttpHeaders::new();
                trailers.set("x-sum", "17");
                Promise::value(Some(trailers))
            });
            request.scope().set(&TRAILERS_PROVIDER, provider);
            request.scope().set(&TRAILERS_NAMES, vec!["X-Sum".to_owned()]);
            let mut headers = HttpHeaders::new();
            headers.set(TE, "trailers");
            let uri = Uri::parse("http://server/upload")?;
            let output = request
                .request(Method::Put, &uri, headers, BodyLength::Streamed)
                .await?;
            output.write(b"payload".to_vec()).await?;
            output.close().await?;
            let response = request.get_response().await?;
            let input = response.input.clone().expect("body");
            let body = read_all(Arc::clone(&input)).await?;
            let trailers = response.trailers.clone().await?;
            input.close().await?;
            connection.close().await?;
            served.await?;
            let seen = trailers.and_then(|t| t.first("x-seen").map(str::to_owned));
            Ok((body, seen))
        })
        .expect("conversation");
        crate::assert_with_log!(body == b"ok", "body", "ok", body);
        crate::assert_with_log!(
            seen.as_deref() == Some("17"),
            "trailer echoed",
            Some("17"),
            seen
        );
        crate::test_complete!("exchanges_trailers_both_ways");
    }

    #[test]
    fn waits_for_continue_before_sending_body() {
        init_test("waits_for_continue_before_sending_body");
        let server = HttpServer::new(HttpConfig::default());
        server.set_handler(echo_handler);
        let received = run_on_vat(async move {
            let (connection, served) = connect(&server);
            let request = connection.next().await?.expect("request");
            let (continued, listener) = Promise::<()>::pending();
            request.scope().set(&CONTINUE_LISTENER, listener);
            let uri = Uri::parse("http://server/echo")?;
            let output = request
                .request(Method::Post, &uri, HttpHeaders::new(), BodyLength::Exact(3))
                .await?;
            let response = request.get_response();
            continued.await?;
            output.write(b"abc".to_vec()).await?;
            output.close().await?;
            let response = response.await?;
            let input = response.input.clone().expect("body");
            let body = read_all(Arc::clone(&input)).await?;
            input.close().await?;
            connection.close().await?;
            served.await?;
            Ok(body)
        })
        .expect("conversation");
        crate::assert_with_log!(received == b"abc", "echo after continue", "abc", received);
        crate::test_complete!("waits_for_continue_before_sending_body");
    }

    #[test]
    fn switches_protocol_on_upgrade() {
        init_test("switches_protocol_on_upgrade");
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
        let (switched, heard, reusable) = run_on_vat(async move {
            let (connection, served) = connect(&server);
            let request = connection.next().await?.expect("request");
            let mut headers = HttpHeaders::new();
            headers.set(UPGRADE, "shout");
            headers.set(CONNECTION, "upgrade");
            let uri = Uri::parse("http://server/shout")?;
            request
                .request(Method::Get, &uri, headers, BodyLength::NoContent)
                .await?;
            let response = request.get_response().await?;
            let channel = response.channel.clone().expect("switched channel");
            channel.output().write(b"ping".to_vec()).await?;
            channel.output().close().await?;
            let heard = read_all(channel.input()).await?;
            channel.close().await?;
            let reusable = request.finished().await?;
            connection.close().await?;
            served.await?;
            Ok((response.is_switched(), heard, reusable))
        })
        .expect("conversation");
        crate::assert_with_log!(switched, "switched", true, switched);
        crate::assert_with_log!(heard == b"PING", "heard", "PING", heard);
        crate::assert_with_log!(!reusable, "reusable", false, reusable);
        crate::test_complete!("switches_protocol_on_upgrade");
    }
}
