//! HTTP/1.0 and HTTP/1.1.
//!
//! - [`types`]: [`Method`], [`Version`] and status codes
//! - [`headers`]: [`HttpHeaders`] and framing helpers
//! - [`transfer`]: transfer codings
//! - [`uri`]: request URIs
//! - [`message`]: request and response heads
//! - [`content`]: body streams selected by message framing
//! - [`scope`]: typed per-exchange options
//! - [`server`]: [`HttpServer`] and [`HttpExchange`]
//! - [`client`]: [`HttpClientConnection`] and [`SimpleHttpClient`]

pub mod client;
pub mod content;
pub mod headers;
pub mod message;
pub mod scope;
pub mod server;
pub mod transfer;
pub mod types;
pub mod uri;

pub use client::{
    BodyLength, ClientRequest, HttpClientConnection, HttpRequest, HttpResponse, SimpleHttpClient,
};
pub use headers::HttpHeaders;
pub use message::{RequestMessage, ResponseMessage};
pub use scope::{Scope, ScopeKey, TrailersProvider};
pub use server::{
    AHttpHandler, BoxHttpHandler, DelegatingHandler, ExchangeFinishedEvent, HttpDelegate,
    HttpExchange, HttpServer, PathDelegate, ServerOptionsHandler,
};
pub use transfer::TransferEncoding;
pub use types::{Method, Version, status};
pub use uri::Uri;
