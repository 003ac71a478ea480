//! HTTP/1.1 over Unix domain sockets
//!
//! This module provides the protocol engine shared by the server and client
//! roles: a URI/query codec, a streaming message parser and serializer, an
//! exact-match router and a per-connection session loop with keep-alive.
//!
//! # Architecture
//!
//! The server side is layered as follows:
//!
//! - `Server` owns the listening socket and accepts connections
//! - each connection is driven by a `Session` that parses requests,
//!   dispatches them through the shared `Router` and writes responses
//! - all socket I/O goes through the `SessionOps` trait, so the session
//!   loop never touches file descriptors directly
//!
//! # Examples
//!
//! ```no_run
//! use unixhttp::http::{Client, HttpResponse, Router, Server};
//!
//! let router = Router::new().route("GET", "/ping", |_req| {
//!     Ok(HttpResponse::ok("pong"))
//! });
//! let handle = Server::bind("/tmp/app.sock", router)?.spawn()?;
//!
//! let response = Client::new("/tmp/app.sock").get("/ping")?;
//! assert_eq!(response.status().code(), 200);
//! assert_eq!(response.content(), Some(&b"pong"[..]));
//!
//! handle.terminate();
//! handle.wait_until_done()?;
//! # Ok::<(), unixhttp::http::Error>(())
//! ```

pub mod client;
pub mod headers;
pub mod message;
pub mod parser;
pub mod router;
pub mod server;
pub mod session;
pub mod uri;

pub use client::{Client, ClientConfig};
pub use headers::Headers;
pub use message::{HttpRequest, HttpResponse, Status, Version};
pub use parser::{ParserLimits, ParserState, RequestParser, ResponseParser};
pub use router::{Handler, HandlerError, HandlerResult, Resolution, Router};
pub use server::{Concurrency, Server, ServerConfig, ServerHandle};
pub use session::{HttpSession, PollEvents, Session, SessionOps, UnixSessionOps};
pub use uri::QueryArgs;

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid HTTP version: {0}")]
    InvalidVersion(String),

    #[error("Invalid HTTP status: {0}")]
    InvalidStatus(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid Content-Length: {0}")]
    InvalidContentLength(String),

    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),

    #[error("More than {0} headers")]
    TooManyHeaders(usize),

    #[error("Content-Length {length} exceeds limit of {limit} bytes")]
    ContentTooLarge { length: u64, limit: usize },

    #[error("Connection closed in the middle of a message")]
    IncompleteMessage,

    #[error("Timeout")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,
}

impl Error {
    /// Whether this error comes from malformed bytes on the wire rather than
    /// from the transport.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            Error::Parse(_)
                | Error::InvalidVersion(_)
                | Error::InvalidStatus(_)
                | Error::InvalidHeader(_)
                | Error::InvalidContentLength(_)
                | Error::LineTooLong(_)
                | Error::TooManyHeaders(_)
                | Error::ContentTooLarge { .. }
        )
    }
}

/// Maximum number of distinct headers per message
pub const MAX_HEADERS: usize = 64;

/// Maximum length of a request, status or header line
pub const MAX_LINE_LENGTH: usize = 8192;

/// Maximum accepted Content-Length
pub const MAX_CONTENT_LENGTH: usize = 64 * 1024 * 1024;

/// Size of a single read from the socket
pub const READ_CHUNK_SIZE: usize = 4096;

/// CRLF line ending
pub const CRLF: &str = "\r\n";
