//! unixhttp - HTTP/1.1 over Unix domain sockets
//!
//! This crate provides a small HTTP/1.1 server and client for local RPC
//! between processes on the same host. Requests are routed by exact method
//! and path, connections are kept alive between requests, and everything is
//! carried over a Unix domain socket.

pub mod http;

pub use http::{
    Client, Error, HttpRequest, HttpResponse, Result, Router, Server, ServerConfig, Status,
};
