//! HTTP message types
//!
//! This module defines the request and response types exchanged over a
//! connection, together with their wire serialization.

use super::uri::{self, QueryArgs};
use super::{Error, Headers, Result, CRLF};
use bytes::Bytes;
use std::cell::OnceCell;
use std::fmt;
use std::str::FromStr;

const CONTENT_LENGTH: &str = "Content-Length";

/// HTTP version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Version {
    Http10,
    #[default]
    Http11,
}

impl Version {
    /// Convert version to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "HTTP/1.0" => Ok(Version::Http10),
            "HTTP/1.1" => Ok(Version::Http11),
            _ => Err(Error::InvalidVersion(s.to_string())),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status {
    code: u16,
}

impl Status {
    pub const OK: Status = Status { code: 200 };
    pub const NO_CONTENT: Status = Status { code: 204 };
    pub const BAD_REQUEST: Status = Status { code: 400 };
    pub const NOT_FOUND: Status = Status { code: 404 };
    pub const METHOD_NOT_ALLOWED: Status = Status { code: 405 };
    pub const INTERNAL_SERVER_ERROR: Status = Status { code: 500 };

    /// Create a new status code
    pub fn new(code: u16) -> Result<Self> {
        if (100..600).contains(&code) {
            Ok(Status { code })
        } else {
            Err(Error::InvalidStatus(format!("Invalid status code: {}", code)))
        }
    }

    /// Get the status code
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Get the canonical reason phrase for this status code
    pub fn reason_phrase(&self) -> &'static str {
        match self.code {
            100 => "Continue",
            101 => "Switching Protocols",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            203 => "Non-Authoritative Information",
            204 => "No Content",
            205 => "Reset Content",
            206 => "Partial Content",
            300 => "Multiple Choices",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            305 => "Use Proxy",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            402 => "Payment Required",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            406 => "Not Acceptable",
            407 => "Proxy Authentication Required",
            408 => "Request Timeout",
            409 => "Conflict",
            410 => "Gone",
            411 => "Length Required",
            412 => "Precondition Failed",
            413 => "Payload Too Large",
            414 => "URI Too Long",
            415 => "Unsupported Media Type",
            416 => "Range Not Satisfiable",
            417 => "Expectation Failed",
            426 => "Upgrade Required",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            505 => "HTTP Version Not Supported",
            _ => "Unknown",
        }
    }

    /// Check if this is a success status (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Check if this is a client error status (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.code)
    }

    /// Check if this is a server error status (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.code)
    }

    /// Whether a response with this status may carry content.
    ///
    /// 1xx, 204 and 304 responses never have a body, so they are written
    /// without Content-Length.
    pub fn permits_body(&self) -> bool {
        !(self.code < 200 || self.code == 204 || self.code == 304)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.reason_phrase())
    }
}

/// HTTP request
///
/// The resource is kept exactly as received. Query arguments are decoded
/// from it the first time they are asked for.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: String,
    resource: String,
    headers: Headers,
    content: Option<Bytes>,
    args: OnceCell<QueryArgs>,
}

impl HttpRequest {
    /// Create a new HTTP request without headers or content
    pub fn new(method: impl Into<String>, resource: impl Into<String>) -> Self {
        HttpRequest::from_parts(method.into(), resource.into(), Headers::new(), None)
    }

    pub(crate) fn from_parts(
        method: String,
        resource: String,
        headers: Headers,
        content: Option<Bytes>,
    ) -> Self {
        HttpRequest {
            method,
            resource,
            headers,
            content: content.filter(|c| !c.is_empty()),
            args: OnceCell::new(),
        }
    }

    /// Create a builder for constructing requests
    pub fn builder() -> HttpRequestBuilder {
        HttpRequestBuilder::default()
    }

    /// Get the request method
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Get the raw resource, including any query string
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Get the path component of the resource
    pub fn path(&self) -> &str {
        uri::split_resource(&self.resource).0
    }

    /// Get the raw query component of the resource, without the `?`
    pub fn query(&self) -> Option<&str> {
        uri::split_resource(&self.resource).1
    }

    /// Get the decoded query arguments
    pub fn args(&self) -> &QueryArgs {
        self.args
            .get_or_init(|| self.query().map(uri::decode_query).unwrap_or_default())
    }

    /// Get a single decoded query argument
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args().get(name)
    }

    /// Get the headers
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Get mutable headers
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Get a header value (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Get the content, if the request carried any
    pub fn content(&self) -> Option<&[u8]> {
        self.content.as_deref()
    }

    /// Convert the request to wire format
    ///
    /// The resource is normalized first and Content-Length is always
    /// computed from the content; a caller-supplied value is dropped.
    pub fn to_wire(&self) -> Vec<u8> {
        let content_len = self.content.as_ref().map_or(0, Bytes::len);
        let mut buf = Vec::with_capacity(256 + content_len);

        // Request line
        buf.extend_from_slice(self.method.as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(uri::normalize(&self.resource).as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(Version::Http11.as_str().as_bytes());
        buf.extend_from_slice(CRLF.as_bytes());

        // Headers
        self.headers.write_wire(&mut buf, CONTENT_LENGTH);
        if let Some(content) = &self.content {
            write_content_length(&mut buf, content.len());
        }

        // Empty line
        buf.extend_from_slice(CRLF.as_bytes());

        // Content
        if let Some(content) = &self.content {
            buf.extend_from_slice(content);
        }

        buf
    }
}

fn write_content_length(buf: &mut Vec<u8>, len: usize) {
    buf.extend_from_slice(CONTENT_LENGTH.as_bytes());
    buf.extend_from_slice(b": ");
    buf.extend_from_slice(len.to_string().as_bytes());
    buf.extend_from_slice(CRLF.as_bytes());
}

/// Builder for HTTP requests
#[derive(Debug, Default)]
pub struct HttpRequestBuilder {
    method: Option<String>,
    resource: Option<String>,
    args: QueryArgs,
    headers: Headers,
    content: Option<Bytes>,
}

impl HttpRequestBuilder {
    /// Set the HTTP method
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Set the resource (path with optional query)
    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Add a query argument; it is percent-encoded into the resource
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(name, value);
        self
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the content
    pub fn content(mut self, content: impl Into<Bytes>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Build the request
    pub fn build(self) -> HttpRequest {
        let mut resource = self.resource.unwrap_or_else(|| "/".to_string());
        if !self.args.is_empty() {
            resource.push(if resource.contains('?') { '&' } else { '?' });
            resource.push_str(&self.args.to_query_string());
        }

        HttpRequest::from_parts(
            self.method.unwrap_or_else(|| "GET".to_string()),
            resource,
            self.headers,
            self.content,
        )
    }
}

/// HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    status: Status,
    headers: Headers,
    content: Option<Bytes>,
}

impl HttpResponse {
    /// Create a new HTTP response without headers or content
    pub fn new(status: Status) -> Self {
        HttpResponse {
            status,
            headers: Headers::new(),
            content: None,
        }
    }

    /// Create a 200 OK response carrying `content`
    pub fn ok(content: impl Into<Bytes>) -> Self {
        HttpResponse::builder().content(content).build()
    }

    pub(crate) fn from_parts(status: Status, headers: Headers, content: Option<Bytes>) -> Self {
        HttpResponse {
            status,
            headers,
            content: content.filter(|c| !c.is_empty()),
        }
    }

    /// Create a builder for constructing responses
    pub fn builder() -> HttpResponseBuilder {
        HttpResponseBuilder::default()
    }

    /// Get the status code
    pub fn status(&self) -> Status {
        self.status
    }

    /// Get the headers
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Get mutable headers
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Get a header value (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Get the content, if any
    pub fn content(&self) -> Option<&[u8]> {
        self.content.as_deref()
    }

    /// Set the content
    pub fn set_content(&mut self, content: impl Into<Bytes>) {
        let content = content.into();
        self.content = (!content.is_empty()).then_some(content);
    }

    /// Convert the response to wire format
    ///
    /// Content-Length is computed by the serializer and written for every
    /// status that permits a body, so keep-alive framing never depends on
    /// the handler.
    pub fn to_wire(&self) -> Vec<u8> {
        let body = if self.status.permits_body() {
            self.content.as_deref()
        } else {
            None
        };
        let mut buf = Vec::with_capacity(128 + body.map_or(0, <[u8]>::len));

        // Status line
        buf.extend_from_slice(Version::Http11.as_str().as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(self.status.to_string().as_bytes());
        buf.extend_from_slice(CRLF.as_bytes());

        // Headers
        self.headers.write_wire(&mut buf, CONTENT_LENGTH);
        if self.status.permits_body() {
            write_content_length(&mut buf, body.map_or(0, <[u8]>::len));
        }

        // Empty line
        buf.extend_from_slice(CRLF.as_bytes());

        // Content
        if let Some(body) = body {
            buf.extend_from_slice(body);
        }

        buf
    }
}

impl From<Status> for HttpResponse {
    fn from(status: Status) -> Self {
        HttpResponse::new(status)
    }
}

/// Builder for HTTP responses
#[derive(Debug, Default)]
pub struct HttpResponseBuilder {
    status: Option<Status>,
    headers: Headers,
    content: Option<Bytes>,
}

impl HttpResponseBuilder {
    /// Set the status code
    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the content
    pub fn content(mut self, content: impl Into<Bytes>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Build the response
    pub fn build(self) -> HttpResponse {
        HttpResponse::from_parts(self.status.unwrap_or(Status::OK), self.headers, self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_from_str() {
        assert_eq!("HTTP/1.0".parse::<Version>().unwrap(), Version::Http10);
        assert_eq!("HTTP/1.1".parse::<Version>().unwrap(), Version::Http11);
        assert!("HTTP/2.0".parse::<Version>().is_err());
    }

    #[test]
    fn test_status() {
        let status = Status::new(200).unwrap();
        assert_eq!(status.code(), 200);
        assert_eq!(status.reason_phrase(), "OK");
        assert!(status.is_success());
        assert!(!status.is_client_error());

        assert_eq!(Status::new(599).unwrap().reason_phrase(), "Unknown");
        assert!(Status::new(99).is_err());
        assert!(Status::new(600).is_err());
        assert_eq!(Status::METHOD_NOT_ALLOWED.to_string(), "405 Method Not Allowed");
    }

    #[test]
    fn test_request_builder() {
        let req = HttpRequest::builder()
            .method("POST")
            .resource("/test")
            .header("Content-Type", "text/plain")
            .content("Hello")
            .build();

        assert_eq!(req.method(), "POST");
        assert_eq!(req.resource(), "/test");
        assert_eq!(req.content(), Some(&b"Hello"[..]));
        assert_eq!(req.header("content-type"), Some("text/plain"));
    }

    #[test]
    fn test_request_builder_args() {
        let req = HttpRequest::builder()
            .resource("/get")
            .arg("arg1", "&value1")
            .arg("arg2", "a b")
            .build();
        assert_eq!(req.resource(), "/get?arg1=%26value1&arg2=a%20b");
        assert_eq!(req.arg("arg1"), Some("&value1"));
        assert_eq!(req.arg("arg2"), Some("a b"));

        let req = HttpRequest::builder().resource("/get?x=1").arg("y", "2").build();
        assert_eq!(req.resource(), "/get?x=1&y=2");
    }

    #[test]
    fn test_request_path_query_and_args() {
        let req = HttpRequest::new("GET", "/endpoint?arg1=value%201&arg2=%26x");
        assert_eq!(req.path(), "/endpoint");
        assert_eq!(req.query(), Some("arg1=value%201&arg2=%26x"));
        assert_eq!(req.resource(), "/endpoint?arg1=value%201&arg2=%26x");
        assert_eq!(req.arg("arg1"), Some("value 1"));
        assert_eq!(req.arg("arg2"), Some("&x"));
        assert_eq!(req.arg("missing"), None);

        let req = HttpRequest::new("GET", "/");
        assert!(req.args().is_empty());
        assert_eq!(req.query(), None);
    }

    #[test]
    fn test_empty_content_is_absent() {
        let req = HttpRequest::builder().content(Vec::<u8>::new()).build();
        assert_eq!(req.content(), None);

        let wire = String::from_utf8(req.to_wire()).unwrap();
        assert!(!wire.contains("Content-Length"));
    }

    #[test]
    fn test_request_to_wire() {
        let req = HttpRequest::builder()
            .method("POST")
            .resource("/endpoint")
            .header("Host", "localhost")
            .header("Content-Length", "999")
            .content("Hello World!")
            .build();

        let wire = String::from_utf8(req.to_wire()).unwrap();
        assert_eq!(
            wire,
            "POST /endpoint HTTP/1.1\r\nHost: localhost\r\nContent-Length: 12\r\n\r\nHello World!"
        );
    }

    #[test]
    fn test_request_to_wire_normalizes_resource() {
        let req = HttpRequest::new("GET", "/endpoint?arg1=value%201&arg2=value%2A2");
        let wire = String::from_utf8(req.to_wire()).unwrap();
        assert_eq!(
            wire,
            "GET /endpoint?arg1=value%201&arg2=value%2a2 HTTP/1.1\r\n\r\n"
        );
    }

    #[test]
    fn test_response_builder() {
        let resp = HttpResponse::builder()
            .status(Status::NOT_FOUND)
            .header("Content-Type", "text/html")
            .content("Not Found")
            .build();

        assert_eq!(resp.status().code(), 404);
        assert_eq!(resp.content(), Some(&b"Not Found"[..]));
        assert_eq!(resp.header("content-type"), Some("text/html"));
    }

    #[test]
    fn test_response_to_wire() {
        let resp = HttpResponse::builder()
            .header("Content-Type", "text/plain")
            .header("Content-Length", "1")
            .content("Hello")
            .build();

        let wire = String::from_utf8(resp.to_wire()).unwrap();
        assert_eq!(
            wire,
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\r\nHello"
        );
    }

    #[test]
    fn test_response_to_wire_without_content() {
        let wire = String::from_utf8(HttpResponse::new(Status::NOT_FOUND).to_wire()).unwrap();
        assert_eq!(wire, "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n");

        let mut resp = HttpResponse::new(Status::NO_CONTENT);
        resp.set_content("ignored");
        let wire = String::from_utf8(resp.to_wire()).unwrap();
        assert_eq!(wire, "HTTP/1.1 204 No Content\r\n\r\n");
    }
}
