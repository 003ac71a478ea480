//! HTTP message parsing
//!
//! This module provides resumable parsers for HTTP requests and responses.
//! Bytes are fed as they arrive from the socket, in chunks of any size; the
//! parser keeps unconsumed bytes in a growable buffer and advances through
//! its states whenever enough of them are present.
//!
//! After a message completes, bytes that followed it stay buffered and are
//! parsed as the start of the next message on the next call.

use super::{
    Error, Headers, HttpRequest, HttpResponse, Result, Status, Version, MAX_CONTENT_LENGTH,
    MAX_HEADERS, MAX_LINE_LENGTH,
};
use bytes::{Bytes, BytesMut};

/// Find the next CRLF in a buffer
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Parse HTTP request line
///
/// Format: METHOD SP RESOURCE SP VERSION
/// Example: GET /index.html?x=1 HTTP/1.1
///
/// The method and resource are returned verbatim; the method is not checked
/// against any known set.
pub fn parse_request_line(line: &str) -> Result<(String, String, Version)> {
    let parts: Vec<&str> = line.split(' ').collect();

    if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(Error::Parse(format!("Invalid request line: {:?}", line)));
    }

    let version = parts[2].parse::<Version>()?;
    Ok((parts[0].to_string(), parts[1].to_string(), version))
}

/// Parse HTTP response status line
///
/// Format: VERSION SP STATUS SP REASON
/// Example: HTTP/1.1 200 OK
pub fn parse_status_line(line: &str) -> Result<(Version, Status)> {
    let parts: Vec<&str> = line.splitn(3, ' ').collect();

    if parts.len() < 2 {
        return Err(Error::Parse(format!(
            "Invalid status line: expected at least 2 parts, got {}",
            parts.len()
        )));
    }

    let version = parts[0].parse::<Version>()?;
    let code = parts[1]
        .parse::<u16>()
        .map_err(|_| Error::InvalidStatus(parts[1].to_string()))?;

    Ok((version, Status::new(code)?))
}

/// Bounds applied while parsing a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserLimits {
    /// Longest start or header line, without its CRLF
    pub max_line_length: usize,
    /// Most distinct header names in one message
    pub max_headers: usize,
    /// Largest Content-Length accepted
    pub max_content_length: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        ParserLimits {
            max_line_length: MAX_LINE_LENGTH,
            max_headers: MAX_HEADERS,
            max_content_length: MAX_CONTENT_LENGTH,
        }
    }
}

/// Parser progress through the current message
///
/// `RequestLine` also stands for the status line when parsing responses.
/// `Error` is terminal: a parser that reached it rejects all further input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    RequestLine,
    Headers,
    Body,
    Complete,
    Error,
}

/// Buffer and header-block handling shared by both parsers
#[derive(Debug)]
struct Framer {
    buffer: BytesMut,
    limits: ParserLimits,
    headers: Headers,
    content_length: usize,
}

impl Framer {
    fn new(limits: ParserLimits) -> Self {
        Framer {
            buffer: BytesMut::with_capacity(8192),
            limits,
            headers: Headers::new(),
            content_length: 0,
        }
    }

    /// Split the next CRLF-terminated line off the buffer.
    ///
    /// Only the first `max_line_length + 2` bytes are scanned. Lines must be
    /// valid UTF-8; they are never repaired.
    fn next_line(&mut self) -> Result<Option<String>> {
        let max = self.limits.max_line_length;
        let scan_len = self.buffer.len().min(max + 2);

        match find_crlf(&self.buffer[..scan_len]) {
            Some(pos) => {
                let line = self.buffer.split_to(pos + 2);
                let text = std::str::from_utf8(&line[..pos])
                    .map_err(|e| Error::Parse(format!("Line is not valid UTF-8: {}", e)))?;
                Ok(Some(text.to_string()))
            }
            None if scan_len >= max + 2 => Err(Error::LineTooLong(max)),
            None => Ok(None),
        }
    }

    /// Read header lines; returns true once the blank line was consumed
    fn read_headers(&mut self) -> Result<bool> {
        while let Some(line) = self.next_line()? {
            if line.is_empty() {
                self.content_length = self.declared_content_length()?;
                return Ok(true);
            }

            let (name, value) = Headers::parse_header_line(&line)?;
            if self.headers.len() >= self.limits.max_headers && !self.headers.contains(&name) {
                return Err(Error::TooManyHeaders(self.limits.max_headers));
            }
            self.headers.insert(name, value);
        }
        Ok(false)
    }

    fn declared_content_length(&self) -> Result<usize> {
        let Some(value) = self.headers.get("Content-Length") else {
            return Ok(0);
        };

        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidContentLength(value.to_string()));
        }
        let length = value
            .parse::<u64>()
            .map_err(|_| Error::InvalidContentLength(value.to_string()))?;

        match usize::try_from(length) {
            Ok(n) if n <= self.limits.max_content_length => Ok(n),
            _ => Err(Error::ContentTooLarge {
                length,
                limit: self.limits.max_content_length,
            }),
        }
    }

    /// Take the content once it is fully buffered.
    ///
    /// The outer `None` means more bytes are needed; `Some(None)` means the
    /// message has no content.
    fn take_content(&mut self) -> Option<Option<Bytes>> {
        if self.content_length == 0 {
            return Some(None);
        }
        if self.buffer.len() < self.content_length {
            return None;
        }
        Some(Some(self.buffer.split_to(self.content_length).freeze()))
    }

    /// Hand out the headers of the finished message and prepare for the next
    fn finish_message(&mut self) -> Headers {
        self.content_length = 0;
        std::mem::take(&mut self.headers)
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.headers.clear();
        self.content_length = 0;
    }
}

/// HTTP request parser
#[derive(Debug)]
pub struct RequestParser {
    state: ParserState,
    framer: Framer,
    method: String,
    resource: String,
}

impl RequestParser {
    /// Create a new request parser
    pub fn new() -> Self {
        Self::with_limits(ParserLimits::default())
    }

    /// Create a request parser with custom limits
    pub fn with_limits(limits: ParserLimits) -> Self {
        RequestParser {
            state: ParserState::RequestLine,
            framer: Framer::new(limits),
            method: String::new(),
            resource: String::new(),
        }
    }

    /// Current state of the parser
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Whether no part of a next message has been received yet
    pub fn is_idle(&self) -> bool {
        matches!(self.state, ParserState::RequestLine | ParserState::Complete)
            && self.framer.buffer.is_empty()
    }

    /// Feed data to the parser
    ///
    /// Returns Ok(Some(request)) when a complete request is parsed,
    /// Ok(None) if more data is needed, or Err on parse error. Pass an empty
    /// slice to parse bytes left over from a previous message.
    pub fn parse(&mut self, data: &[u8]) -> Result<Option<HttpRequest>> {
        if self.state == ParserState::Error {
            return Err(Error::Parse("Parser is in error state".to_string()));
        }

        self.framer.buffer.extend_from_slice(data);
        self.advance().inspect_err(|_| self.state = ParserState::Error)
    }

    fn advance(&mut self) -> Result<Option<HttpRequest>> {
        loop {
            match self.state {
                ParserState::Complete => self.state = ParserState::RequestLine,
                ParserState::RequestLine => {
                    let Some(line) = self.framer.next_line()? else {
                        return Ok(None);
                    };
                    // Stray CRLF between messages
                    if line.is_empty() {
                        continue;
                    }

                    let (method, resource, _version) = parse_request_line(&line)?;
                    self.method = method;
                    self.resource = resource;
                    self.state = ParserState::Headers;
                }
                ParserState::Headers => {
                    if !self.framer.read_headers()? {
                        return Ok(None);
                    }
                    self.state = ParserState::Body;
                }
                ParserState::Body => {
                    let Some(content) = self.framer.take_content() else {
                        return Ok(None);
                    };
                    self.state = ParserState::Complete;

                    return Ok(Some(HttpRequest::from_parts(
                        std::mem::take(&mut self.method),
                        std::mem::take(&mut self.resource),
                        self.framer.finish_message(),
                        content,
                    )));
                }
                ParserState::Error => {
                    return Err(Error::Parse("Parser is in error state".to_string()));
                }
            }
        }
    }

    /// Reset the parser for reuse, dropping any buffered bytes
    pub fn reset(&mut self) {
        self.state = ParserState::RequestLine;
        self.framer.clear();
        self.method.clear();
        self.resource.clear();
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

/// HTTP response parser
#[derive(Debug)]
pub struct ResponseParser {
    state: ParserState,
    framer: Framer,
    status: Option<Status>,
}

impl ResponseParser {
    /// Create a new response parser
    pub fn new() -> Self {
        Self::with_limits(ParserLimits::default())
    }

    /// Create a response parser with custom limits
    pub fn with_limits(limits: ParserLimits) -> Self {
        ResponseParser {
            state: ParserState::RequestLine,
            framer: Framer::new(limits),
            status: None,
        }
    }

    /// Current state of the parser
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Feed data to the parser
    ///
    /// Returns Ok(Some(response)) when a complete response is parsed,
    /// Ok(None) if more data is needed, or Err on parse error.
    pub fn parse(&mut self, data: &[u8]) -> Result<Option<HttpResponse>> {
        if self.state == ParserState::Error {
            return Err(Error::Parse("Parser is in error state".to_string()));
        }

        self.framer.buffer.extend_from_slice(data);
        self.advance().inspect_err(|_| self.state = ParserState::Error)
    }

    fn advance(&mut self) -> Result<Option<HttpResponse>> {
        loop {
            match self.state {
                ParserState::Complete => self.state = ParserState::RequestLine,
                ParserState::RequestLine => {
                    let Some(line) = self.framer.next_line()? else {
                        return Ok(None);
                    };
                    let (_version, status) = parse_status_line(&line)?;
                    self.status = Some(status);
                    self.state = ParserState::Headers;
                }
                ParserState::Headers => {
                    if !self.framer.read_headers()? {
                        return Ok(None);
                    }
                    self.state = ParserState::Body;
                }
                ParserState::Body => {
                    let Some(content) = self.framer.take_content() else {
                        return Ok(None);
                    };
                    let status = self
                        .status
                        .take()
                        .ok_or_else(|| Error::Parse("Missing status line".to_string()))?;
                    self.state = ParserState::Complete;

                    return Ok(Some(HttpResponse::from_parts(
                        status,
                        self.framer.finish_message(),
                        content,
                    )));
                }
                ParserState::Error => {
                    return Err(Error::Parse("Parser is in error state".to_string()));
                }
            }
        }
    }

    /// Reset the parser for reuse
    pub fn reset(&mut self) {
        self.state = ParserState::RequestLine;
        self.framer.clear();
        self.status = None;
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}
