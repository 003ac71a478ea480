//! Unix socket HTTP client
//!
//! Every request opens a fresh connection, writes the request, reads exactly
//! one response and closes the connection again.

use super::session::{from_unix_stream, HttpSession, UnixSessionOps};
use super::{
    Error, HttpRequest, HttpResponse, ParserLimits, ResponseParser, Result, READ_CHUNK_SIZE,
};
use bytes::Bytes;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Client configuration
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Timeout for each socket read and write; `None` blocks indefinitely
    pub timeout: Option<Duration>,
    pub limits: ParserLimits,
}

/// HTTP client for a server listening on a Unix socket
#[derive(Debug, Clone)]
pub struct Client {
    socket_path: PathBuf,
    config: ClientConfig,
}

impl Client {
    /// Create a client for the server at `socket_path`
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self::with_config(socket_path, ClientConfig::default())
    }

    /// Create a client with custom configuration
    pub fn with_config(socket_path: impl AsRef<Path>, config: ClientConfig) -> Self {
        Client {
            socket_path: socket_path.as_ref().to_path_buf(),
            config,
        }
    }

    /// Path of the server socket
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    fn connect(&self) -> Result<HttpSession<UnixSessionOps>> {
        let stream = UnixStream::connect(&self.socket_path)?;
        let mut session = from_unix_stream(stream);
        session.set_timeout(self.config.timeout);
        Ok(session)
    }

    /// Send a request and wait for its response
    ///
    /// The resource is normalized and Content-Length is computed from the
    /// content before the request is written.
    pub fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        log::debug!(
            "Sending {} {} to {}",
            request.method(),
            request.resource(),
            self.socket_path.display()
        );

        let mut session = self.connect()?;
        session.write_all(&request.to_wire())?;

        let mut parser = ResponseParser::with_limits(self.config.limits);
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];

        loop {
            let n = session.read(&mut chunk)?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }

            if let Some(response) = parser.parse(&chunk[..n])? {
                return Ok(response);
            }
        }
    }

    /// Send a request without waiting for a response
    pub fn send_only(&self, request: &HttpRequest) -> Result<()> {
        log::debug!(
            "Sending {} {} to {} (no response expected)",
            request.method(),
            request.resource(),
            self.socket_path.display()
        );

        let mut session = self.connect()?;
        session.write_all(&request.to_wire())
    }

    /// Send a request without headers or content
    pub fn request(&self, method: &str, resource: &str) -> Result<HttpResponse> {
        self.send(&HttpRequest::new(method, resource))
    }

    /// Send a GET request
    pub fn get(&self, resource: &str) -> Result<HttpResponse> {
        self.request("GET", resource)
    }

    /// Send a POST request carrying `content`
    pub fn post(&self, resource: &str, content: impl Into<Bytes>) -> Result<HttpResponse> {
        let request = HttpRequest::builder()
            .method("POST")
            .resource(resource)
            .content(content)
            .build();
        self.send(&request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Status;
    use std::io::{Read, Write};
    use std::os::unix::net::UnixListener;
    use std::thread;

    /// Accept one connection, capture the request bytes and answer with
    /// `reply`. Returns what was received.
    fn one_shot(listener: UnixListener, reply: &'static [u8]) -> thread::JoinHandle<Vec<u8>> {
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 1024];

            // Headers, then as much content as Content-Length says
            let header_end = loop {
                let n = stream.read(&mut buf).unwrap();
                received.extend_from_slice(&buf[..n]);
                if let Some(pos) = received.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let head = String::from_utf8_lossy(&received[..header_end]).to_string();
            let length = head
                .lines()
                .find_map(|l| l.strip_prefix("Content-Length: "))
                .map_or(0, |v| v.trim().parse::<usize>().unwrap());
            while received.len() < header_end + length {
                let n = stream.read(&mut buf).unwrap();
                received.extend_from_slice(&buf[..n]);
            }

            stream.write_all(reply).unwrap();
            received
        })
    }

    fn listener() -> (tempfile::TempDir, PathBuf, UnixListener) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.sock");
        let listener = UnixListener::bind(&path).unwrap();
        (dir, path, listener)
    }

    #[test]
    fn test_send_normalizes_resource() {
        let (_dir, path, listener) = listener();
        let server = one_shot(listener, b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");

        let response = Client::new(&path)
            .get("/endpoint?arg1=value%201&arg2=value%2A2")
            .unwrap();
        assert_eq!(response.status(), Status::OK);
        assert_eq!(response.content(), Some(&b"ok"[..]));

        let received = server.join().unwrap();
        assert_eq!(
            received,
            b"GET /endpoint?arg1=value%201&arg2=value%2a2 HTTP/1.1\r\n\r\n"
        );
    }

    #[test]
    fn test_post_computes_content_length() {
        let (_dir, path, listener) = listener();
        let server = one_shot(listener, b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");

        let response = Client::new(&path).post("/endpoint", "Hello World!").unwrap();
        assert_eq!(response.content(), None);

        let received = server.join().unwrap();
        assert_eq!(
            received,
            b"POST /endpoint HTTP/1.1\r\nContent-Length: 12\r\n\r\nHello World!"
        );
    }

    #[test]
    fn test_send_only_does_not_wait() {
        let (_dir, path, listener) = listener();
        let server = one_shot(listener, b"");

        let request = HttpRequest::builder()
            .method("PUT")
            .resource("/")
            .header("X-Test", "1")
            .build();
        Client::new(&path).send_only(&request).unwrap();

        let received = server.join().unwrap();
        assert_eq!(received, b"PUT / HTTP/1.1\r\nX-Test: 1\r\n\r\n");
    }

    #[test]
    fn test_closed_without_response() {
        let (_dir, path, listener) = listener();
        let server = one_shot(listener, b"");

        let result = Client::new(&path).get("/");
        assert!(matches!(result, Err(Error::ConnectionClosed)));
        server.join().unwrap();
    }

    #[test]
    fn test_malformed_response() {
        let (_dir, path, listener) = listener();
        let server = one_shot(listener, b"HTTP/1.1 OK\r\n\r\n");

        let err = Client::new(&path).get("/").unwrap_err();
        assert!(err.is_framing());
        server.join().unwrap();
    }

    #[test]
    fn test_connect_failure() {
        let dir = tempfile::tempdir().unwrap();
        let client = Client::new(dir.path().join("missing.sock"));
        assert!(matches!(client.get("/"), Err(Error::Io(_))));
    }
}
