//! Connection sessions
//!
//! All socket I/O goes through the `SessionOps` trait, which `HttpSession`
//! wraps with an optional timeout. `Session` drives one accepted connection:
//! it parses requests, dispatches them through the router and writes the
//! responses back, keeping the connection open until the peer closes it.

use super::{Error, HttpRequest, ParserLimits, RequestParser, Result, Router, READ_CHUNK_SIZE};
use std::io::{self, Read};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Session operations trait
///
/// This trait defines the operations that can be performed on a connection,
/// so the session loop never touches file descriptors directly.
pub trait SessionOps {
    /// Poll the session for events
    ///
    /// Returns true if the session is ready for the requested operation
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool>;

    /// Read data from the session
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write data to the session
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Close the session
    fn close(&mut self) -> Result<()>;
}

/// Poll events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
    Both,
}

/// Connection wrapper with an optional I/O timeout
///
/// The underlying connection is closed when the session is dropped.
pub struct HttpSession<S: SessionOps> {
    session: S,
    timeout: Option<Duration>,
}

impl<S: SessionOps> HttpSession<S> {
    /// Create a new session without a timeout
    pub fn new(session: S) -> Self {
        HttpSession {
            session,
            timeout: None,
        }
    }

    /// Set the timeout for operations
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Get the timeout
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Read data, waiting at most the configured timeout
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            if self.timeout.is_some() && !self.session.poll(PollEvents::Read, self.timeout)? {
                return Err(Error::Timeout);
            }

            match self.session.read(buf) {
                Err(Error::Io(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }

    /// Write data, waiting at most the configured timeout
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        loop {
            if self.timeout.is_some() && !self.session.poll(PollEvents::Write, self.timeout)? {
                return Err(Error::Timeout);
            }

            match self.session.write(buf) {
                Err(Error::Io(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }

    /// Wait for the connection to become ready, at most `timeout`
    pub fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        self.session.poll(events, timeout)
    }

    /// Write the whole buffer
    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let mut written = 0;

        while written < buf.len() {
            let n = self.write(&buf[written..])?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            written += n;
        }

        Ok(())
    }

    /// Close the session
    pub fn close(&mut self) -> Result<()> {
        self.session.close()
    }
}

impl<S: SessionOps> Drop for HttpSession<S> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::debug!("Error closing session: {}", e);
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

/// Wait until `fd` is ready for `events`, or `timeout` passes
///
/// Returns false on timeout. `None` waits forever.
pub(crate) fn poll_fd(fd: RawFd, events: libc::c_short, timeout: Option<Duration>) -> Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };

    let timeout_ms = timeout
        .map(|d| i32::try_from(d.as_millis()).unwrap_or(i32::MAX))
        .unwrap_or(-1); // -1 = infinite

    loop {
        // SAFETY: pfd is a single valid pollfd for the duration of the call
        let result = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };

        if result >= 0 {
            return Ok(result > 0);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(Error::Io(err));
        }
    }
}

/// Session operations over a Unix domain socket stream
pub struct UnixSessionOps {
    stream: UnixStream,
}

impl UnixSessionOps {
    /// Create new session operations from a Unix stream
    pub fn new(stream: UnixStream) -> Self {
        UnixSessionOps { stream }
    }
}

impl SessionOps for UnixSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        use libc::{POLLIN, POLLOUT};

        let events = match events {
            PollEvents::Read => POLLIN,
            PollEvents::Write => POLLOUT,
            PollEvents::Both => POLLIN | POLLOUT,
        };
        poll_fd(self.stream.as_raw_fd(), events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream.read(buf).map_err(Error::from)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        // send(2) rather than write(2): a vanished peer must give EPIPE,
        // not SIGPIPE
        // SAFETY: buf is valid for buf.len() bytes and the fd is owned by self
        let n = unsafe {
            libc::send(
                self.stream.as_raw_fd(),
                buf.as_ptr().cast::<libc::c_void>(),
                buf.len(),
                SEND_FLAGS,
            )
        };

        if n < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        Ok(n as usize)
    }

    fn close(&mut self) -> Result<()> {
        use std::net::Shutdown;
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(Error::from(e)),
            _ => Ok(()),
        }
    }
}

/// Helper to create an HTTP session from a Unix stream
pub fn from_unix_stream(stream: UnixStream) -> HttpSession<UnixSessionOps> {
    HttpSession::new(UnixSessionOps::new(stream))
}

/// Server side of one connection
///
/// Requests are answered strictly in order, one at a time. The connection
/// stays open after every response until the peer closes it or a framing
/// error ends the session.
pub struct Session<S: SessionOps> {
    io: HttpSession<S>,
    parser: RequestParser,
    router: Arc<Router>,
    stop: Option<StopSignal>,
}

struct StopSignal {
    flag: Arc<AtomicBool>,
    interval: Duration,
}

impl<S: SessionOps> Session<S> {
    /// Create a session over an established connection
    pub fn new(io: HttpSession<S>, router: Arc<Router>, limits: ParserLimits) -> Self {
        Session {
            io,
            parser: RequestParser::with_limits(limits),
            router,
            stop: None,
        }
    }

    /// End the session once `flag` is set
    ///
    /// The flag is checked every `interval` while waiting for the peer, so a
    /// stop request is noticed even on an idle connection.
    pub fn stop_on(mut self, flag: Arc<AtomicBool>, interval: Duration) -> Self {
        self.stop = Some(StopSignal { flag, interval });
        self
    }

    /// Serve requests until the peer closes the connection
    ///
    /// Returns the number of requests served when the peer closes between
    /// messages. A close in the middle of a message gives
    /// `Error::IncompleteMessage`; a malformed message returns its parse
    /// error. No response is written in either case. A stop request set with
    /// `stop_on` ends the session with the count served so far. The
    /// connection is closed on every exit.
    pub fn run(mut self) -> Result<usize> {
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];
        let mut received = 0;
        let mut served = 0;

        loop {
            match self.parser.parse(&chunk[..received])? {
                Some(request) => {
                    self.respond(&request)?;
                    served += 1;
                    // Bytes past this request stay buffered in the parser
                    received = 0;
                }
                None => {
                    if !self.wait_readable()? {
                        log::debug!("Session stopped after {} requests", served);
                        return Ok(served);
                    }
                    received = self.io.read(&mut chunk)?;
                    if received == 0 {
                        return if self.parser.is_idle() {
                            Ok(served)
                        } else {
                            Err(Error::IncompleteMessage)
                        };
                    }
                }
            }
        }
    }

    /// Wait until the peer has sent something; false if a stop was requested
    fn wait_readable(&self) -> Result<bool> {
        let Some(stop) = &self.stop else {
            return Ok(true);
        };
        let deadline = self.io.timeout().map(|t| Instant::now() + t);

        loop {
            if stop.flag.load(Ordering::Acquire) {
                return Ok(false);
            }

            let mut wait = stop.interval;
            if let Some(deadline) = deadline {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    return Err(Error::Timeout);
                }
                wait = wait.min(left);
            }

            if self.io.poll(PollEvents::Read, Some(wait))? {
                return Ok(true);
            }
        }
    }

    fn respond(&mut self, request: &HttpRequest) -> Result<()> {
        let response = self.router.dispatch(request);
        log::debug!(
            "{} {} -> {}",
            request.method(),
            request.resource(),
            response.status().code()
        );
        self.io.write_all(&response.to_wire())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpResponse;
    use std::io::Write;
    use std::net::Shutdown;
    use std::thread;

    fn router() -> Arc<Router> {
        Arc::new(
            Router::new()
                .route("GET", "/get", |req| {
                    Ok(HttpResponse::ok(req.arg("n").unwrap_or("none").to_string()))
                })
                .route("POST", "/post", |req| {
                    Ok(HttpResponse::ok(req.content().unwrap_or_default().to_vec()))
                }),
        )
    }

    fn serve(stream: UnixStream) -> thread::JoinHandle<Result<usize>> {
        let router = router();
        thread::spawn(move || {
            Session::new(from_unix_stream(stream), router, ParserLimits::default()).run()
        })
    }

    fn exchange(input: &[u8]) -> (Result<usize>, String) {
        let (mut client, server) = UnixStream::pair().unwrap();
        let handle = serve(server);

        client.write_all(input).unwrap();
        client.shutdown(Shutdown::Write).unwrap();

        let mut output = String::new();
        client.read_to_string(&mut output).unwrap();
        (handle.join().unwrap(), output)
    }

    #[test]
    fn test_unix_session_ops() {
        let (mut peer, stream) = UnixStream::pair().unwrap();
        let mut session = UnixSessionOps::new(stream);

        assert!(!session.poll(PollEvents::Read, Some(Duration::ZERO)).unwrap());
        assert!(session.poll(PollEvents::Write, Some(Duration::ZERO)).unwrap());

        peer.write_all(b"Hello").unwrap();
        assert!(session.poll(PollEvents::Read, Some(Duration::from_secs(1))).unwrap());
        assert!(session.poll(PollEvents::Both, Some(Duration::ZERO)).unwrap());

        let mut buf = [0u8; 5];
        assert_eq!(session.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"Hello");

        assert_eq!(session.write(b"World").unwrap(), 5);
        let mut buf = [0u8; 5];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"World");
    }

    #[test]
    fn test_http_session_timeout() {
        let (_peer, stream) = UnixStream::pair().unwrap();
        let mut session = from_unix_stream(stream);
        assert_eq!(session.timeout(), None);
        session.set_timeout(Some(Duration::from_millis(100)));

        let mut buf = [0u8; 10];
        let result = session.read(&mut buf);
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[test]
    fn test_write_to_closed_peer_is_an_error() {
        let (peer, stream) = UnixStream::pair().unwrap();
        drop(peer);

        let mut session = from_unix_stream(stream);
        let result = session.write_all(b"GET / HTTP/1.1\r\n\r\n");
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_drop_closes_connection() {
        let (mut peer, stream) = UnixStream::pair().unwrap();
        drop(from_unix_stream(stream));

        let mut buf = Vec::new();
        assert_eq!(peer.read_to_end(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_keep_alive_serves_requests_in_order() {
        let (result, output) = exchange(
            b"GET /get?n=1 HTTP/1.1\r\n\r\n\
              POST /post HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello\
              GET /get?n=3 HTTP/1.1\r\n\r\n",
        );

        assert_eq!(result.unwrap(), 3);
        assert_eq!(
            output,
            "HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\n1\
             HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello\
             HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\n3"
        );
    }

    #[test]
    fn test_routing_misses_keep_connection_open() {
        let (result, output) = exchange(
            b"GET /missing HTTP/1.1\r\n\r\nPUT /get HTTP/1.1\r\n\r\nGET /get HTTP/1.1\r\n\r\n",
        );

        assert_eq!(result.unwrap(), 3);
        assert!(output.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(output.contains("HTTP/1.1 405 Method Not Allowed\r\nAllow: GET\r\n"));
        assert!(output.ends_with("\r\n\r\nnone"));
    }

    #[test]
    fn test_close_without_requests() {
        let (result, output) = exchange(b"");
        assert_eq!(result.unwrap(), 0);
        assert!(output.is_empty());
    }

    #[test]
    fn test_close_mid_message() {
        let (result, output) = exchange(b"POST /post HTTP/1.1\r\nContent-Length: 10\r\n\r\nhel");
        assert!(matches!(result, Err(Error::IncompleteMessage)));
        assert!(output.is_empty());
    }

    #[test]
    fn test_malformed_request_gets_no_response() {
        let (result, output) = exchange(b"GET /get HTTP/1.1\r\n\r\nnonsense\r\n\r\n");
        let err = result.unwrap_err();
        assert!(err.is_framing());
        assert_eq!(output, "HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\nnone");
    }

    #[test]
    fn test_non_utf8_request_gets_no_response() {
        let (result, output) = exchange(b"GET /caf\xe9 HTTP/1.1\r\n\r\n");
        assert!(matches!(result, Err(Error::Parse(_))));
        assert!(output.is_empty());
    }

    #[test]
    fn test_stop_ends_idle_session() {
        let (mut client, server) = UnixStream::pair().unwrap();
        let flag = Arc::new(AtomicBool::new(false));

        let session = Session::new(from_unix_stream(server), router(), ParserLimits::default())
            .stop_on(Arc::clone(&flag), Duration::from_millis(10));
        let handle = thread::spawn(move || session.run());

        let expected = b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\nnone";
        client.write_all(b"GET /get HTTP/1.1\r\n\r\n").unwrap();
        let mut response = vec![0u8; expected.len()];
        client.read_exact(&mut response).unwrap();
        assert_eq!(response, expected);

        // The client stays connected; only the flag ends the session
        flag.store(true, Ordering::Release);
        assert_eq!(handle.join().unwrap().unwrap(), 1);

        let mut rest = Vec::new();
        assert_eq!(client.read_to_end(&mut rest).unwrap(), 0);
    }

    #[test]
    fn test_stop_keeps_read_timeout() {
        let (_client, server) = UnixStream::pair().unwrap();
        let flag = Arc::new(AtomicBool::new(false));

        let mut io = from_unix_stream(server);
        io.set_timeout(Some(Duration::from_millis(50)));
        let result = Session::new(io, router(), ParserLimits::default())
            .stop_on(flag, Duration::from_millis(10))
            .run();
        assert!(matches!(result, Err(Error::Timeout)));
    }
}
