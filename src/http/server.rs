//! Unix socket HTTP server
//!
//! The server owns a listening socket and hands every accepted connection to
//! a `Session`. Sessions share nothing but the read-only router.

use super::session::{from_unix_stream, poll_fd};
use super::{Error, ParserLimits, Result, Router, Session};
use socket2::{Domain, SockAddr, Socket, Type};
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How accepted connections are served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Concurrency {
    /// Serve each connection on the accept thread before accepting the next
    ///
    /// A spawned server still ends an idle connection once it is terminated.
    Sequential,
    /// Serve each connection on its own thread
    #[default]
    ThreadPerConnection,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub concurrency: Concurrency,
    /// Timeout for each socket read and write; `None` blocks indefinitely
    pub read_timeout: Option<Duration>,
    /// How often a spawned accept loop checks for termination
    pub accept_poll_interval: Duration,
    /// Listen backlog
    pub backlog: i32,
    pub limits: ParserLimits,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            concurrency: Concurrency::default(),
            read_timeout: None,
            accept_poll_interval: Duration::from_millis(250),
            backlog: 128,
            limits: ParserLimits::default(),
        }
    }
}

/// HTTP server bound to a Unix socket path
pub struct Server {
    listener: UnixListener,
    router: Arc<Router>,
    config: ServerConfig,
    path: PathBuf,
}

impl Server {
    /// Bind and listen on `path` with the default configuration
    pub fn bind(path: impl AsRef<Path>, router: Router) -> Result<Self> {
        Self::bind_with_config(path, router, ServerConfig::default())
    }

    /// Bind and listen on `path`
    ///
    /// Fails if the path already exists; removing a stale socket file is
    /// left to the caller.
    pub fn bind_with_config(
        path: impl AsRef<Path>,
        router: Router,
        config: ServerConfig,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
        socket.bind(&SockAddr::unix(&path)?)?;
        socket.listen(config.backlog)?;
        let listener: UnixListener = socket.into();

        log::info!("Listening on {}", path.display());

        Ok(Server {
            listener,
            router: Arc::new(router),
            config,
            path,
        })
    }

    /// Path of the listening socket
    pub fn local_path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Accept and serve connections forever
    pub fn serve(self) -> Result<()> {
        let mut backoff = AcceptBackoff::new();

        loop {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    backoff.reset();
                    self.handle(stream, None);
                }
                Err(e) => accept_failed(&e, &mut backoff),
            }
        }
    }

    /// Run the accept loop on a background thread
    pub fn spawn(self) -> Result<ServerHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name("unixhttp-accept".to_string())
            .spawn(move || self.accept_until(&flag))?;

        Ok(ServerHandle { stop, thread })
    }

    fn accept_until(&self, stop: &Arc<AtomicBool>) -> Result<()> {
        let interval = Some(self.config.accept_poll_interval);
        let mut backoff = AcceptBackoff::new();

        while !stop.load(Ordering::Acquire) {
            if !poll_fd(self.listener.as_raw_fd(), libc::POLLIN, interval)? {
                continue;
            }

            match self.listener.accept() {
                Ok((stream, _)) => {
                    backoff.reset();
                    self.handle(stream, Some(stop));
                }
                Err(e) => accept_failed(&e, &mut backoff),
            }
        }

        log::info!("Stopped listening on {}", self.path.display());
        Ok(())
    }

    fn handle(&self, stream: UnixStream, stop: Option<&Arc<AtomicBool>>) {
        log::debug!("Accepted connection on {}", self.path.display());

        let router = Arc::clone(&self.router);
        let timeout = self.config.read_timeout;
        let limits = self.config.limits;

        match self.config.concurrency {
            Concurrency::Sequential => {
                // The session runs on the accept thread, so it has to watch
                // the stop flag itself
                let stop = stop.map(|flag| (Arc::clone(flag), self.config.accept_poll_interval));
                run_session(stream, router, timeout, limits, stop);
            }
            Concurrency::ThreadPerConnection => {
                let spawned = thread::Builder::new()
                    .name("unixhttp-session".to_string())
                    .spawn(move || run_session(stream, router, timeout, limits, None));

                if let Err(e) = spawned {
                    log::warn!("Failed to spawn session thread: {}", e);
                }
            }
        }
    }
}

fn run_session(
    stream: UnixStream,
    router: Arc<Router>,
    timeout: Option<Duration>,
    limits: ParserLimits,
    stop: Option<(Arc<AtomicBool>, Duration)>,
) {
    let mut io = from_unix_stream(stream);
    io.set_timeout(timeout);

    let mut session = Session::new(io, router, limits);
    if let Some((flag, interval)) = stop {
        session = session.stop_on(flag, interval);
    }

    match session.run() {
        Ok(served) => log::debug!("Connection closed after {} requests", served),
        Err(e) if e.is_framing() => log::warn!("Dropping connection: {}", e),
        Err(e) => log::debug!("Connection ended: {}", e),
    }
}

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Delay after a failed accept, doubling on each consecutive failure
#[derive(Debug)]
struct AcceptBackoff {
    delay: Duration,
}

impl AcceptBackoff {
    fn new() -> Self {
        AcceptBackoff {
            delay: ACCEPT_BACKOFF_MIN,
        }
    }

    /// Delay to wait after this failure
    fn failed(&mut self) -> Duration {
        let delay = self.delay;
        self.delay = (delay * 2).min(ACCEPT_BACKOFF_MAX);
        delay
    }

    fn reset(&mut self) {
        self.delay = ACCEPT_BACKOFF_MIN;
    }
}

// Errors such as EMFILE persist until a descriptor is freed; without the
// delay the loop would spin
fn accept_failed(e: &io::Error, backoff: &mut AcceptBackoff) {
    let delay = backoff.failed();
    log::warn!("Accept failed: {} (retrying in {:?})", e, delay);
    thread::sleep(delay);
}

/// Handle to a server running on a background thread
///
/// Terminating stops the accept loop. With `ThreadPerConnection`, connections
/// already accepted are served to completion on their own threads. With
/// `Sequential`, the connection being served on the accept thread is closed
/// within one `accept_poll_interval` of the stop request.
pub struct ServerHandle {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<Result<()>>,
}

impl ServerHandle {
    /// Ask the accept loop to stop
    pub fn terminate(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Whether the accept loop has exited
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the accept loop to exit
    pub fn wait_until_done(self) -> Result<()> {
        self.thread
            .join()
            .map_err(|_| Error::Io(io::Error::other("accept thread panicked")))?
    }
}
