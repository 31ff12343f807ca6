//! Socket abstraction shared by the server and client sides.
//!
//! [`SocketHandle`] unifies plain TCP streams and local (Unix domain)
//! streams behind one cheaply clonable handle. It is the single
//! shared-ownership type in the crate: a handle may be held by a worker
//! thread, an HTTP connection wrapper and the dispatcher's pending queue at
//! the same time, all referring to the same underlying stream.
//!
//! All blocking I/O is sliced: a bounded wait is implemented as a series of
//! short OS-level timeouts with a [`ProgressController`] check between
//! slices, so stopping the server cooperatively unwinds reads and writes
//! without killing threads.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::addr::ServerAddress;

/// Granularity of blocking waits; every slice re-checks cancellation.
pub const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Cooperative cancellation check threaded through long-running operations.
///
/// `progress` is a completion hint in `0.0..=1.0`; implementations that do
/// not track progress ignore it.
pub trait ProgressController: Send + Sync {
    fn can_continue(&self, progress: f64) -> bool;
}

/// A controller that never cancels.
pub struct FreeRun;

impl ProgressController for FreeRun {
    fn can_continue(&self, _progress: f64) -> bool {
        true
    }
}

/// Transport kind of a socket handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Plain TCP stream socket.
    Stream,
    /// Local (Unix domain) socket.
    Local,
}

enum Transport {
    Tcp(TcpStream),
    Local(UnixStream),
}

struct SocketInner {
    transport: Transport,
    broken: AtomicBool,
}

/// Shared handle to one live connection.
#[derive(Clone)]
pub struct SocketHandle {
    inner: Arc<SocketInner>,
}

impl SocketHandle {
    pub fn from_tcp(stream: TcpStream) -> Self {
        let _ = stream.set_nodelay(true);
        Self {
            inner: Arc::new(SocketInner {
                transport: Transport::Tcp(stream),
                broken: AtomicBool::new(false),
            }),
        }
    }

    pub fn from_local(stream: UnixStream) -> Self {
        Self {
            inner: Arc::new(SocketInner {
                transport: Transport::Local(stream),
                broken: AtomicBool::new(false),
            }),
        }
    }

    /// Connect to a server address. TLS addresses are recognized but the
    /// encrypted transport is an external provider, so they are rejected.
    pub fn connect(address: &ServerAddress, timeout: Duration) -> io::Result<Self> {
        match address {
            ServerAddress::Tcp { host, port, .. } => {
                let mut last = io::Error::new(io::ErrorKind::InvalidInput, "no address resolved");
                for addr in (host.as_str(), *port).to_socket_addrs()? {
                    match TcpStream::connect_timeout(&addr, timeout) {
                        Ok(stream) => return Ok(Self::from_tcp(stream)),
                        Err(e) => last = e,
                    }
                }
                Err(last)
            }
            ServerAddress::Tls { .. } => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "encrypted transport is not provided by this crate",
            )),
            ServerAddress::Local { socket_path } => {
                Ok(Self::from_local(UnixStream::connect(socket_path)?))
            }
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self.inner.transport {
            Transport::Tcp(_) => TransportKind::Stream,
            Transport::Local(_) => TransportKind::Local,
        }
    }

    /// Raw file descriptor, used to detect duplicate queued connections.
    pub fn raw_fd(&self) -> i32 {
        match &self.inner.transport {
            Transport::Tcp(s) => s.as_raw_fd(),
            Transport::Local(s) => s.as_raw_fd(),
        }
    }

    /// False once an I/O operation has failed terminally on this handle.
    pub fn is_writable(&self) -> bool {
        !self.inner.broken.load(Ordering::Acquire)
    }

    pub fn is_readable(&self) -> bool {
        !self.inner.broken.load(Ordering::Acquire)
    }

    fn mark_broken(&self) {
        self.inner.broken.store(true, Ordering::Release);
    }

    fn set_read_timeout(&self, timeout: Duration) -> io::Result<()> {
        match &self.inner.transport {
            Transport::Tcp(s) => s.set_read_timeout(Some(timeout)),
            Transport::Local(s) => s.set_read_timeout(Some(timeout)),
        }
    }

    fn set_write_timeout(&self, timeout: Duration) -> io::Result<()> {
        match &self.inner.transport {
            Transport::Tcp(s) => s.set_write_timeout(Some(timeout)),
            Transport::Local(s) => s.set_write_timeout(Some(timeout)),
        }
    }

    fn read_once(&self, buf: &mut [u8]) -> io::Result<usize> {
        match &self.inner.transport {
            Transport::Tcp(s) => (&*s).read(buf),
            Transport::Local(s) => (&*s).read(buf),
        }
    }

    fn write_once(&self, data: &[u8]) -> io::Result<usize> {
        match &self.inner.transport {
            Transport::Tcp(s) => (&*s).write(data),
            Transport::Local(s) => (&*s).write(data),
        }
    }

    /// Read into `buf`, waiting up to `wait`. Returns `Ok(0)` on a clean
    /// end of stream, `TimedOut` when the wait expires with nothing read,
    /// and `Interrupted` when the controller cancels.
    pub fn read_waited(
        &self,
        buf: &mut [u8],
        wait: Duration,
        controller: &dyn ProgressController,
    ) -> io::Result<usize> {
        let deadline = Instant::now() + wait;
        self.set_read_timeout(WAIT_SLICE.min(wait.max(Duration::from_millis(1))))?;
        loop {
            if !controller.can_continue(0.0) {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "cancelled"));
            }
            match self.read_once(buf) {
                Ok(n) => return Ok(n),
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    if Instant::now() >= deadline {
                        return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.mark_broken();
                    return Err(e);
                }
            }
        }
    }

    /// Write all of `data`, waiting up to `wait` in total.
    pub fn write_all_waited(
        &self,
        data: &[u8],
        wait: Duration,
        controller: &dyn ProgressController,
    ) -> io::Result<()> {
        let deadline = Instant::now() + wait;
        self.set_write_timeout(WAIT_SLICE.min(wait.max(Duration::from_millis(1))))?;
        let mut written = 0usize;
        while written < data.len() {
            if !controller.can_continue(written as f64 / data.len() as f64) {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "cancelled"));
            }
            match self.write_once(&data[written..]) {
                Ok(0) => {
                    self.mark_broken();
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "connection closed while writing",
                    ));
                }
                Ok(n) => written += n,
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    if Instant::now() >= deadline {
                        return Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out"));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.mark_broken();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Half-close both directions; errors are ignored because the peer may
    /// already be gone.
    pub fn shutdown(&self) {
        match &self.inner.transport {
            Transport::Tcp(s) => {
                let _ = s.shutdown(Shutdown::Both);
            }
            Transport::Local(s) => {
                let _ = s.shutdown(Shutdown::Both);
            }
        }
    }
}

impl std::fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketHandle")
            .field("kind", &self.kind())
            .field("fd", &self.raw_fd())
            .field("broken", &!self.is_writable())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use std::net::{TcpListener, TcpStream};

    /// A connected loopback stream pair: (client, server).
    pub fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }
}
