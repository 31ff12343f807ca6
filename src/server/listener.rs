//! Listening sockets and the accept loop.

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{info, warn};

use crate::addr::ServerAddress;
use crate::config::DispatcherConfig;
use crate::server::dispatcher::{Dispatcher, StopMode};
use crate::server::Protocol;
use crate::socket::SocketHandle;

const ACCEPT_IDLE: Duration = Duration::from_millis(50);

enum ListenSocket {
    Tcp(TcpListener),
    Local(UnixListener, PathBuf),
}

/// Binds an address and feeds accepted connections to a dispatcher.
pub struct HttpServer {
    protocol: Arc<dyn Protocol>,
    config: DispatcherConfig,
}

impl HttpServer {
    pub fn new(protocol: Arc<dyn Protocol>) -> Self {
        Self::with_config(protocol, DispatcherConfig::default())
    }

    pub fn with_config(protocol: Arc<dyn Protocol>, config: DispatcherConfig) -> Self {
        Self { protocol, config }
    }

    /// Bind `address` and start serving on background threads.
    pub fn serve(self, address: &ServerAddress) -> io::Result<ServerHandle> {
        let (listener, bound, local) = match address {
            ServerAddress::Tcp { host, port, .. } => {
                let tcp = TcpListener::bind((host.as_str(), *port))?;
                tcp.set_nonblocking(true)?;
                let local = tcp.local_addr()?;
                // Port 0 binds an ephemeral port; report the real one.
                let bound = address.clone().with_port(local.port());
                (ListenSocket::Tcp(tcp), bound, Some(local))
            }
            ServerAddress::Local { socket_path } => {
                let path = PathBuf::from(socket_path);
                if path.exists() {
                    std::fs::remove_file(&path)?;
                }
                let unix = UnixListener::bind(&path)?;
                unix.set_nonblocking(true)?;
                (ListenSocket::Local(unix, path), address.clone(), None)
            }
            ServerAddress::Tls { .. } => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "TLS endpoints are not supported",
                ));
            }
        };

        let dispatcher = Arc::new(Dispatcher::new(self.protocol, self.config));
        dispatcher.start()?;

        let running = Arc::new(AtomicBool::new(true));
        let ready = Arc::new(AtomicBool::new(false));
        let accept_thread =
            spawn_accept_loop(listener, dispatcher.clone(), running.clone(), ready.clone())?;

        info!(address = %bound, "server listening");
        Ok(ServerHandle {
            dispatcher,
            address: bound,
            local,
            running,
            ready,
            accept_thread: Mutex::new(Some(accept_thread)),
        })
    }
}

fn spawn_accept_loop(
    listener: ListenSocket,
    dispatcher: Arc<Dispatcher>,
    running: Arc<AtomicBool>,
    ready: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("objgate-accept".to_string())
        .spawn(move || {
            // The listener is already bound; once this thread runs the
            // server is fully ready.
            ready.store(true, Ordering::SeqCst);
            while running.load(Ordering::SeqCst) {
                let accepted = match &listener {
                    ListenSocket::Tcp(tcp) => match tcp.accept() {
                        Ok((stream, _)) => Some(SocketHandle::from_tcp(stream)),
                        Err(err) => {
                            idle_or_warn(&err);
                            None
                        }
                    },
                    ListenSocket::Local(unix, _) => match unix.accept() {
                        Ok((stream, _)) => Some(SocketHandle::from_local(stream)),
                        Err(err) => {
                            idle_or_warn(&err);
                            None
                        }
                    },
                };
                match accepted {
                    Some(socket) => dispatcher.incoming_connection(socket),
                    None => thread::sleep(ACCEPT_IDLE),
                }
            }
            if let ListenSocket::Local(_, path) = &listener {
                let _ = std::fs::remove_file(path);
            }
        })
}

fn idle_or_warn(err: &io::Error) {
    if err.kind() != io::ErrorKind::WouldBlock {
        warn!(error = %err, "accept failed");
    }
}

/// Handle to a running server: its bound address, readiness wait, and
/// shutdown.
pub struct ServerHandle {
    dispatcher: Arc<Dispatcher>,
    address: ServerAddress,
    local: Option<SocketAddr>,
    running: Arc<AtomicBool>,
    ready: Arc<AtomicBool>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
}

impl ServerHandle {
    /// The address actually bound, with any ephemeral port resolved.
    pub fn bound_address(&self) -> &ServerAddress {
        &self.address
    }

    /// The TCP socket address, when serving TCP.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    /// Poll until the accept loop is running. No connection is made, so
    /// waiting leaves the worker pool and its counters untouched.
    pub fn wait_ready(&self) -> io::Result<()> {
        for _ in 0..50 {
            if self.ready.load(Ordering::SeqCst) {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(5));
        }
        Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "server did not become ready",
        ))
    }

    pub fn metrics(&self) -> &super::DispatcherMetrics {
        self.dispatcher.metrics()
    }

    pub fn worker_count(&self) -> usize {
        self.dispatcher.worker_count()
    }

    /// Stop accepting, then stop the pool per `mode`.
    pub fn stop(&self, mode: StopMode) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let handle = self.accept_thread.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        self.dispatcher.stop(mode);
        info!(address = %self.address, "server stopped");
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop(StopMode::Interrupt);
    }
}
