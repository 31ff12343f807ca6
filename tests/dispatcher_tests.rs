//! Worker pool behavior under load.
//!
//! # Test Coverage
//! - Pool growth stops at the configured worker cap
//! - Connections beyond cap and backlog get the fixed busy response
//! - A backlogged connection is served once a worker frees up
//! - Metrics counters reflect dispatch decisions
//!
//! # Test Strategy
//! Workers are occupied by opening raw connections that send nothing; a
//! worker blocks reading the request header, so each open socket pins one
//! worker. Timing sleeps are generous enough for the accept loop and
//! dispatcher to settle.

mod common;

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use objgate::config::{DispatcherConfig, HttpConfig};
use objgate::router::HttpRouter;
use objgate::server::{HttpServer, ServerHandle, StopMode};
use objgate::ServerAddress;

fn start(config: DispatcherConfig) -> ServerHandle {
    common::init_tracing();
    let router = Arc::new(HttpRouter::new(HttpConfig::default()));
    router.register("/api", Arc::new(common_handler::Hello));
    let address: ServerAddress = "tcp://127.0.0.1:0/".parse().unwrap();
    let handle = HttpServer::with_config(router, config).serve(&address).unwrap();
    handle.wait_ready().unwrap();
    handle
}

mod common_handler {
    use std::sync::Arc;

    use objgate::error::HandlerError;
    use objgate::http::HttpConnection;
    use objgate::router::{RequestController, UriHandler};

    pub struct Hello;

    impl UriHandler for Hello {
        fn handle_request(
            &self,
            _uri: &str,
            conn: &mut HttpConnection,
            _controller: &Arc<RequestController>,
        ) -> Result<(), HandlerError> {
            conn.send_body(b"hello")?;
            Ok(())
        }
    }
}

fn idle_connection(handle: &ServerHandle) -> TcpStream {
    let stream = TcpStream::connect(handle.local_addr().unwrap()).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

#[test]
fn saturated_pool_answers_busy() {
    let handle = start(DispatcherConfig {
        min_workers: 1,
        max_workers: 2,
        max_pending_connections: 0,
        ..DispatcherConfig::default()
    });

    // Pin both workers with connections that never send a request.
    let _pin1 = idle_connection(&handle);
    let _pin2 = idle_connection(&handle);
    std::thread::sleep(Duration::from_millis(300));
    assert!(handle.worker_count() <= 2);

    let mut third = idle_connection(&handle);
    let mut raw = Vec::new();
    third.read_to_end(&mut raw).unwrap();
    let (status, body) = common::parse_response(&raw);
    assert_eq!(status, 503);
    assert_eq!(body, "busy");
    assert!(handle.metrics().rejected.load(Ordering::Relaxed) >= 1);

    handle.stop(StopMode::Interrupt);
}

#[test]
fn backlogged_connection_is_served_when_a_worker_frees() {
    let handle = start(DispatcherConfig {
        min_workers: 1,
        max_workers: 1,
        max_pending_connections: 4,
        ..DispatcherConfig::default()
    });

    // First connection owns the only worker while it withholds its
    // request; the second lands in the backlog.
    let mut first = idle_connection(&handle);
    std::thread::sleep(Duration::from_millis(300));
    let mut second = idle_connection(&handle);
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(handle.metrics().queued.load(Ordering::Relaxed), 1);

    second
        .write_all(b"GET /api/b HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n")
        .unwrap();
    first
        .write_all(b"GET /api/a HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n")
        .unwrap();

    let mut raw = Vec::new();
    first.read_to_end(&mut raw).unwrap();
    assert_eq!(common::parse_response(&raw), (200, "hello".to_string()));

    let mut raw = Vec::new();
    second.read_to_end(&mut raw).unwrap();
    assert_eq!(common::parse_response(&raw), (200, "hello".to_string()));

    handle.stop(StopMode::WaitClients);
}

#[test]
fn start_prespawns_the_minimum_pool() {
    let handle = start(DispatcherConfig {
        min_workers: 2,
        max_workers: 4,
        ..DispatcherConfig::default()
    });

    // wait_ready makes no connection, so the pre-spawned pool is intact
    // and untouched by readiness.
    assert_eq!(handle.worker_count(), 2);
    assert_eq!(handle.metrics().spawned.load(Ordering::Relaxed), 2);
    assert_eq!(handle.metrics().dispatched.load(Ordering::Relaxed), 0);

    // A single request is served by an existing idle worker.
    let (status, body) = common::http_get(handle.local_addr().unwrap(), "/api/x");
    assert_eq!((status, body), (200, "hello".to_string()));
    assert_eq!(handle.worker_count(), 2);
    assert_eq!(handle.metrics().spawned.load(Ordering::Relaxed), 2);

    handle.stop(StopMode::WaitClients);
}

#[test]
fn dispatch_counters_track_spawns() {
    let handle = start(DispatcherConfig {
        min_workers: 1,
        max_workers: 4,
        ..DispatcherConfig::default()
    });

    for n in 0..3 {
        let (status, _) = common::http_get(handle.local_addr().unwrap(), &format!("/api/{n}"));
        assert_eq!(status, 200);
    }

    let metrics = handle.metrics();
    assert!(metrics.dispatched.load(Ordering::Relaxed) >= 3);
    assert!(metrics.spawned.load(Ordering::Relaxed) >= 1);
    assert!(handle.worker_count() <= 4);

    handle.stop(StopMode::WaitClients);
}
