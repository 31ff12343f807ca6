//! Shared fixtures for the integration tests.
//!
//! Provides a calculator-style test object with overloaded functions, a
//! read/write property, signals and an enumeration, plus helpers for
//! starting a server on an ephemeral port and speaking raw HTTP to it.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use objgate::config::{DispatcherConfig, HttpConfig};
use objgate::remote::{RemoteObject, RemoteObjectServer};
use objgate::router::HttpRouter;
use objgate::server::{HttpServer, ServerHandle};
use objgate::{ServerAddress, Variant, VariantKind};

pub fn init_tracing() {
    objgate::logging::init();
}

/// The object every remote test serves: overloaded `add`, a failing
/// function, a counter property, two signals and one enumeration.
pub fn test_object() -> (RemoteObject, Arc<AtomicI64>) {
    let count = Arc::new(AtomicI64::new(0));
    let get_count = count.clone();
    let set_count = count.clone();
    let object = RemoteObject::new("counter")
        .function(
            "add",
            &[VariantKind::Int, VariantKind::Int],
            Some(VariantKind::Int),
            |args| match (&args[0], &args[1]) {
                (Variant::Int(a), Variant::Int(b)) => Ok(Variant::Int(a + b)),
                _ => Err("bad arguments".into()),
            },
        )
        .function(
            "add",
            &[VariantKind::Double, VariantKind::Double],
            Some(VariantKind::Double),
            |args| match (&args[0], &args[1]) {
                (Variant::Double(a), Variant::Double(b)) => Ok(Variant::Double(a + b)),
                _ => Err("bad arguments".into()),
            },
        )
        .function(
            "greet",
            &[VariantKind::String],
            Some(VariantKind::String),
            |args| match &args[0] {
                Variant::String(name) => Ok(Variant::String(format!("hello {name}"))),
                _ => Err("bad arguments".into()),
            },
        )
        .function("fail", &[], None, |_| Err("deliberate failure".into()))
        .property(
            "count",
            VariantKind::Int,
            Some(Box::new(move || {
                Variant::Int(get_count.load(Ordering::SeqCst))
            })),
            Some(Box::new(move |value| match value {
                Variant::Int(v) => {
                    set_count.store(v, Ordering::SeqCst);
                    Ok(())
                }
                _ => Err("not an int".into()),
            })),
        )
        .signal("tick", &[])
        .signal("changed", &[VariantKind::Int])
        .enumeration("Mode", &[("Off", 0), ("On", 1)]);
    (object, count)
}

pub struct TestServer {
    pub handle: ServerHandle,
    pub address: ServerAddress,
    pub remote: Arc<RemoteObjectServer>,
    pub count: Arc<AtomicI64>,
}

impl TestServer {
    pub fn socket_addr(&self) -> SocketAddr {
        self.handle.local_addr().unwrap()
    }
}

/// Serve the test object at `/counter` on an ephemeral loopback port.
pub fn start_object_server() -> TestServer {
    start_object_server_with(DispatcherConfig::default())
}

pub fn start_object_server_with(config: DispatcherConfig) -> TestServer {
    init_tracing();
    let (object, count) = test_object();
    let remote = Arc::new(RemoteObjectServer::single(object));
    let router = Arc::new(HttpRouter::new(HttpConfig::default()));
    router.register("/counter", remote.clone());
    let address: ServerAddress = "tcp://127.0.0.1:0/counter".parse().unwrap();
    let handle = HttpServer::with_config(router, config)
        .serve(&address)
        .unwrap();
    handle.wait_ready().unwrap();
    let address = handle.bound_address().clone();
    TestServer {
        handle,
        address,
        remote,
        count,
    }
}

/// One raw HTTP exchange with `Connection: close`, returning the status
/// code and body.
pub fn http_get(addr: SocketAddr, target: &str) -> (u16, String) {
    http_request(addr, "GET", target, None)
}

pub fn http_request(
    addr: SocketAddr,
    method: &str,
    target: &str,
    body: Option<&[u8]>,
) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let body = body.unwrap_or(b"");
    let request = format!(
        "{method} {target} HTTP/1.1\r\nHost: test\r\nConnection: close\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    stream.write_all(request.as_bytes()).unwrap();
    stream.write_all(body).unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).unwrap();
    parse_response(&raw)
}

pub fn parse_response(raw: &[u8]) -> (u16, String) {
    let text = String::from_utf8_lossy(raw);
    let (head, body) = text
        .split_once("\r\n\r\n")
        .unwrap_or_else(|| panic!("no header/body split in {text:?}"));
    let status: u16 = head
        .split(' ')
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| panic!("no status in {head:?}"));
    (status, body.to_string())
}
