//! # objgate
//!
//! A threaded HTTP framework for serving and consuming remote objects.
//!
//! The lower half is a generic server: a listener accepts connections and
//! a dispatcher hands them to a pool of preemptive worker threads, each
//! running a [`server::Protocol`] over a [`socket::SocketHandle`] with
//! sliced, cancellable blocking I/O. The stock protocol is
//! [`router::HttpRouter`], which parses HTTP/1.1 incrementally through
//! [`http::HttpConnection`] and routes by longest URI prefix.
//!
//! The upper half speaks a remote-object convention on top of that:
//! [`remote::RemoteObjectServer`] exposes an object's functions,
//! properties, signals and enumerations as plain-text HTTP resources, and
//! streams signal emissions to subscribers as multipart entities over
//! push channels. [`remote::RemoteObjectClient`] discovers a served
//! object and drives it, reconnecting its push stream when the transport
//! drops.
//!
//! ## Modules
//!
//! - **[`socket`]** - blocking sockets with sliced waits and cancellation
//! - **[`addr`]** - `tcp://`, `ssl://` and `local://` address parsing
//! - **[`http`]** - headers, connection device, filters, multipart, variants
//! - **[`router`]** - longest-prefix URI routing
//! - **[`server`]** - listener, worker pool dispatcher, server registry
//! - **[`remote`]** - remote object definitions, server, channels, client
//! - **[`config`]** - tunables with environment overrides
//!
//! ## Example
//!
//! ```no_run
//! use objgate::config::HttpConfig;
//! use objgate::http::variant::{Variant, VariantKind};
//! use objgate::remote::{RemoteObject, RemoteObjectServer};
//! use objgate::router::HttpRouter;
//! use objgate::server::HttpServer;
//! use std::sync::Arc;
//!
//! let object = RemoteObject::new("counter")
//!     .function("add", &[VariantKind::Int, VariantKind::Int], Some(VariantKind::Int), |args| {
//!         match (&args[0], &args[1]) {
//!             (Variant::Int(a), Variant::Int(b)) => Ok(Variant::Int(a + b)),
//!             _ => Err("bad arguments".into()),
//!         }
//!     })
//!     .signal("tick", &[]);
//!
//! let router = Arc::new(HttpRouter::new(HttpConfig::default()));
//! router.register("/counter", Arc::new(RemoteObjectServer::single(object)));
//! let handle = HttpServer::new(router).serve(&"tcp://127.0.0.1:8080".parse().unwrap()).unwrap();
//! handle.wait_ready().unwrap();
//! ```

pub mod addr;
pub mod config;
pub mod error;
pub mod http;
pub mod ids;
pub mod logging;
pub mod remote;
pub mod router;
pub mod server;
pub mod socket;

pub use addr::ServerAddress;
pub use error::{FrameError, HandlerError, HandlerResult, HttpError};
pub use crate::http::{HttpConnection, Variant, VariantKind};
pub use remote::{RemoteObject, RemoteObjectClient, RemoteObjectServer};
pub use router::{HttpRouter, UriHandler};
pub use server::{HttpServer, Protocol, ServerHandle, StopMode};
