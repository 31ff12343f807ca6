//! Prefix router and its per-request cancellation controller.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::HttpConfig;
use crate::error::{FrameError, HandlerError, HttpError};
use crate::http::HttpConnection;
use crate::server::Protocol;
use crate::socket::{ProgressController, SocketHandle};

/// Per-request cancellation: the worker's controller plus an optional
/// request deadline. Handlers that intentionally outlive the deadline,
/// such as long-running push channels, clear it.
pub struct RequestController {
    outer: Arc<dyn ProgressController>,
    deadline: Mutex<Option<Instant>>,
}

impl RequestController {
    pub fn new(outer: Arc<dyn ProgressController>, max_time: Duration) -> Self {
        let deadline = if max_time.is_zero() {
            None
        } else {
            Some(Instant::now() + max_time)
        };
        Self {
            outer,
            deadline: Mutex::new(deadline),
        }
    }

    /// Remove the request deadline; the worker's controller still applies.
    pub fn clear_time_limit(&self) {
        *self.deadline.lock().unwrap() = None;
    }
}

impl ProgressController for RequestController {
    fn can_continue(&self, progress: f64) -> bool {
        if !self.outer.can_continue(progress) {
            return false;
        }
        match *self.deadline.lock().unwrap() {
            Some(deadline) => Instant::now() < deadline,
            None => true,
        }
    }
}

/// A handler mounted at a URI prefix. `uri` is the request path with the
/// matched prefix (and a leading slash) stripped.
pub trait UriHandler: Send + Sync {
    fn handle_request(
        &self,
        uri: &str,
        conn: &mut HttpConnection,
        controller: &Arc<RequestController>,
    ) -> Result<(), HandlerError>;
}

/// Routes requests to the handler with the longest matching URI prefix.
pub struct HttpRouter {
    handlers: Mutex<Vec<(String, Arc<dyn UriHandler>)>>,
    config: HttpConfig,
}

impl HttpRouter {
    pub fn new(config: HttpConfig) -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            config,
        }
    }

    /// Mount a handler at a prefix. A prefix without a leading slash is
    /// ignored. Re-registering a prefix replaces its handler in place,
    /// keeping the original registration order.
    pub fn register(&self, prefix: &str, handler: Arc<dyn UriHandler>) {
        if !prefix.starts_with('/') {
            warn!(prefix = %prefix, "handler prefix lacks a leading slash, ignoring");
            return;
        }
        let mut handlers = self.handlers.lock().unwrap();
        if let Some(slot) = handlers.iter_mut().find(|(p, _)| p == prefix) {
            slot.1 = handler;
        } else {
            handlers.push((prefix.to_string(), handler));
        }
        debug!(prefix = %prefix, "handler registered");
    }

    pub fn unregister(&self, prefix: &str) -> bool {
        let mut handlers = self.handlers.lock().unwrap();
        let before = handlers.len();
        handlers.retain(|(p, _)| p != prefix);
        handlers.len() != before
    }

    /// The longest registered prefix of `path`. Among equal candidates
    /// the first one registered wins, as only a strictly longer prefix
    /// displaces the current best.
    pub fn best_match(&self, path: &str) -> Option<(String, Arc<dyn UriHandler>)> {
        let handlers = self.handlers.lock().unwrap();
        let mut best: Option<&(String, Arc<dyn UriHandler>)> = None;
        for entry in handlers.iter() {
            if path.starts_with(entry.0.as_str())
                && best.map(|b| entry.0.len() > b.0.len()).unwrap_or(true)
            {
                best = Some(entry);
            }
        }
        best.map(|(p, h)| (p.clone(), h.clone()))
    }

    fn send_error(&self, conn: &mut HttpConnection, err: &HttpError) -> io::Result<()> {
        conn.response.set_status(err.status);
        conn.response.fields.set("Content-Type", "text/plain");
        conn.send_body(err.message.as_bytes())?;
        conn.finish()
    }
}

impl Protocol for HttpRouter {
    fn communicate(
        &self,
        socket: SocketHandle,
        controller: Arc<dyn ProgressController>,
    ) -> io::Result<()> {
        let mut conn = HttpConnection::server(socket, self.config.clone());
        loop {
            let ctl = Arc::new(RequestController::new(
                controller.clone(),
                self.config.max_connection_time,
            ));
            conn.set_controller(ctl.clone());

            if let Err(err) = conn.read_header() {
                // Nothing read at all means the peer just closed a
                // keep-alive connection; no request was abandoned.
                if conn.cycle_bytes_read() == 0 {
                    return Ok(());
                }
                let http_err = match &err {
                    FrameError::Io(e) if e.kind() == io::ErrorKind::Interrupted => {
                        HttpError::unavailable("request interrupted")
                    }
                    _ => HttpError::from(err),
                };
                warn!(status = http_err.status.as_u16(), error = %http_err, "bad request header");
                let _ = self.send_error(&mut conn, &http_err);
                return Ok(());
            }

            let path = conn.request.path().to_string();
            match self.best_match(&path) {
                None => {
                    debug!(path = %path, "no handler");
                    self.send_error(&mut conn, &HttpError::not_found("no handler for URI"))?;
                }
                Some((prefix, handler)) => {
                    let suffix = path[prefix.len()..].trim_start_matches('/').to_string();
                    match handler.handle_request(&suffix, &mut conn, &ctl) {
                        Ok(()) => conn.finish()?,
                        Err(HandlerError::Status(err)) => {
                            debug!(path = %path, status = err.status.as_u16(), "handler rejected request");
                            if conn.header_sent() {
                                // Too late for a status line; give up on
                                // the connection instead.
                                conn.close_after();
                                conn.finish()?;
                            } else {
                                self.send_error(&mut conn, &err)?;
                            }
                        }
                        Err(HandlerError::Io(err)) => {
                            warn!(path = %path, error = %err, "handler I/O failure");
                            if conn.header_sent() {
                                return Ok(());
                            }
                            let status = if err.kind() == io::ErrorKind::Interrupted {
                                HttpError::unavailable("request interrupted")
                            } else {
                                HttpError::internal("request failed")
                            };
                            let _ = self.send_error(&mut conn, &status);
                            return Ok(());
                        }
                    }
                }
            }

            if !conn.persistent() {
                return Ok(());
            }
            conn.drain_request_body()?;
            conn.restart();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nop;

    impl UriHandler for Nop {
        fn handle_request(
            &self,
            _uri: &str,
            _conn: &mut HttpConnection,
            _controller: &Arc<RequestController>,
        ) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    fn router_with(prefixes: &[&str]) -> HttpRouter {
        let router = HttpRouter::new(HttpConfig::default());
        for p in prefixes {
            router.register(p, Arc::new(Nop));
        }
        router
    }

    #[test]
    fn longest_prefix_wins() {
        let router = router_with(&["/", "/objects", "/objects/counter"]);
        assert_eq!(
            router.best_match("/objects/counter/functions/add").unwrap().0,
            "/objects/counter"
        );
        assert_eq!(router.best_match("/objects/other").unwrap().0, "/objects");
        assert_eq!(router.best_match("/misc").unwrap().0, "/");
    }

    #[test]
    fn no_match_without_root_handler() {
        let router = router_with(&["/objects"]);
        assert!(router.best_match("/other").is_none());
    }

    #[test]
    fn reregistering_keeps_position_and_replaces() {
        let router = router_with(&["/a", "/b"]);
        router.register("/a", Arc::new(Nop));
        let handlers = router.handlers.lock().unwrap();
        assert_eq!(handlers.len(), 2);
        assert_eq!(handlers[0].0, "/a");
    }

    #[test]
    fn unregister_removes_only_named_prefix() {
        let router = router_with(&["/a", "/b"]);
        assert!(router.unregister("/a"));
        assert!(!router.unregister("/a"));
        assert!(router.best_match("/a/x").is_none());
        assert!(router.best_match("/b/x").is_some());
    }

    #[test]
    fn prefix_without_slash_is_ignored() {
        let router = HttpRouter::new(HttpConfig::default());
        router.register("no-slash", Arc::new(Nop));
        assert!(router.best_match("no-slash/x").is_none());
    }

    #[test]
    fn cleared_deadline_keeps_running() {
        let ctl = RequestController::new(
            Arc::new(crate::socket::FreeRun),
            Duration::from_millis(1),
        );
        std::thread::sleep(Duration::from_millis(5));
        assert!(!ctl.can_continue(0.0));
        ctl.clear_time_limit();
        assert!(ctl.can_continue(0.0));
    }
}
