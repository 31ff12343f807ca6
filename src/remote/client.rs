//! Remote object client.
//!
//! [`RemoteObjectClient`] connects to a served object, discovers its
//! members from the plain-text listings, and offers calls, property
//! access and signal subscriptions. Requests ride one keep-alive
//! connection, reopened and retried exactly once on a network failure.
//! Subscriptions ride a second connection carrying the multipart push
//! stream, read by a background thread that reconnects on its own.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use http::{Method, StatusCode};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::addr::{AddressError, ServerAddress};
use crate::config::{ClientConfig, HttpConfig};
use crate::error::{FrameError, HttpError};
use crate::http::multipart::MultipartDecoder;
use crate::http::variant::{Variant, VariantKind};
use crate::http::HttpConnection;
use crate::socket::{ProgressController, SocketHandle};

static SIGNATURE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:([A-Za-z_][A-Za-z0-9_]*)\s+)?([A-Za-z_][A-Za-z0-9_]*)\((.*)\)$")
        .expect("signature regex")
});

static PROPERTY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s+([A-Za-z_][A-Za-z0-9_]*)$").expect("property regex")
});

#[derive(Debug)]
pub enum ClientError {
    Io(io::Error),
    /// The server answered with an error status.
    Status(HttpError),
    Protocol(String),
    Address(AddressError),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Io(err) => write!(f, "I/O failure: {err}"),
            ClientError::Status(err) => write!(f, "server answered {err}"),
            ClientError::Protocol(msg) => write!(f, "protocol violation: {msg}"),
            ClientError::Address(err) => write!(f, "bad address: {err}"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Io(err) => Some(err),
            ClientError::Address(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        ClientError::Io(err)
    }
}

impl From<AddressError> for ClientError {
    fn from(err: AddressError) -> Self {
        ClientError::Address(err)
    }
}

impl From<FrameError> for ClientError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(e) => ClientError::Io(e),
            FrameError::UnexpectedEof => ClientError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "server closed the connection",
            )),
            other => ClientError::Protocol(other.to_string()),
        }
    }
}

// ---- discovered members ---------------------------------------------------

#[derive(Debug, Clone)]
pub struct RemoteFunction {
    pub name: String,
    pub params: Vec<VariantKind>,
    pub returns: Option<VariantKind>,
}

#[derive(Debug, Clone)]
pub struct RemoteProperty {
    pub name: String,
    pub kind: VariantKind,
}

#[derive(Debug, Clone)]
pub struct RemoteSignal {
    pub name: String,
    pub params: Vec<VariantKind>,
}

impl RemoteSignal {
    fn push_uri(&self) -> String {
        if self.params.is_empty() {
            format!("signals/{}", self.name)
        } else {
            let types: Vec<&str> = self.params.iter().map(|k| k.type_name()).collect();
            format!("signals/{}({})", self.name, types.join(","))
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteEnum {
    pub name: String,
    pub members: Vec<(String, i64)>,
}

fn parse_signature(line: &str) -> Option<(Option<VariantKind>, String, Vec<VariantKind>)> {
    let caps = SIGNATURE_RE.captures(line.trim())?;
    let returns = match caps.get(1) {
        Some(m) => Some(VariantKind::from_type_name(m.as_str())?),
        None => None,
    };
    let name = caps[2].to_string();
    let mut params = Vec::new();
    for part in caps[3].split(',').map(str::trim).filter(|p| !p.is_empty()) {
        params.push(VariantKind::from_type_name(part)?);
    }
    Some((returns, name, params))
}

// ---- request plumbing -----------------------------------------------------

/// One keep-alive request connection plus the knowledge to rebuild it.
struct Requester {
    address: ServerAddress,
    base: String,
    host: String,
    config: ClientConfig,
    limits: HttpConfig,
    conn: Mutex<Option<HttpConnection>>,
}

impl Requester {
    fn new(address: &ServerAddress, config: ClientConfig, limits: HttpConfig) -> Self {
        let base = address.base_path().trim_end_matches('/').to_string();
        let host = match address {
            ServerAddress::Tcp { host, port, .. } | ServerAddress::Tls { host, port, .. } => {
                format!("{host}:{port}")
            }
            ServerAddress::Local { .. } => "localhost".to_string(),
        };
        Self {
            address: address.clone(),
            base,
            host,
            config,
            limits,
            conn: Mutex::new(None),
        }
    }

    fn target(&self, suffix: &str) -> String {
        if suffix.is_empty() {
            if self.base.is_empty() {
                "/".to_string()
            } else {
                self.base.clone()
            }
        } else {
            format!("{}/{}", self.base, suffix)
        }
    }

    fn open_socket(&self) -> Result<SocketHandle, ClientError> {
        SocketHandle::connect(&self.address, self.config.connection_timeout).map_err(Into::into)
    }

    /// One request/response exchange. A network failure invalidates the
    /// connection and is retried on a fresh one, exactly once.
    fn request(
        &self,
        method: Method,
        suffix: &str,
        body: Option<&[u8]>,
    ) -> Result<(StatusCode, Vec<u8>), ClientError> {
        let mut last = None;
        for attempt in 0..2 {
            match self.try_request(method.clone(), suffix, body) {
                Ok(result) => return Ok(result),
                Err(ClientError::Io(err)) if attempt == 0 => {
                    debug!(error = %err, "request failed, retrying on a fresh connection");
                    last = Some(ClientError::Io(err));
                }
                Err(err) => return Err(err),
            }
        }
        Err(last.unwrap_or_else(|| ClientError::Protocol("retry exhausted".into())))
    }

    fn try_request(
        &self,
        method: Method,
        suffix: &str,
        body: Option<&[u8]>,
    ) -> Result<(StatusCode, Vec<u8>), ClientError> {
        let mut guard = self.conn.lock().unwrap();
        let mut conn = match guard.take() {
            Some(conn) => conn,
            None => HttpConnection::client(self.open_socket()?, self.limits.clone()),
        };
        let result = self.run_cycle(&mut conn, method, suffix, body);
        if result.is_ok() && conn.persistent() {
            conn.restart();
            *guard = Some(conn);
        }
        result
    }

    fn run_cycle(
        &self,
        conn: &mut HttpConnection,
        method: Method,
        suffix: &str,
        body: Option<&[u8]>,
    ) -> Result<(StatusCode, Vec<u8>), ClientError> {
        conn.set_request(method, self.target(suffix));
        conn.request.fields.set("Host", self.host.clone());
        let body = body.unwrap_or(b"");
        conn.request
            .fields
            .set("Content-Length", body.len().to_string());
        if !body.is_empty() {
            conn.request.fields.set("Content-Type", "text/plain");
        }
        conn.send_header()?;
        conn.write_all(body)?;
        conn.read_header()?;
        let status = conn.response.status();
        let response = conn.read_body_to_end()?;
        Ok((status, response))
    }

    /// Fetch a listing and fail on any non-success status.
    fn fetch(&self, suffix: &str) -> Result<String, ClientError> {
        let (status, body) = self.request(Method::GET, suffix, None)?;
        expect_success(status, &body)?;
        String::from_utf8(body).map_err(|_| ClientError::Protocol("non-UTF-8 listing".into()))
    }
}

fn expect_success(status: StatusCode, body: &[u8]) -> Result<(), ClientError> {
    if status.is_success() {
        return Ok(());
    }
    Err(ClientError::Status(HttpError {
        status,
        message: String::from_utf8_lossy(body).into_owned(),
    }))
}

// ---- push stream state ----------------------------------------------------

type Listener = Arc<dyn Fn(&[Variant]) + Send + Sync>;

struct ChannelShared {
    /// Push URI to registered listeners, each with its token.
    listeners: Mutex<HashMap<String, Vec<(u64, Listener)>>>,
    channel_id: Mutex<Option<String>>,
    ready: Condvar,
    /// Socket of the live stream, kept for shutdown wakeup on close.
    stream_socket: Mutex<Option<SocketHandle>>,
    stop: AtomicBool,
    next_token: AtomicU64,
}

impl ChannelShared {
    fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            channel_id: Mutex::new(None),
            ready: Condvar::new(),
            stream_socket: Mutex::new(None),
            stop: AtomicBool::new(false),
            next_token: AtomicU64::new(1),
        }
    }

    fn set_channel_id(&self, id: Option<String>) {
        *self.channel_id.lock().unwrap() = id;
        self.ready.notify_all();
    }

    fn wait_channel_id(&self, timeout: Duration) -> Option<String> {
        let guard = self.channel_id.lock().unwrap();
        let (guard, _) = self
            .ready
            .wait_timeout_while(guard, timeout, |id| {
                id.is_none() && !self.stop.load(Ordering::SeqCst)
            })
            .unwrap();
        guard.clone()
    }
}

/// Proof of a registered listener; needed to unsubscribe it.
#[derive(Debug, Clone)]
pub struct ListenerToken {
    uri: String,
    token: u64,
}

// ---- the client -----------------------------------------------------------

pub struct RemoteObjectClient {
    requester: Arc<Requester>,
    functions: Vec<RemoteFunction>,
    properties: Vec<RemoteProperty>,
    signals: Vec<RemoteSignal>,
    enums: Vec<RemoteEnum>,
    channel: Arc<ChannelShared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl RemoteObjectClient {
    /// Connect and discover the object's members.
    pub fn connect(address: &ServerAddress) -> Result<Self, ClientError> {
        Self::connect_with(address, ClientConfig::default(), HttpConfig::default())
    }

    pub fn connect_with(
        address: &ServerAddress,
        config: ClientConfig,
        limits: HttpConfig,
    ) -> Result<Self, ClientError> {
        let requester = Arc::new(Requester::new(address, config, limits));

        let mut functions = Vec::new();
        for line in requester.fetch("functions")?.lines() {
            match parse_signature(line) {
                Some((returns, name, params)) => functions.push(RemoteFunction {
                    name,
                    params,
                    returns,
                }),
                None => warn!(line = %line, "unparseable function declaration"),
            }
        }

        let mut properties = Vec::new();
        for line in requester.fetch("properties")?.lines() {
            let parsed = PROPERTY_RE.captures(line.trim()).and_then(|caps| {
                Some(RemoteProperty {
                    kind: VariantKind::from_type_name(&caps[1])?,
                    name: caps[2].to_string(),
                })
            });
            match parsed {
                Some(property) => properties.push(property),
                None => warn!(line = %line, "unparseable property declaration"),
            }
        }

        let mut signals = Vec::new();
        for line in requester.fetch("signals")?.lines() {
            match parse_signature(line) {
                Some((None, name, params)) => signals.push(RemoteSignal { name, params }),
                _ => warn!(line = %line, "unparseable signal declaration"),
            }
        }

        let mut enums = Vec::new();
        for name in requester.fetch("enums")?.lines() {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let mut members = Vec::new();
            for line in requester.fetch(&format!("enums/{name}"))?.lines() {
                if let Some((member, value)) = line.trim().split_once(' ') {
                    if let Ok(value) = value.trim().parse::<i64>() {
                        members.push((member.to_string(), value));
                        continue;
                    }
                }
                warn!(line = %line, "unparseable enum member");
            }
            enums.push(RemoteEnum {
                name: name.to_string(),
                members,
            });
        }

        info!(
            address = %address,
            functions = functions.len(),
            signals = signals.len(),
            "connected to remote object"
        );
        Ok(Self {
            requester,
            functions,
            properties,
            signals,
            enums,
            channel: Arc::new(ChannelShared::new()),
            reader: Mutex::new(None),
        })
    }

    pub fn functions(&self) -> &[RemoteFunction] {
        &self.functions
    }

    pub fn properties(&self) -> &[RemoteProperty] {
        &self.properties
    }

    pub fn signals(&self) -> &[RemoteSignal] {
        &self.signals
    }

    pub fn enums(&self) -> &[RemoteEnum] {
        &self.enums
    }

    /// Call a function. Argument-less calls go as a GET; otherwise the
    /// arguments travel as an archived list in the request body. Returns
    /// `None` for functions without a return value.
    pub fn call(&self, name: &str, args: &[Variant]) -> Result<Option<Variant>, ClientError> {
        if !self.functions.iter().any(|f| f.name == name) {
            return Err(ClientError::Protocol(format!("unknown function {name:?}")));
        }
        let suffix = format!("functions/{name}");
        let (status, body) = if args.is_empty() {
            self.requester.request(Method::GET, &suffix, None)?
        } else {
            let payload = Variant::List(args.to_vec()).encode();
            self.requester.request(Method::POST, &suffix, Some(&payload))?
        };
        expect_success(status, &body)?;
        if body.is_empty() {
            return Ok(None);
        }
        let value = Variant::decode(&body);
        let kind_known = self
            .functions
            .iter()
            .filter(|f| f.name == name)
            .any(|f| match f.returns {
                Some(declared) => Variant::match_score(value.kind(), declared).is_some(),
                None => false,
            });
        if !kind_known {
            warn!(function = %name, kind = %value.kind(), "return value kind not declared");
        }
        Ok(Some(value))
    }

    pub fn get_property(&self, name: &str) -> Result<Variant, ClientError> {
        let (status, body) = self
            .requester
            .request(Method::GET, &format!("properties/{name}"), None)?;
        expect_success(status, &body)?;
        Ok(Variant::decode(&body))
    }

    pub fn set_property(&self, name: &str, value: &Variant) -> Result<(), ClientError> {
        let payload = value.encode();
        let (status, body) = self.requester.request(
            Method::POST,
            &format!("properties/{name}"),
            Some(&payload),
        )?;
        expect_success(status, &body)
    }

    /// Set several properties in one request.
    pub fn set_properties(&self, values: &[(&str, Variant)]) -> Result<(), ClientError> {
        if values.is_empty() {
            return Ok(());
        }
        let items: Vec<String> = values
            .iter()
            .map(|(name, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(name),
                    urlencoding::encode(&String::from_utf8_lossy(&value.encode()))
                )
            })
            .collect();
        let (status, body) = self.requester.request(
            Method::GET,
            &format!("properties?{}", items.join("&")),
            None,
        )?;
        expect_success(status, &body)
    }

    /// Subscribe a callback to a signal. The first subscription opens the
    /// push channel; later ones reuse it.
    pub fn subscribe(
        &self,
        signal: &str,
        callback: impl Fn(&[Variant]) + Send + Sync + 'static,
    ) -> Result<ListenerToken, ClientError> {
        let def = self
            .signals
            .iter()
            .find(|s| s.name == signal)
            .ok_or_else(|| ClientError::Protocol(format!("unknown signal {signal:?}")))?;
        let uri = def.push_uri();

        self.ensure_reader();
        let id = self
            .channel
            .wait_channel_id(self.requester.config.channel_open_timeout)
            .ok_or_else(|| ClientError::Protocol("push channel did not open".into()))?;

        let (status, body) = self.requester.request(
            Method::GET,
            &format!("channels/{id}/connect?uri={}", urlencoding::encode(&uri)),
            None,
        )?;
        expect_success(status, &body)?;

        let token = self.channel.next_token.fetch_add(1, Ordering::Relaxed);
        self.channel
            .listeners
            .lock()
            .unwrap()
            .entry(uri.clone())
            .or_default()
            .push((token, Arc::new(callback)));
        debug!(signal = %signal, uri = %uri, "subscribed");
        Ok(ListenerToken { uri, token })
    }

    /// Remove a listener. The last listener of a URI drops the server-side
    /// subscription too.
    pub fn unsubscribe(&self, token: &ListenerToken) -> Result<(), ClientError> {
        let now_empty = {
            let mut listeners = self.channel.listeners.lock().unwrap();
            match listeners.get_mut(&token.uri) {
                Some(list) => {
                    list.retain(|(t, _)| *t != token.token);
                    let empty = list.is_empty();
                    if empty {
                        listeners.remove(&token.uri);
                    }
                    empty
                }
                None => false,
            }
        };
        if now_empty {
            if let Some(id) = self.channel.channel_id.lock().unwrap().clone() {
                let (status, body) = self.requester.request(
                    Method::GET,
                    &format!(
                        "channels/{id}/disconnect?uri={}",
                        urlencoding::encode(&token.uri)
                    ),
                    None,
                )?;
                expect_success(status, &body)?;
            }
        }
        Ok(())
    }

    fn ensure_reader(&self) {
        let mut reader = self.reader.lock().unwrap();
        if reader.is_some() {
            return;
        }
        let requester = self.requester.clone();
        let shared = self.channel.clone();
        let signals = self.signals.clone();
        let handle = thread::Builder::new()
            .name("objgate-push-reader".to_string())
            .spawn(move || stream_loop(requester, shared, signals));
        match handle {
            Ok(handle) => *reader = Some(handle),
            Err(err) => warn!(error = %err, "push reader spawn failed"),
        }
    }
}

impl Drop for RemoteObjectClient {
    fn drop(&mut self) {
        self.channel.stop.store(true, Ordering::SeqCst);
        // Best-effort close so the server reaps the channel promptly.
        if let Some(id) = self.channel.channel_id.lock().unwrap().clone() {
            let _ = self
                .requester
                .request(Method::GET, &format!("channels/{id}/close"), None);
        }
        if let Some(socket) = self.channel.stream_socket.lock().unwrap().take() {
            let _ = socket.shutdown();
        }
        self.channel.ready.notify_all();
        let handle = self.reader.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

// ---- push stream reader ---------------------------------------------------

/// A quiet channel carries no bytes for as long as nothing is emitted, so
/// the stream read must outwait any ordinary request timeout. Cancellation
/// comes from the stop flag and the socket shutdown in `Drop`.
const STREAM_QUIET_WAIT: Duration = Duration::from_secs(u32::MAX as u64);

struct StreamStop(Arc<ChannelShared>);

impl ProgressController for StreamStop {
    fn can_continue(&self, _progress: f64) -> bool {
        !self.0.stop.load(Ordering::SeqCst)
    }
}

/// Attach the quiet-wait read policy and the stop controller to a freshly
/// opened push stream.
fn arm_stream(conn: &mut HttpConnection, shared: &Arc<ChannelShared>) {
    conn.set_read_timeout(STREAM_QUIET_WAIT);
    conn.set_controller(Arc::new(StreamStop(shared.clone())));
    *shared.stream_socket.lock().unwrap() = Some(conn.socket().clone());
}

/// Open a push stream at `suffix` and hand back the connection plus the
/// stream boundary.
fn open_stream(
    requester: &Requester,
    suffix: &str,
) -> Result<(HttpConnection, String), ClientError> {
    let socket = requester.open_socket()?;
    let mut conn = HttpConnection::client(socket, requester.limits.clone());
    conn.set_request(Method::GET, requester.target(suffix));
    conn.request.fields.set("Host", requester.host.clone());
    conn.request.fields.set("Content-Length", "0");
    conn.send_header()?;
    conn.read_header()?;
    let status = conn.response.status();
    if !status.is_success() {
        let body = conn.read_body_to_end()?;
        return Err(ClientError::Status(HttpError {
            status,
            message: String::from_utf8_lossy(&body).into_owned(),
        }));
    }
    let boundary = conn
        .response
        .fields
        .boundary()
        .ok_or_else(|| ClientError::Protocol("push stream without a boundary".into()))?;
    Ok((conn, boundary))
}

fn stream_loop(requester: Arc<Requester>, shared: Arc<ChannelShared>, signals: Vec<RemoteSignal>) {
    let mut stream = match open_stream(&requester, "channels/new") {
        Ok((mut conn, boundary)) => {
            let id = match conn.read_line() {
                Ok(line) if !line.is_empty() => line,
                _ => {
                    warn!("push stream carried no channel id");
                    shared.set_channel_id(None);
                    return;
                }
            };
            arm_stream(&mut conn, &shared);
            shared.set_channel_id(Some(id));
            Some((conn, boundary))
        }
        Err(err) => {
            warn!(error = %err, "push channel open failed");
            shared.set_channel_id(None);
            return;
        }
    };

    while let Some((mut conn, boundary)) = stream.take() {
        if let Err(err) = read_entities(&mut conn, &boundary, &shared, &signals) {
            debug!(error = %err, "push stream ended");
        }
        *shared.stream_socket.lock().unwrap() = None;
        if shared.stop.load(Ordering::SeqCst) {
            break;
        }
        stream = reconnect(&requester, &shared);
    }
    shared.set_channel_id(None);
}

fn read_entities(
    conn: &mut HttpConnection,
    boundary: &str,
    shared: &ChannelShared,
    signals: &[RemoteSignal],
) -> io::Result<()> {
    let mut decoder = MultipartDecoder::new(conn, boundary);
    while decoder.next_entity()? {
        let uri = decoder
            .entity_header()
            .and_then(|h| h.fields.get("x-uri"))
            .map(str::to_string);
        let payload = decoder.read_entity_to_end()?;
        if let Some(uri) = uri {
            dispatch(shared, signals, &uri, &payload);
        } else {
            warn!("push entity without an X-URI field");
        }
        if shared.stop.load(Ordering::SeqCst) {
            break;
        }
    }
    Ok(())
}

fn dispatch(shared: &ChannelShared, signals: &[RemoteSignal], uri: &str, payload: &[u8]) {
    let args: Vec<Variant> = if payload.is_empty() {
        Vec::new()
    } else {
        match Variant::decode(payload) {
            Variant::List(items) => items,
            single => vec![single],
        }
    };
    if let Some(def) = signals.iter().find(|s| s.push_uri() == uri) {
        let kinds_ok = def.params.len() == args.len()
            && def
                .params
                .iter()
                .zip(&args)
                .all(|(decl, arg)| Variant::match_score(arg.kind(), *decl).is_some());
        if !kinds_ok {
            warn!(uri = %uri, "pushed argument kinds do not match the declaration");
        }
    }
    let listeners: Vec<Listener> = shared
        .listeners
        .lock()
        .unwrap()
        .get(uri)
        .map(|list| list.iter().map(|(_, l)| l.clone()).collect())
        .unwrap_or_default();
    for listener in listeners {
        listener(&args);
    }
}

/// Resume the stream: reattach to the existing channel, or open a fresh
/// one and resubscribe when the server no longer knows it.
fn reconnect(
    requester: &Arc<Requester>,
    shared: &Arc<ChannelShared>,
) -> Option<(HttpConnection, String)> {
    for attempt in 0..=requester.config.retry_count {
        if shared.stop.load(Ordering::SeqCst) {
            return None;
        }
        if attempt > 0 {
            thread::sleep(requester.config.retry_delay);
        }
        let id = shared.channel_id.lock().unwrap().clone()?;
        match open_stream(requester, &format!("channels/reconnect?id={id}")) {
            Ok((mut conn, boundary)) => {
                info!(channel = %id, "push stream reconnected");
                arm_stream(&mut conn, shared);
                conn.close_after();
                return Some((conn, boundary));
            }
            Err(ClientError::Status(err)) if err.status == StatusCode::NOT_FOUND => {
                // The channel was reaped; start over with a new one.
                match open_stream(requester, "channels/new") {
                    Ok((mut conn, boundary)) => {
                        let Ok(new_id) = conn.read_line() else {
                            continue;
                        };
                        info!(channel = %new_id, "opened replacement push channel");
                        arm_stream(&mut conn, shared);
                        shared.set_channel_id(Some(new_id.clone()));
                        resubscribe_all(requester, shared, &new_id);
                        return Some((conn, boundary));
                    }
                    Err(err) => debug!(error = %err, "replacement channel open failed"),
                }
            }
            Err(err) => debug!(error = %err, "push stream reconnect failed"),
        }
    }
    warn!("push stream lost and could not be restored");
    None
}

fn resubscribe_all(requester: &Requester, shared: &ChannelShared, id: &str) {
    let uris: Vec<String> = shared.listeners.lock().unwrap().keys().cloned().collect();
    for uri in uris {
        let result = requester.request(
            Method::GET,
            &format!("channels/{id}/connect?uri={}", urlencoding::encode(&uri)),
            None,
        );
        if let Err(err) = result {
            warn!(uri = %uri, error = %err, "resubscription failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_function_signatures() {
        assert_eq!(
            parse_signature("int add(int,int)"),
            Some((
                Some(VariantKind::Int),
                "add".to_string(),
                vec![VariantKind::Int, VariantKind::Int]
            ))
        );
        assert_eq!(
            parse_signature("reset()"),
            Some((None, "reset".to_string(), vec![]))
        );
        assert_eq!(parse_signature("garbage"), None);
        assert_eq!(parse_signature("unknown frob(widget)"), None);
    }

    #[test]
    fn parses_property_declarations() {
        let caps = PROPERTY_RE.captures("double ratio").unwrap();
        assert_eq!(&caps[1], "double");
        assert_eq!(&caps[2], "ratio");
        assert!(PROPERTY_RE.captures("no").is_none());
    }

    #[test]
    fn signal_push_uris_match_the_server_rule() {
        let bare = RemoteSignal {
            name: "tick".into(),
            params: vec![],
        };
        let typed = RemoteSignal {
            name: "moved".into(),
            params: vec![VariantKind::Int, VariantKind::Int],
        };
        assert_eq!(bare.push_uri(), "signals/tick");
        assert_eq!(typed.push_uri(), "signals/moved(int,int)");
    }
}
