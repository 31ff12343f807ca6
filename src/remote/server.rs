//! HTTP surface of remote objects.
//!
//! [`RemoteObjectServer`] mounts on an [`HttpRouter`] prefix and serves
//! discovery listings, function calls, property access and push channels
//! for either a single object or a factory-backed instance service.
//!
//! URI layout under the mount prefix:
//!
//! ```text
//! ping                      liveness probe, empty 200
//! functions                 declaration listing
//! functions/<name>          call, args from query items or request body
//! properties                declaration listing, or batch set from items
//! properties/<name>         get, or set via value= item or request body
//! signals                   declaration listing
//! enums                     enumeration names
//! enums/<name>              one "Member value" line each
//! channels/new              open a channel, stream multipart entities
//! channels/reconnect?id=    resume an orphaned channel
//! channels/<id>/connect?uri=    subscribe the channel to a push URI
//! channels/<id>/disconnect?uri= drop the subscription
//! channels/<id>/close           terminate the channel
//! ```
//!
//! An instance service prepends `new`, `delete?id=` and `<instance>/...`
//! to that layout.
//!
//! [`HttpRouter`]: crate::router::HttpRouter

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use http::Method;
use tracing::{debug, info, warn};

use crate::config::RemoteServerConfig;
use crate::error::{HandlerError, HttpError};
use crate::http::variant::{Variant, VariantKind};
use crate::http::HttpConnection;
use crate::ids::InstanceId;
use crate::remote::channel::Channel;
use crate::remote::object::{RemoteObject, ResolveError};
use crate::router::{RequestController, UriHandler};

const GC_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Default)]
struct ChannelMaps {
    by_id: HashMap<String, Arc<Channel>>,
    /// Push URI to subscribed channel ids.
    by_uri: HashMap<String, Vec<String>>,
}

/// One served object with its channels. Channel bookkeeping lives under a
/// single mutex, so subscription maps and the id map never disagree.
pub struct ObjectCore {
    object: RemoteObject,
    channels: Mutex<ChannelMaps>,
}

impl ObjectCore {
    pub fn new(object: RemoteObject) -> Self {
        Self {
            object,
            channels: Mutex::new(ChannelMaps::default()),
        }
    }

    pub fn object(&self) -> &RemoteObject {
        &self.object
    }

    /// Emit a signal to every channel subscribed to its push URI.
    pub fn emit(&self, name: &str, args: &[Variant]) -> Result<(), HttpError> {
        let signal = self
            .object
            .signal_def(name)
            .ok_or_else(|| HttpError::not_found(format!("unknown signal {name:?}")))?;
        let kinds_ok = signal.params.len() == args.len()
            && signal
                .params
                .iter()
                .zip(args)
                .all(|(decl, arg)| Variant::match_score(arg.kind(), *decl).is_some());
        if !kinds_ok {
            return Err(HttpError::bad_request("signal argument kinds mismatch"));
        }
        let payload = match args.len() {
            0 => Vec::new(),
            1 => args[0].encode(),
            _ => Variant::List(args.to_vec()).encode(),
        };
        let uri = signal.push_uri();
        let maps = self.channels.lock().unwrap();
        if let Some(ids) = maps.by_uri.get(&uri) {
            for id in ids {
                if let Some(channel) = maps.by_id.get(id) {
                    channel.post(&uri, payload.clone());
                }
            }
        }
        Ok(())
    }

    pub fn channel_count(&self) -> usize {
        self.channels.lock().unwrap().by_id.len()
    }

    fn has_active_pusher(&self) -> bool {
        self.channels
            .lock()
            .unwrap()
            .by_id
            .values()
            .any(|c| c.has_pusher())
    }

    /// Kill and drop channels that were killed already or sat without a
    /// pusher longer than `max_idle`.
    fn reap_channels(&self, max_idle: Duration) {
        let mut maps = self.channels.lock().unwrap();
        let dead: Vec<String> = maps
            .by_id
            .iter()
            .filter(|(_, c)| c.is_killed() || (!c.has_pusher() && c.idle_for() > max_idle))
            .map(|(id, _)| id.clone())
            .collect();
        for id in dead {
            if let Some(channel) = maps.by_id.remove(&id) {
                channel.kill();
                debug!(channel = %id, "channel reaped");
            }
            for subscribers in maps.by_uri.values_mut() {
                subscribers.retain(|s| s != &id);
            }
        }
        maps.by_uri.retain(|_, subscribers| !subscribers.is_empty());
    }

    fn kill_all_channels(&self) {
        let mut maps = self.channels.lock().unwrap();
        for channel in maps.by_id.values() {
            channel.kill();
        }
        maps.by_id.clear();
        maps.by_uri.clear();
    }

    // ---- request handling -----------------------------------------------

    fn handle(
        &self,
        uri: &str,
        conn: &mut HttpConnection,
        controller: &Arc<RequestController>,
    ) -> Result<(), HandlerError> {
        let (head, rest) = split_uri(uri);
        match (head, rest) {
            ("", None) => {
                send_text(conn, "functions/\nsignals/\nproperties/\nenums/\nchannels/\nping\n")
            }
            ("ping", None) => send_text(conn, ""),
            ("functions", None) => send_text(conn, &self.object.list_functions()),
            ("functions", Some(name)) => self.call_function(name, conn),
            ("properties", None) => self.handle_properties(conn),
            ("properties", Some(name)) => self.handle_property(name, conn),
            ("signals", None) => send_text(conn, &self.object.list_signals()),
            ("enums", None) => send_text(conn, &self.object.list_enums()),
            ("enums", Some(name)) => {
                let members = self
                    .object
                    .list_enum_members(name)
                    .ok_or_else(|| HttpError::not_found(format!("unknown enum {name:?}")))?;
                send_text(conn, &members)
            }
            ("channels", rest) => self.handle_channel(rest, conn, controller),
            _ => Err(HttpError::not_found("unknown object member").into()),
        }
    }

    fn call_function(&self, name: &str, conn: &mut HttpConnection) -> Result<(), HandlerError> {
        let args = collect_args(conn)?;
        let kinds: Vec<VariantKind> = args.iter().map(|a| a.kind()).collect();
        let func = self.object.resolve(name, &kinds).map_err(|err| match err {
            ResolveError::UnknownName => {
                HttpError::not_found(format!("unknown function {name:?}"))
            }
            ResolveError::NoMatch => {
                HttpError::bad_request("no overload accepts these arguments")
            }
            ResolveError::Ambiguous => {
                HttpError::bad_request("call is ambiguous between overloads")
            }
        })?;
        let declaration = func.declaration();
        let has_return = func.returns.is_some();
        let value = self.object.invoke(func, args).map_err(|msg| {
            warn!(function = %declaration, error = %msg, "function failed");
            HttpError::internal(msg)
        })?;
        debug!(function = %declaration, "function called");
        if has_return {
            conn.response.fields.set("Content-Type", "text/plain");
            conn.send_body(&value.encode())?;
        }
        Ok(())
    }

    /// The bare `properties` path: with request items it batch-sets the
    /// named properties, otherwise it serves the declaration listing.
    fn handle_properties(&self, conn: &mut HttpConnection) -> Result<(), HandlerError> {
        let items = conn.request_items()?;
        if items.is_empty() {
            return send_text(conn, &self.object.list_properties());
        }
        for (name, raw) in items {
            let def = self
                .object
                .property_def(&name)
                .ok_or_else(|| HttpError::not_found(format!("unknown property {name:?}")))?;
            let setter = def
                .setter
                .as_ref()
                .ok_or_else(|| HttpError::bad_request(format!("property {name:?} is read-only")))?;
            let value = Variant::decode(raw.as_bytes())
                .coerce(def.kind)
                .ok_or_else(|| {
                    HttpError::bad_request(format!("value kind mismatch for property {name:?}"))
                })?;
            setter(value).map_err(HttpError::internal)?;
            debug!(property = %name, "property set");
        }
        Ok(())
    }

    fn handle_property(&self, name: &str, conn: &mut HttpConnection) -> Result<(), HandlerError> {
        let def = self
            .object
            .property_def(name)
            .ok_or_else(|| HttpError::not_found(format!("unknown property {name:?}")))?;

        // A set travels either as a value= item or as the request body.
        // With repeated value= items the first one wins.
        let mut new_value = conn
            .request_items()?
            .into_iter()
            .find(|(k, _)| k == "value")
            .map(|(_, v)| Variant::decode(v.as_bytes()));
        if new_value.is_none() && conn.request.method() == Method::POST {
            let body = conn.read_body_to_end()?;
            if !body.is_empty() {
                new_value = Some(Variant::decode(&body));
            }
        }

        match new_value {
            Some(value) => {
                let setter = def
                    .setter
                    .as_ref()
                    .ok_or_else(|| HttpError::bad_request("property is read-only"))?;
                let value = value
                    .coerce(def.kind)
                    .ok_or_else(|| HttpError::bad_request("property value kind mismatch"))?;
                setter(value).map_err(HttpError::internal)?;
                debug!(property = %name, "property set");
                Ok(())
            }
            None => {
                let getter = def
                    .getter
                    .as_ref()
                    .ok_or_else(|| HttpError::bad_request("property is write-only"))?;
                conn.response.fields.set("Content-Type", "text/plain");
                conn.send_body(&getter().encode())?;
                Ok(())
            }
        }
    }

    fn handle_channel(
        &self,
        rest: Option<&str>,
        conn: &mut HttpConnection,
        controller: &Arc<RequestController>,
    ) -> Result<(), HandlerError> {
        match rest {
            None => {
                let ids: Vec<String> = {
                    let maps = self.channels.lock().unwrap();
                    maps.by_id.keys().cloned().collect()
                };
                let mut listing = ids.join("\n");
                if !listing.is_empty() {
                    listing.push('\n');
                }
                send_text(conn, &listing)
            }
            Some("new") => {
                let channel = Channel::new();
                let id = channel.id().to_string();
                self.channels
                    .lock()
                    .unwrap()
                    .by_id
                    .insert(id.clone(), channel.clone());
                info!(channel = %id, "channel opened");
                self.start_push(&channel, conn, controller, true)
            }
            Some("reconnect") => {
                let id = item_value(conn, "id")?
                    .ok_or_else(|| HttpError::bad_request("missing id item"))?;
                let channel = self.lookup_channel(&id)?;
                info!(channel = %id, "channel reconnected");
                self.start_push(&channel, conn, controller, false)
            }
            Some(rest) => {
                let (id, op) = rest
                    .split_once('/')
                    .ok_or_else(|| HttpError::not_found("unknown channel operation"))?;
                let channel = self.lookup_channel(id)?;
                match op {
                    "connect" => {
                        let uri = item_value(conn, "uri")?
                            .ok_or_else(|| HttpError::bad_request("missing uri item"))?;
                        if !self.object.is_push_uri(&uri) {
                            return Err(
                                HttpError::not_found(format!("unknown push URI {uri:?}")).into()
                            );
                        }
                        let mut maps = self.channels.lock().unwrap();
                        if channel.subscribe(&uri) {
                            maps.by_uri.entry(uri.clone()).or_default().push(id.to_string());
                        }
                        debug!(channel = %id, uri = %uri, "channel subscribed");
                        Ok(())
                    }
                    "disconnect" => {
                        let uri = item_value(conn, "uri")?
                            .ok_or_else(|| HttpError::bad_request("missing uri item"))?;
                        let mut maps = self.channels.lock().unwrap();
                        if channel.unsubscribe(&uri) {
                            if let Some(subscribers) = maps.by_uri.get_mut(&uri) {
                                subscribers.retain(|s| s != id);
                                if subscribers.is_empty() {
                                    maps.by_uri.remove(&uri);
                                }
                            }
                        }
                        Ok(())
                    }
                    "close" => {
                        channel.kill();
                        let mut maps = self.channels.lock().unwrap();
                        maps.by_id.remove(id);
                        for subscribers in maps.by_uri.values_mut() {
                            subscribers.retain(|s| s != id);
                        }
                        maps.by_uri.retain(|_, subscribers| !subscribers.is_empty());
                        info!(channel = %id, "channel closed");
                        Ok(())
                    }
                    _ => Err(HttpError::not_found("unknown channel operation").into()),
                }
            }
        }
    }

    fn lookup_channel(&self, id: &str) -> Result<Arc<Channel>, HttpError> {
        self.channels
            .lock()
            .unwrap()
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| HttpError::not_found(format!("unknown channel {id:?}")))
    }

    /// Claim the channel, then turn the response into an unbounded
    /// multipart stream and run the push loop on it.
    fn start_push(
        &self,
        channel: &Arc<Channel>,
        conn: &mut HttpConnection,
        controller: &Arc<RequestController>,
        send_id: bool,
    ) -> Result<(), HandlerError> {
        let guard = channel.begin_push()?;
        controller.clear_time_limit();
        conn.close_after();
        conn.response.fields.set(
            "Content-Type",
            format!("multipart/mixed; boundary=\"{}\"", channel.boundary()),
        );
        conn.flush_output_filters()?;
        if send_id {
            conn.write_all(format!("{}\r\n", channel.id()).as_bytes())?;
        }
        guard.run(conn, controller)
    }
}

fn split_uri(uri: &str) -> (&str, Option<&str>) {
    match uri.split_once('/') {
        Some((head, rest)) => (head, Some(rest)),
        None => (uri, None),
    }
}

fn send_text(conn: &mut HttpConnection, text: &str) -> Result<(), HandlerError> {
    conn.response.fields.set("Content-Type", "text/plain");
    conn.send_body(text.as_bytes())?;
    Ok(())
}

/// Call arguments: a non-empty request body decodes as the argument list,
/// otherwise the query items supply them positionally.
fn collect_args(conn: &mut HttpConnection) -> Result<Vec<Variant>, HandlerError> {
    if conn.request.method() == Method::POST {
        let body = conn.read_body_to_end()?;
        if !body.is_empty() {
            return Ok(match Variant::decode(&body) {
                Variant::List(items) => items,
                single => vec![single],
            });
        }
    }
    Ok(conn
        .request_items()?
        .into_iter()
        .map(|(_, v)| Variant::decode(v.as_bytes()))
        .collect())
}

fn item_value(conn: &mut HttpConnection, name: &str) -> Result<Option<String>, HandlerError> {
    Ok(conn
        .request_items()?
        .into_iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v))
}

// ---- instance service ----------------------------------------------------

struct InstanceSlot {
    core: ObjectCore,
    last_used: Mutex<Instant>,
}

struct InstanceRegistry {
    factory: Box<dyn Fn() -> RemoteObject + Send + Sync>,
    instances: DashMap<String, Arc<InstanceSlot>>,
    max_instances: usize,
}

impl InstanceRegistry {
    fn create(&self) -> Result<String, HttpError> {
        if self.instances.len() >= self.max_instances {
            return Err(HttpError::unavailable("instance limit reached"));
        }
        let id = InstanceId::new().to_string();
        let slot = Arc::new(InstanceSlot {
            core: ObjectCore::new((self.factory)()),
            last_used: Mutex::new(Instant::now()),
        });
        self.instances.insert(id.clone(), slot);
        info!(instance = %id, "instance created");
        Ok(id)
    }

    fn delete(&self, id: &str) -> bool {
        match self.instances.remove(id) {
            Some((_, slot)) => {
                slot.core.kill_all_channels();
                info!(instance = %id, "instance deleted");
                true
            }
            None => false,
        }
    }

    fn evict_expired(&self, max_idle: Duration, channel_idle: Duration) {
        let mut expired = Vec::new();
        for entry in self.instances.iter() {
            entry.value().core.reap_channels(channel_idle);
            let idle = entry.value().last_used.lock().unwrap().elapsed();
            if idle > max_idle && !entry.value().core.has_active_pusher() {
                expired.push(entry.key().clone());
            }
        }
        for id in expired {
            debug!(instance = %id, "instance expired");
            self.delete(&id);
        }
    }
}

enum ServerKind {
    Single(Arc<ObjectCore>),
    Service(Arc<InstanceRegistry>),
}

/// A remote object (or object factory) served over HTTP. Mount it on a
/// router prefix; a background thread reaps idle channels and expired
/// instances until the server drops.
pub struct RemoteObjectServer {
    kind: ServerKind,
    gc_stop: Arc<AtomicBool>,
    gc_thread: Mutex<Option<JoinHandle<()>>>,
}

impl RemoteObjectServer {
    /// Serve one shared object.
    pub fn single(object: RemoteObject) -> Self {
        Self::single_with_config(object, RemoteServerConfig::default())
    }

    pub fn single_with_config(object: RemoteObject, config: RemoteServerConfig) -> Self {
        Self::start(ServerKind::Single(Arc::new(ObjectCore::new(object))), config)
    }

    /// Serve per-client instances built by `factory`, addressed by the id
    /// returned from `new`.
    pub fn service(
        factory: impl Fn() -> RemoteObject + Send + Sync + 'static,
        config: RemoteServerConfig,
    ) -> Self {
        Self::start(
            ServerKind::Service(Arc::new(InstanceRegistry {
                factory: Box::new(factory),
                instances: DashMap::new(),
                max_instances: config.max_instances,
            })),
            config,
        )
    }

    fn start(kind: ServerKind, config: RemoteServerConfig) -> Self {
        let gc_stop = Arc::new(AtomicBool::new(false));
        let gc_thread = spawn_gc(&kind, &config, gc_stop.clone());
        Self {
            kind,
            gc_stop,
            gc_thread: Mutex::new(gc_thread),
        }
    }

    /// Emit a signal on the served object. Single-object servers only;
    /// instances emit through their own core.
    pub fn emit(&self, name: &str, args: &[Variant]) -> Result<(), HttpError> {
        match &self.kind {
            ServerKind::Single(core) => core.emit(name, args),
            ServerKind::Service(_) => Err(HttpError::bad_request(
                "signals are emitted per instance on a service",
            )),
        }
    }

    /// A cloneable sender bound to one signal of a single-object server.
    pub fn signal_sender(&self, name: &str) -> Option<SignalSender> {
        let ServerKind::Single(core) = &self.kind else {
            return None;
        };
        core.object().signal_def(name)?;
        Some(SignalSender {
            core: core.clone(),
            name: name.to_string(),
        })
    }

    pub fn core(&self) -> Option<&Arc<ObjectCore>> {
        match &self.kind {
            ServerKind::Single(core) => Some(core),
            ServerKind::Service(_) => None,
        }
    }

    pub fn instance_count(&self) -> usize {
        match &self.kind {
            ServerKind::Single(_) => 1,
            ServerKind::Service(registry) => registry.instances.len(),
        }
    }
}

fn spawn_gc(
    kind: &ServerKind,
    config: &RemoteServerConfig,
    stop: Arc<AtomicBool>,
) -> Option<JoinHandle<()>> {
    let channel_timeout = config.channel_timeout;
    let instance_timeout = config.instance_timeout;
    let target = match kind {
        ServerKind::Single(core) => ServerKind::Single(core.clone()),
        ServerKind::Service(registry) => ServerKind::Service(registry.clone()),
    };
    thread::Builder::new()
        .name("objgate-object-gc".to_string())
        .spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                thread::sleep(GC_INTERVAL);
                match &target {
                    ServerKind::Single(core) => core.reap_channels(channel_timeout),
                    ServerKind::Service(registry) => {
                        registry.evict_expired(instance_timeout, channel_timeout)
                    }
                }
            }
        })
        .ok()
}

impl Drop for RemoteObjectServer {
    fn drop(&mut self) {
        self.gc_stop.store(true, Ordering::SeqCst);
        let handle = self.gc_thread.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl UriHandler for RemoteObjectServer {
    fn handle_request(
        &self,
        uri: &str,
        conn: &mut HttpConnection,
        controller: &Arc<RequestController>,
    ) -> Result<(), HandlerError> {
        match &self.kind {
            ServerKind::Single(core) => core.handle(uri, conn, controller),
            ServerKind::Service(registry) => {
                let (head, rest) = split_uri(uri);
                match head {
                    "new" => {
                        let id = registry.create()?;
                        conn.response.fields.set("Content-Type", "text/plain");
                        conn.send_body(id.as_bytes())?;
                        Ok(())
                    }
                    "delete" => {
                        let id = item_value(conn, "id")?
                            .ok_or_else(|| HttpError::bad_request("missing id item"))?;
                        if registry.delete(&id) {
                            Ok(())
                        } else {
                            Err(HttpError::not_found(format!("unknown instance {id:?}")).into())
                        }
                    }
                    "" => {
                        let mut listing = registry
                            .instances
                            .iter()
                            .map(|e| e.key().clone())
                            .collect::<Vec<_>>()
                            .join("\n");
                        if !listing.is_empty() {
                            listing.push('\n');
                        }
                        send_text(conn, &listing)
                    }
                    id => {
                        let slot = registry
                            .instances
                            .get(id)
                            .map(|e| e.value().clone())
                            .ok_or_else(|| {
                                HttpError::not_found(format!("unknown instance {id:?}"))
                            })?;
                        *slot.last_used.lock().unwrap() = Instant::now();
                        slot.core.handle(rest.unwrap_or(""), conn, controller)
                    }
                }
            }
        }
    }
}

/// Cloneable handle for emitting one signal from application threads.
#[derive(Clone)]
pub struct SignalSender {
    core: Arc<ObjectCore>,
    name: String,
}

impl SignalSender {
    pub fn send(&self, args: &[Variant]) -> Result<(), HttpError> {
        self.core.emit(&self.name, args)
    }
}
