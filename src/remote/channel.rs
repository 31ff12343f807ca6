//! Server-push channels.
//!
//! A channel is a queue of pushed entities that exactly one HTTP request
//! at a time drains into a multipart response stream. Subscriptions name
//! the push URIs whose emissions the channel receives. A channel survives
//! its pusher: when the carrying connection drops, the queue keeps
//! accumulating until a reconnect claims it or the idle timer reaps it.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{HandlerError, HttpError};
use crate::http::filter::{MultipartEncodeFilter, OutputFilter};
use crate::http::HttpConnection;
use crate::ids::ChannelId;
use crate::router::RequestController;
use crate::socket::ProgressController;

/// Queue poll slice while waiting for something to push.
const PUSH_WAIT_SLICE: Duration = Duration::from_millis(50);

pub struct Channel {
    id: ChannelId,
    boundary: String,
    queue: Mutex<VecDeque<(String, Vec<u8>)>>,
    cv: Condvar,
    /// At most one pusher at a time; a second claim is refused.
    pushing: AtomicBool,
    killed: AtomicBool,
    /// When the last pusher detached. Governs idle reaping.
    idle_since: Mutex<Instant>,
    uris: Mutex<HashSet<String>>,
}

impl Channel {
    pub fn new() -> Arc<Self> {
        let id = ChannelId::new();
        Arc::new(Self {
            boundary: format!("ch-{id}"),
            id,
            queue: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
            pushing: AtomicBool::new(false),
            killed: AtomicBool::new(false),
            idle_since: Mutex::new(Instant::now()),
            uris: Mutex::new(HashSet::new()),
        })
    }

    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Subscribe to a push URI. Idempotent.
    pub fn subscribe(&self, uri: &str) -> bool {
        self.uris.lock().unwrap().insert(uri.to_string())
    }

    pub fn unsubscribe(&self, uri: &str) -> bool {
        self.uris.lock().unwrap().remove(uri)
    }

    pub fn is_subscribed(&self, uri: &str) -> bool {
        self.uris.lock().unwrap().contains(uri)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.uris.lock().unwrap().iter().cloned().collect()
    }

    /// Queue a payload for the pusher, if this channel subscribes to the
    /// URI.
    pub fn post(&self, uri: &str, payload: Vec<u8>) {
        if self.killed.load(Ordering::Relaxed) || !self.is_subscribed(uri) {
            return;
        }
        self.queue.lock().unwrap().push_back((uri.to_string(), payload));
        self.cv.notify_all();
    }

    /// Terminate the channel. The pusher, if any, sends the closing
    /// boundary and returns.
    pub fn kill(&self) {
        self.killed.store(true, Ordering::Relaxed);
        self.cv.notify_all();
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Relaxed)
    }

    pub fn has_pusher(&self) -> bool {
        self.pushing.load(Ordering::Relaxed)
    }

    /// How long the channel has been without a pusher. Zero while one is
    /// attached.
    pub fn idle_for(&self) -> Duration {
        if self.has_pusher() {
            return Duration::ZERO;
        }
        self.idle_since.lock().unwrap().elapsed()
    }

    /// Claim the single pusher slot. The claim is checked before any
    /// response bytes go out, so a refused claim can still answer with a
    /// proper status.
    pub fn begin_push(self: &Arc<Self>) -> Result<PushGuard, HttpError> {
        if self.pushing.swap(true, Ordering::SeqCst) {
            return Err(HttpError::conflict("channel already has an active pusher"));
        }
        debug!(channel = %self.id, "pusher attached");
        Ok(PushGuard {
            channel: self.clone(),
        })
    }
    fn write_entity(
        &self,
        conn: &mut HttpConnection,
        uri: &str,
        payload: &[u8],
    ) -> Result<(), HandlerError> {
        let mut filter = MultipartEncodeFilter::with_uri(self.boundary.clone(), uri);
        filter.write(payload)?;
        conn.write_all(&filter.take_output())?;
        Ok(())
    }
}

/// Exclusive pusher claim on a channel. Dropping it frees the slot and
/// restarts the idle clock.
pub struct PushGuard {
    channel: Arc<Channel>,
}

impl PushGuard {
    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// Drain the queue into `conn` as multipart entities until the
    /// channel is killed, the request is interrupted, or the connection
    /// breaks. Polls in short slices so all three are noticed promptly.
    pub fn run(
        &self,
        conn: &mut HttpConnection,
        controller: &Arc<RequestController>,
    ) -> Result<(), HandlerError> {
        let channel = &self.channel;
        loop {
            let next = {
                let queue = channel.queue.lock().unwrap();
                let (mut queue, _) = channel
                    .cv
                    .wait_timeout_while(queue, PUSH_WAIT_SLICE, |q| {
                        q.is_empty() && !channel.is_killed()
                    })
                    .unwrap();
                queue.pop_front()
            };
            if let Some((uri, payload)) = next {
                channel.write_entity(conn, &uri, &payload)?;
                continue;
            }
            if channel.is_killed() {
                conn.write_all(format!("--{}--\r\n", channel.boundary).as_bytes())?;
                debug!(channel = %channel.id, "channel closed, pusher detaching");
                return Ok(());
            }
            if !conn.socket().is_writable() || !controller.can_continue(0.0) {
                debug!(channel = %channel.id, "pusher detaching, channel stays open");
                return Ok(());
            }
        }
    }
}

impl Drop for PushGuard {
    fn drop(&mut self) {
        *self.channel.idle_since.lock().unwrap() = Instant::now();
        self.channel.pushing.store(false, Ordering::SeqCst);
    }
}
