//! Pool worker threads.
//!
//! A worker serves one connection at a time on its own OS thread. Between
//! connections it parks on a condvar; after `max_idle` without work it
//! asks the dispatcher for permission to retire. Workers never tear
//! themselves down: on exit they report to the dispatcher, which joins
//! them from its reaper thread.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

use crate::server::dispatcher::DispatcherCore;
use crate::server::Protocol;
use crate::socket::{ProgressController, SocketHandle};

struct Slot {
    pending: Option<SocketHandle>,
}

pub(crate) struct WorkerInner {
    id: usize,
    protocol: Arc<dyn Protocol>,
    core: Weak<DispatcherCore>,
    slot: Mutex<Slot>,
    cv: Condvar,
    interrupted: AtomicBool,
    stop: AtomicBool,
    max_idle: Duration,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl ProgressController for WorkerInner {
    fn can_continue(&self, _progress: f64) -> bool {
        !self.interrupted.load(Ordering::Relaxed)
    }
}

#[derive(Clone)]
pub(crate) struct Worker {
    inner: Arc<WorkerInner>,
}

impl Worker {
    /// Spawn a worker, optionally with its first connection already
    /// assigned. Without one the worker parks idle until assigned.
    pub(crate) fn spawn(
        id: usize,
        protocol: Arc<dyn Protocol>,
        core: Weak<DispatcherCore>,
        max_idle: Duration,
        first: Option<SocketHandle>,
    ) -> io::Result<Worker> {
        let inner = Arc::new(WorkerInner {
            id,
            protocol,
            core,
            slot: Mutex::new(Slot { pending: first }),
            cv: Condvar::new(),
            interrupted: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            max_idle,
            join: Mutex::new(None),
        });
        let thread_inner = inner.clone();
        let handle = thread::Builder::new()
            .name(format!("objgate-worker-{id}"))
            .spawn(move || run(thread_inner))?;
        *inner.join.lock().unwrap() = Some(handle);
        Ok(Worker { inner })
    }

    pub(crate) fn id(&self) -> usize {
        self.inner.id
    }

    /// Hand an idle worker its next connection.
    pub(crate) fn assign(&self, socket: SocketHandle) {
        let mut slot = self.inner.slot.lock().unwrap();
        debug_assert!(slot.pending.is_none());
        slot.pending = Some(socket);
        self.inner.cv.notify_one();
    }

    /// Interrupt the connection in flight; its next I/O slice fails.
    pub(crate) fn interrupt(&self) {
        self.inner.interrupted.store(true, Ordering::Relaxed);
    }

    /// Ask the worker to exit once its current connection completes.
    pub(crate) fn request_stop(&self) {
        self.inner.stop.store(true, Ordering::Relaxed);
        self.inner.cv.notify_one();
    }

    pub(crate) fn join(&self) {
        let handle = self.inner.join.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

fn run(inner: Arc<WorkerInner>) {
    let protocol = inner.protocol.clone();
    let mut next: Option<SocketHandle> = None;
    loop {
        let socket = match next.take() {
            Some(socket) => Some(socket),
            None => wait_for_work(&inner),
        };
        let Some(socket) = socket else { break };
        inner.interrupted.store(false, Ordering::Relaxed);
        // A connection can die while it sat in the backlog queue.
        if socket.is_writable() {
            let controller: Arc<dyn ProgressController> = inner.clone();
            if let Err(err) = protocol.communicate(socket, controller) {
                debug!(worker = inner.id, error = %err, "connection ended with error");
            }
        }
        if inner.stop.load(Ordering::Relaxed) {
            break;
        }
        // Take queued work directly rather than going idle first.
        match inner.core.upgrade() {
            Some(core) => next = core.thread_available(inner.id),
            None => break,
        }
    }
    if let Some(core) = inner.core.upgrade() {
        core.thread_finished(inner.id);
    }
    debug!(worker = inner.id, "worker exiting");
}

/// Park until assigned a connection. `None` means exit: either a stop
/// request, or an idle timeout the dispatcher agreed to.
fn wait_for_work(inner: &Arc<WorkerInner>) -> Option<SocketHandle> {
    loop {
        let timed_out;
        {
            let mut slot = inner.slot.lock().unwrap();
            if let Some(socket) = slot.pending.take() {
                return Some(socket);
            }
            if inner.stop.load(Ordering::Relaxed) {
                return None;
            }
            let (mut guard, result) = inner.cv.wait_timeout(slot, inner.max_idle).unwrap();
            if let Some(socket) = guard.pending.take() {
                return Some(socket);
            }
            if inner.stop.load(Ordering::Relaxed) {
                return None;
            }
            timed_out = result.timed_out();
        }
        // Slot lock released before talking to the dispatcher; the lock
        // order is always dispatcher lists first, worker slot second.
        if timed_out {
            match inner.core.upgrade() {
                Some(core) => {
                    if core.allow_retire(inner.id) {
                        return None;
                    }
                }
                None => return None,
            }
        }
    }
}
