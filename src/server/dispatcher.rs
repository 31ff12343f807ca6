//! Worker pool dispatcher.
//!
//! Accepted connections enter through [`Dispatcher::incoming_connection`],
//! which under a single mutex either hands the socket to an idle worker,
//! spawns a new worker up to the pool cap, queues it in a bounded backlog,
//! or answers with a fixed busy response. Exited workers land on a
//! finished list that a reaper thread joins, so no thread ever joins
//! itself.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::DispatcherConfig;
use crate::server::worker::Worker;
use crate::server::Protocol;
use crate::socket::{FreeRun, SocketHandle};

const REAP_INTERVAL: Duration = Duration::from_secs(1);

const BUSY_RESPONSE: &[u8] = b"HTTP/1.1 503 Service Unavailable\r\n\
    Content-Type: text/plain\r\n\
    Content-Length: 4\r\n\
    Connection: close\r\n\r\nbusy";

/// How [`Dispatcher::stop`] treats connections in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Interrupt active connections at their next I/O slice.
    Interrupt,
    /// Let active connections run to completion.
    WaitClients,
}

/// Counters exposed for operational visibility.
#[derive(Debug, Default)]
pub struct DispatcherMetrics {
    pub dispatched: AtomicU64,
    pub spawned: AtomicU64,
    pub queued: AtomicU64,
    pub rejected: AtomicU64,
    pub retired: AtomicU64,
}

struct WorkerLists {
    all: Vec<Worker>,
    idle: Vec<usize>,
    pending: VecDeque<SocketHandle>,
    finished: Vec<Worker>,
}

pub(crate) struct DispatcherCore {
    protocol: Arc<dyn Protocol>,
    config: DispatcherConfig,
    lists: Mutex<WorkerLists>,
    metrics: DispatcherMetrics,
}

impl DispatcherCore {
    /// Called by a worker done with a connection. Returns queued work to
    /// serve next, or marks the worker idle.
    pub(crate) fn thread_available(&self, id: usize) -> Option<SocketHandle> {
        let mut lists = self.lists.lock().unwrap();
        if let Some(socket) = lists.pending.pop_front() {
            return Some(socket);
        }
        if !lists.idle.contains(&id) {
            lists.idle.push(id);
        }
        None
    }

    /// Called by a worker whose idle timer expired. Granting removes the
    /// worker from the idle list, so no connection can reach it after.
    /// A worker no longer on the idle list has work on the way and must
    /// stay.
    pub(crate) fn allow_retire(&self, id: usize) -> bool {
        let mut lists = self.lists.lock().unwrap();
        if lists.all.len() <= self.config.min_workers {
            return false;
        }
        let Some(pos) = lists.idle.iter().position(|&i| i == id) else {
            return false;
        };
        lists.idle.swap_remove(pos);
        self.metrics.retired.fetch_add(1, Ordering::Relaxed);
        debug!(worker = id, "worker retiring after idle timeout");
        true
    }

    /// Called by every worker on its way out. Moves it to the finished
    /// list for the reaper to join.
    pub(crate) fn thread_finished(&self, id: usize) {
        let mut lists = self.lists.lock().unwrap();
        lists.idle.retain(|&i| i != id);
        if let Some(pos) = lists.all.iter().position(|w| w.id() == id) {
            let worker = lists.all.swap_remove(pos);
            lists.finished.push(worker);
        }
    }

    fn reap(&self) {
        let finished = {
            let mut lists = self.lists.lock().unwrap();
            std::mem::take(&mut lists.finished)
        };
        for worker in finished {
            worker.join();
        }
    }
}

/// Owns the pool and the reaper thread.
pub struct Dispatcher {
    core: Arc<DispatcherCore>,
    next_id: AtomicUsize,
    running: Arc<AtomicBool>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(protocol: Arc<dyn Protocol>, config: DispatcherConfig) -> Self {
        Self {
            core: Arc::new(DispatcherCore {
                protocol,
                config,
                lists: Mutex::new(WorkerLists {
                    all: Vec::new(),
                    idle: Vec::new(),
                    pending: VecDeque::new(),
                    finished: Vec::new(),
                }),
                metrics: DispatcherMetrics::default(),
            }),
            next_id: AtomicUsize::new(0),
            running: Arc::new(AtomicBool::new(false)),
            reaper: Mutex::new(None),
        }
    }

    fn spawn_worker(&self, first: Option<SocketHandle>) -> io::Result<Worker> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let protocol = self
            .core
            .protocol
            .fork()
            .unwrap_or_else(|| self.core.protocol.clone());
        Worker::spawn(
            id,
            protocol,
            Arc::downgrade(&self.core),
            self.core.config.worker_max_idle,
            first,
        )
    }

    /// Pre-spawn the minimum worker complement, drop any stale backlog,
    /// and launch the reaper thread. Idempotent.
    pub fn start(&self) -> io::Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        {
            let mut lists = self.core.lists.lock().unwrap();
            lists.pending.clear();
            while lists.all.len() < self.core.config.min_workers {
                let worker = self.spawn_worker(None)?;
                lists.idle.push(worker.id());
                lists.all.push(worker);
                self.core.metrics.spawned.fetch_add(1, Ordering::Relaxed);
            }
        }
        let core = self.core.clone();
        let running = self.running.clone();
        let handle = thread::Builder::new()
            .name("objgate-reaper".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    thread::sleep(REAP_INTERVAL);
                    core.reap();
                }
                core.reap();
            })?;
        *self.reaper.lock().unwrap() = Some(handle);
        info!(
            min = self.core.config.min_workers,
            max = self.core.config.max_workers,
            "dispatcher started"
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn metrics(&self) -> &DispatcherMetrics {
        &self.core.metrics
    }

    pub fn worker_count(&self) -> usize {
        self.core.lists.lock().unwrap().all.len()
    }

    /// Place an accepted connection: idle worker, new worker, backlog
    /// queue, or busy rejection, in that order.
    pub fn incoming_connection(&self, socket: SocketHandle) {
        if !self.running.load(Ordering::SeqCst) {
            serve_busy(&socket);
            return;
        }
        let metrics = &self.core.metrics;
        let mut lists = self.core.lists.lock().unwrap();

        if let Some(id) = lists.idle.pop() {
            if let Some(worker) = lists.all.iter().find(|w| w.id() == id) {
                worker.assign(socket);
                metrics.dispatched.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        if lists.all.len() < self.core.config.max_workers {
            // The handle is shared, so the rejection paths below keep a
            // usable copy even after a failed spawn consumed this one.
            match self.spawn_worker(Some(socket.clone())) {
                Ok(worker) => {
                    debug!(worker = worker.id(), pool = lists.all.len() + 1, "worker spawned");
                    lists.all.push(worker);
                    metrics.spawned.fetch_add(1, Ordering::Relaxed);
                    metrics.dispatched.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(err) => {
                    warn!(error = %err, "worker spawn failed");
                    // Fall through to the queue.
                }
            }
        }

        let duplicate = lists
            .pending
            .iter()
            .any(|queued| queued.raw_fd() == socket.raw_fd());
        if !duplicate && lists.pending.len() < self.core.config.max_pending_connections {
            lists.pending.push_back(socket);
            metrics.queued.fetch_add(1, Ordering::Relaxed);
            return;
        }

        drop(lists);
        metrics.rejected.fetch_add(1, Ordering::Relaxed);
        debug!("pool saturated, rejecting connection");
        serve_busy(&socket);
    }

    /// Stop the pool and join every worker. Safe to call without a prior
    /// [`start`](Dispatcher::start), and idempotent.
    pub fn stop(&self, mode: StopMode) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        let (workers, pending) = {
            let mut lists = self.core.lists.lock().unwrap();
            let mut workers = std::mem::take(&mut lists.all);
            workers.append(&mut lists.finished);
            lists.idle.clear();
            (workers, std::mem::take(&mut lists.pending))
        };
        for socket in pending {
            serve_busy(&socket);
        }
        for worker in &workers {
            worker.request_stop();
            if mode == StopMode::Interrupt {
                worker.interrupt();
            }
        }
        for worker in &workers {
            worker.join();
        }
        if was_running {
            let handle = self.reaper.lock().unwrap().take();
            if let Some(handle) = handle {
                let _ = handle.join();
            }
            info!(workers = workers.len(), "dispatcher stopped");
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop(StopMode::Interrupt);
    }
}

fn serve_busy(socket: &SocketHandle) {
    let _ = socket.write_all_waited(BUSY_RESPONSE, Duration::from_secs(1), &FreeRun);
    let _ = socket.shutdown();
}
