//! Threaded connection serving: listener, worker pool dispatcher, and the
//! protocol seam between them.

pub mod dispatcher;
pub mod listener;
pub mod registry;
pub mod worker;

use std::io;
use std::sync::Arc;

use crate::socket::{ProgressController, SocketHandle};

/// A wire protocol served over accepted connections.
///
/// [`communicate`](Protocol::communicate) is called on a worker thread
/// with one connected socket and runs until the connection is done. The
/// controller goes `false` when the dispatcher wants the worker back, and
/// implementations poll it between I/O slices.
pub trait Protocol: Send + Sync {
    fn communicate(
        &self,
        socket: SocketHandle,
        controller: Arc<dyn ProgressController>,
    ) -> io::Result<()>;

    /// A per-worker clone of this protocol, for protocols that keep
    /// per-thread state. `None` shares one instance across all workers.
    fn fork(&self) -> Option<Arc<dyn Protocol>> {
        None
    }
}

pub use dispatcher::{Dispatcher, DispatcherMetrics, StopMode};
pub use listener::{HttpServer, ServerHandle};
pub use registry::ServerRegistry;
