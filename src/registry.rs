use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use crate::error::StreamError;

/// Opaque, process-unique stream identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(Arc<str>);

impl StreamId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        let n = NEXT.fetch_add(1, Ordering::Relaxed);
        Self(format!("{n:08x}").into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type CloseFn = Box<dyn Fn() -> Result<(), StreamError> + Send + Sync>;

/// Tracks the close callback of every live stream
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<StreamId, CloseFn>>,
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("len", &self.connections.len())
            .finish()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, id: StreamId, close: CloseFn) {
        debug!(stream_id = %id, "registering stream");
        self.connections.insert(id, close);
    }

    pub fn remove(&self, id: &StreamId) {
        if self.connections.remove(id).is_some() {
            debug!(stream_id = %id, "deregistered stream");
        }
    }

    pub fn contains(&self, id: &StreamId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Closes every registered stream and returns how many closed cleanly.
    ///
    /// Each callback is taken out of the map before it runs, so concurrent
    /// callers never invoke the same one twice.
    pub fn close_all(&self) -> usize {
        let ids: Vec<StreamId> = self
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        info!(streams = ids.len(), "closing all streams");
        let mut closed = 0;
        for id in ids {
            let Some((id, close)) = self.connections.remove(&id) else {
                continue;
            };
            match panic::catch_unwind(AssertUnwindSafe(|| close())) {
                Ok(Ok(())) => closed += 1,
                Ok(Err(e)) => warn!(stream_id = %id, error = %e, "error while closing stream"),
                Err(_) => error!(stream_id = %id, "close callback panicked"),
            }
        }
        closed
    }
}
