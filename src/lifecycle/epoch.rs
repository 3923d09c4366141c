use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::{error::StreamError, registry::StreamId};

pub(crate) trait EpochEvents: Send + Sync {
    fn remote_closed(self: Arc<Self>, epoch: u64, reason: Option<StreamError>);
    fn retry_hint(&self, epoch: u64, delay: Duration);
}

/// One connect attempt and, if it succeeds, the channel it produced
///
/// Handed to [`Connector::try_connect`](super::Connector::try_connect) and
/// usually moved into the channel's reader task.
pub struct Epoch {
    id: u64,
    stream_id: StreamId,
    cancel: CancellationToken,
    established: Option<oneshot::Receiver<()>>,
    events: Weak<dyn EpochEvents>,
    notified: AtomicBool,
}

impl fmt::Debug for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Epoch")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Epoch {
    pub(crate) fn new(
        id: u64,
        stream_id: StreamId,
        cancel: CancellationToken,
        established: oneshot::Receiver<()>,
        events: Weak<dyn EpochEvents>,
    ) -> Self {
        Self {
            id,
            stream_id,
            cancel,
            established: Some(established),
            events,
            notified: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// Cancelled on local close, discard, or client shutdown
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Waits until the lifecycle accepted the channel. `false` means the
    /// channel was discarded or closed before it went live.
    pub async fn established(&mut self) -> bool {
        let Some(established) = self.established.take() else {
            return !self.cancel.is_cancelled();
        };
        let cancel = self.cancel.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            accepted = established => accepted.is_ok() && !cancel.is_cancelled(),
        }
    }

    /// Reports that the peer closed the channel. Ignored after a local close
    /// and after the first call.
    pub fn notify_remote_close(&self, reason: Option<StreamError>) {
        if self.cancel.is_cancelled() {
            trace!(epoch = self.id, "channel closed locally, not a remote close");
            return;
        }
        if self.notified.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(events) = self.events.upgrade() {
            events.remote_closed(self.id, reason);
        }
    }

    /// Replaces the delay of the next reconnect
    pub fn retry_hint(&self, delay: Duration) {
        if let Some(events) = self.events.upgrade() {
            events.retry_hint(self.id, delay);
        }
    }
}
