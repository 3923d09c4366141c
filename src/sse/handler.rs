use tokio_sse_codec::Event;

use crate::lifecycle::LifecycleListener;

/// Receives everything an [`SseStream`](super::SseStream) reads
///
/// Callbacks run on the client's worker pool. Within one channel they are
/// ordered: `on_open`, then events and comments, then `on_close`.
#[allow(unused_variables)]
pub trait SseHandler: LifecycleListener {
    fn on_open(&self) {}

    fn on_event(&self, event: &Event);

    fn on_comment(&self, comment: &str) {}

    /// Fires once per channel, whether we or the server closed it
    fn on_close(&self, last_event_id: Option<&str>) {}
}
