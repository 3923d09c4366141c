use std::{
    panic::{self, AssertUnwindSafe},
    time::Duration,
};

use futures::future::BoxFuture;
use tracing::error;

use super::Epoch;
use crate::error::StreamError;

/// The protocol half of a stream: knows how to open, probe and close a channel
///
/// `try_connect` must not deliver anything to handlers before
/// [`Epoch::established`] resolves to `true`, and must call
/// [`Epoch::notify_remote_close`] when the peer goes away.
pub trait Connector: Send + Sync + 'static {
    type Channel: Send + 'static;

    fn try_connect(&self, epoch: Epoch) -> BoxFuture<'static, Result<Self::Channel, StreamError>>;

    fn close_channel(&self, channel: &Self::Channel);

    fn is_open(&self, channel: &Self::Channel) -> bool;
}

/// Lifecycle notifications shared by every protocol handler
#[allow(unused_variables)]
pub trait LifecycleListener: Send + Sync + 'static {
    /// Any failure: attempts that did not connect, or channels that broke
    fn on_error(&self, error: &StreamError) {}

    /// A failed attempt will be retried after `delay`
    fn on_failed_attempt(&self, attempt: u32, delay: Duration) {}

    /// Terminal, fires at most once per stream
    fn on_retries_exceeded(&self, error: &StreamError) {}
}

/// Runs a user callback, logging instead of unwinding into our tasks
pub(crate) fn guarded(callback: &'static str, f: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!(callback, "handler panicked");
    }
}
