//! Connection lifecycle: connect, detect closes, reconnect per [`RetryPolicy`]
//!
//! A [`ConnectionLifecycle`] is protocol agnostic. The protocol half lives in a
//! [`Connector`], which opens channels and reports remote closes through the
//! [`Epoch`] it was handed. Every attempt gets a fresh epoch, and close
//! notifications from anything but the live epoch are ignored, so a channel
//! can trigger at most one reconnect.

mod connector;
mod epoch;

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use ::backoff::backoff::{Backoff, Constant};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub(crate) use connector::guarded;
pub use connector::{Connector, LifecycleListener};
pub use epoch::Epoch;
use epoch::EpochEvents;

use crate::{
    client::StreamClient,
    config::{MaxRetries, RetryConfig},
    error::StreamError,
    registry::{CloseFn, StreamId},
    retry::{Decision, DelayOverride, RetryPolicy, Retryable, Trigger},
    scheduler::DelayedTask,
};

/// Drives one logical stream over any number of physical channels
///
/// Dropping the lifecycle closes it.
pub struct ConnectionLifecycle<C: Connector> {
    inner: Arc<Inner<C>>,
}

struct Inner<C: Connector> {
    id: StreamId,
    url: String,
    connector: C,
    policy: RetryPolicy,
    listener: Arc<dyn LifecycleListener>,
    client: StreamClient,
    state: Mutex<State<C::Channel>>,
}

struct Live<Ch> {
    epoch: u64,
    channel: Ch,
    cancel: CancellationToken,
}

struct State<Ch> {
    live: Option<Live<Ch>>,
    connecting: Option<(u64, CancellationToken)>,
    pending: Option<DelayedTask>,
    attempts: u32,
    backoff: DelayOverride<Constant>,
    shutting_down: bool,
    exceeded: bool,
    next_epoch: u64,
}

impl<C: Connector> ConnectionLifecycle<C> {
    pub fn new(
        client: &StreamClient,
        url: impl Into<String>,
        connector: C,
        retry: RetryConfig,
        listener: Arc<dyn LifecycleListener>,
    ) -> Self {
        let policy = RetryPolicy::new(retry);
        let state = State {
            live: None,
            connecting: None,
            pending: None,
            attempts: 0,
            backoff: policy.backoff(),
            shutting_down: false,
            exceeded: false,
            next_epoch: 1,
        };
        Self {
            inner: Arc::new(Inner {
                id: StreamId::next(),
                url: url.into(),
                connector,
                policy,
                listener,
                client: client.clone(),
                state: Mutex::new(state),
            }),
        }
    }

    pub fn id(&self) -> &StreamId {
        &self.inner.id
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn connector(&self) -> &C {
        &self.inner.connector
    }

    /// Starts connecting on the worker pool and returns immediately.
    ///
    /// Resets the attempt counter. Does nothing while a channel is open or
    /// opening, and refuses once retries were exceeded.
    pub fn connect(&self) {
        self.inner.connect();
    }

    /// Stops the stream: cancels pending reconnects, closes the live channel
    /// and deregisters it before returning. Safe to call repeatedly.
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn is_open(&self) -> bool {
        let state = self.inner.state.lock();
        state
            .live
            .as_ref()
            .is_some_and(|live| self.inner.connector.is_open(&live.channel))
    }

    /// Failures since the last successful connect
    pub fn attempts(&self) -> u32 {
        self.inner.state.lock().attempts
    }

    pub fn retries_exceeded(&self) -> bool {
        self.inner.state.lock().exceeded
    }

    /// Runs `f` against the live channel, if any. `f` runs under the
    /// lifecycle lock and must not block.
    pub fn with_channel<R>(&self, f: impl FnOnce(&C::Channel) -> R) -> Option<R> {
        let state = self.inner.state.lock();
        state.live.as_ref().map(|live| f(&live.channel))
    }
}

impl<C: Connector> Drop for ConnectionLifecycle<C> {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl<C: Connector> Inner<C> {
    #[instrument(skip_all, fields(stream_id = %self.id, url = %self.url))]
    fn connect(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if state.exceeded {
            warn!("retries exceeded, refusing to connect");
            return;
        }
        state.shutting_down = false;
        state.attempts = 0;
        state.backoff.reset();
        if state.live.is_some() || state.connecting.is_some() {
            debug!("already connected or connecting");
            return;
        }
        if let Some(task) = state.pending.take() {
            task.cancel();
        }
        if let Err(e) = self.schedule_attempt(&mut state, Duration::ZERO) {
            warn!(error = %e, "could not start connect attempt, stream left idle");
        }
    }

    fn schedule_attempt(
        self: &Arc<Self>,
        state: &mut State<C::Channel>,
        delay: Duration,
    ) -> Result<(), StreamError> {
        let inner = Arc::clone(self);
        let task = self.client.scheduler().schedule(delay, inner.attempt())?;
        state.pending = Some(task);
        Ok(())
    }

    #[instrument(skip_all, fields(stream_id = %self.id))]
    async fn attempt(self: Arc<Self>) {
        let (epoch, established, cancel) = {
            let mut state = self.state.lock();
            if state.shutting_down || state.exceeded {
                debug!("stream is closing, skipping attempt");
                return;
            }
            if state.live.is_some() || state.connecting.is_some() {
                debug!("channel already open or opening, skipping attempt");
                return;
            }
            let id = state.next_epoch;
            state.next_epoch += 1;
            let cancel = self.client.scheduler().child_token();
            state.connecting = Some((id, cancel.clone()));
            let (tx, rx) = oneshot::channel();
            let events: Arc<dyn EpochEvents> = self.clone();
            let events: Weak<dyn EpochEvents> = Arc::downgrade(&events);
            let epoch = Epoch::new(id, self.id.clone(), cancel.clone(), rx, events);
            (epoch, tx, cancel)
        };
        let epoch_id = epoch.id();
        debug!(epoch = epoch_id, url = %self.url, "connecting");
        let result = self.connector.try_connect(epoch).await;
        self.complete_attempt(epoch_id, established, cancel, result);
    }

    fn complete_attempt(
        self: &Arc<Self>,
        epoch: u64,
        established: oneshot::Sender<()>,
        cancel: CancellationToken,
        result: Result<C::Channel, StreamError>,
    ) {
        let mut state = self.state.lock();
        let current = matches!(&state.connecting, Some((id, _)) if *id == epoch);
        if current {
            state.connecting = None;
        }
        match result {
            Ok(channel) if !current || state.shutting_down || state.live.is_some() => {
                drop(state);
                warn!(epoch, "discarding late connection attempt");
                cancel.cancel();
                self.connector.close_channel(&channel);
            }
            Ok(channel) => {
                state.attempts = 0;
                state.backoff.reset();
                state.live = Some(Live {
                    epoch,
                    channel,
                    cancel,
                });
                self.client.registry().add(self.id.clone(), self.close_fn());
                info!(stream_id = %self.id, epoch, "connected");
                // the receiver is gone only if the connector dropped its epoch
                let _ = established.send(());
            }
            Err(error) => {
                drop(state);
                cancel.cancel();
                if !current {
                    debug!(epoch, error = %error, "superseded attempt failed");
                    return;
                }
                warn!(stream_id = %self.id, epoch, error = %error, "connection attempt failed");
                guarded("on_error", || self.listener.on_error(&error));
                if error.is_retryable() {
                    self.schedule_reconnect(Trigger::FailedAttempt);
                } else {
                    error!(stream_id = %self.id, error = %error, "unrecoverable error, not retrying");
                }
            }
        }
    }

    fn close_fn(self: &Arc<Self>) -> CloseFn {
        let inner = Arc::downgrade(self);
        Box::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.close();
            }
            Ok(())
        })
    }

    #[instrument(skip_all, fields(stream_id = %self.id, ?trigger))]
    fn schedule_reconnect(self: &Arc<Self>, trigger: Trigger) {
        let mut state = self.state.lock();
        if state.shutting_down || state.exceeded {
            debug!("stream is closing, not reconnecting");
            return;
        }
        state.attempts = state.attempts.saturating_add(1);
        let attempts = state.attempts;
        let decision = self.policy.decide(attempts, trigger, &mut state.backoff);
        match decision {
            Decision::Retry(delay) => {
                info!(
                    attempts,
                    max_retries = %self.policy.max_retries(),
                    delay_ms = delay.as_millis() as u64,
                    "scheduling reconnect"
                );
                if let Err(e) = self.schedule_attempt(&mut state, delay) {
                    drop(state);
                    warn!(error = %e, "could not schedule reconnect, stream left idle");
                    return;
                }
                drop(state);
                if trigger == Trigger::FailedAttempt {
                    guarded("on_failed_attempt", || {
                        self.listener.on_failed_attempt(attempts, delay)
                    });
                }
            }
            Decision::Stop => {
                debug!("auto reconnect disabled, stream is idle");
            }
            Decision::Exceeded => {
                state.exceeded = true;
                let pending = state.pending.take();
                let connecting = state.connecting.take();
                let live = state.live.take();
                self.client.registry().remove(&self.id);
                drop(state);
                if let Some(task) = pending {
                    task.cancel();
                }
                if let Some((_, cancel)) = connecting {
                    cancel.cancel();
                }
                if let Some(live) = live {
                    live.cancel.cancel();
                    self.connector.close_channel(&live.channel);
                }
                let max_retries = match self.policy.max_retries() {
                    MaxRetries::Limited(n) => n,
                    MaxRetries::Unlimited => u32::MAX,
                };
                let error = StreamError::RetriesExceeded {
                    max_retries,
                    attempts,
                };
                error!(error = %error, "giving up");
                guarded("on_retries_exceeded", || {
                    self.listener.on_retries_exceeded(&error)
                });
            }
        }
    }

    #[instrument(skip_all, fields(stream_id = %self.id))]
    fn close(&self) {
        let (pending, connecting, live) = {
            let mut state = self.state.lock();
            state.shutting_down = true;
            self.client.registry().remove(&self.id);
            (
                state.pending.take(),
                state.connecting.take(),
                state.live.take(),
            )
        };
        if let Some(task) = pending {
            task.cancel();
        }
        if let Some((epoch, cancel)) = connecting {
            debug!(epoch, "cancelling in-flight attempt");
            cancel.cancel();
        }
        if let Some(live) = live {
            info!(epoch = live.epoch, "closing stream");
            live.cancel.cancel();
            self.connector.close_channel(&live.channel);
        }
    }
}

impl<C: Connector> EpochEvents for Inner<C> {
    fn remote_closed(self: Arc<Self>, epoch: u64, reason: Option<StreamError>) {
        let live = {
            let mut state = self.state.lock();
            if state.live.as_ref().map(|live| live.epoch) != Some(epoch) {
                debug!(stream_id = %self.id, epoch, "ignoring close of a stale channel");
                return;
            }
            self.client.registry().remove(&self.id);
            state.live.take()
        };
        if let Some(live) = live {
            live.cancel.cancel();
            self.connector.close_channel(&live.channel);
        }
        match reason {
            Some(error) => {
                info!(stream_id = %self.id, epoch, error = %error, "stream closed by remote");
                guarded("on_error", || self.listener.on_error(&error));
            }
            None => info!(stream_id = %self.id, epoch, "stream closed by remote"),
        }
        self.schedule_reconnect(Trigger::RemoteClose);
    }

    fn retry_hint(&self, epoch: u64, delay: Duration) {
        let mut state = self.state.lock();
        if state.live.as_ref().map(|live| live.epoch) == Some(epoch) {
            debug!(stream_id = %self.id, epoch, delay_ms = delay.as_millis() as u64, "server set retry delay");
            state.backoff.set_next(delay);
        }
    }
}
