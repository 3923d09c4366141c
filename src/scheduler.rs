use std::{future::Future, time::Duration};

use tokio::{runtime::Handle, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{trace, Instrument};

use crate::error::StreamError;

/// Delayed work on the client's worker pool
#[derive(Debug, Clone)]
pub struct Scheduler {
    handle: Handle,
    shutdown: CancellationToken,
}

/// A scheduled task that has not necessarily fired yet
#[derive(Debug)]
pub struct DelayedTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl DelayedTask {
    /// Prevents the task from starting; a task that already started runs to completion
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Scheduler {
    pub(crate) fn new(handle: Handle) -> Self {
        Self {
            handle,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn schedule<F>(&self, delay: Duration, task: F) -> Result<DelayedTask, StreamError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return Err(StreamError::Scheduling {
                reason: "timer is shut down",
            });
        }
        let token = self.shutdown.child_token();
        let cancelled = token.clone();
        let handle = self.handle.spawn(
            async move {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => trace!("delayed task cancelled"),
                    _ = tokio::time::sleep(delay) => task.await,
                }
            }
            .in_current_span(),
        );
        Ok(DelayedTask { token, handle })
    }

    /// A token cancelled when the scheduler shuts down
    pub fn child_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    pub(crate) fn shut_down(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
