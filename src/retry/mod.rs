mod backoff;
mod retryable;

use std::time::Duration;

use ::backoff::backoff::{Backoff, Constant};

pub use self::backoff::{DelayOverride, WithDelayOverride};
pub use retryable::Retryable;

use crate::config::{MaxRetries, RetryConfig};

/// What made the lifecycle consider reconnecting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A connect attempt failed
    FailedAttempt,
    /// An established channel was closed by the peer
    RemoteClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry(Duration),
    Stop,
    Exceeded,
}

/// Decides whether and when a stream reconnects
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn max_retries(&self) -> MaxRetries {
        self.config.max_retries
    }

    /// The delay source a lifecycle should hand back to [`RetryPolicy::decide`]
    pub fn backoff(&self) -> DelayOverride<Constant> {
        Constant::new(self.config.retry_interval).with_delay_override()
    }

    /// `attempts` is the failure count including the one being handled.
    ///
    /// The backoff is only consumed when the outcome is [`Decision::Retry`].
    pub fn decide<B: Backoff>(&self, attempts: u32, trigger: Trigger, backoff: &mut B) -> Decision {
        if let MaxRetries::Limited(max) = self.config.max_retries {
            if attempts > max {
                return Decision::Exceeded;
            }
        }
        if trigger == Trigger::RemoteClose && !self.config.auto_reconnect {
            return Decision::Stop;
        }
        let delay = backoff
            .next_backoff()
            .unwrap_or(self.config.retry_interval);
        Decision::Retry(delay)
    }
}
