use std::time::Duration;

use backoff::backoff::{Backoff, Constant};

pub trait WithDelayOverride<B>
where
    B: Backoff + Sized,
{
    fn with_delay_override(self) -> DelayOverride<B>;
}

impl WithDelayOverride<Constant> for Constant {
    fn with_delay_override(self) -> DelayOverride<Self> {
        DelayOverride::new(self)
    }
}

/// Wraps a backoff so a single upcoming delay can be replaced, e.g. by a
/// server supplied `retry:` hint.
#[derive(Debug)]
pub struct DelayOverride<B: Backoff + Sized> {
    backoff: B,
    next: Option<Duration>,
}

impl<B> DelayOverride<B>
where
    B: Backoff + Sized,
{
    pub fn new(backoff: B) -> Self {
        Self {
            backoff,
            next: None,
        }
    }

    /// Replaces the next delay only, later delays come from the wrapped backoff
    pub fn set_next(&mut self, delay: Duration) {
        self.next = Some(delay);
    }

    pub fn pending_override(&self) -> Option<Duration> {
        self.next
    }
}

impl<B> Backoff for DelayOverride<B>
where
    B: Backoff + Sized,
{
    fn next_backoff(&mut self) -> Option<Duration> {
        let inner = self.backoff.next_backoff();
        self.next.take().or(inner)
    }

    fn reset(&mut self) {
        self.next = None;
        self.backoff.reset();
    }
}
