use reqwest::Url;

use crate::config::RetryConfig;

pub const DEFAULT_MAX_BUF_SIZE: usize = 8 * 1024 * 1024;

/// Everything an [`SseStream`](super::SseStream) needs before `connect()`
#[derive(Debug, Clone)]
pub struct SseConfig {
    pub url: Url,
    pub retry: RetryConfig,
    pub headers: Vec<(String, String)>,
    /// Sent as `Last-Event-ID` on the first connect
    pub last_event_id: Option<String>,
    pub max_buf_size: usize,
}

impl SseConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            retry: RetryConfig::default(),
            headers: Vec::new(),
            last_event_id: None,
            max_buf_size: DEFAULT_MAX_BUF_SIZE,
        }
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn last_event_id(mut self, last_event_id: impl Into<String>) -> Self {
        self.last_event_id = Some(last_event_id.into()).filter(|id| !id.is_empty());
        self
    }

    pub fn max_buf_size(mut self, max_buf_size: usize) -> Self {
        self.max_buf_size = max_buf_size;
        self
    }
}
