use reqwest::Url;

use super::CloseFrame;
use crate::config::RetryConfig;

#[derive(Debug, Clone)]
pub struct WsConfig {
    pub url: Url,
    pub retry: RetryConfig,
    pub headers: Vec<(String, String)>,
    /// Sent by [`WsStream::close`](super::WsStream::close)
    pub close_frame: CloseFrame,
}

impl WsConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            retry: RetryConfig::default(),
            headers: Vec::new(),
            close_frame: CloseFrame::default(),
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

    pub fn close_frame(mut self, code: u16, reason: impl Into<String>) -> Self {
        self.close_frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        self
    }
}
