//! Server-sent events over HTTP, resuming with `Last-Event-ID` after reconnects

mod config;
mod connector;
mod handler;

use std::sync::Arc;

use parking_lot::Mutex;

pub use config::{SseConfig, DEFAULT_MAX_BUF_SIZE};
use connector::SseConnector;
pub use handler::SseHandler;
pub use tokio_sse_codec::Event;

use crate::{client::StreamClient, lifecycle::ConnectionLifecycle, registry::StreamId};

pub struct SseStream {
    lifecycle: ConnectionLifecycle<SseConnector>,
    last_event_id: Arc<Mutex<Option<String>>>,
}

impl SseStream {
    pub fn new<H: SseHandler>(client: &StreamClient, config: SseConfig, handler: H) -> Self {
        let handler = Arc::new(handler);
        let last_event_id = Arc::new(Mutex::new(config.last_event_id.clone()));
        let url = config.url.to_string();
        let retry = config.retry.clone();
        let connector = SseConnector::new(client, config, last_event_id.clone(), handler.clone());
        Self {
            lifecycle: ConnectionLifecycle::new(client, url, connector, retry, handler),
            last_event_id,
        }
    }

    pub fn connect(&self) {
        self.lifecycle.connect();
    }

    /// Closes the stream and returns the id of the last event seen, so a
    /// later stream can resume from it
    pub fn close(&self) -> Option<String> {
        self.lifecycle.close();
        self.last_event_id()
    }

    pub fn last_event_id(&self) -> Option<String> {
        self.last_event_id.lock().clone()
    }

    pub fn is_open(&self) -> bool {
        self.lifecycle.is_open()
    }

    pub fn id(&self) -> &StreamId {
        self.lifecycle.id()
    }

    pub fn url(&self) -> &str {
        self.lifecycle.url()
    }

    pub fn attempts(&self) -> u32 {
        self.lifecycle.attempts()
    }
}
