//! WebSocket client with the same reconnect lifecycle as SSE

mod config;
mod connector;
mod handler;

use std::sync::Arc;

use bytes::Bytes;
use tokio_tungstenite::tungstenite::{
    protocol::{frame::coding::CloseCode, CloseFrame as WireCloseFrame},
    Message,
};

pub use config::WsConfig;
use connector::WsConnector;
pub use handler::WsHandler;

use crate::{
    client::StreamClient, error::StreamError, lifecycle::ConnectionLifecycle, registry::StreamId,
};

pub const NORMAL_CLOSURE: u16 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl Default for CloseFrame {
    fn default() -> Self {
        Self {
            code: NORMAL_CLOSURE,
            reason: "Client disconnected".to_owned(),
        }
    }
}

impl From<WireCloseFrame> for CloseFrame {
    fn from(frame: WireCloseFrame) -> Self {
        Self {
            code: frame.code.into(),
            reason: frame.reason.as_str().to_owned(),
        }
    }
}

impl From<CloseFrame> for WireCloseFrame {
    fn from(frame: CloseFrame) -> Self {
        Self {
            code: CloseCode::from(frame.code),
            reason: frame.reason.into(),
        }
    }
}

pub struct WsStream {
    lifecycle: ConnectionLifecycle<WsConnector>,
    close_frame: CloseFrame,
}

impl WsStream {
    pub fn new<H: WsHandler>(client: &StreamClient, config: WsConfig, handler: H) -> Self {
        let handler = Arc::new(handler);
        let url = config.url.to_string();
        let retry = config.retry.clone();
        let close_frame = config.close_frame.clone();
        let connector = WsConnector::new(config, handler.clone());
        Self {
            lifecycle: ConnectionLifecycle::new(client, url, connector, retry, handler),
            close_frame,
        }
    }

    pub fn connect(&self) {
        self.lifecycle.connect();
    }

    /// Sends the configured close frame and stops reconnecting
    pub fn close(&self) {
        self.close_with(self.close_frame.code, self.close_frame.reason.clone());
    }

    pub fn close_with(&self, code: u16, reason: impl Into<String>) {
        let frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        self.lifecycle.with_channel(|channel| channel.send_close(frame));
        self.lifecycle.close();
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), StreamError> {
        self.send(Message::text(text.into()))
    }

    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<(), StreamError> {
        self.send(Message::binary(data))
    }

    pub fn send_ping(&self, data: impl Into<Bytes>) -> Result<(), StreamError> {
        self.send(Message::Ping(data.into()))
    }

    pub fn send_pong(&self, data: impl Into<Bytes>) -> Result<(), StreamError> {
        self.send(Message::Pong(data.into()))
    }

    fn send(&self, message: Message) -> Result<(), StreamError> {
        self.lifecycle
            .with_channel(|channel| channel.send(message))
            .unwrap_or(Err(StreamError::ChannelClosed))
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
