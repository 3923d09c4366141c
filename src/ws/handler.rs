use bytes::Bytes;

use super::CloseFrame;
use crate::lifecycle::LifecycleListener;

/// Receives inbound WebSocket frames, dispatched by type
#[allow(unused_variables)]
pub trait WsHandler: LifecycleListener {
    fn on_open(&self) {}

    fn on_text(&self, text: &str) {}

    fn on_binary(&self, data: &Bytes) {}

    /// Pings are answered automatically
    fn on_ping(&self, data: &Bytes) {}

    fn on_pong(&self, data: &Bytes) {}

    /// The server closed the channel. Not called for closes we started.
    fn on_close(&self, frame: Option<&CloseFrame>) {}
}
