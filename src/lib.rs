//! Resilient Server-Sent Events and WebSocket streams.
//!
//! Streams are created from a [`StreamClient`], which owns the worker pool
//! every connect attempt, reader and handler callback runs on. Each stream
//! reconnects according to its [`RetryConfig`] until it is closed or the
//! retries run out.
//!
//! ```no_run
//! use stream_client::{Event, LifecycleListener, SseConfig, SseHandler, StreamClient};
//!
//! struct Print;
//! impl LifecycleListener for Print {}
//! impl SseHandler for Print {
//!     fn on_event(&self, event: &Event) {
//!         println!("{}: {}", event.name, event.data);
//!     }
//! }
//!
//! # fn main() -> Result<(), stream_client::StreamError> {
//! let client = StreamClient::global()?;
//! let url = "https://example.com/events".parse().expect("valid url");
//! let stream = client.sse(SseConfig::new(url), Print);
//! stream.connect();
//! // ...
//! let resume_from = stream.close();
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod sse;
pub mod ws;

pub use client::StreamClient;
pub use config::{ClientOptions, MaxRetries, RetryConfig};
pub use error::{ErrorKind, StreamError};
pub use lifecycle::{ConnectionLifecycle, Connector, Epoch, LifecycleListener};
pub use registry::{ConnectionRegistry, StreamId};
pub use retry::{Decision, RetryPolicy, Retryable, Trigger};
pub use scheduler::{DelayedTask, Scheduler};
pub use sse::{Event, SseConfig, SseHandler, SseStream};
pub use tokio_sse_codec as codec;
pub use ws::{CloseFrame, WsConfig, WsHandler, WsStream};
