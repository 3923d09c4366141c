//! Tokio codec for the `text/event-stream` format.
//!
//! [`SseDecoder`] turns a byte stream into [`Frame`]s and [`SseEncoder`]
//! does the reverse. Both plug into [`tokio_util::codec::FramedRead`] and
//! [`tokio_util::codec::FramedWrite`].
#![deny(missing_docs)]

mod bufext;
mod decoder;
mod encoder;
mod errors;

pub use decoder::SseDecoder;
pub use encoder::{SseEncodeError, SseEncoder};
pub use errors::{ExceededSizeLimitError, SseDecodeError};

/// A single unit parsed from an event stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// A line starting with `:`
    Comment(String),
    /// A dispatched event
    Event(Event),
    /// The server asked clients to wait this long before reconnecting
    Retry(std::time::Duration),
}

/// A dispatched server-sent event
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    /// Value of the last event id buffer when the event was dispatched
    pub id: Option<String>,
    /// Event type, `message` when the stream did not set one
    pub name: String,
    /// Data lines joined with `\n`
    pub data: String,
}

impl Event {
    /// Creates a `message` event with no id
    pub fn message(data: impl Into<String>) -> Self {
        Self {
            id: None,
            name: String::from("message"),
            data: data.into(),
        }
    }

    /// Sets the event id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the event type
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}
