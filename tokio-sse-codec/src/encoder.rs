use bytes::{BufMut, BytesMut};
use miette::Diagnostic;
use thiserror::Error;
use tokio_util::codec::Encoder;

use crate::{Event, Frame};

/// Encodes SSE [`Frame`]s into bytes
///
/// # Examples
/// ```
/// use tokio_sse_codec::{SseEncoder, Frame, Event};
/// use tokio_util::codec::Encoder;
/// use bytes::BytesMut;
///
/// let mut encoder = SseEncoder::new();
/// let mut buf = BytesMut::new();
/// let frame = Frame::Event(Event::message("hello, world").with_id("1").with_name("example"));
/// encoder.encode(frame, &mut buf).unwrap();
///
/// let result = String::from_utf8(buf.to_vec()).unwrap();
///
/// assert_eq!(result, "id: 1\nevent: example\ndata: hello, world\n\n");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEncoder {
    last_id: String,
}

/// Returned by [`SseEncoder::encode`] when a frame cannot be represented on the wire
#[derive(Error, Diagnostic, Debug)]
pub enum SseEncodeError {
    /// [`std::io::Error`] from the underlying sink
    #[error("i/o error while writing stream")]
    Io(#[from] std::io::Error),
    /// Event names and ids are single-line fields
    #[error("{field} must not contain line breaks")]
    #[diagnostic(code(tokio_sse_codec::encoder::invalid_field))]
    InvalidField {
        /// The offending field name
        field: &'static str,
    },
}

impl SseEncoder {
    /// Creates a new [`SseEncoder`]
    pub fn new() -> Self {
        Self::default()
    }

    fn put_field(dst: &mut BytesMut, name: &str, value: &str) {
        dst.reserve(name.len() + value.len() + 3);
        dst.put(name.as_bytes());
        dst.put(&b": "[..]);
        dst.put(value.as_bytes());
        dst.put_u8(b'\n');
    }
}

fn single_line(field: &'static str, value: &str) -> Result<(), SseEncodeError> {
    if value.contains(['\n', '\r']) {
        Err(SseEncodeError::InvalidField { field })
    } else {
        Ok(())
    }
}

impl Encoder<Frame> for SseEncoder {
    type Error = SseEncodeError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match frame {
            Frame::Comment(comment) => {
                for line in comment.lines() {
                    Self::put_field(dst, "", line);
                }
            }
            Frame::Retry(retry) => {
                Self::put_field(dst, "retry", &retry.as_millis().to_string());
            }
            Frame::Event(Event { id, name, data }) => {
                // only send the id when it changes, the client keeps the last one
                if let Some(id) = id.filter(|id| *id != self.last_id) {
                    single_line("id", &id)?;
                    Self::put_field(dst, "id", &id);
                    self.last_id = id;
                }
                if name != "message" {
                    single_line("event", &name)?;
                    Self::put_field(dst, "event", &name);
                }
                for line in data.split('\n') {
                    Self::put_field(dst, "data", line.strip_suffix('\r').unwrap_or(line));
                }
                dst.put_u8(b'\n');
            }
        }
        Ok(())
    }
}
