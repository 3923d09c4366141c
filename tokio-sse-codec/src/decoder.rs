use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::{trace, warn};

use crate::{
    bufext::BufExt,
    errors::{ExceededSizeLimitError, SseDecodeError},
    Event, Frame,
};

/*
stream        = [ bom ] *event
event         = *( comment / field ) end-of-line
comment       = colon *any-char end-of-line
field         = 1*name-char [ colon [ space ] *any-char ] end-of-line
end-of-line   = ( cr lf / cr / lf )
*/

static MESSAGE_EVENT: &str = "message";

/// Decodes a `text/event-stream` body into [`Frame`]s
///
/// The last event id buffer survives event dispatch, so every event after
/// an `id:` field carries that id until the server sends another one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseDecoder {
    data_buf: String,
    event_type: String,
    last_event_id: String,
    // where to resume scanning for a line terminator
    next_index: usize,
    // a line ended with `\r` at the end of the buffer; swallow a leading `\n`
    pending_cr: bool,
    bom_checked: bool,
    max_buf_size: usize,
    is_closed: bool,
}

impl SseDecoder {
    /// Returns a decoder with no maximum buffer size limit.
    ///
    /// # Note
    ///
    /// Setting a buffer size limit is highly recommended for any decoder
    /// exposed to untrusted input. Otherwise a source that never sends a
    /// line terminator or blank line can grow the buffers without bound.
    pub fn new() -> Self {
        Self::with_max_size(usize::MAX)
    }

    /// Returns a decoder that fails with [`SseDecodeError::ExceededSizeLimit`]
    /// once the pending line plus the event buffers grow past `max_buf_size`.
    /// After that error the decoder is closed and drops all further input
    /// until [`SseDecoder::reset`] is called.
    pub fn with_max_size(max_buf_size: usize) -> Self {
        Self {
            data_buf: String::new(),
            event_type: String::new(),
            last_event_id: String::new(),
            next_index: 0,
            pending_cr: false,
            bom_checked: false,
            max_buf_size,
            is_closed: false,
        }
    }

    /// Seeds the last event id buffer, used when resuming a stream
    pub fn with_last_event_id(mut self, last_event_id: Option<String>) -> Self {
        self.last_event_id = last_event_id.unwrap_or_default();
        self
    }

    /// Returns the current value of the event id buffer
    /// It is not cleared after an event is dispatched
    pub fn last_event_id(&self) -> Option<&str> {
        if self.last_event_id.is_empty() {
            None
        } else {
            Some(&self.last_event_id)
        }
    }

    /// Returns the current value of the event type buffer
    /// Defaults to `message` if not set
    pub fn current_event_type(&self) -> &str {
        if self.event_type.is_empty() {
            MESSAGE_EVENT
        } else {
            &self.event_type
        }
    }

    /// Returns the maximum buffer size when decoding.
    pub fn max_buf_size(&self) -> usize {
        self.max_buf_size
    }

    /// Returns true if the decoder has been closed after exceeding its buffer limit
    pub fn is_closed(&self) -> bool {
        self.is_closed
    }

    /// Clears all buffers, including the last event id, and re-opens the decoder
    pub fn reset(&mut self) {
        self.data_buf.clear();
        self.event_type.clear();
        self.last_event_id.clear();
        self.next_index = 0;
        self.pending_cr = false;
        self.bom_checked = false;
        self.is_closed = false;
    }

    fn buffered_len(&self) -> usize {
        self.data_buf.len() + self.event_type.len() + self.last_event_id.len()
    }

    fn check_size(&mut self, incoming: usize) -> Result<(), SseDecodeError> {
        let buffered = self.buffered_len().saturating_add(incoming);
        if buffered > self.max_buf_size {
            let limit = self.max_buf_size;
            self.reset();
            self.is_closed = true;
            return Err(ExceededSizeLimitError::new(limit, buffered).into());
        }
        Ok(())
    }

    // Processes one line without its terminator.
    fn process_line(&mut self, mut line: BytesMut) -> Result<Option<Frame>, SseDecodeError> {
        //
        // Event dispatch
        //
        if line.is_empty() {
            if self.data_buf.is_empty() {
                self.event_type.clear();
                return Ok(None);
            }
            // remove the trailing new line from the last data field
            if self.data_buf.ends_with('\n') {
                self.data_buf.pop();
            }
            let id = self.last_event_id();
            let id = id.map(str::to_owned);
            let name = if self.event_type.is_empty() {
                String::from(MESSAGE_EVENT)
            } else {
                std::mem::take(&mut self.event_type)
            };
            let data = std::mem::take(&mut self.data_buf);
            return Ok(Some(Frame::Event(Event { id, name, data })));
        }
        //
        // Comment dispatch
        //
        if line[0] == b':' {
            line.advance(1);
            line.bump_if(b' ');
            return Ok(Some(Frame::Comment(utf8(&line, "comment")?.to_owned())));
        }
        //
        // Field dispatch
        //
        // no colon means the whole line is the field name with an empty value
        let colon = line.iter().position(|b| *b == b':').unwrap_or(line.len());
        let field = line.split_to(colon);
        line.bump_if(b':');
        line.bump_if(b' ');
        let value = utf8(&line, "field value")?;

        match field.as_ref() {
            b"event" => {
                self.event_type.clear();
                self.event_type.push_str(value);
            }
            b"data" => {
                self.check_size(value.len() + 1)?;
                self.data_buf.push_str(value);
                self.data_buf.push('\n');
            }
            b"id" => {
                if value.contains('\0') {
                    warn!(
                        field = "id",
                        value,
                        "ignore invalid value (reason: `id` must not contain null bytes)"
                    );
                } else {
                    self.last_event_id.clear();
                    self.last_event_id.push_str(value);
                }
            }
            b"retry" => {
                let retry = value
                    .bytes()
                    .all(|b| b.is_ascii_digit())
                    .then(|| value.parse::<u64>().ok())
                    .flatten()
                    .map(Duration::from_millis);
                match retry {
                    Some(retry) => return Ok(Some(Frame::Retry(retry))),
                    None => warn!(
                        field = "retry",
                        value, "ignoring invalid value (reason: not a base ten integer)"
                    ),
                }
            }
            _ => {
                let field = String::from_utf8_lossy(field.as_ref());
                trace!(field = field.as_ref(), "ignoring unknown field");
            }
        }
        Ok(None)
    }
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for SseDecoder {
    type Item = Frame;
    type Error = SseDecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.is_closed {
            // just consume everything while we're closed
            src.clear();
            return Ok(None);
        }
        loop {
            if !self.bom_checked {
                if src.is_partial_bom() {
                    // we need more data
                    return Ok(None);
                }
                src.strip_utf8_bom();
                self.bom_checked = true;
            }
            if self.pending_cr {
                if src.is_empty() {
                    return Ok(None);
                }
                src.bump_if(b'\n');
                self.pending_cr = false;
            }

            let Some(line_end) = src.find_line_end(self.next_index) else {
                self.next_index = src.len();
                self.check_size(src.len())?;
                return Ok(None);
            };
            self.next_index = 0;
            let line = src.split_to(line_end);
            if src[0] == b'\r' {
                src.advance(1);
                if src.is_empty() {
                    self.pending_cr = true;
                } else {
                    src.bump_if(b'\n');
                }
            } else {
                src.advance(1);
            }

            if let Some(frame) = self.process_line(line)? {
                return Ok(Some(frame));
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() && self.data_buf.is_empty() => Ok(None),
            None => {
                buf.clear();
                self.data_buf.clear();
                Err(SseDecodeError::UnexpectedEof)
            }
        }
    }
}

fn utf8<'a>(buf: &'a BytesMut, context: &'static str) -> Result<&'a str, SseDecodeError> {
    std::str::from_utf8(buf.as_ref()).map_err(|source| SseDecodeError::Utf8 { context, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio_util::codec::FramedRead;

    async fn frames(bytes: &[u8], decoder: SseDecoder) -> Vec<Frame> {
        FramedRead::new(bytes, decoder)
            .map(|frame| frame.unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_event() {
        let bytes = b"event: foo\ndata: bar\n\n";
        let mut framed = FramedRead::new(&bytes[..], SseDecoder::default());
        let event = framed.next().await.unwrap().unwrap();
        // should reset after event dispatch
        assert_eq!(framed.decoder().current_event_type(), "message");
        assert_eq!(event, Frame::Event(Event::message("bar").with_name("foo")));
    }

    #[tokio::test]
    async fn multi_line_data() {
        let events = frames(b"data: a\ndata: b\ndata:c\n\n", SseDecoder::default()).await;
        assert_eq!(events, vec![Frame::Event(Event::message("a\nb\nc"))]);
    }

    #[tokio::test]
    async fn id_persists_across_events() {
        let bytes = b"id: 1\ndata: one\n\ndata: two\n\nid: 2\ndata: three\n\n";
        let events = frames(bytes, SseDecoder::default()).await;
        assert_eq!(
            events,
            vec![
                Frame::Event(Event::message("one").with_id("1")),
                Frame::Event(Event::message("two").with_id("1")),
                Frame::Event(Event::message("three").with_id("2")),
            ]
        );
    }

    #[tokio::test]
    async fn seeded_last_event_id() {
        let decoder = SseDecoder::new().with_last_event_id(Some("41".into()));
        assert_eq!(decoder.last_event_id(), Some("41"));
        let events = frames(b"data: x\n\n", decoder).await;
        assert_eq!(events, vec![Frame::Event(Event::message("x").with_id("41"))]);
    }

    #[tokio::test]
    async fn id_with_null_is_ignored() {
        let events = frames(b"id: 1\nid: a\0b\ndata: x\n\n", SseDecoder::default()).await;
        assert_eq!(events, vec![Frame::Event(Event::message("x").with_id("1"))]);
    }

    #[tokio::test]
    async fn mixed_line_endings() {
        let bytes = b"event: a\r\ndata: 1\rdata: 2\n\r\n";
        let events = frames(bytes, SseDecoder::default()).await;
        assert_eq!(events, vec![Frame::Event(Event::message("1\n2").with_name("a"))]);
    }

    #[tokio::test]
    async fn cr_split_across_reads() {
        let mut decoder = SseDecoder::default();
        let mut buf = BytesMut::from(&b"data: x\r"[..]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"\n\r\n");
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(Frame::Event(Event::message("x")))
        );
    }

    #[tokio::test]
    async fn comment_and_retry() {
        let events = frames(b": keep-alive\nretry: 100\n", SseDecoder::default()).await;
        assert_eq!(
            events,
            vec![
                Frame::Comment("keep-alive".into()),
                Frame::Retry(Duration::from_millis(100)),
            ]
        );
    }

    #[tokio::test]
    async fn invalid_retry_is_ignored() {
        let events = frames(b"retry: foo\nretry: -1\n", SseDecoder::default()).await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn empty_data_is_not_dispatched() {
        let events = frames(b"event: foo\n\ndata: bar\n\n", SseDecoder::default()).await;
        // the event type is reset by the empty dispatch
        assert_eq!(events, vec![Frame::Event(Event::message("bar"))]);
    }

    #[tokio::test]
    async fn strips_bom() {
        let events = frames(b"\xEF\xBB\xBFdata: x\n\n", SseDecoder::default()).await;
        assert_eq!(events, vec![Frame::Event(Event::message("x"))]);
    }

    #[tokio::test]
    async fn field_without_colon() {
        // `data` with no colon appends an empty line
        let events = frames(b"data\ndata\n\n", SseDecoder::default()).await;
        assert_eq!(events, vec![Frame::Event(Event::message("\n"))]);
    }

    #[tokio::test]
    async fn require_new_line() {
        let bytes = b"event: foo\ndata: bar";
        let mut framed = FramedRead::new(&bytes[..], SseDecoder::default());
        match framed.next().await.unwrap() {
            Err(SseDecodeError::UnexpectedEof) => (),
            other => panic!("expected unexpected eof, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn invalid_utf8() {
        let bytes = b"data: \xff\n\n";
        let mut framed = FramedRead::new(&bytes[..], SseDecoder::default());
        assert!(matches!(
            framed.next().await.unwrap(),
            Err(SseDecodeError::Utf8 { .. })
        ));
    }

    #[test]
    fn exceeded_size_limit_closes_decoder() {
        let mut decoder = SseDecoder::with_max_size(16);
        let mut buf = BytesMut::from(&b"data: 0123456789abcdef0123\n"[..]);
        let err = decoder.decode(&mut buf).unwrap_err();
        assert!(matches!(err, SseDecodeError::ExceededSizeLimit(ref e) if e.limit() == 16));
        assert!(decoder.is_closed());

        let mut buf = BytesMut::from(&b"data: x\n\n"[..]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());

        decoder.reset();
        let mut buf = BytesMut::from(&b"data: x\n\n"[..]);
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(Frame::Event(Event::message("x")))
        );
    }
}
