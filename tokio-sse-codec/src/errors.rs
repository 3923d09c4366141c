use miette::Diagnostic;
use thiserror::Error;

/// Returned by [`SseDecoder::decode`] and [`SseDecoder::decode_eof`] for unrecoverable errors
///
/// All of these errors are fatal for the stream being decoded. Use
/// [`SseDecoder::reset`] before feeding the decoder a new stream.
///
/// [`SseDecoder::decode`]: crate::SseDecoder
/// [`SseDecoder::decode_eof`]: crate::SseDecoder
/// [`SseDecoder::reset`]: crate::SseDecoder::reset
#[derive(Error, Diagnostic, Debug)]
pub enum SseDecodeError {
    /// [`std::io::Error`], generally coming from the underlying stream
    #[error("i/o error while reading stream")]
    #[diagnostic(code(tokio_sse_codec::decoder::io_error))]
    Io(#[from] std::io::Error),
    /// The stream ended with a partial event in the buffers
    #[error("unexpected end of stream")]
    #[diagnostic(
        help("The input ended before completing the last event. Ensure that the source is sending an empty line after each event"),
        code(tokio_sse_codec::decoder::unexpected_eof)
    )]
    UnexpectedEof,
    /// Invalid UTF-8 data was found in the stream
    #[error("invalid utf-8 in {context}")]
    #[diagnostic(code(tokio_sse_codec::decoder::utf8_error))]
    Utf8 {
        /// What was being decoded
        context: &'static str,
        /// The underlying error
        #[source]
        source: std::str::Utf8Error,
    },
    /// The maximum buffer size was exceeded before we could dispatch the event being read.
    #[error(transparent)]
    #[diagnostic(transparent)]
    ExceededSizeLimit(#[from] ExceededSizeLimitError),
}

/// Error indicating that the incoming data exceeded the set buffer size limit.
#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
#[error("exceeded limit of {limit} bytes for buffer size")]
#[diagnostic(
    help("Ensure that the source is sending an empty line after each event and you are connected to a valid SSE stream."),
    code(tokio_sse_codec::decoder::exceeded_size_limit)
)]
pub struct ExceededSizeLimitError {
    limit: usize,
    buffered_len: usize,
}

impl ExceededSizeLimitError {
    pub(crate) fn new(limit: usize, buffered_len: usize) -> Self {
        Self {
            limit,
            buffered_len,
        }
    }
    /// The limit that was set when creating the codec
    pub fn limit(&self) -> usize {
        self.limit
    }
    /// How many bytes the codec was holding when the limit tripped
    pub fn buffered_len(&self) -> usize {
        self.buffered_len
    }
}
