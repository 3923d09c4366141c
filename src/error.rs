use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error, Diagnostic)]
pub enum StreamError {
    #[error("failed to connect to {url}")]
    #[diagnostic(help("the stream keeps retrying according to its retry policy"))]
    Connect {
        url: String,
        #[source]
        source: BoxError,
    },
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("server returned [{status}] after connecting")]
    #[diagnostic(help("non-2xx responses are not retried, fix the endpoint and call connect() again"))]
    Status { status: u16 },
    #[error("error while decoding sse event")]
    #[diagnostic(help("set RUST_LOG=\"tokio_sse_codec=trace\""))]
    Decode(#[from] tokio_sse_codec::SseDecodeError),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("read timed out after {0:?}")]
    ReadTimeout(Duration),
    #[error("invalid header {name:?}")]
    InvalidHeader {
        name: String,
        #[source]
        source: BoxError,
    },
    #[error("max retries ({max_retries}) exceeded after {attempts} attempts")]
    #[diagnostic(help("you can tune max retries through RetryConfig::max_retries"))]
    RetriesExceeded { max_retries: u32, attempts: u32 },
    #[error("could not schedule reconnect: {reason}")]
    Scheduling { reason: &'static str },
    #[error("channel is not open")]
    ChannelClosed,
    #[error("failed to start worker pool")]
    Runtime(#[source] std::io::Error),
    #[error("io error")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of [`StreamError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The transport could not establish a channel
    Connect,
    /// The peer answered, but not with something we can stream from
    Protocol,
    /// Terminal: the retry policy gave up
    RetriesExceeded,
    /// The timer is gone, the stream was left idle
    Scheduling,
    /// Local channel or worker pool state
    Channel,
}

impl StreamError {
    pub fn kind(&self) -> ErrorKind {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match self {
            StreamError::Connect { .. } | StreamError::Request(_) | StreamError::Io(_) => {
                ErrorKind::Connect
            }
            StreamError::WebSocket(
                WsError::Io(_) | WsError::ConnectionClosed | WsError::AlreadyClosed,
            ) => ErrorKind::Connect,
            StreamError::WebSocket(_)
            | StreamError::Status { .. }
            | StreamError::Decode(_)
            | StreamError::ReadTimeout(_)
            | StreamError::InvalidHeader { .. } => ErrorKind::Protocol,
            StreamError::RetriesExceeded { .. } => ErrorKind::RetriesExceeded,
            StreamError::Scheduling { .. } => ErrorKind::Scheduling,
            StreamError::ChannelClosed | StreamError::Runtime(_) => ErrorKind::Channel,
        }
    }

    pub fn connect(url: impl Into<String>, source: impl Into<BoxError>) -> Self {
        StreamError::Connect {
            url: url.into(),
            source: source.into(),
        }
    }

    /// Recovers an error we had to smuggle through `std::io::Error`
    /// (byte streams handed to a codec must fail with io errors)
    pub(crate) fn from_io(err: std::io::Error) -> Self {
        let wrapped = err
            .get_ref()
            .is_some_and(|inner| inner.is::<StreamError>() || inner.is::<reqwest::Error>());
        if !wrapped {
            return StreamError::Io(err);
        }
        let kind = err.kind();
        match err.into_inner() {
            Some(inner) => match inner.downcast::<StreamError>() {
                Ok(inner) => *inner,
                Err(inner) => match inner.downcast::<reqwest::Error>() {
                    Ok(inner) => StreamError::Request(*inner),
                    Err(inner) => StreamError::Io(std::io::Error::new(kind, inner)),
                },
            },
            None => StreamError::Io(kind.into()),
        }
    }

    /// Decoder io errors carry whatever broke the body stream, unwrap them
    pub(crate) fn from_decode(err: tokio_sse_codec::SseDecodeError) -> Self {
        match err {
            tokio_sse_codec::SseDecodeError::Io(io) => StreamError::from_io(io),
            other => StreamError::Decode(other),
        }
    }
}
