use tokio_tungstenite::tungstenite;

use crate::error::StreamError;

/// Whether a failed connection attempt is worth another try
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for StreamError {
    fn is_retryable(&self) -> bool {
        match self {
            StreamError::Connect { .. } | StreamError::ReadTimeout(_) | StreamError::Decode(_) => {
                true
            }
            StreamError::Request(e) => e.is_retryable(),
            StreamError::WebSocket(e) => e.is_retryable(),
            StreamError::Io(e) => e.is_retryable(),
            // the server answered and said no, trying again won't change its mind
            StreamError::Status { .. } | StreamError::InvalidHeader { .. } => false,
            StreamError::RetriesExceeded { .. }
            | StreamError::Scheduling { .. }
            | StreamError::ChannelClosed
            | StreamError::Runtime(_) => false,
        }
    }
}

impl Retryable for reqwest::Error {
    fn is_retryable(&self) -> bool {
        // statuses never reach here, non-2xx responses become `StreamError::Status`
        self.is_connect()
            || self.is_timeout()
            || self.is_decode()
            || (!self.is_request() && self.is_body())
    }
}

impl Retryable for std::io::Error {
    fn is_retryable(&self) -> bool {
        use std::io::ErrorKind;
        matches!(
            self.kind(),
            ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::NotConnected
                | ErrorKind::BrokenPipe
                | ErrorKind::TimedOut
                | ErrorKind::UnexpectedEof
                | ErrorKind::Interrupted
        )
    }
}

impl Retryable for tungstenite::Error {
    fn is_retryable(&self) -> bool {
        match self {
            tungstenite::Error::Io(e) => e.is_retryable(),
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => true,
            tungstenite::Error::Protocol(_) => true,
            _ => false,
        }
    }
}
