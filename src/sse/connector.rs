use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::{future::BoxFuture, FutureExt, StreamExt};
use parking_lot::Mutex;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, CACHE_CONTROL, CONNECTION,
};
use tokio_sse_codec::{Frame, SseDecoder};
use tokio_util::{codec::FramedRead, io::StreamReader, sync::CancellationToken};
use tracing::{debug, debug_span, trace, warn, Instrument};

use super::{SseConfig, SseHandler};
use crate::{
    client::StreamClient,
    error::{BoxError, StreamError},
    lifecycle::{guarded, Connector, Epoch},
};

pub(crate) struct SseConnector {
    config: SseConfig,
    http: reqwest::Client,
    read_timeout: Duration,
    last_event_id: Arc<Mutex<Option<String>>>,
    handler: Arc<dyn SseHandler>,
}

pub(crate) struct SseChannel {
    cancel: CancellationToken,
    open: Arc<AtomicBool>,
}

impl SseConnector {
    pub(crate) fn new(
        client: &StreamClient,
        config: SseConfig,
        last_event_id: Arc<Mutex<Option<String>>>,
        handler: Arc<dyn SseHandler>,
    ) -> Self {
        Self {
            config,
            http: client.http().clone(),
            read_timeout: client.options().read_timeout,
            last_event_id,
            handler,
        }
    }

    fn request(&self) -> Result<reqwest::Request, StreamError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        for (name, value) in &self.config.headers {
            let invalid = |source: BoxError| StreamError::InvalidHeader {
                name: name.clone(),
                source,
            };
            let header = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.into()))?;
            let value = HeaderValue::from_str(value).map_err(|e| invalid(e.into()))?;
            headers.insert(header, value);
        }
        if let Some(id) = self.last_event_id.lock().as_deref() {
            match HeaderValue::from_bytes(id.as_bytes()) {
                Ok(value) => {
                    debug!(last_event_id = id, "setting last-event-id header");
                    headers.insert("last-event-id", value);
                }
                Err(_) => warn!(last_event_id = id, "last event id is not a valid header value, skipping"),
            }
        }
        Ok(self.http.get(self.config.url.clone()).headers(headers).build()?)
    }

    fn reader(&self) -> Reader {
        Reader {
            handler: self.handler.clone(),
            last_event_id: self.last_event_id.clone(),
            read_timeout: self.read_timeout,
            max_buf_size: self.config.max_buf_size,
        }
    }
}

impl Connector for SseConnector {
    type Channel = SseChannel;

    fn try_connect(&self, epoch: Epoch) -> BoxFuture<'static, Result<SseChannel, StreamError>> {
        let request = self.request();
        let http = self.http.clone();
        let reader = self.reader();
        let url = self.config.url.to_string();
        async move {
            let request = request?;
            let cancel = epoch.cancel_token();
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StreamError::ChannelClosed),
                response = http.execute(request) => response.map_err(|e| connect_error(&url, e))?,
            };
            let status = response.status();
            if !status.is_success() {
                return Err(StreamError::Status {
                    status: status.as_u16(),
                });
            }
            debug!(%status, "connected to event source");
            let open = Arc::new(AtomicBool::new(true));
            let span = debug_span!("sse_reader", stream_id = %epoch.stream_id(), epoch = epoch.id());
            tokio::spawn(reader.run(response, epoch, open.clone()).instrument(span));
            Ok(SseChannel { cancel, open })
        }
        .boxed()
    }

    fn close_channel(&self, channel: &SseChannel) {
        channel.cancel.cancel();
    }

    fn is_open(&self, channel: &SseChannel) -> bool {
        channel.open.load(Ordering::Acquire) && !channel.cancel.is_cancelled()
    }
}

fn connect_error(url: &str, e: reqwest::Error) -> StreamError {
    if e.is_builder() {
        StreamError::Request(e)
    } else {
        StreamError::connect(url, e)
    }
}

enum Closed {
    Local,
    Remote(Option<StreamError>),
}

struct Reader {
    handler: Arc<dyn SseHandler>,
    last_event_id: Arc<Mutex<Option<String>>>,
    read_timeout: Duration,
    max_buf_size: usize,
}

impl Reader {
    async fn run(self, response: reqwest::Response, mut epoch: Epoch, open: Arc<AtomicBool>) {
        if !epoch.established().await {
            open.store(false, Ordering::Release);
            debug!("channel discarded before it went live");
            return;
        }
        guarded("on_open", || self.handler.on_open());

        let read_timeout = self.read_timeout;
        let body = tokio_stream::StreamExt::timeout(response.bytes_stream(), read_timeout).map(
            move |chunk| match chunk {
                Ok(Ok(bytes)) => Ok(bytes),
                Ok(Err(e)) => Err(io::Error::new(io::ErrorKind::Other, e)),
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    StreamError::ReadTimeout(read_timeout),
                )),
            },
        );
        let seed = self.last_event_id.lock().clone();
        let decoder = SseDecoder::with_max_size(self.max_buf_size).with_last_event_id(seed);
        let mut frames = FramedRead::new(StreamReader::new(Box::pin(body)), decoder);

        let cancel = epoch.cancel_token();
        let closed = loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Closed::Local,
                frame = frames.next() => frame,
            };
            match frame {
                Some(Ok(Frame::Event(event))) => {
                    if let Some(id) = event.id.as_deref().filter(|id| !id.is_empty()) {
                        *self.last_event_id.lock() = Some(id.to_owned());
                    }
                    trace!(event = %event.name, id = ?event.id, "received event");
                    guarded("on_event", || self.handler.on_event(&event));
                }
                Some(Ok(Frame::Comment(comment))) => {
                    guarded("on_comment", || self.handler.on_comment(&comment));
                }
                Some(Ok(Frame::Retry(delay))) => epoch.retry_hint(delay),
                Some(Err(e)) => break Closed::Remote(Some(StreamError::from_decode(e))),
                None => break Closed::Remote(None),
            }
        };
        open.store(false, Ordering::Release);

        let last_event_id = self.last_event_id.lock().clone();
        guarded("on_close", || self.handler.on_close(last_event_id.as_deref()));
        match closed {
            Closed::Local => debug!("channel closed locally"),
            Closed::Remote(reason) => epoch.notify_remote_close(reason),
        }
    }
}
