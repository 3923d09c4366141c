use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use futures::{future::BoxFuture, FutureExt, Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self,
        client::IntoClientRequest,
        handshake::client::Request,
        http::{HeaderName, HeaderValue},
        Message,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, trace, Instrument};

use super::{CloseFrame, WsConfig, WsHandler};
use crate::{
    error::{BoxError, StreamError},
    lifecycle::{guarded, Connector, Epoch},
};

pub(crate) struct WsConnector {
    config: WsConfig,
    handler: Arc<dyn WsHandler>,
}

pub(crate) struct WsChannel {
    outbound: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
    self_closed: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
}

impl WsChannel {
    pub(crate) fn send(&self, message: Message) -> Result<(), StreamError> {
        if !self.open.load(Ordering::Acquire) || self.cancel.is_cancelled() {
            return Err(StreamError::ChannelClosed);
        }
        self.outbound
            .send(message)
            .map_err(|_| StreamError::ChannelClosed)
    }

    /// Queues our close frame; the echo that follows is not a remote close
    pub(crate) fn send_close(&self, frame: CloseFrame) {
        self.self_closed.store(true, Ordering::Release);
        if self.outbound.send(Message::Close(Some(frame.into()))).is_err() {
            trace!("writer already gone, close frame not sent");
        }
    }
}

impl WsConnector {
    pub(crate) fn new(config: WsConfig, handler: Arc<dyn WsHandler>) -> Self {
        Self { config, handler }
    }

    fn request(&self) -> Result<Request, StreamError> {
        let mut request = self.config.url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        for (name, value) in &self.config.headers {
            let invalid = |source: BoxError| StreamError::InvalidHeader {
                name: name.clone(),
                source,
            };
            let header = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.into()))?;
            let value = HeaderValue::from_str(value).map_err(|e| invalid(e.into()))?;
            headers.insert(header, value);
        }
        Ok(request)
    }
}

impl Connector for WsConnector {
    type Channel = WsChannel;

    fn try_connect(&self, epoch: Epoch) -> BoxFuture<'static, Result<WsChannel, StreamError>> {
        let request = self.request();
        let handler = self.handler.clone();
        let url = self.config.url.to_string();
        async move {
            let request = request?;
            let cancel = epoch.cancel_token();
            let (stream, response) = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StreamError::ChannelClosed),
                connected = connect_async(request) => connected.map_err(|e| handshake_error(&url, e))?,
            };
            debug!(status = %response.status(), "websocket handshake complete");

            let (sink, source) = stream.split();
            let (outbound, outbound_rx) = mpsc::unbounded_channel();
            let self_closed = Arc::new(AtomicBool::new(false));
            let open = Arc::new(AtomicBool::new(true));
            let span = debug_span!("ws", stream_id = %epoch.stream_id(), epoch = epoch.id());
            tokio::spawn(write_frames(sink, outbound_rx, cancel.clone()).instrument(span.clone()));
            tokio::spawn(
                read_frames(source, epoch, handler, self_closed.clone(), open.clone())
                    .instrument(span),
            );
            Ok(WsChannel {
                outbound,
                cancel,
                self_closed,
                open,
            })
        }
        .boxed()
    }

    fn close_channel(&self, channel: &WsChannel) {
        channel.self_closed.store(true, Ordering::Release);
        channel.cancel.cancel();
    }

    fn is_open(&self, channel: &WsChannel) -> bool {
        channel.open.load(Ordering::Acquire) && !channel.cancel.is_cancelled()
    }
}

fn handshake_error(url: &str, e: tungstenite::Error) -> StreamError {
    match e {
        tungstenite::Error::Http(response) => StreamError::Status {
            status: response.status().as_u16(),
        },
        tungstenite::Error::Url(_) | tungstenite::Error::HttpFormat(_) => StreamError::WebSocket(e),
        e => StreamError::connect(url, e),
    }
}

async fn write_frames<S>(
    mut sink: S,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    cancel: CancellationToken,
) where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        tokio::select! {
            biased;
            message = outbound.recv() => match message {
                Some(message) => {
                    if let Err(e) = sink.send(message).await {
                        debug!(error = %e, "failed to write frame");
                        break;
                    }
                }
                None => break,
            },
            _ = cancel.cancelled() => break,
        }
    }
    // anything queued before the cancel, usually our close frame
    outbound.close();
    while let Ok(message) = outbound.try_recv() {
        if sink.send(message).await.is_err() {
            break;
        }
    }
    if let Err(e) = sink.close().await {
        trace!(error = %e, "error while closing websocket");
    }
}

enum Ended {
    Local,
    Remote {
        frame: Option<CloseFrame>,
        error: Option<StreamError>,
    },
}

async fn read_frames<S>(
    mut source: S,
    mut epoch: Epoch,
    handler: Arc<dyn WsHandler>,
    self_closed: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
) where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    if !epoch.established().await {
        open.store(false, Ordering::Release);
        debug!("channel discarded before it went live");
        return;
    }
    guarded("on_open", || handler.on_open());

    let cancel = epoch.cancel_token();
    let ended = loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Ended::Local,
            message = source.next() => message,
        };
        match message {
            Some(Ok(Message::Text(text))) => guarded("on_text", || handler.on_text(text.as_str())),
            Some(Ok(Message::Binary(data))) => guarded("on_binary", || handler.on_binary(&data)),
            Some(Ok(Message::Ping(data))) => guarded("on_ping", || handler.on_ping(&data)),
            Some(Ok(Message::Pong(data))) => guarded("on_pong", || handler.on_pong(&data)),
            Some(Ok(Message::Close(frame))) => {
                break Ended::Remote {
                    frame: frame.map(CloseFrame::from),
                    error: None,
                }
            }
            Some(Ok(Message::Frame(_))) => {}
            Some(Err(e)) => {
                break Ended::Remote {
                    frame: None,
                    error: Some(StreamError::WebSocket(e)),
                }
            }
            None => {
                break Ended::Remote {
                    frame: None,
                    error: None,
                }
            }
        }
    };
    open.store(false, Ordering::Release);

    match ended {
        Ended::Local => debug!("channel closed locally"),
        Ended::Remote { .. } if self_closed.load(Ordering::Acquire) => {
            debug!("close handshake finished")
        }
        Ended::Remote { frame, error } => {
            debug!(?frame, "server closed the channel");
            guarded("on_close", || handler.on_close(frame.as_ref()));
            epoch.notify_remote_close(error);
        }
    }
}
