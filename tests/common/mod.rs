#![allow(dead_code)]

use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use bytes::{Bytes, BytesMut};
use reqwest::Url;
use stream_client::{
    codec::{Frame, SseEncoder},
    ClientOptions, CloseFrame, ErrorKind, Event, LifecycleListener, SseHandler, StreamClient,
    StreamError, WsHandler,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc,
};
use tokio_tungstenite::{accept_async, WebSocketStream};
use tokio_util::codec::Encoder;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn client() -> StreamClient {
    StreamClient::new(ClientOptions {
        worker_threads: 2,
        shutdown_grace: Duration::from_millis(200),
        ..ClientOptions::default()
    })
    .expect("worker pool starts")
}

#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Open,
    Event { id: Option<String>, data: String },
    Comment(String),
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<String>),
    WsClose(Option<CloseFrame>),
    Error(ErrorKind, String),
    FailedAttempt(u32, Duration),
    Exceeded(String),
}

/// Handler that forwards every callback to a channel, in order
pub struct Recorder {
    tx: mpsc::UnboundedSender<(Instant, Seen)>,
}

pub type SeenRx = mpsc::UnboundedReceiver<(Instant, Seen)>;

pub fn recorder() -> (Recorder, SeenRx) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Recorder { tx }, rx)
}

impl Recorder {
    fn seen(&self, seen: Seen) {
        let _ = self.tx.send((Instant::now(), seen));
    }
}

impl LifecycleListener for Recorder {
    fn on_error(&self, error: &StreamError) {
        self.seen(Seen::Error(error.kind(), error.to_string()));
    }

    fn on_failed_attempt(&self, attempt: u32, delay: Duration) {
        self.seen(Seen::FailedAttempt(attempt, delay));
    }

    fn on_retries_exceeded(&self, error: &StreamError) {
        self.seen(Seen::Exceeded(error.to_string()));
    }
}

impl SseHandler for Recorder {
    fn on_open(&self) {
        self.seen(Seen::Open);
    }

    fn on_event(&self, event: &Event) {
        self.seen(Seen::Event {
            id: event.id.clone(),
            data: event.data.clone(),
        });
    }

    fn on_comment(&self, comment: &str) {
        self.seen(Seen::Comment(comment.to_owned()));
    }

    fn on_close(&self, last_event_id: Option<&str>) {
        self.seen(Seen::Close(last_event_id.map(str::to_owned)));
    }
}

impl WsHandler for Recorder {
    fn on_open(&self) {
        self.seen(Seen::Open);
    }

    fn on_text(&self, text: &str) {
        self.seen(Seen::Text(text.to_owned()));
    }

    fn on_binary(&self, data: &Bytes) {
        self.seen(Seen::Binary(data.to_vec()));
    }

    fn on_ping(&self, data: &Bytes) {
        self.seen(Seen::Ping(data.to_vec()));
    }

    fn on_pong(&self, data: &Bytes) {
        self.seen(Seen::Pong(data.to_vec()));
    }

    fn on_close(&self, frame: Option<&CloseFrame>) {
        self.seen(Seen::WsClose(frame.cloned()));
    }
}

/// Waits for the next callback matching `pred`, skipping the others
pub async fn wait_for(rx: &mut SeenRx, pred: impl Fn(&Seen) -> bool) -> (Instant, Seen) {
    tokio::time::timeout(WAIT, async {
        loop {
            let (at, seen) = rx.recv().await.expect("handler dropped");
            if pred(&seen) {
                return (at, seen);
            }
        }
    })
    .await
    .expect("timed out waiting for callback")
}

/// Everything recorded so far
pub fn drain(rx: &mut SeenRx) -> Vec<Seen> {
    let mut seen = Vec::new();
    while let Ok((_, s)) = rx.try_recv() {
        seen.push(s);
    }
    seen
}

/// A port nothing listens on
pub async fn unreachable_addr() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

#[derive(Debug, Clone)]
pub struct Request {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

pub async fn read_request(socket: &mut TcpStream) -> Request {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client hung up mid request");
        buf.extend_from_slice(&chunk[..n]);
    }
    let text = String::from_utf8_lossy(&buf);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().unwrap_or_default().to_owned();
    let headers = lines
        .take_while(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
        .map(|(n, v)| (n.trim().to_lowercase(), v.trim().to_owned()))
        .collect();
    Request {
        request_line,
        headers,
    }
}

pub async fn start_event_stream(socket: &mut TcpStream) {
    socket
        .write_all(
            b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ncache-control: no-cache\r\nconnection: close\r\n\r\n",
        )
        .await
        .unwrap();
}

pub async fn send(socket: &mut TcpStream, chunk: &str) {
    socket.write_all(chunk.as_bytes()).await.unwrap();
    socket.flush().await.unwrap();
}

/// Writes `frames` the way a server using the codec's encoder would
pub async fn send_frames(socket: &mut TcpStream, frames: impl IntoIterator<Item = Frame>) {
    let mut encoder = SseEncoder::new();
    let mut buf = BytesMut::new();
    for frame in frames {
        encoder.encode(frame, &mut buf).unwrap();
    }
    socket.write_all(&buf).await.unwrap();
    socket.flush().await.unwrap();
}

pub async fn respond_status(socket: &mut TcpStream, status: u16) {
    let response =
        format!("HTTP/1.1 {status} Nope\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

/// Keeps the socket open until the client goes away
pub async fn hold_open(socket: &mut TcpStream) {
    let mut buf = [0u8; 256];
    loop {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }
}

/// Scripted HTTP server. `script` gets the connection index, the parsed
/// request and the socket; requests are also forwarded to the receiver.
pub async fn sse_server<F, Fut>(script: F) -> (Url, mpsc::UnboundedReceiver<Request>)
where
    F: Fn(usize, Request, TcpStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = Url::parse(&format!("http://{}/events", listener.local_addr().unwrap())).unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut index = 0;
        while let Ok((mut socket, _)) = listener.accept().await {
            let request = read_request(&mut socket).await;
            let _ = tx.send(request.clone());
            tokio::spawn(script(index, request, socket));
            index += 1;
        }
    });
    (url, rx)
}

/// Scripted WebSocket server, returns its url and the accepted connection count
pub async fn ws_server<F, Fut>(script: F) -> (Url, Arc<AtomicUsize>)
where
    F: Fn(usize, WebSocketStream<TcpStream>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = Url::parse(&format!("ws://{}/socket", listener.local_addr().unwrap())).unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let count = accepted.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let Ok(ws) = accept_async(socket).await else {
                continue;
            };
            let index = count.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(script(index, ws));
        }
    });
    (url, accepted)
}
