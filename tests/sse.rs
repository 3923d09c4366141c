mod common;

use std::time::{Duration, Instant};

use common::{
    client, drain, hold_open, recorder, respond_status, send, send_frames, sse_server,
    start_event_stream, unreachable_addr, wait_for, Seen,
};
use reqwest::Url;
use stream_client::{codec::Frame, ErrorKind, Event, MaxRetries, RetryConfig, SseConfig};

fn retry(interval_ms: u64) -> RetryConfig {
    RetryConfig::default()
        .retry_interval(Duration::from_millis(interval_ms))
        .max_retries(MaxRetries::Unlimited)
}

fn event(seen: &Seen, want: &str) -> bool {
    matches!(seen, Seen::Event { id: Some(id), .. } if id == want)
}

#[tokio::test]
async fn close_returns_last_event_id_and_resumes_from_it() {
    let (url, mut requests) = sse_server(|index, _request, mut socket| async move {
        start_event_stream(&mut socket).await;
        let ids = if index == 0 { 1..=3 } else { 4..=6 };
        let events = ids.map(|id| {
            Frame::Event(Event::message(format!("event {id}")).with_id(id.to_string()))
        });
        send_frames(&mut socket, events).await;
        hold_open(&mut socket).await;
    })
    .await;

    let client = client();
    let (recorder, mut seen) = recorder();
    let stream = client.sse(
        SseConfig::new(url)
            .retry(retry(50))
            .header("Authorization", "Bearer token"),
        recorder,
    );
    stream.connect();

    wait_for(&mut seen, |s| *s == Seen::Open).await;
    let (_, third) = wait_for(&mut seen, |s| event(s, "3")).await;
    assert_eq!(
        third,
        Seen::Event {
            id: Some("3".into()),
            data: "event 3".into()
        }
    );
    assert!(stream.is_open());
    assert_eq!(stream.close().as_deref(), Some("3"));
    assert!(!stream.is_open());
    assert!(client.registry().is_empty());
    let (_, closed) = wait_for(&mut seen, |s| matches!(s, Seen::Close(_))).await;
    assert_eq!(closed, Seen::Close(Some("3".into())));

    let first = requests.recv().await.unwrap();
    assert!(first.request_line.starts_with("GET /events"));
    assert_eq!(first.header("accept"), Some("text/event-stream"));
    assert_eq!(first.header("cache-control"), Some("no-cache"));
    assert_eq!(first.header("authorization"), Some("Bearer token"));
    assert_eq!(first.header("last-event-id"), None);

    stream.connect();
    wait_for(&mut seen, |s| event(s, "6")).await;
    assert_eq!(stream.close().as_deref(), Some("6"));

    let second = requests.recv().await.unwrap();
    assert_eq!(second.header("last-event-id"), Some("3"));
    client.shutdown();
}

#[tokio::test]
async fn server_close_reconnects_with_last_event_id() {
    let (url, mut requests) = sse_server(|index, _request, mut socket| async move {
        start_event_stream(&mut socket).await;
        if index == 0 {
            send(&mut socket, "id: 1\ndata: first\n\n").await;
            // dropping the socket ends the body
            return;
        }
        send(&mut socket, "id: 2\ndata: second\n\n").await;
        hold_open(&mut socket).await;
    })
    .await;

    let client = client();
    let (recorder, mut seen) = recorder();
    let stream = client.sse(SseConfig::new(url).retry(retry(50)), recorder);
    stream.connect();

    wait_for(&mut seen, |s| event(s, "1")).await;
    let (_, closed) = wait_for(&mut seen, |s| matches!(s, Seen::Close(_))).await;
    assert_eq!(closed, Seen::Close(Some("1".into())));
    wait_for(&mut seen, |s| event(s, "2")).await;

    requests.recv().await.unwrap();
    let resumed = requests.recv().await.unwrap();
    assert_eq!(resumed.header("last-event-id"), Some("1"));

    // remote close is not a failed attempt
    let earlier = drain(&mut seen);
    assert!(earlier.iter().all(|s| !matches!(s, Seen::FailedAttempt(..))));
    assert_eq!(stream.attempts(), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(requests.try_recv().is_err());
    stream.close();
    client.shutdown();
}

#[tokio::test]
async fn initial_last_event_id_is_sent() {
    let (url, mut requests) = sse_server(|_, _request, mut socket| async move {
        start_event_stream(&mut socket).await;
        hold_open(&mut socket).await;
    })
    .await;

    let client = client();
    let (recorder, mut seen) = recorder();
    let stream = client.sse(
        SseConfig::new(url).retry(retry(50)).last_event_id("41"),
        recorder,
    );
    stream.connect();
    wait_for(&mut seen, |s| *s == Seen::Open).await;
    let request = requests.recv().await.unwrap();
    assert_eq!(request.header("last-event-id"), Some("41"));
    assert_eq!(stream.close().as_deref(), Some("41"));
    client.shutdown();
}

#[tokio::test]
async fn retry_field_overrides_next_delay() {
    let (url, mut requests) = sse_server(|index, _request, mut socket| async move {
        start_event_stream(&mut socket).await;
        if index == 0 {
            send(&mut socket, "retry: 50\n\n: keep-alive\n\nid: 1\ndata: x\n\n").await;
            return;
        }
        hold_open(&mut socket).await;
    })
    .await;

    let client = client();
    let (recorder, mut seen) = recorder();
    // the configured interval is far longer than the test timeout
    let stream = client.sse(SseConfig::new(url).retry(retry(60_000)), recorder);
    stream.connect();

    wait_for(&mut seen, |s| *s == Seen::Comment("keep-alive".into())).await;
    wait_for(&mut seen, |s| matches!(s, Seen::Close(_))).await;
    let started = Instant::now();
    wait_for(&mut seen, |s| *s == Seen::Open).await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(requests.recv().await.unwrap().header("last-event-id"), None);
    assert_eq!(
        requests.recv().await.unwrap().header("last-event-id"),
        Some("1")
    );
    stream.close();
    client.shutdown();
}

#[tokio::test]
async fn error_status_is_not_retried() {
    let (url, mut requests) = sse_server(|_, _request, mut socket| async move {
        respond_status(&mut socket, 503).await;
    })
    .await;

    let client = client();
    let (recorder, mut seen) = recorder();
    let stream = client.sse(SseConfig::new(url).retry(retry(20)), recorder);
    stream.connect();

    let (_, error) = wait_for(&mut seen, |s| matches!(s, Seen::Error(..))).await;
    match error {
        Seen::Error(kind, message) => {
            assert_eq!(kind, ErrorKind::Protocol);
            assert!(message.contains("503"), "{message}");
        }
        other => panic!("unexpected callback {other:?}"),
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    requests.recv().await.unwrap();
    assert!(requests.try_recv().is_err());
    assert!(drain(&mut seen).is_empty());
    assert!(!stream.is_open());
    client.shutdown();
}

#[tokio::test]
async fn unreachable_endpoint_exhausts_retries() {
    let addr = unreachable_addr().await;
    let url = Url::parse(&format!("http://{addr}/events")).unwrap();

    let client = client();
    let (recorder, mut seen) = recorder();
    let stream = client.sse(
        SseConfig::new(url).retry(
            RetryConfig::default()
                .retry_interval(Duration::from_millis(100))
                .max_retries(2),
        ),
        recorder,
    );
    let started = Instant::now();
    stream.connect();

    let (exceeded_at, _) = wait_for(&mut seen, |s| matches!(s, Seen::Exceeded(_))).await;
    assert!(exceeded_at.duration_since(started) >= Duration::from_millis(200));
    tokio::time::sleep(Duration::from_millis(100)).await;
    let failed = drain(&mut seen);
    assert!(!failed.contains(&Seen::Open));
    assert!(!stream.is_open());
    client.shutdown();
}

#[tokio::test]
async fn failed_attempts_are_counted() {
    let addr = unreachable_addr().await;
    let url = Url::parse(&format!("http://{addr}/events")).unwrap();

    let client = client();
    let (recorder, mut seen) = recorder();
    let stream = client.sse(
        SseConfig::new(url).retry(
            RetryConfig::default()
                .retry_interval(Duration::from_millis(100))
                .max_retries(2),
        ),
        recorder,
    );
    stream.connect();

    let mut failed = 0;
    loop {
        match wait_for(&mut seen, |_| true).await.1 {
            Seen::FailedAttempt(..) => failed += 1,
            Seen::Exceeded(_) => break,
            Seen::Error(kind, _) => assert_eq!(kind, ErrorKind::Connect),
            other => panic!("unexpected callback {other:?}"),
        }
    }
    assert_eq!(failed, 2);
    client.shutdown();
}
