//! End-to-End Stream Pipeline Tests
//!
//! Boots the real HTTP server on a random port and drives it with raw
//! TCP clients, asserting the exact SSE wire format byte for byte. The
//! stream request is sent as HTTP/1.0 so the body arrives without
//! chunked transfer framing.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use location_relay::application::services::{IngestConfig, IngestService};
use location_relay::infrastructure::http::ApiState;
use location_relay::{
    BatchingScheduler, EventBus, InMemoryLocationStore, InMemoryMembershipDirectory, Membership,
    MembershipState, StaticBearerTokens, StaticStreamKeys, StreamIdentity, StreamSettings,
    create_router,
};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Boot the full relay wiring on a random port.
///
/// One user (`u1`, token `tok-1`) reporting into group `g1` at a 1s
/// frequency, one stream key (`key-1`) watching `g1`.
async fn start_server(heartbeat_interval: Duration) -> SocketAddr {
    let bus = Arc::new(EventBus::new());
    let scheduler = Arc::new(BatchingScheduler::new(
        Arc::clone(&bus),
        CancellationToken::new(),
    ));

    let store = Arc::new(InMemoryLocationStore::new());
    let directory = Arc::new(InMemoryMembershipDirectory::new());
    directory.add_membership(
        "u1",
        Membership {
            group_id: "g1".to_string(),
            frequency_secs: Some(1),
            state: MembershipState::Active,
        },
    );

    let ingest = Arc::new(IngestService::new(
        store,
        directory,
        Arc::clone(&scheduler),
        IngestConfig::default(),
    ));

    let state = Arc::new(ApiState {
        ingest,
        bus,
        scheduler,
        token_auth: Arc::new(StaticBearerTokens::new([(
            "tok-1".to_string(),
            "u1".to_string(),
        )])),
        stream_auth: Arc::new(StaticStreamKeys::new([(
            "key-1".to_string(),
            StreamIdentity::new("sub-1".to_string(), "g1".to_string()),
        )])),
        stream: StreamSettings {
            heartbeat_interval,
            channel_capacity: 64,
        },
        version: "test-0.0.1".to_string(),
        started_at: Instant::now(),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let app = create_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    addr
}

/// Open the SSE stream and consume the response headers.
async fn open_stream(addr: SocketAddr, api_key: Option<&str>) -> (TcpStream, String, Vec<u8>) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let key_header = api_key.map_or(String::new(), |k| format!("X-Api-Key: {k}\r\n"));
    let request = format!("GET /api/v1/stream HTTP/1.0\r\nHost: localhost\r\n{key_header}\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut buf = Vec::new();
    let headers = loop {
        let mut chunk = [0_u8; 1024];
        let n = timeout(READ_TIMEOUT, stream.read(&mut chunk))
            .await
            .expect("timed out reading response headers")
            .unwrap();
        assert!(n > 0, "connection closed before headers completed");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = find_subsequence(&buf, b"\r\n\r\n") {
            let headers = String::from_utf8(buf[..end].to_vec()).unwrap();
            buf.drain(..end + 4);
            break headers;
        }
    };
    (stream, headers, buf)
}

/// Read one SSE frame (terminated by a blank line) from the stream.
async fn read_frame(stream: &mut TcpStream, buf: &mut Vec<u8>) -> String {
    loop {
        if let Some(end) = find_subsequence(buf, b"\n\n") {
            let frame = String::from_utf8(buf[..end + 2].to_vec()).unwrap();
            buf.drain(..end + 2);
            return frame;
        }
        let mut chunk = [0_u8; 1024];
        let n = timeout(READ_TIMEOUT, stream.read(&mut chunk))
            .await
            .expect("timed out waiting for an SSE frame")
            .unwrap();
        assert!(n > 0, "stream closed mid-frame");
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Send a location report and return the response status line.
async fn post_location(addr: SocketAddr, token: &str, lat: f64) -> String {
    let body = format!(r#"{{"deviceId":"d1","latitude":{lat},"longitude":2.0}}"#);
    let request = format!(
        "POST /api/v1/locations HTTP/1.0\r\nHost: localhost\r\nAuthorization: Bearer {token}\r\n\
         Content-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    timeout(READ_TIMEOUT, stream.read_to_end(&mut response))
        .await
        .expect("timed out reading ingest response")
        .unwrap();
    let text = String::from_utf8(response).unwrap();
    text.lines().next().unwrap_or_default().to_string()
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[tokio::test]
async fn stream_opens_with_exact_ready_frame() {
    let addr = start_server(Duration::from_secs(15)).await;
    let (mut stream, headers, mut buf) = open_stream(addr, Some("key-1")).await;

    assert!(headers.starts_with("HTTP/1."), "headers: {headers}");
    assert!(headers.contains(" 200"), "headers: {headers}");
    assert!(headers.to_lowercase().contains("content-type: text/event-stream"));

    let frame = read_frame(&mut stream, &mut buf).await;
    assert_eq!(frame, "event: ready\ndata: {\"groupId\":\"g1\"}\n\n");
}

#[tokio::test]
async fn stream_without_key_is_rejected() {
    let addr = start_server(Duration::from_secs(15)).await;
    let (_stream, headers, _buf) = open_stream(addr, None).await;
    assert!(headers.contains(" 401"), "headers: {headers}");
}

#[tokio::test]
async fn ingested_report_reaches_the_stream() {
    let addr = start_server(Duration::from_secs(15)).await;
    let (mut stream, _headers, mut buf) = open_stream(addr, Some("key-1")).await;
    let ready = read_frame(&mut stream, &mut buf).await;
    assert!(ready.starts_with("event: ready\n"));

    let status = post_location(addr, "tok-1", 37.7749).await;
    assert!(status.contains("202"), "status line: {status}");

    let frame = read_frame(&mut stream, &mut buf).await;
    assert!(frame.starts_with("event: location\ndata: {"), "frame: {frame}");
    assert!(frame.contains("\"groupId\":\"g1\""));
    assert!(frame.contains("\"deviceId\":\"d1\""));
    assert!(frame.contains("\"latitude\":37.7749"));
    assert!(frame.ends_with("\n\n"));
}

#[tokio::test]
async fn ingest_with_bad_token_is_rejected() {
    let addr = start_server(Duration::from_secs(15)).await;
    let status = post_location(addr, "wrong-token", 37.7749).await;
    assert!(status.contains("401"), "status line: {status}");
}

#[tokio::test]
async fn heartbeat_frames_keep_the_stream_alive() {
    let addr = start_server(Duration::from_secs(1)).await;
    let (mut stream, _headers, mut buf) = open_stream(addr, Some("key-1")).await;
    let _ready = read_frame(&mut stream, &mut buf).await;

    let frame = read_frame(&mut stream, &mut buf).await;
    assert!(frame.starts_with("event: heartbeat\ndata: {"), "frame: {frame}");
    assert!(frame.contains("\"groupId\":\"g1\""));
    assert!(frame.contains("\"timestamp\":"));
}

#[tokio::test]
async fn newer_connection_supersedes_the_old_stream() {
    let addr = start_server(Duration::from_secs(15)).await;

    let (mut first, _headers, mut first_buf) = open_stream(addr, Some("key-1")).await;
    let _ready = read_frame(&mut first, &mut first_buf).await;

    let (mut second, _headers, mut second_buf) = open_stream(addr, Some("key-1")).await;
    let ready = read_frame(&mut second, &mut second_buf).await;
    assert!(ready.starts_with("event: ready\n"));

    // The superseded stream ends; the server closes its body
    let mut chunk = [0_u8; 64];
    let n = timeout(READ_TIMEOUT, first.read(&mut chunk))
        .await
        .expect("superseded stream should close promptly")
        .unwrap();
    assert_eq!(n, 0, "expected EOF on the superseded stream");

    // Only the new stream receives subsequent events
    let status = post_location(addr, "tok-1", 1.0).await;
    assert!(status.contains("202"));
    let frame = read_frame(&mut second, &mut second_buf).await;
    assert!(frame.starts_with("event: location\n"), "frame: {frame}");
}
