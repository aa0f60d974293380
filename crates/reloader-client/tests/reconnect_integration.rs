//! Integration tests for the resilient client against a raw TCP server.
//!
//! The server side is a plain `TcpListener` writing hand-built frames, so
//! these tests exercise reconnection, keep-alive filtering and protocol error
//! recovery without starting a monitor.

use std::sync::Arc;
use std::time::Duration;

use reloader_client::{ClientConfig, ConnectOutcome, ConnectionState, Endpoint, ResilientClient};
use reloader_core::{encode_frame, RetryPolicy};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

fn fast_config(port: u16) -> ClientConfig {
    ClientConfig {
        connect_policy: RetryPolicy::forever(Duration::from_millis(50)),
        poll_interval: Duration::from_millis(20),
        ..ClientConfig::new(Endpoint::new("127.0.0.1", port).unwrap())
    }
}

async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn accept(listener: &TcpListener) -> TcpStream {
    let (stream, _) = timeout(Duration::from_secs(10), listener.accept())
        .await
        .expect("client did not connect")
        .unwrap();
    stream
}

async fn send_text(stream: &mut TcpStream, text: &str) {
    stream.write_all(&encode_frame(text.as_bytes()).unwrap()).await.unwrap();
}

async fn recv_text(rx: &mut mpsc::Receiver<String>) -> String {
    timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("no message within 10 s")
        .expect("channel closed")
}

#[tokio::test]
async fn test_client_connects_once_server_appears() {
    // Arrange: nothing listens on the port yet
    let port = free_port().await;
    let client = ResilientClient::new(fast_config(port));
    let connect = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.start().await })
    };
    while client.connect_attempts() < 2 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Act
    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    let _server_side = accept(&listener).await;

    // Assert
    let outcome = timeout(Duration::from_secs(10), connect).await.unwrap().unwrap();
    assert_eq!(outcome, ConnectOutcome::Connected);
    assert_eq!(client.state(), ConnectionState::Connected);
    assert!(client.connect_attempts() >= 3);
    client.dispose();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_connects_open_a_single_stream() {
    // Arrange
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let client = ResilientClient::new(fast_config(port));

    // Act
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.connect().await })
        })
        .collect();
    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap());
    }

    // Assert
    let opened = outcomes
        .iter()
        .filter(|o| **o == ConnectOutcome::Connected)
        .count();
    assert_eq!(opened, 1, "outcomes: {outcomes:?}");
    assert_eq!(client.connect_attempts(), 1);
    let _server_side = accept(&listener).await;
    assert!(
        timeout(Duration::from_millis(200), listener.accept()).await.is_err(),
        "a second stream was opened"
    );
    client.dispose();
}

#[tokio::test]
async fn test_polling_reconnects_after_server_drops_connection() {
    // Arrange
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let client = ResilientClient::new(fast_config(port));
    let mut rx = Arc::clone(&client).start_polling().unwrap();

    let mut first = accept(&listener).await;
    send_text(&mut first, "<v1 />").await;
    assert_eq!(recv_text(&mut rx).await, "<v1 />");

    // Act
    drop(first);
    let mut second = accept(&listener).await;
    send_text(&mut second, "<v2 />").await;

    // Assert
    assert_eq!(recv_text(&mut rx).await, "<v2 />");
    client.dispose();
}

#[tokio::test]
async fn test_keepalives_are_never_delivered() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let client = ResilientClient::new(fast_config(port));
    let mut rx = Arc::clone(&client).start_polling().unwrap();
    let mut server_side = accept(&listener).await;

    send_text(&mut server_side, "PING").await;
    send_text(&mut server_side, "PING").await;
    send_text(&mut server_side, "<Content />").await;

    assert_eq!(recv_text(&mut rx).await, "<Content />");
    client.dispose();
}

#[tokio::test]
async fn test_invalid_header_drops_connection_and_reconnects() {
    // Arrange
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let client = ResilientClient::new(fast_config(port));
    let mut rx = Arc::clone(&client).start_polling().unwrap();
    let mut first = accept(&listener).await;

    // Act: a negative length prefix
    first.write_all(&(-5i32).to_le_bytes()).await.unwrap();

    // Assert: the client abandons the stream and connects again
    let mut second = accept(&listener).await;
    send_text(&mut second, "<recovered />").await;
    assert_eq!(recv_text(&mut rx).await, "<recovered />");
    client.dispose();
}

#[tokio::test]
async fn test_oversized_frame_drops_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let client = ResilientClient::new(ClientConfig {
        max_frame_len: 16,
        ..fast_config(port)
    });
    let mut rx = Arc::clone(&client).start_polling().unwrap();
    let mut first = accept(&listener).await;

    send_text(&mut first, &"x".repeat(64)).await;

    let mut second = accept(&listener).await;
    send_text(&mut second, "small").await;
    assert_eq!(recv_text(&mut rx).await, "small");
    client.dispose();
}

#[tokio::test]
async fn test_constrained_client_resyncs_periodically() {
    // Arrange: resync every 3 ticks of 20 ms
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let client = ResilientClient::new(ClientConfig {
        resync_every: Some(3),
        ..fast_config(port)
    });
    let _rx = Arc::clone(&client).start_polling().unwrap();

    // Act / Assert: the client opens a fresh connection without any failure
    let _first = accept(&listener).await;
    let _second = accept(&listener).await;
    assert!(client.connect_attempts() >= 2);
    client.dispose();
}

#[tokio::test]
async fn test_dispose_is_idempotent_and_stops_polling() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let client = ResilientClient::new(fast_config(port));
    let mut rx = Arc::clone(&client).start_polling().unwrap();
    let _server_side = accept(&listener).await;

    client.dispose();
    client.dispose();

    let end = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
    assert!(end.is_none());
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.connect().await, ConnectOutcome::Cancelled);
}

#[tokio::test]
async fn test_single_attempt_client_reads_until_closed() {
    // Arrange
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let client = ResilientClient::new(ClientConfig {
        auto_reconnect: false,
        ..fast_config(port)
    });
    let server = tokio::spawn(async move {
        let mut stream = accept(&listener).await;
        send_text(&mut stream, "PING").await;
        send_text(&mut stream, "<only />").await;
    });

    // Act
    assert_eq!(client.start().await, ConnectOutcome::Connected);
    let first = client.read_message().await;
    server.await.unwrap();
    let second = client.read_message().await;

    // Assert
    assert_eq!(first.as_deref(), Some("<only />"));
    assert_eq!(second, None);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}
