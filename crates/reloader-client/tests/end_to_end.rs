//! End-to-end test: a file saved in the watched folder reaches the client.

use std::sync::Arc;
use std::time::Duration;

use reloader_client::{ClientConfig, Endpoint, ResilientClient};
use reloader_core::RetryPolicy;
use reloader_monitor::infrastructure::network::broadcast_server::{
    ServerConfig, ServerNotification,
};
use reloader_monitor::infrastructure::watcher::WatcherConfig;
use reloader_monitor::{Monitor, MonitorConfig};
use tokio::time::timeout;

#[tokio::test]
async fn test_saved_file_is_received_by_client() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let (mut monitor, mut notifications) = Monitor::new(MonitorConfig {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            keepalive_interval: Duration::from_millis(200),
            write_timeout: Duration::from_secs(2),
        },
        watcher: WatcherConfig::new(dir.path()),
    });
    let addr = monitor.start().await.unwrap();

    let client = ResilientClient::new(ClientConfig {
        connect_policy: RetryPolicy::forever(Duration::from_millis(50)),
        poll_interval: Duration::from_millis(20),
        ..ClientConfig::new(Endpoint::new("127.0.0.1", addr.port()).unwrap())
    });
    let mut updates = Arc::clone(&client).start_polling().unwrap();

    let connected = timeout(Duration::from_secs(10), notifications.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(connected, ServerNotification::ClientConnected(_)));
    // Let keep-alives flow and the OS watch settle before saving.
    tokio::time::sleep(Duration::from_millis(500)).await;

    // Act
    std::fs::write(dir.path().join("MainPage.xaml"), "hello").unwrap();

    // Assert
    let text = timeout(Duration::from_secs(10), updates.recv())
        .await
        .expect("update did not arrive")
        .expect("channel open");
    assert_eq!(text, "hello");

    client.dispose();
    monitor.stop().await;
}
