//! Unit tests for alert formatting and delivery.

use agent_relay::alerts::{crash_message, lifecycle_message, Alerter};
use agent_relay::config::AlertsConfig;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Accepts HTTP requests and forwards `(path, json body)` pairs.
async fn capture_server() -> (String, mpsc::UnboundedReceiver<(String, Value)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0_u8; 4096];
                let (head_end, content_length) = loop {
                    let read = socket.read(&mut chunk).await.expect("read");
                    if read == 0 {
                        return;
                    }
                    buf.extend_from_slice(&chunk[..read]);
                    let text = String::from_utf8_lossy(&buf);
                    if let Some(end) = text.find("\r\n\r\n") {
                        let length = text[..end]
                            .lines()
                            .find_map(|line| {
                                let (name, value) = line.split_once(':')?;
                                name.eq_ignore_ascii_case("content-length")
                                    .then(|| value.trim().parse::<usize>().ok())
                                    .flatten()
                            })
                            .unwrap_or(0);
                        break (end + 4, length);
                    }
                };
                while buf.len() < head_end + content_length {
                    let read = socket.read(&mut chunk).await.expect("read");
                    if read == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..read]);
                }

                let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
                let path = head
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or_default()
                    .to_owned();
                let body: Value =
                    serde_json::from_slice(&buf[head_end..head_end + content_length])
                        .unwrap_or(Value::Null);
                tx.send((path, body)).expect("forward");
                socket
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                    .await
                    .expect("respond");
            });
        }
    });

    (format!("http://{addr}"), rx)
}

#[test]
fn crash_message_names_count_and_code() {
    assert_eq!(
        crash_message(4, 137),
        "Relay crashed 4 times (exit code 137). Manual intervention may be needed."
    );
}

#[test]
fn lifecycle_message_with_and_without_detail() {
    assert_eq!(lifecycle_message("started", ""), "[relay] started");
    assert_eq!(
        lifecycle_message("successor spawned", "context full"),
        "[relay] successor spawned \u{2014} context full"
    );
}

#[tokio::test]
async fn unconfigured_alerter_is_silent() {
    let alerter = Alerter::new(AlertsConfig::default());

    alerter.notify_crash(4, 1).await;
    alerter.notify_lifecycle("started", "").await;
}

#[tokio::test]
async fn unreachable_endpoints_are_swallowed() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let alerter = Alerter::new(AlertsConfig {
        hub_url: Some(format!("http://{addr}")),
        slack_webhook_url: Some(format!("http://{addr}/hook")),
        notifications_url: None,
    });

    alerter.notify_crash(4, 1).await;
}

#[tokio::test]
async fn crash_alert_reaches_chat_and_slack() {
    let (base, mut rx) = capture_server().await;
    let alerter = Alerter::new(AlertsConfig {
        hub_url: Some(format!("{base}/")),
        slack_webhook_url: Some(format!("{base}/hook")),
        notifications_url: None,
    });

    alerter.notify_crash(4, 137).await;

    let (path, body) = rx.recv().await.expect("chat request");
    assert_eq!(path, "/api/chat");
    assert_eq!(body["role"], "assistant");
    assert_eq!(body["content"], crash_message(4, 137));

    let (path, body) = rx.recv().await.expect("slack request");
    assert_eq!(path, "/hook");
    assert_eq!(
        body["text"],
        format!(":rotating_light: *Relay crash alert*: {}", crash_message(4, 137))
    );
}

#[tokio::test]
async fn lifecycle_notice_goes_to_chat_only() {
    let (base, mut rx) = capture_server().await;
    let alerter = Alerter::new(AlertsConfig {
        hub_url: Some(base.clone()),
        slack_webhook_url: Some(format!("{base}/hook")),
        notifications_url: None,
    });

    alerter.notify_lifecycle("successor spawned", "context full").await;

    let (path, body) = rx.recv().await.expect("chat request");
    assert_eq!(path, "/api/chat");
    assert_eq!(body["content"], "[relay] successor spawned \u{2014} context full");
    assert!(rx.try_recv().is_err(), "slack not called");
}
