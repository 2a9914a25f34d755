//! Service client behavior against a local scripted HTTP server: retry
//! bounds, quota short-circuit and 200-body classification.

use bytes::Bytes;
use cognition_bot::analysis::{Outcome, ServiceClient};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// One canned HTTP response
#[derive(Clone)]
struct Canned {
    status_line: &'static str,
    content_type: Option<&'static str>,
    body: String,
}

impl Canned {
    fn status(status_line: &'static str) -> Self {
        Self {
            status_line,
            content_type: None,
            body: String::new(),
        }
    }

    fn json(status_line: &'static str, body: serde_json::Value) -> Self {
        Self {
            status_line,
            content_type: Some("application/json"),
            body: body.to_string(),
        }
    }

    /// Keep the JSON content type but drop the body
    fn empty(mut self) -> Self {
        self.body = String::new();
        self
    }

    fn render(&self) -> String {
        let mut response = format!("HTTP/1.1 {}\r\n", self.status_line);
        if let Some(content_type) = self.content_type {
            response.push_str(&format!("content-type: {content_type}\r\n"));
        }
        response.push_str(&format!(
            "content-length: {}\r\nconnection: close\r\n\r\n{}",
            self.body.len(),
            self.body
        ));
        response
    }
}

/// Spawn a one-shot-per-connection server. The nth request gets the nth
/// canned response; the last one repeats. Returns the URL and a request
/// counter.
async fn spawn_server(responses: Vec<Canned>) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener address");
    let counter = Arc::new(AtomicUsize::new(0));

    let server_counter = counter.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let n = server_counter.fetch_add(1, Ordering::SeqCst);
            let canned = responses[n.min(responses.len() - 1)].clone();
            tokio::spawn(async move {
                let _ = read_request(&mut stream).await;
                let _ = stream.write_all(canned.render().as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    (format!("http://{addr}/analyze"), counter)
}

/// Drain one HTTP request: headers, then content-length body bytes
async fn read_request(stream: &mut tokio::net::TcpStream) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0_u8; 1024];

    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
    let content_length: usize = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);

    let mut remaining = content_length.saturating_sub(buf.len() - header_end);
    while remaining > 0 {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        remaining = remaining.saturating_sub(n);
    }
    Ok(())
}

fn fast_client() -> ServiceClient {
    ServiceClient::new().with_retry_delay(Duration::from_millis(1))
}

async fn execute(client: &ServiceClient, url: &str) -> Outcome {
    client
        .execute(url, "test-key", Bytes::from_static(b"payload"), &[])
        .await
}

#[tokio::test]
async fn rate_limiting_is_retried_a_bounded_number_of_times() {
    let (url, counter) = spawn_server(vec![Canned::status("429 Too Many Requests")]).await;

    let outcome = execute(&fast_client(), &url).await;

    assert_eq!(outcome, Outcome::Failed);
    // One initial attempt plus three retries
    assert_eq!(counter.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn rate_limit_then_recovery_succeeds() {
    let (url, counter) = spawn_server(vec![
        Canned::status("429 Too Many Requests"),
        Canned::json("200 OK", json!({"tags": []})),
    ])
    .await;

    let outcome = execute(&fast_client(), &url).await;

    assert_eq!(outcome, Outcome::Success(json!({"tags": []})));
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn quota_exhaustion_is_never_retried() {
    let (url, counter) = spawn_server(vec![Canned::status("403 Forbidden")]).await;

    let outcome = execute(&fast_client(), &url).await;

    assert_eq!(outcome, Outcome::QuotaExceeded);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn ok_with_empty_body_is_no_result() {
    let (url, _) = spawn_server(vec![Canned::json("200 OK", json!(null)).empty()]).await;

    let outcome = execute(&fast_client(), &url).await;

    assert_eq!(outcome, Outcome::NoResult);
}

#[tokio::test]
async fn ok_without_json_content_type_is_no_result() {
    let (url, _) = spawn_server(vec![Canned {
        status_line: "200 OK",
        content_type: Some("text/plain"),
        body: "not json".to_string(),
    }])
    .await;

    let outcome = execute(&fast_client(), &url).await;

    assert_eq!(outcome, Outcome::NoResult);
}

#[tokio::test]
async fn upstream_server_error_is_a_plain_failure() {
    let (url, counter) = spawn_server(vec![Canned::json(
        "500 Internal Server Error",
        json!({"error": {"message": "boom"}}),
    )])
    .await;

    let outcome = execute(&fast_client(), &url).await;

    assert_eq!(outcome, Outcome::Failed);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}
