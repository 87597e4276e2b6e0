//! HTTP reachability probe against the remote agent's health endpoint.
//!
//! Diagnostics only: a failed probe is reported, it never blocks a session start.

use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProbeReport {
    pub url: String,
    pub reachable: bool,
    pub healthy: bool,
    pub status_code: Option<u16>,
    /// `status` field of the JSON body, if any
    pub remote_status: Option<String>,
    pub latency_ms: u64,
    pub error: Option<String>,
}

/// GET the health URL once, bounded by `timeout`.
pub async fn probe(url: &str, timeout: Duration) -> ProbeReport {
    let started = Instant::now();
    let mut report = ProbeReport {
        url: url.to_string(),
        reachable: false,
        healthy: false,
        status_code: None,
        remote_status: None,
        latency_ms: 0,
        error: None,
    };

    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => {
            report.error = Some(format!("Failed to build HTTP client: {}", e));
            return report;
        }
    };

    match client.get(url).send().await {
        Ok(response) => {
            report.reachable = true;
            report.status_code = Some(response.status().as_u16());
            let success = response.status().is_success();

            match response.json::<serde_json::Value>().await {
                Ok(body) => {
                    report.remote_status = body.get("status").and_then(|v| v.as_str()).map(str::to_string);
                }
                Err(e) => debug!(url, error = %e, "Health response is not JSON"),
            }
            report.healthy = success && report.remote_status.as_deref() == Some("healthy");
        }
        Err(e) => {
            warn!(url, error = %e, "Remote health probe failed");
            report.error = Some(e.to_string());
        }
    }

    report.latency_ms = started.elapsed().as_millis() as u64;
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        format!("http://{}/api/health", addr)
    }

    #[tokio::test]
    async fn test_healthy_remote() {
        let url = serve_once("HTTP/1.1 200 OK", r#"{"status":"healthy"}"#).await;
        let report = probe(&url, Duration::from_secs(2)).await;
        assert!(report.reachable);
        assert!(report.healthy);
        assert_eq!(report.status_code, Some(200));
        assert_eq!(report.remote_status.as_deref(), Some("healthy"));
    }

    #[tokio::test]
    async fn test_reachable_but_unhealthy() {
        let url = serve_once("HTTP/1.1 503 Service Unavailable", r#"{"status":"degraded"}"#).await;
        let report = probe(&url, Duration::from_secs(2)).await;
        assert!(report.reachable);
        assert!(!report.healthy);
        assert_eq!(report.status_code, Some(503));
    }

    #[tokio::test]
    async fn test_unreachable_remote() {
        let report = probe("http://127.0.0.1:1/api/health", Duration::from_secs(2)).await;
        assert!(!report.reachable);
        assert!(report.error.is_some());
    }
}
