//! HTTP health endpoint probe.

use crate::config::ProbeConfig;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Why a health request did not produce a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProbeFailure {
    /// Nothing accepting yet. Expected while a service boots.
    ConnectionRefused,
    /// Accepted but did not answer in time.
    Timeout,
    Other(String),
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeFailure::ConnectionRefused => write!(f, "connection refused"),
            ProbeFailure::Timeout => write!(f, "timeout"),
            ProbeFailure::Other(detail) => write!(f, "{}", detail),
        }
    }
}

/// Result of one health request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status_code: Option<u16>,
    /// Leading characters of the response body.
    pub body: Option<String>,
    pub failure: Option<ProbeFailure>,
    pub healthy: bool,
}

impl HealthCheck {
    pub fn responded(status_code: u16, body: Option<String>) -> Self {
        Self {
            status_code: Some(status_code),
            body,
            failure: None,
            healthy: status_code == 200,
        }
    }

    pub fn failed(failure: ProbeFailure) -> Self {
        Self {
            status_code: None,
            body: None,
            failure: Some(failure),
            healthy: false,
        }
    }

    pub fn is_refused(&self) -> bool {
        self.failure == Some(ProbeFailure::ConnectionRefused)
    }

    pub fn is_timeout(&self) -> bool {
        self.failure == Some(ProbeFailure::Timeout)
    }
}

pub fn health_url(host: &str, port: u16) -> String {
    format!("http://{}:{}{}", host, port, ProbeConfig::HEALTH_PATH)
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Issue one GET against the service's health path.
pub async fn probe_health(
    client: &reqwest::Client,
    host: &str,
    port: u16,
    timeout: Duration,
) -> HealthCheck {
    let response = client
        .get(health_url(host, port))
        .timeout(timeout)
        .send()
        .await;

    match response {
        Ok(response) => {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .ok()
                .map(|text| truncate(&text, ProbeConfig::BODY_PREVIEW_CHARS));
            HealthCheck::responded(status, body)
        }
        Err(e) => HealthCheck::failed(classify(&e)),
    }
}

fn classify(err: &reqwest::Error) -> ProbeFailure {
    if err.is_timeout() {
        ProbeFailure::Timeout
    } else if err.is_connect() {
        ProbeFailure::ConnectionRefused
    } else {
        ProbeFailure::Other(truncate(&err.to_string(), ProbeConfig::ERROR_DETAIL_CHARS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve `response` verbatim to every connection after `delay`.
    async fn serve(response: &'static str, delay: Duration) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    tokio::time::sleep(delay).await;
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        port
    }

    #[tokio::test]
    async fn test_healthy_on_200() {
        let port = serve(
            "HTTP/1.1 200 OK\r\nContent-Length: 15\r\nConnection: close\r\n\r\n{\"status\":\"ok\"}",
            Duration::ZERO,
        )
        .await;

        let check =
            probe_health(&reqwest::Client::new(), "127.0.0.1", port, Duration::from_secs(2)).await;

        assert!(check.healthy);
        assert_eq!(check.status_code, Some(200));
        assert_eq!(check.body.as_deref(), Some("{\"status\":\"ok\"}"));
    }

    #[tokio::test]
    async fn test_unhealthy_on_503() {
        let port = serve(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            Duration::ZERO,
        )
        .await;

        let check =
            probe_health(&reqwest::Client::new(), "127.0.0.1", port, Duration::from_secs(2)).await;

        assert!(!check.healthy);
        assert_eq!(check.status_code, Some(503));
        assert!(check.failure.is_none());
    }

    #[tokio::test]
    async fn test_timeout_classified() {
        let port = serve("HTTP/1.1 200 OK\r\n\r\n", Duration::from_secs(5)).await;

        let check =
            probe_health(&reqwest::Client::new(), "127.0.0.1", port, Duration::from_millis(200))
                .await;

        assert!(!check.healthy);
        assert!(check.is_timeout());
    }

    #[tokio::test]
    async fn test_refused_classified() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let check =
            probe_health(&reqwest::Client::new(), "127.0.0.1", port, Duration::from_secs(1)).await;

        assert!(!check.healthy);
        assert!(check.is_refused());
    }

    #[test]
    fn test_health_url() {
        assert_eq!(health_url("localhost", 8000), "http://localhost:8000/health");
    }
}
