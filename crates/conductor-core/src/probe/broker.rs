//! Broker (redis) reachability.
//!
//! Two paths, tried in order: the redis client (which selects the endpoint's
//! database while connecting) sending `PING`, then a raw socket that writes
//! the PING frame and looks for `+PONG` anywhere in the reply.

use crate::error::{ConductorError, Result};
use crate::service::BrokerEndpoint;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

const PING_FRAME: &[u8] = b"*1\r\n$4\r\nPING\r\n";
const PONG_TOKEN: &str = "+PONG";

/// Connection URL for one candidate endpoint.
pub fn endpoint_url(endpoint: &BrokerEndpoint) -> String {
    format!("redis://{}:{}/{}", endpoint.host, endpoint.port, endpoint.db)
}

async fn ping_endpoint(endpoint: &BrokerEndpoint) -> Result<()> {
    let client = redis::Client::open(endpoint_url(endpoint))?;
    let mut conn = client.get_multiplexed_async_connection().await?;
    let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
    if reply == "PONG" {
        Ok(())
    } else {
        Err(ConductorError::Network {
            message: format!("unexpected PING reply: {}", reply),
            cause: None,
        })
    }
}

/// Client path: first endpoint that answers PING wins.
pub async fn client_ping(endpoints: &[BrokerEndpoint], limit: Duration) -> bool {
    for endpoint in endpoints {
        let result = timeout(limit, ping_endpoint(endpoint))
            .await
            .unwrap_or(Err(ConductorError::Timeout(limit)));
        match result {
            Ok(()) => {
                debug!(
                    "Broker answered at {}:{}/{}",
                    endpoint.host, endpoint.port, endpoint.db
                );
                return true;
            }
            Err(e) => debug!(
                "Broker ping {}:{}/{} failed: {}",
                endpoint.host, endpoint.port, endpoint.db, e
            ),
        }
    }
    false
}

async fn raw_ping_port(host: &str, port: u16) -> Result<bool> {
    let mut stream = TcpStream::connect((host, port)).await?;
    stream.write_all(PING_FRAME).await?;
    let mut buf = [0u8; 64];
    let n = stream.read(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf[..n]).contains(PONG_TOKEN))
}

/// Raw fallback: accept iff some port replies with `+PONG`.
pub async fn raw_ping(host: &str, ports: &[u16], limit: Duration) -> bool {
    for &port in ports {
        match timeout(limit, raw_ping_port(host, port)).await {
            Ok(Ok(true)) => {
                debug!("Broker raw PING succeeded on port {}", port);
                return true;
            }
            Ok(Ok(false)) => debug!("Port {} answered without PONG", port),
            Ok(Err(e)) => debug!("Raw PING on port {} failed: {}", port, e),
            Err(_) => debug!("Raw PING on port {} timed out", port),
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    type Seen = Arc<Mutex<Vec<String>>>;

    /// A fake broker that parses each RESP command and answers by name.
    /// `ping_reply` is sent for PING; SELECT and CLIENT get `+OK`.
    async fn fake_broker(ping_reply: &'static str) -> (u16, Seen) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let log = log.clone();
                tokio::spawn(async move {
                    let (read_half, mut write_half) = socket.into_split();
                    let mut reader = BufReader::new(read_half);
                    loop {
                        let mut header = String::new();
                        if reader.read_line(&mut header).await.unwrap_or(0) == 0 {
                            return;
                        }
                        let Some(count) = header.trim().strip_prefix('*') else {
                            continue;
                        };
                        let argc: usize = count.parse().unwrap_or(0);
                        let mut args = Vec::new();
                        for _ in 0..argc {
                            let mut len_line = String::new();
                            let mut arg = String::new();
                            let _ = reader.read_line(&mut len_line).await;
                            let _ = reader.read_line(&mut arg).await;
                            args.push(arg.trim_end().to_string());
                        }
                        let name = args.first().cloned().unwrap_or_default().to_uppercase();
                        log.lock().unwrap().push(args.join(" "));
                        let reply = match name.as_str() {
                            "PING" => ping_reply,
                            _ => "+OK\r\n",
                        };
                        let _ = write_half.write_all(reply.as_bytes()).await;
                    }
                });
            }
        });
        (port, seen)
    }

    async fn raw_responder(reply: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 64];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(reply.as_bytes()).await;
            }
        });
        port
    }

    #[test]
    fn test_endpoint_url() {
        let endpoint = BrokerEndpoint::new("localhost", 6390, 2);
        assert_eq!(endpoint_url(&endpoint), "redis://localhost:6390/2");
    }

    #[tokio::test]
    async fn test_client_ping_selects_database() {
        let (port, seen) = fake_broker("+PONG\r\n").await;
        let endpoints = vec![BrokerEndpoint::new("127.0.0.1", port, 3)];

        assert!(client_ping(&endpoints, Duration::from_secs(2)).await);
        let commands = seen.lock().unwrap().clone();
        assert!(commands.iter().any(|c| c == "SELECT 3"));
        assert!(commands.iter().any(|c| c == "PING"));
    }

    #[tokio::test]
    async fn test_client_ping_falls_through_candidates() {
        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_port = dead.local_addr().unwrap().port();
        drop(dead);
        let (live_port, _) = fake_broker("+PONG\r\n").await;

        let endpoints = vec![
            BrokerEndpoint::new("127.0.0.1", dead_port, 0),
            BrokerEndpoint::new("127.0.0.1", live_port, 0),
        ];
        assert!(client_ping(&endpoints, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_client_ping_rejects_error_reply() {
        let (port, _) = fake_broker("-NOAUTH Authentication required.\r\n").await;
        let endpoints = vec![BrokerEndpoint::new("127.0.0.1", port, 0)];

        assert!(!client_ping(&endpoints, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_raw_ping() {
        let live = raw_responder("+PONG\r\n").await;
        let wrong = raw_responder("HTTP/1.1 400 Bad Request\r\n").await;

        assert!(raw_ping("127.0.0.1", &[wrong, live], Duration::from_secs(2)).await);
        assert!(!raw_ping("127.0.0.1", &[wrong], Duration::from_secs(2)).await);
    }
}
