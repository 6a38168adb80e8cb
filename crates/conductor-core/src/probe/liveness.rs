//! TCP liveness check.

use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Whether anything accepts connections on `host:port` within `limit`.
///
/// Refusal, resolution failure and timeout all read as `false`.
pub async fn probe_port(host: &str, port: u16, limit: Duration) -> bool {
    matches!(
        timeout(limit, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}
