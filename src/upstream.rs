//! One-shot UDP exchanges with the upstream recursive resolver.
//!
//! Every query gets its own socket and one send. Datagrams whose transaction
//! id does not match the query are dropped while the timeout runs. There is
//! no retransmission and no TCP fallback for truncated replies.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::time::timeout_at;

use crate::codec::{build_query, parse};
use crate::errors::{GatewayError, GatewayResult};
use crate::metrics::UPSTREAM_REQUEST_DURATION;
use crate::types::RecordType;

pub const DEFAULT_UPSTREAM: &str = "8.8.8.8:53";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
/// Replies larger than the classic UDP limit are cut here.
pub const MAX_UDP_RESPONSE: usize = 512;

#[async_trait::async_trait]
pub trait Upstream: Send + Sync {
    /// Rendered answer lines for one record type of `domain`.
    async fn query(&self, domain: &str, record_type: RecordType) -> GatewayResult<Vec<String>>;
}

pub struct UdpUpstream {
    pub addr: SocketAddr,
    pub timeout: Duration,
}

impl UdpUpstream {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self { addr, timeout }
    }
}

#[async_trait::async_trait]
impl Upstream for UdpUpstream {
    async fn query(&self, domain: &str, record_type: RecordType) -> GatewayResult<Vec<String>> {
        resolve(domain, record_type, self.addr, self.timeout).await
    }
}

pub async fn resolve(domain: &str, record_type: RecordType, upstream: SocketAddr, wait: Duration) -> GatewayResult<Vec<String>> {
    let query = build_query(domain, record_type)?;

    let start = Instant::now();
    let result = exchange(&query, upstream, wait).await;
    let elapsed = start.elapsed();

    let outcome = match &result {
        Ok(_) => "ok",
        Err(GatewayError::Timeout(_)) => "timeout",
        Err(_) => "error",
    };
    UPSTREAM_REQUEST_DURATION.with_label_values(&[record_type.as_str(), outcome]).observe(elapsed.as_secs_f64());

    let reply = result?;
    tracing::debug!("{} {} answered by {} in {:.4}s ({} bytes)", record_type, domain, upstream, elapsed.as_secs_f64(), reply.len());
    Ok(parse(&reply))
}

async fn exchange(query: &[u8], upstream: SocketAddr, wait: Duration) -> GatewayResult<Vec<u8>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(GatewayError::Transport)?;
    socket.connect(upstream).await.map_err(GatewayError::Transport)?;
    socket.send(query).await.map_err(GatewayError::Transport)?;

    let deadline = tokio::time::Instant::now() + wait;
    let mut buf = vec![0u8; MAX_UDP_RESPONSE];
    loop {
        let len = match timeout_at(deadline, socket.recv(&mut buf)).await {
            Ok(received) => received.map_err(GatewayError::Transport)?,
            Err(_) => return Err(GatewayError::Timeout(wait)),
        };
        if len >= 2 && buf[..2] == query[..2] {
            buf.truncate(len);
            return Ok(buf);
        }
        tracing::warn!("Dropping {} byte datagram from {} with a different transaction id", len, upstream);
    }
}
