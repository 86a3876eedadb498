use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::errors::{GatewayError, GatewayResult};
use crate::metrics::CLIENT_QUERIES_TOTAL;
use crate::resolution::ResolutionService;

/// A client query is a single write of at most this many bytes.
pub const MAX_QUERY_LEN: usize = 1024;
pub const CLIENT_IO_TIMEOUT: Duration = Duration::from_secs(10);

pub struct GatewayServer {
    listener: TcpListener,
    service: Arc<ResolutionService>,
}

impl GatewayServer {
    /// Bind the client listener. This is the only failure that stops the
    /// gateway.
    pub async fn bind(addr: SocketAddr, service: Arc<ResolutionService>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind TCP {}: {}", addr, e))?;
        tracing::info!("🚀 Gateway listening for clients on {}", listener.local_addr()?);
        Ok(Self { listener, service })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` resolves. Each connection gets
    /// its own task; nothing a handler does reaches this loop.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let service = self.service.clone();
                            tokio::spawn(async move { handle_client(stream, peer, service).await });
                        }
                        Err(e) => tracing::warn!("Accept failed: {}", e),
                    }
                }
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested, no longer accepting clients");
                    return Ok(());
                }
            }
        }
    }

    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }
}

async fn handle_client(mut stream: TcpStream, peer: SocketAddr, service: Arc<ResolutionService>) {
    if let Err(e) = serve(&mut stream, peer, &service).await {
        tracing::warn!("Error handling client {}: {}", peer, e);
        CLIENT_QUERIES_TOTAL.with_label_values(&["error"]).inc();
        let _ = tokio::time::timeout(CLIENT_IO_TIMEOUT, stream.write_all(format!("Error: {}", e).as_bytes())).await;
    }
    let _ = stream.shutdown().await;
}

async fn serve(stream: &mut TcpStream, peer: SocketAddr, service: &ResolutionService) -> GatewayResult<()> {
    let mut buf = vec![0u8; MAX_QUERY_LEN];
    let n = match tokio::time::timeout(CLIENT_IO_TIMEOUT, stream.read(&mut buf)).await {
        Ok(read) => read.map_err(GatewayError::Connection)?,
        Err(_) => return Err(GatewayError::Timeout(CLIENT_IO_TIMEOUT)),
    };
    let query = String::from_utf8_lossy(&buf[..n]);
    let domain = query.trim();
    if domain.is_empty() {
        tracing::warn!("Empty query from {}", peer);
        CLIENT_QUERIES_TOTAL.with_label_values(&["error"]).inc();
        return write_payload(stream, "Error: empty query").await;
    }

    tracing::info!("=> [Incoming Query] '{}' from {}", domain, peer);
    let payload = service.resolve(domain).await;
    write_payload(stream, &payload).await
}

async fn write_payload(stream: &mut TcpStream, payload: &str) -> GatewayResult<()> {
    match tokio::time::timeout(CLIENT_IO_TIMEOUT, stream.write_all(payload.as_bytes())).await {
        Ok(written) => written.map_err(GatewayError::Connection),
        Err(_) => Err(GatewayError::Timeout(CLIENT_IO_TIMEOUT)),
    }
}
