use std::net::SocketAddr;

use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_gauge_vec, register_histogram_vec, register_int_counter_vec,
    Encoder, Gauge, GaugeVec, HistogramVec, IntCounterVec, TextEncoder,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

lazy_static! {
    pub static ref CLIENT_QUERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "gateway_client_queries_total",
        "Counter of client queries by where the answer came from.",
        &["source"]
    ).unwrap();

    pub static ref CACHE_LOOKUPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "gateway_cache_lookups_total",
        "Counter of cache lookups by result (hit, miss, expired).",
        &["result"]
    ).unwrap();

    pub static ref CACHE_ENTRIES: Gauge = register_gauge!(
        "gateway_cache_entries",
        "The number of rows in the cache store, fresh or not."
    ).unwrap();

    pub static ref UPSTREAM_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "gateway_upstream_request_duration_seconds",
        "Histogram of the time each upstream round-trip took.",
        &["qtype", "outcome"],
        vec![0.001, 0.002, 0.004, 0.008, 0.016, 0.032, 0.064, 0.128, 0.256, 0.512, 1.024, 2.048, 4.096, 8.192]
    ).unwrap();

    pub static ref BUILD_INFO: GaugeVec = register_gauge_vec!(
        "gateway_build_info",
        "A metric with a constant '1' value labeled by the gateway version.",
        &["version"]
    ).unwrap();
}

/// Render every registered metric in the text exposition format.
pub fn render() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!("[prometheus] Failed to encode metrics: {}", e);
    }
    buffer
}

/// Serve the metrics over a bare HTTP/1.1 listener on `addr`.
pub fn spawn_exporter(addr: SocketAddr) -> tokio::task::JoinHandle<()> {
    BUILD_INFO.with_label_values(&[env!("CARGO_PKG_VERSION")]).set(1.0);

    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!("[prometheus] Failed to bind metrics listener on {}: {}", addr, e);
                return;
            }
        };
        tracing::info!("[prometheus] Serving metrics on {}", addr);

        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 8192];
                let read = tokio::time::timeout(std::time::Duration::from_secs(2), stream.read(&mut buf)).await;
                if let Ok(Ok(n)) = read {
                    if n > 0 && buf.starts_with(b"GET ") {
                        let body = render();
                        let header = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                            body.len()
                        );
                        let mut response = header.into_bytes();
                        response.extend_from_slice(&body);
                        let _ = tokio::time::timeout(std::time::Duration::from_secs(2), stream.write_all(&response)).await;
                        let _ = stream.shutdown().await;
                    }
                }
            });
        }
    })
}
