#![allow(dead_code)]
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dns_gateway::codec::name;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;

/// UDP resolver stand-in.
///
/// A queries for `hostN.<anything>` are answered with `10.0.0.N`, MX with
/// `mail.<qname>` preference 10, TXT with two strings. AAAA queries are
/// never answered so the caller times out. Other types get an empty answer.
pub struct MockUpstream {
    addr: SocketAddr,
    requests: Arc<AtomicUsize>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockUpstream {
    pub async fn start() -> std::io::Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        let addr = socket.local_addr()?;
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = requests.clone();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut buf = vec![0u8; 512];
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    result = socket.recv_from(&mut buf) => {
                        if let Ok((len, peer)) = result {
                            counter.fetch_add(1, Ordering::SeqCst);
                            if let Some(response) = Self::build_response(&buf[..len]) {
                                let _ = socket.send_to(&response, peer).await;
                            }
                        }
                    }
                }
            }
        });

        Ok(Self { addr, requests, shutdown_tx: Some(shutdown_tx) })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn build_response(query: &[u8]) -> Option<Vec<u8>> {
        let (qname, end) = name::decode(query, 12).ok()?;
        let qtype = u16::from_be_bytes([query[end], query[end + 1]]);

        let rdatas: Vec<(u16, Vec<u8>)> = match qtype {
            1 => {
                let n = qname
                    .split('.')
                    .next()
                    .and_then(|l| l.strip_prefix("host"))
                    .and_then(|n| n.parse::<u8>().ok())
                    .unwrap_or(1);
                vec![(1, vec![10, 0, 0, n])]
            }
            15 => {
                let mut rdata = vec![0x00, 0x0A, 4];
                rdata.extend_from_slice(b"mail");
                rdata.extend_from_slice(&[0xC0, 0x0C]);
                vec![(15, rdata)]
            }
            16 => vec![(16, b"\x06v=spf1\x04-all".to_vec())],
            28 => return None,
            _ => Vec::new(),
        };

        let mut resp = query[..end + 4].to_vec();
        resp[2] = 0x81;
        resp[3] = 0x80;
        resp[6..8].copy_from_slice(&(rdatas.len() as u16).to_be_bytes());
        for (rtype, rdata) in rdatas {
            resp.extend_from_slice(&[0xC0, 0x0C]);
            resp.extend_from_slice(&rtype.to_be_bytes());
            resp.extend_from_slice(&[0x00, 0x01, 0x00, 0x00, 0x01, 0x2C]);
            resp.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
            resp.extend_from_slice(&rdata);
        }
        Some(resp)
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
