use anyhow::Result;
use chrono::Local;
use clap::Parser;
use rolling_file::{RollingConditionBasic, RollingFileAppender};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dns_gateway::cache::ResultCache;
use dns_gateway::config::{self, Config};
use dns_gateway::metrics;
use dns_gateway::resolution::ResolutionService;
use dns_gateway::server::GatewayServer;
use dns_gateway::upstream::UdpUpstream;

// Log timestamps in local time rather than the subscriber's UTC default.
struct LocalTimer;
impl fmt::time::FormatTime for LocalTimer {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

#[derive(Parser, Debug)]
#[command(name = "dns-gateway")]
#[command(about = "A caching DNS resolution gateway", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "Gatewayfile")]
    config: PathBuf,

    /// Overrides the listen address from the config file.
    #[arg(long)]
    address: Option<String>,

    /// Overrides the upstream resolver from the config file.
    #[arg(long)]
    upstream: Option<String>,
}

fn main() -> Result<()> {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cores)
        .thread_name("gateway-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cores))
}

async fn async_main(cores: usize) -> Result<()> {
    std::fs::create_dir_all("logs").unwrap_or_default();

    let file_appender = RollingFileAppender::new(
        "logs/dns-gateway.log",
        RollingConditionBasic::new().daily(),
        30,
    )?;

    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false).with_timer(LocalTimer))
        .with(fmt::layer().with_writer(std::io::stdout).with_timer(LocalTimer))
        .init();

    let args = Args::parse();
    info!("Starting DNS Gateway version {}", env!("CARGO_PKG_VERSION"));
    info!(">>> Running on {} worker threads", cores);

    let mut cfg = Config::load(&args.config)?;
    if let Some(addr) = &args.address {
        cfg.listen = config::parse_addr(addr, config::DEFAULT_LISTEN_PORT)?;
    }
    if let Some(upstream) = &args.upstream {
        cfg.upstream = config::parse_addr(upstream, 53)?;
    }
    info!(
        ">>> Upstream {} (timeout {:?}, fanout {:?}), cache ttl {}s",
        cfg.upstream, cfg.timeout, cfg.fanout, cfg.cache.ttl_seconds
    );

    let cache = Arc::new(match &cfg.cache.path {
        Some(path) => ResultCache::open(path, cfg.cache.lookup),
        None => {
            info!("[cache] Store disabled, caching in memory only");
            ResultCache::in_memory(cfg.cache.lookup)
        }
    });
    let upstream = Arc::new(UdpUpstream::new(cfg.upstream, cfg.timeout));
    let service = Arc::new(ResolutionService::new(cache, upstream, cfg.cache.ttl_seconds, cfg.fanout));

    let _metrics = cfg.metrics.map(metrics::spawn_exporter);

    let server = GatewayServer::bind(cfg.listen, service).await?;
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
}
