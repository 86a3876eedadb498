use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;

use crate::cache::ResultCache;
use crate::metrics::CLIENT_QUERIES_TOTAL;
use crate::types::RecordType;
use crate::upstream::Upstream;

/// How the per-type upstream queries of one miss are issued. Either way the
/// aggregate keeps `RecordType::QUERY_ORDER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fanout {
    #[default]
    Sequential,
    Parallel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source { Cache, Upstream }

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub records: Vec<String>,
    pub source: Source,
}

impl Resolution {
    /// Client payload: one record per line, empty for no records.
    pub fn render(&self) -> String {
        self.records.join("\n")
    }
}

pub struct ResolutionService {
    cache: Arc<ResultCache>,
    upstream: Arc<dyn Upstream>,
    ttl_seconds: u64,
    fanout: Fanout,
}

impl ResolutionService {
    pub fn new(cache: Arc<ResultCache>, upstream: Arc<dyn Upstream>, ttl_seconds: u64, fanout: Fanout) -> Self {
        Self { cache, upstream, ttl_seconds, fanout }
    }

    pub async fn resolve(&self, domain: &str) -> String {
        self.lookup(domain).await.render()
    }

    pub async fn lookup(&self, domain: &str) -> Resolution {
        if let Some(records) = self.cache.lookup(domain, Utc::now()) {
            tracing::info!("     |-- [cache] HIT for '{}' ({} records)", domain, records.len());
            CLIENT_QUERIES_TOTAL.with_label_values(&["cache"]).inc();
            return Resolution { records, source: Source::Cache };
        }

        tracing::info!("     |-- [cache] MISS for '{}', querying upstream", domain);
        let records = match self.fanout {
            Fanout::Sequential => {
                let mut records = Vec::new();
                for record_type in RecordType::QUERY_ORDER {
                    records.extend(self.query_type(domain, record_type).await);
                }
                records
            }
            Fanout::Parallel => {
                let per_type = RecordType::QUERY_ORDER.map(|record_type| self.query_type(domain, record_type));
                join_all(per_type).await.into_iter().flatten().collect()
            }
        };

        if !records.is_empty() {
            if let Err(e) = self.cache.insert(domain, records.clone(), self.ttl_seconds, Utc::now()).await {
                tracing::error!("[cache] Failed to persist entry for '{}': {}", domain, e);
            }
        }
        CLIENT_QUERIES_TOTAL.with_label_values(&["upstream"]).inc();
        Resolution { records, source: Source::Upstream }
    }

    /// A failure is reported as a single line for its type and never stops
    /// the remaining types.
    async fn query_type(&self, domain: &str, record_type: RecordType) -> Vec<String> {
        match self.upstream.query(domain, record_type).await {
            Ok(lines) => lines,
            Err(e) => {
                tracing::warn!("Upstream {} query for '{}' failed: {}", record_type, domain, e);
                vec![format!("{} Record: Error querying ({})", record_type, e)]
            }
        }
    }
}
