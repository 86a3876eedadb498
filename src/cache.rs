//! Append-only result cache.
//!
//! Every successful resolution appends one row; rows are never rewritten or
//! removed. Freshness is decided at lookup time from the row's creation
//! timestamp and ttl, so stale rows stay in the store forever and the store
//! grows by one row per cache miss.
//!
//! The in-memory index mirrors the CSV store. Appends (memory and file) are
//! serialized by one async mutex; lookups only take the read side of the
//! index lock.
//!
//! Ages are computed between UTC instants so wall-clock shifts (DST) do not
//! move expiry. Only the CSV text carries local time, at second resolution.

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;

use crate::errors::{GatewayError, GatewayResult};
use crate::metrics::{CACHE_ENTRIES, CACHE_LOOKUPS_TOTAL};

pub const DEFAULT_TTL_SECS: u64 = 3600;
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const HEADER: [&str; 4] = ["Domain", "Timestamp", "TTL", "Records"];

/// Which stored row for a domain decides a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LookupPolicy {
    /// The first row ever stored for the domain is authoritative; once it
    /// expires every lookup for that domain misses.
    #[default]
    FirstMatch,
    /// The most recently stored row is evaluated.
    LatestMatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub domain: String,
    pub created_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    pub records: Vec<String>,
}

impl CacheEntry {
    pub fn new(domain: &str, records: Vec<String>, ttl_seconds: u64, now: DateTime<Utc>) -> Self {
        Self {
            domain: domain.to_string(),
            created_at: now,
            ttl_seconds,
            records,
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let age_ms = now.signed_duration_since(self.created_at).num_milliseconds();
        let ttl_ms = i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX).saturating_mul(1000);
        age_ms < ttl_ms
    }

    fn to_row(&self) -> [String; 4] {
        [
            self.domain.clone(),
            self.created_at.with_timezone(&Local).format(TIMESTAMP_FORMAT).to_string(),
            self.ttl_seconds.to_string(),
            self.records.join("\n"),
        ]
    }

    fn from_row(row: &csv::StringRecord) -> GatewayResult<Self> {
        let field = |i: usize| row.get(i).ok_or_else(|| GatewayError::CacheIo(format!("missing column {}", i)));
        let timestamp = field(1)?;
        let wall_clock = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
            .map_err(|e| GatewayError::CacheIo(format!("bad timestamp '{}': {}", timestamp, e)))?;
        // An ambiguous fall-back time takes the earlier instant.
        let created_at = Local
            .from_local_datetime(&wall_clock)
            .earliest()
            .ok_or_else(|| GatewayError::CacheIo(format!("timestamp '{}' does not exist in local time", timestamp)))?
            .with_timezone(&Utc);
        let ttl_seconds = field(2)?
            .trim()
            .parse::<u64>()
            .map_err(|e| GatewayError::CacheIo(format!("bad ttl: {}", e)))?;
        let records = match field(3)? {
            "" => Vec::new(),
            text => text.split('\n').map(str::to_string).collect(),
        };
        Ok(Self { domain: field(0)?.to_string(), created_at, ttl_seconds, records })
    }
}

pub struct ResultCache {
    entries: RwLock<Vec<CacheEntry>>,
    append_lock: AsyncMutex<()>,
    store: Option<PathBuf>,
    policy: LookupPolicy,
}

impl ResultCache {
    /// Cache without a backing store; contents are lost on exit.
    pub fn in_memory(policy: LookupPolicy) -> Self {
        Self { entries: RwLock::new(Vec::new()), append_lock: AsyncMutex::new(()), store: None, policy }
    }

    /// Open the CSV store at `path`, creating it with a header row when it
    /// does not exist. An unreadable store degrades to an empty cache; the
    /// path is still used for appends.
    pub fn open(path: impl Into<PathBuf>, policy: LookupPolicy) -> Self {
        let path = path.into();
        let entries = if path.exists() {
            match load_rows(&path) {
                Ok(entries) => {
                    tracing::info!("[cache] Loaded {} entries from {}", entries.len(), path.display());
                    entries
                }
                Err(e) => {
                    tracing::warn!("[cache] Store {} unreadable, starting empty: {}", path.display(), e);
                    Vec::new()
                }
            }
        } else {
            match create_store(&path) {
                Ok(()) => tracing::info!("[cache] Created new store at {}", path.display()),
                Err(e) => tracing::warn!("[cache] Could not create store {}: {}", path.display(), e),
            }
            Vec::new()
        };
        CACHE_ENTRIES.set(entries.len() as f64);

        Self { entries: RwLock::new(entries), append_lock: AsyncMutex::new(()), store: Some(path), policy }
    }

    pub fn store_path(&self) -> Option<&Path> {
        self.store.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records stored for `domain` if the deciding row is still fresh at `now`.
    pub fn lookup(&self, domain: &str, now: DateTime<Utc>) -> Option<Vec<String>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let candidate = match self.policy {
            LookupPolicy::FirstMatch => entries.iter().find(|e| e.domain == domain),
            LookupPolicy::LatestMatch => entries.iter().rev().find(|e| e.domain == domain),
        };

        match candidate {
            Some(entry) if entry.is_fresh(now) => {
                CACHE_LOOKUPS_TOTAL.with_label_values(&["hit"]).inc();
                Some(entry.records.clone())
            }
            Some(_) => {
                CACHE_LOOKUPS_TOTAL.with_label_values(&["expired"]).inc();
                None
            }
            None => {
                CACHE_LOOKUPS_TOTAL.with_label_values(&["miss"]).inc();
                None
            }
        }
    }

    /// Append a new entry. Prior entries for the same domain are left as
    /// they are. The entry is visible to lookups even when persisting it
    /// fails; the store error is returned for the caller to log.
    pub async fn insert(&self, domain: &str, records: Vec<String>, ttl_seconds: u64, now: DateTime<Utc>) -> GatewayResult<()> {
        let entry = CacheEntry::new(domain, records, ttl_seconds, now);
        let _guard = self.append_lock.lock().await;

        let persisted = match &self.store {
            Some(path) => append_row(path, &entry).await,
            None => Ok(()),
        };

        let count = {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            entries.push(entry);
            entries.len()
        };
        CACHE_ENTRIES.set(count as f64);
        persisted
    }
}

fn load_rows(path: &Path) -> GatewayResult<Vec<CacheEntry>> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).flexible(true).from_path(path)?;
    let mut entries = Vec::new();
    for (idx, result) in rdr.records().enumerate() {
        let parsed = match result {
            Ok(row) => CacheEntry::from_row(&row),
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => Err(e.into()),
        };
        match parsed {
            Ok(entry) => entries.push(entry),
            // Row numbers are 1-based and the header is row 1.
            Err(e) => tracing::warn!("[cache] Skipping unreadable row {} in {}: {}", idx + 2, path.display(), e),
        }
    }
    Ok(entries)
}

fn create_store(path: &Path) -> GatewayResult<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(HEADER)?;
    wtr.flush().map_err(|e| GatewayError::CacheIo(e.to_string()))
}

async fn append_row(path: &Path, entry: &CacheEntry) -> GatewayResult<()> {
    let io_err = |e: std::io::Error| GatewayError::CacheIo(format!("{}: {}", path.display(), e));

    let needs_header = match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len() == 0,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => return Err(io_err(e)),
    };

    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
    if needs_header {
        wtr.write_record(HEADER)?;
    }
    wtr.write_record(entry.to_row())?;
    let bytes = wtr.into_inner().map_err(|e| GatewayError::CacheIo(e.to_string()))?;

    // One write per row so a row is never split around another writer's.
    let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(path).await.map_err(io_err)?;
    file.write_all(&bytes).await.map_err(io_err)?;
    file.flush().await.map_err(io_err)?;
    Ok(())
}
