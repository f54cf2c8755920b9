//! File-based response cache with TTL freshness and optional gzip.
//!
//! Entries are keyed by `(entity, operation, params)` and stored as one file
//! each. Compressed entries live under `compressed/`, uncompressed entries at
//! the root, so the two modes never share a path. Freshness is judged by file
//! modification time only; a changed upstream value is not detected until the
//! entry ages out.
//!
//! Every failure is logged and counted, then degrades to a miss (reads) or a
//! no-op (writes). The cache never fails a pipeline stage.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use schemalib_shared::io::{ensure_dir, write_atomic, write_json};
use schemalib_shared::{CacheConfig, Result, SchemaLibError};

const COMPRESSED_DIR: &str = "compressed";
const STATS_DIR: &str = "stats";
const STATS_FILE: &str = "cache_stats.json";
const PLAIN_EXT: &str = ".json";
const GZ_EXT: &str = ".json.gz";

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Which entries [`SmartCache::clear`] removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearScope {
    All,
    Operation(String),
    OlderThan(Duration),
}

/// Snapshot of counters plus on-disk size.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub compressed_writes: u64,
    pub errors: u64,
    pub total_requests: u64,
    /// Hits over requests, as a percentage.
    pub hit_rate: f64,
    pub entry_count: usize,
    pub compressed_entries: usize,
    pub size_bytes: u64,
}

/// One entry file on disk.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntryInfo {
    pub key: String,
    pub operation: String,
    pub compressed: bool,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
    #[serde(skip)]
    pub path: PathBuf,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    compressed_writes: AtomicU64,
    errors: AtomicU64,
}

// ---------------------------------------------------------------------------
// SmartCache
// ---------------------------------------------------------------------------

/// Shared, process-safe (last writer wins) response cache.
#[derive(Debug)]
pub struct SmartCache {
    root: PathBuf,
    max_age: Duration,
    compression: bool,
    counters: Counters,
}

impl SmartCache {
    /// Open (and create) the cache directory described by `config`.
    pub fn open(config: &CacheConfig) -> Result<Self> {
        ensure_dir(&config.dir)?;
        ensure_dir(&config.dir.join(COMPRESSED_DIR))?;
        ensure_dir(&config.dir.join(STATS_DIR))?;

        info!(
            dir = %config.dir.display(),
            max_age_secs = config.max_age.as_secs(),
            compression = config.compression,
            "cache opened"
        );

        Ok(Self {
            root: config.dir.clone(),
            max_age: config.max_age,
            compression: config.compression,
            counters: Counters::default(),
        })
    }

    /// Cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// SHA-256 hex of entity, operation, and params sorted by name.
    ///
    /// Every component is length-prefixed, so no two distinct inputs share
    /// a preimage.
    pub fn key(entity: &str, operation: &str, params: &[(&str, &str)]) -> String {
        let mut sorted: Vec<&(&str, &str)> = params.iter().collect();
        sorted.sort();

        let mut hasher = Sha256::new();
        let mut component = |part: &str| {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        };
        component(entity);
        component(operation);
        for (k, v) in sorted {
            component(k);
            component(v);
        }
        format!("{:x}", hasher.finalize())
    }

    /// Fetch a fresh payload, or `None` on miss, expiry, or read failure.
    pub fn get(&self, entity: &str, operation: &str, params: &[(&str, &str)]) -> Option<Value> {
        let key = Self::key(entity, operation, params);

        // Preferred mode first, then the other, so toggling compression
        // keeps old entries usable.
        let candidates = [
            self.entry_path(&key, operation, self.compression),
            self.entry_path(&key, operation, !self.compression),
        ];

        for path in candidates {
            let modified = match std::fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(_) => continue,
            };

            if !is_fresh(modified, SystemTime::now(), self.max_age) {
                debug!(entity, operation, "cache entry expired");
                continue;
            }

            match read_entry(&path) {
                Ok(payload) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(entity, operation, "cache hit");
                    return Some(payload);
                }
                Err(e) => {
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(path = %path.display(), error = %e, "unreadable cache entry");
                }
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        debug!(entity, operation, "cache miss");
        None
    }

    /// Typed variant of [`get`](Self::get); a payload of the wrong shape is a miss.
    pub fn get_as<T: DeserializeOwned>(
        &self,
        entity: &str,
        operation: &str,
        params: &[(&str, &str)],
    ) -> Option<T> {
        let value = self.get(entity, operation, params)?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(entity, operation, error = %e, "cached payload has unexpected shape");
                None
            }
        }
    }

    /// Store `payload`, fully replacing any previous entry for the key.
    pub fn put(&self, entity: &str, operation: &str, params: &[(&str, &str)], payload: &Value) {
        let key = Self::key(entity, operation, params);
        let path = self.entry_path(&key, operation, self.compression);

        let parameters: Map<String, Value> = params
            .iter()
            .map(|(k, v)| ((*k).to_string(), Value::from(*v)))
            .collect();
        let envelope = json!({
            "data": payload,
            "metadata": {
                "cachedAt": Utc::now().to_rfc3339(),
                "entity": entity,
                "operation": operation,
                "cacheKey": key,
                "parameters": parameters,
            }
        });

        match self.write_entry(&path, &envelope) {
            Ok(()) => {
                self.counters.writes.fetch_add(1, Ordering::Relaxed);
                if self.compression {
                    self.counters.compressed_writes.fetch_add(1, Ordering::Relaxed);
                }
                debug!(entity, operation, path = %path.display(), "cache write");
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(entity, operation, error = %e, "cache write failed");
            }
        }
    }

    /// Typed variant of [`put`](Self::put).
    pub fn put_as<T: Serialize>(
        &self,
        entity: &str,
        operation: &str,
        params: &[(&str, &str)],
        payload: &T,
    ) {
        match serde_json::to_value(payload) {
            Ok(value) => self.put(entity, operation, params, &value),
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(entity, operation, error = %e, "cache payload not serializable");
            }
        }
    }

    /// Remove entries matching `scope`. Returns how many were removed.
    pub fn clear(&self, scope: &ClearScope) -> usize {
        let now = SystemTime::now();
        let mut removed = 0;

        for entry in self.entries() {
            let matches = match scope {
                ClearScope::All => true,
                ClearScope::Operation(op) => entry.operation == sanitize_operation(op),
                ClearScope::OlderThan(age) => {
                    let modified: SystemTime = entry.modified.into();
                    now.duration_since(modified).is_ok_and(|a| a > *age)
                }
            };
            if !matches {
                continue;
            }
            match std::fs::remove_file(&entry.path) {
                Ok(()) => removed += 1,
                Err(e) => {
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(path = %entry.path.display(), error = %e, "failed to remove cache entry");
                }
            }
        }

        info!(?scope, removed, "cache cleared");
        removed
    }

    /// All entry files currently on disk.
    pub fn entries(&self) -> Vec<CacheEntryInfo> {
        let mut out = Vec::new();
        collect_entries(&self.root, false, &mut out);
        collect_entries(&self.root.join(COMPRESSED_DIR), true, &mut out);
        out
    }

    /// Current counters plus a scan of the directory.
    pub fn stats(&self) -> CacheStats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let entries = self.entries();

        CacheStats {
            hits,
            misses,
            writes: self.counters.writes.load(Ordering::Relaxed),
            compressed_writes: self.counters.compressed_writes.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            total_requests: total,
            hit_rate: if total == 0 {
                0.0
            } else {
                (hits as f64 / total as f64 * 10_000.0).round() / 100.0
            },
            entry_count: entries.len(),
            compressed_entries: entries.iter().filter(|e| e.compressed).count(),
            size_bytes: entries.iter().map(|e| e.size_bytes).sum(),
        }
    }

    /// Write `stats/cache_stats.json` with the counters and the oldest entries.
    pub fn flush_stats(&self) -> Result<PathBuf> {
        let mut entries = self.entries();
        entries.sort_by_key(|e| e.modified);
        entries.truncate(10);

        let path = self.root.join(STATS_DIR).join(STATS_FILE);
        let report = json!({
            "generatedAt": Utc::now().to_rfc3339(),
            "cacheDir": self.root.display().to_string(),
            "maxAgeHours": self.max_age.as_secs_f64() / 3600.0,
            "compression": self.compression,
            "stats": self.stats(),
            "oldestEntries": entries,
        });
        write_json(&path, &report)?;
        Ok(path)
    }

    fn entry_path(&self, key: &str, operation: &str, compressed: bool) -> PathBuf {
        let op = sanitize_operation(operation);
        if compressed {
            self.root
                .join(COMPRESSED_DIR)
                .join(format!("{key}_{op}{GZ_EXT}"))
        } else {
            self.root.join(format!("{key}_{op}{PLAIN_EXT}"))
        }
    }

    fn write_entry(&self, path: &Path, envelope: &Value) -> Result<()> {
        let raw = serde_json::to_vec(envelope)
            .map_err(|e| SchemaLibError::Cache(format!("serialize entry: {e}")))?;

        let bytes = if path.to_string_lossy().ends_with(GZ_EXT) {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(&raw)
                .and_then(|_| encoder.finish())
                .map_err(|e| SchemaLibError::Cache(format!("compress entry: {e}")))?
        } else {
            raw
        };

        write_atomic(path, &bytes)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Fresh iff younger than `max_age`. Timestamps in the future count as fresh.
pub fn is_fresh(modified: SystemTime, now: SystemTime, max_age: Duration) -> bool {
    match now.duration_since(modified) {
        Ok(age) => age < max_age,
        Err(_) => true,
    }
}

/// Operation names become part of file names.
fn sanitize_operation(op: &str) -> String {
    op.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

fn read_entry(path: &Path) -> Result<Value> {
    let bytes = std::fs::read(path).map_err(|e| SchemaLibError::io(path, e))?;

    let text = if path.to_string_lossy().ends_with(GZ_EXT) {
        let mut decoded = String::new();
        GzDecoder::new(bytes.as_slice())
            .read_to_string(&mut decoded)
            .map_err(|e| SchemaLibError::Cache(format!("decompress {}: {e}", path.display())))?;
        decoded
    } else {
        String::from_utf8(bytes)
            .map_err(|e| SchemaLibError::Cache(format!("{}: {e}", path.display())))?
    };

    let mut envelope: Value = serde_json::from_str(&text)
        .map_err(|e| SchemaLibError::Cache(format!("{}: {e}", path.display())))?;

    envelope
        .get_mut("data")
        .map(Value::take)
        .ok_or_else(|| SchemaLibError::Cache(format!("{}: missing data", path.display())))
}

/// Parse `<64-hex key>_<op>.json[.gz]` file names.
fn parse_entry_name(name: &str, compressed: bool) -> Option<(String, String)> {
    let stem = if compressed {
        name.strip_suffix(GZ_EXT)?
    } else {
        name.strip_suffix(PLAIN_EXT)?
    };
    let (key, op) = stem.split_once('_')?;
    if key.len() != 64 || !key.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some((key.to_string(), op.to_string()))
}

fn collect_entries(dir: &Path, compressed: bool, out: &mut Vec<CacheEntryInfo>) {
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in read_dir.filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some((key, operation)) = parse_entry_name(&name, compressed) else {
            continue;
        };
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        out.push(CacheEntryInfo {
            key,
            operation,
            compressed,
            size_bytes: meta.len(),
            modified,
            path: entry.path(),
        });
    }
}
