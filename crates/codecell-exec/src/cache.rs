//! Result Cache (spec §4.4): an LRU cache, keyed by a content-addressed digest
//! of code + context + tool versions, storing whole [`ExecutionResult`]s so
//! identical calls skip the worker pool entirely.
//!
//! # Environment variable
//!
//! `PYEXEC_RESULT_CACHE_SIZE` — maximum number of entries; defaults to the
//! value in [`CacheConfig::default`] (`256`) when unset or unparseable.
//!
//! # Thread safety
//!
//! [`ResultCache`] wraps its inner LRU cache in a `Mutex` so it can be shared
//! across threads via the `global()` singleton.

use std::num::NonZeroUsize;
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::types::{CacheConfig, ExecutionResult, ToolVersions};

/// Bumped whenever [`CacheEntry`]'s on-disk shape changes. A persisted file
/// written by an older/newer version is discarded rather than erroring out
/// (spec §4.4 "unknown persistence versions are ignored, not fatal").
pub const PERSISTENCE_VERSION: u32 = 1;

/// Three-segment content-addressed cache key: `H(code)_H(context)_H(toolVersions)`
/// (spec §4.4). Kept as three separate hex digests, not one combined hash, so
/// [`ResultCache::invalidate_by_tool_version`] can match on the tool-versions
/// segment alone.
pub type CacheKey = String;

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Recursively canonicalize a JSON value for stable hashing: object keys are
/// sorted, array order is preserved, and `null` is emitted as the literal
/// `null` rather than being dropped (spec §4.4 "canonicalization").
pub fn canonicalize(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", parts.join(","))
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    let key_json = serde_json::to_string(k).unwrap_or_else(|_| "\"\"".to_string());
                    format!("{}:{}", key_json, canonicalize(&map[k]))
                })
                .collect();
            format!("{{{}}}", parts.join(","))
        }
    }
}

/// Compute the three-segment cache key for `code` + `context` + `tool_versions`.
pub fn cache_key(code: &str, context: &Value, tool_versions: &ToolVersions) -> CacheKey {
    let code_hash = sha256_hex(code.as_bytes());
    let context_hash = sha256_hex(canonicalize(context).as_bytes());
    let versions_canon = canonicalize(&serde_json::to_value(tool_versions).unwrap_or(Value::Null));
    let versions_hash = sha256_hex(versions_canon.as_bytes());
    format!("{code_hash}_{context_hash}_{versions_hash}")
}

/// Extract the tool-versions segment from a previously computed [`CacheKey`].
fn tool_versions_segment(key: &CacheKey) -> Option<&str> {
    key.rsplit('_').next()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    result: ExecutionResult,
    stored_at_unix_secs: u64,
}

/// One persisted cache entry, keyed by its [`CacheKey`] string for on-disk
/// storage (a `BTreeMap` serializes to a stable, diffable JSON object).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedEntry {
    key: CacheKey,
    entry: CacheEntry,
}

/// The on-disk shape written by [`ResultCache::persist`] and read back by
/// [`ResultCache::load_persisted`]. `version` lets a future format change
/// detect and discard older/newer files instead of misinterpreting them.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedFile {
    version: u32,
    entries: Vec<PersistedEntry>,
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// LRU + TTL cache mapping [`CacheKey`] → [`ExecutionResult`], with optional
/// JSON-file persistence across process restarts.
pub struct ResultCache {
    inner: Mutex<LruCache<CacheKey, CacheEntry>>,
    config: CacheConfig,
}

impl ResultCache {
    pub fn new(config: CacheConfig) -> Self {
        let cap = NonZeroUsize::new(config.max_entries.max(1)).expect("capacity >= 1");
        let cache = Self {
            inner: Mutex::new(LruCache::new(cap)),
            config,
        };
        if let Some(path) = cache.config.persistence_path.clone() {
            if let Err(err) = cache.load_persisted(&path) {
                warn!(path, error = %err, "failed to load persisted result cache, starting empty");
            }
        }
        cache
    }

    /// Return the process-wide singleton [`ResultCache`], configured from
    /// [`CacheConfig::default`] overridden by `PYEXEC_RESULT_CACHE_SIZE`.
    pub fn global() -> &'static ResultCache {
        static INSTANCE: OnceLock<ResultCache> = OnceLock::new();
        INSTANCE.get_or_init(|| {
            let mut config = CacheConfig::default();
            if let Some(size) = std::env::var("PYEXEC_RESULT_CACHE_SIZE")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
            {
                config.max_entries = size;
            }
            ResultCache::new(config)
        })
    }

    /// Look up `key`. Returns `None` on a miss or if the stored entry has
    /// aged past `ttl_seconds`; an expired entry is evicted on lookup.
    pub fn get(&self, key: &CacheKey) -> Option<ExecutionResult> {
        if !self.config.enabled {
            return None;
        }
        let mut inner = self.inner.lock().expect("ResultCache mutex poisoned");
        let expired = match inner.peek(key) {
            Some(entry) => self.is_expired(entry),
            None => return None,
        };
        if expired {
            inner.pop(key);
            return None;
        }
        inner.get(key).map(|entry| entry.result.clone())
    }

    /// Insert `key` → `result`. Silently skipped if the cache is disabled, the
    /// result is an error (spec §4.4 "Eligibility: a result is cached only if
    /// success=true ... Errors are not cached"), or the serialized result
    /// exceeds `max_entry_bytes` (oversized results are not cached, not an
    /// error).
    pub fn set(&self, key: CacheKey, result: ExecutionResult) {
        if !self.config.enabled || !result.success {
            return;
        }
        let size = serde_json::to_vec(&result).map(|v| v.len()).unwrap_or(usize::MAX);
        if size > self.config.max_entry_bytes {
            debug!(size, max = self.config.max_entry_bytes, "result too large to cache");
            return;
        }
        let entry = CacheEntry {
            result,
            stored_at_unix_secs: now_unix_secs(),
        };
        self.inner
            .lock()
            .expect("ResultCache mutex poisoned")
            .put(key, entry);
    }

    /// Evict every entry whose tool-versions segment matches `tool_versions`'
    /// canonical hash — used when a tool's version bumps and its previously
    /// cached results must no longer be served (spec §4.4).
    pub fn invalidate_by_tool_version(&self, tool_versions: &ToolVersions) {
        let versions_canon = canonicalize(&serde_json::to_value(tool_versions).unwrap_or(Value::Null));
        let target_hash = sha256_hex(versions_canon.as_bytes());
        let mut inner = self.inner.lock().expect("ResultCache mutex poisoned");
        let stale: Vec<CacheKey> = inner
            .iter()
            .filter(|(key, _)| tool_versions_segment(key) == Some(target_hash.as_str()))
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            inner.pop(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("ResultCache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().expect("ResultCache mutex poisoned").clear();
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        if self.config.ttl_seconds == 0 {
            return false;
        }
        now_unix_secs().saturating_sub(entry.stored_at_unix_secs) > self.config.ttl_seconds
    }

    /// Write every non-expired entry to `path` as a [`PersistedFile`].
    pub fn persist(&self, path: &str) -> std::io::Result<()> {
        let inner = self.inner.lock().expect("ResultCache mutex poisoned");
        let entries: Vec<PersistedEntry> = inner
            .iter()
            .filter(|(_, entry)| !self.is_expired(entry))
            .map(|(key, entry)| PersistedEntry {
                key: key.clone(),
                entry: entry.clone(),
            })
            .collect();
        drop(inner);
        let file = PersistedFile {
            version: PERSISTENCE_VERSION,
            entries,
        };
        let json = serde_json::to_vec_pretty(&file)?;
        std::fs::write(path, json)
    }

    /// Load entries from `path` written by [`Self::persist`]. A file with a
    /// mismatched `version` is discarded (treated as empty), not an error.
    fn load_persisted(&self, path: &str) -> std::io::Result<()> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err),
        };
        let file: PersistedFile = match serde_json::from_slice(&bytes) {
            Ok(f) => f,
            Err(err) => {
                warn!(path, error = %err, "persisted result cache file is not valid JSON, ignoring");
                return Ok(());
            }
        };
        if file.version != PERSISTENCE_VERSION {
            warn!(
                path,
                found = file.version,
                expected = PERSISTENCE_VERSION,
                "persisted result cache version mismatch, ignoring"
            );
            return Ok(());
        }
        let mut inner = self.inner.lock().expect("ResultCache mutex poisoned");
        for persisted in file.entries {
            if !self.is_expired(&persisted.entry) {
                inner.put(persisted.key, persisted.entry);
            }
        }
        Ok(())
    }
}
