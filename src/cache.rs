//! Layered result caching for repeated queries.
//!
//! Two independent maps — one for ranked search results, one for
//! module/function metadata lookups — share a single generation counter.
//! `clear()` bumps the generation and empties both maps, so no stale entry
//! can survive a clear or a store rebuild. Entries have no TTL: the store
//! is immutable between rebuilds, which makes cached values correct for the
//! lifetime of the current generation.
//!
//! Keys are exact-normalized strings: query text lowercased and trimmed,
//! filter values rendered in a fixed order, limit clamped before keying.
//! No fuzzy or semantic key matching is attempted.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tracing::debug;

use crate::error::Result;
use crate::models::{CacheClearReport, CacheStatistics};

/// Which of the two maps a key lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Search,
    Metadata,
}

struct CacheEntry {
    value: serde_json::Value,
    generation: u64,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
}

/// The cache layer shared by all tool-facing operations.
pub struct CacheLayer {
    generation: AtomicU64,
    search: RwLock<HashMap<String, CacheEntry>>,
    metadata: RwLock<HashMap<String, CacheEntry>>,
}

impl Default for CacheLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheLayer {
    pub fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            search: RwLock::new(HashMap::new()),
            metadata: RwLock::new(HashMap::new()),
        }
    }

    fn map(&self, kind: CacheKind) -> &RwLock<HashMap<String, CacheEntry>> {
        match kind {
            CacheKind::Search => &self.search,
            CacheKind::Metadata => &self.metadata,
        }
    }

    /// Generation counter value for pinning. Read it while holding whatever
    /// lock guards the snapshot the computed values derive from, so a
    /// concurrent rebuild cannot slip a stale entry into the new generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Return the cached value for `key` if present under the pinned
    /// `generation`; otherwise run `compute`, store its result, and return
    /// it. The second tuple element reports whether this was a cache hit.
    ///
    /// The lock is never held across the compute await. If a clear lands
    /// while a value is being computed, the late insert is skipped — the
    /// result is still returned to the caller, it just isn't cached.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        kind: CacheKind,
        key: &str,
        generation: u64,
        compute: F,
    ) -> Result<(T, bool)>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        {
            let map = self.map(kind).read().expect("cache lock poisoned");
            if let Some(entry) = map.get(key) {
                if entry.generation == generation {
                    if let Ok(value) = serde_json::from_value(entry.value.clone()) {
                        debug!(key, "cache hit");
                        return Ok((value, true));
                    }
                }
            }
        }

        let value = compute().await?;
        let serialized = serde_json::to_value(&value)?;

        let mut map = self.map(kind).write().expect("cache lock poisoned");
        if self.generation.load(Ordering::Acquire) == generation {
            map.insert(
                key.to_string(),
                CacheEntry {
                    value: serialized,
                    generation,
                    created_at: Utc::now(),
                },
            );
        }

        Ok((value, false))
    }

    /// Invalidate everything. Bumps the generation counter and empties both
    /// maps, returning the entry counts from before the clear.
    pub fn clear(&self) -> CacheClearReport {
        self.generation.fetch_add(1, Ordering::AcqRel);

        let search_entries = {
            let mut map = self.search.write().expect("cache lock poisoned");
            let n = map.len();
            map.clear();
            n
        };
        let metadata_entries = {
            let mut map = self.metadata.write().expect("cache lock poisoned");
            let n = map.len();
            map.clear();
            n
        };

        debug!(search_entries, metadata_entries, "cache cleared");
        CacheClearReport {
            search_cache_entries: search_entries,
            metadata_cache_entries: metadata_entries,
        }
    }

    /// Entry counts per cache plus a breakdown by key prefix and the module
    /// names currently cached.
    pub fn statistics(&self) -> CacheStatistics {
        let search = self.search.read().expect("cache lock poisoned");
        let metadata = self.metadata.read().expect("cache lock poisoned");

        let mut cache_types: BTreeMap<String, usize> = BTreeMap::new();
        for key in search.keys().chain(metadata.keys()) {
            let prefix = key.split(':').next().unwrap_or("unknown");
            *cache_types.entry(prefix.to_string()).or_insert(0) += 1;
        }

        let mut cached_modules: Vec<String> = metadata
            .keys()
            .filter_map(|k| k.strip_prefix("module:"))
            .map(|m| m.to_string())
            .collect();
        cached_modules.sort();

        CacheStatistics {
            search_cache_entries: search.len(),
            metadata_cache_entries: metadata.len(),
            cache_types,
            cached_modules,
        }
    }
}

// ---------- Key construction ----------

fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

pub fn search_key(query: &str, kind: Option<&str>, module: Option<&str>, limit: usize) -> String {
    format!(
        "search:{}:{}:{}:{}",
        normalize_query(query),
        kind.unwrap_or("-"),
        module.unwrap_or("-"),
        limit
    )
}

pub fn function_search_key(operation: &str, object_type: Option<&str>, module: Option<&str>) -> String {
    let mut query = operation.to_string();
    if let Some(object_type) = object_type {
        query.push(' ');
        query.push_str(object_type);
    }
    format!(
        "function_search:{}:{}",
        normalize_query(&query),
        module.unwrap_or("-")
    )
}

pub fn module_key(name: &str) -> String {
    format!("module:{}", name.trim())
}

pub fn function_details_key(name: &str, module: Option<&str>) -> String {
    format!("function_details:{}:{}", name.trim(), module.unwrap_or("-"))
}
