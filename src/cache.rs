//! Fingerprint-keyed memoization decorator (spec.md 4.6, C6).
//!
//! Backed by `moka::sync::Cache`, which already provides per-entry TTL (via
//! a custom [`moka::Expiry`] impl -- priority and explicit TTL vary per
//! entry), weight-based byte-budget eviction via a weigher, and an
//! eviction-listener callback for the Removed/Replaced/Expired/Capacity
//! taxonomy spec.md asks for. `NeverEvict` entries live in a parallel,
//! unbounded partition so the main cache's weigher never special-cases
//! them.

use crate::model::ToolExecutionResult;
use crate::settings::CacheConfig;
use crate::settings::CachePriority;
use chrono::{DateTime, Utc};
use moka::notification::RemovalCause;
use moka::Expiry;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Context axes mixed into the fingerprint beyond tool id + parameters
/// (spec.md 4.6 `fingerprint`).
#[derive(Debug, Clone, Default)]
pub struct CacheKeyContext {
    pub include_parameter_types: bool,
    pub excluded_parameters: Vec<String>,
    pub user_id: Option<String>,
    pub environment: Option<String>,
    pub version: Option<String>,
    pub additional_context: BTreeMap<String, String>,
}

fn value_type_tag(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Canonical fingerprint of `(toolId, normalized parameters, selected
/// context axes)`. Deterministic under parameter-key reordering; excluded
/// parameters never contribute (spec.md 8 "Deterministic fingerprint").
pub fn generate_cache_key(
    tool_id: &str,
    parameters: &std::collections::HashMap<String, Value>,
    key_context: &CacheKeyContext,
) -> String {
    let mut canonical = BTreeMap::new();
    for (k, v) in parameters {
        let lower = k.to_ascii_lowercase();
        if key_context.excluded_parameters.iter().any(|e| e.eq_ignore_ascii_case(&lower)) {
            continue;
        }
        let mut entry = serde_json::to_string(v).unwrap_or_default();
        if key_context.include_parameter_types {
            entry = format!("{}:{}", value_type_tag(v), entry);
        }
        canonical.insert(lower, entry);
    }

    let mut buf = String::new();
    buf.push_str(tool_id);
    buf.push('\u{1}');
    for (k, v) in &canonical {
        buf.push_str(k);
        buf.push('=');
        buf.push_str(v);
        buf.push('\u{2}');
    }
    if let Some(user_id) = &key_context.user_id {
        buf.push_str("user=");
        buf.push_str(user_id);
        buf.push('\u{2}');
    }
    if let Some(env) = &key_context.environment {
        buf.push_str("env=");
        buf.push_str(env);
        buf.push('\u{2}');
    }
    if let Some(version) = &key_context.version {
        buf.push_str("ver=");
        buf.push_str(version);
        buf.push('\u{2}');
    }
    for (k, v) in &key_context.additional_context {
        buf.push_str(k);
        buf.push('=');
        buf.push_str(v);
        buf.push('\u{2}');
    }

    let mut hasher = DefaultHasher::new();
    buf.hash(&mut hasher);
    format!("{tool_id}:{:016x}", hasher.finish())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    Removed,
    Replaced,
    Expired,
    Capacity,
}

impl From<RemovalCause> for EvictionReason {
    fn from(cause: RemovalCause) -> Self {
        match cause {
            RemovalCause::Expired => EvictionReason::Expired,
            RemovalCause::Explicit => EvictionReason::Removed,
            RemovalCause::Replaced => EvictionReason::Replaced,
            RemovalCause::Size => EvictionReason::Capacity,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    pub time_to_live: Option<Duration>,
    pub priority: CachePriority,
    pub cache_failures: bool,
    pub dependencies: Vec<String>,
}

struct EntryInner {
    tool_id: String,
    result: ToolExecutionResult,
    cached_at: DateTime<Utc>,
    ttl: Option<Duration>,
    priority: CachePriority,
    hit_count: AtomicU64,
    last_accessed_at: Mutex<DateTime<Utc>>,
}

/// Value stored in the underlying `moka` cache; cheap to clone (shares the
/// inner `Arc`).
#[derive(Clone)]
struct CacheValue(Arc<EntryInner>);

struct PerEntryExpiry;

impl Expiry<String, CacheValue> for PerEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheValue,
        _current_time: Instant,
    ) -> Option<Duration> {
        value.0.ttl
    }

    fn expire_after_read(
        &self,
        _key: &String,
        value: &CacheValue,
        _current_time: Instant,
        current_duration: Option<Duration>,
        _last_modified_at: Instant,
    ) -> Option<Duration> {
        // Sliding expiration: a read resets the TTL window.
        value.0.ttl.or(current_duration)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheValue,
        _current_time: Instant,
        _current_duration: Option<Duration>,
    ) -> Option<Duration> {
        value.0.ttl
    }
}

fn estimate_weight(value: &CacheValue) -> u32 {
    let bytes = serde_json::to_vec(&value.0.result).map(|v| v.len()).unwrap_or(0);
    bytes.min(u32::MAX as usize) as u32
}

/// Materializes a cache-hit [`ToolExecutionResult`]: `duration_ms == 0`,
/// `start_time == end_time == cached_at`, with `cache_hit`/`cached_at`/
/// `hit_count` written into metadata (spec.md 4.6 "Cache-hit path").
fn hit_result(entry: &EntryInner, hit_count: u64) -> ToolExecutionResult {
    let mut result = entry.result.clone();
    result.start_time = entry.cached_at;
    result.end_time = entry.cached_at;
    result.result.duration_ms = 0;
    result
        .result
        .metadata
        .insert("cache_hit".to_string(), Value::Bool(true));
    result.result.metadata.insert(
        "cached_at".to_string(),
        Value::String(entry.cached_at.to_rfc3339()),
    );
    result
        .result
        .metadata
        .insert("hit_count".to_string(), Value::from(hit_count));
    result
}

#[derive(Debug, Clone, Default)]
pub struct CacheStatistics {
    pub hit_count: u64,
    pub miss_count: u64,
    pub eviction_count: u64,
    pub entry_count: u64,
}

type EvictionCallback = Arc<dyn Fn(&str, EvictionReason) + Send + Sync>;

/// A decorator activated only when the caller opts in
/// (`context.additionalData["EnableCaching"] == true`, spec.md 4.6).
pub struct ExecutionCache {
    evictable: moka::sync::Cache<String, CacheValue>,
    never_evict: moka::sync::Cache<String, CacheValue>,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    eviction_count: Arc<AtomicU64>,
    callbacks: Arc<Mutex<Vec<EvictionCallback>>>,
}

impl ExecutionCache {
    pub fn new(config: &CacheConfig) -> Self {
        let eviction_count = Arc::new(AtomicU64::new(0));
        let callbacks: Arc<Mutex<Vec<EvictionCallback>>> = Arc::new(Mutex::new(Vec::new()));

        let listener_count = eviction_count.clone();
        let listener_callbacks = callbacks.clone();
        let listener = move |key: Arc<String>, _value: CacheValue, cause: RemovalCause| {
            listener_count.fetch_add(1, Ordering::Relaxed);
            let reason = EvictionReason::from(cause);
            for cb in listener_callbacks.lock().unwrap_or_else(|e| e.into_inner()).iter() {
                cb(&key, reason);
            }
        };

        let evictable = moka::sync::Cache::builder()
            .max_capacity(config.max_size_bytes)
            .weigher(|_k: &String, v: &CacheValue| estimate_weight(v))
            .expire_after(PerEntryExpiry)
            .eviction_listener(listener)
            .build();

        let never_evict = moka::sync::Cache::builder()
            .expire_after(PerEntryExpiry)
            .build();

        Self {
            evictable,
            never_evict,
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
            eviction_count,
            callbacks,
        }
    }

    pub fn on_evict(&self, callback: impl Fn(&str, EvictionReason) + Send + Sync + 'static) {
        self.callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(callback));
    }

    fn lookup(&self, key: &str) -> Option<CacheValue> {
        self.evictable.get(key).or_else(|| self.never_evict.get(key))
    }

    /// Returns the materialized hit result if `key` is present and not
    /// expired, else `None` (spec.md 4.6 `get`).
    pub fn get(&self, key: &str) -> Option<ToolExecutionResult> {
        match self.lookup(key) {
            Some(value) => {
                self.hit_count.fetch_add(1, Ordering::Relaxed);
                let hits = value.0.hit_count.fetch_add(1, Ordering::Relaxed) + 1;
                *value.0.last_accessed_at.lock().unwrap_or_else(|e| e.into_inner()) = Utc::now();
                Some(hit_result(&value.0, hits))
            }
            None => {
                self.miss_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Stores `result` under `key`. A non-successful result is only stored
    /// if `options.cache_failures` is set (spec.md 9: "the cache decorator
    /// currently does not re-cache a fresh result ... when the tool
    /// returned non-successful and cacheFailures is false" -- kept as
    /// specified).
    pub fn set(&self, key: &str, result: ToolExecutionResult, options: SetOptions) {
        if !result.result.is_successful && !options.cache_failures {
            debug!(cache_key = key, "not caching a failed result (cacheFailures=false)");
            return;
        }

        let tool_id = result.tool_id.clone();
        let entry = CacheValue(Arc::new(EntryInner {
            tool_id,
            result,
            cached_at: Utc::now(),
            ttl: options.time_to_live,
            priority: options.priority,
            hit_count: AtomicU64::new(0),
            last_accessed_at: Mutex::new(Utc::now()),
        }));

        if options.priority == CachePriority::NeverEvict {
            self.never_evict.insert(key.to_string(), entry);
        } else {
            self.evictable.insert(key.to_string(), entry);
        }
    }

    pub fn invalidate(&self, key: &str) {
        self.evictable.invalidate(key);
        self.never_evict.invalidate(key);
    }

    /// Hand-rolled `*`-wildcard glob match, not a dependency for a one-line
    /// job (spec.md design note, mirroring `url_security`'s own hand-rolled
    /// range checks over a CIDR crate).
    fn glob_matches(pattern: &str, candidate: &str) -> bool {
        let segments: Vec<&str> = pattern.split('*').collect();
        if segments.len() == 1 {
            return pattern == candidate;
        }
        let mut rest = candidate;
        for (idx, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                continue;
            }
            if idx == 0 {
                if !rest.starts_with(segment) {
                    return false;
                }
                rest = &rest[segment.len()..];
            } else if idx == segments.len() - 1 {
                if !rest.ends_with(segment) {
                    return false;
                }
            } else {
                match rest.find(segment) {
                    Some(pos) => rest = &rest[pos + segment.len()..],
                    None => return false,
                }
            }
        }
        true
    }

    pub fn invalidate_by_pattern(&self, pattern: &str) {
        for key in self
            .evictable
            .iter()
            .map(|(k, _)| (*k).clone())
            .chain(self.never_evict.iter().map(|(k, _)| (*k).clone()))
            .collect::<Vec<_>>()
        {
            if Self::glob_matches(pattern, &key) {
                self.invalidate(&key);
            }
        }
    }

    pub fn invalidate_by_tool(&self, tool_id: &str) {
        for (key, value) in self
            .evictable
            .iter()
            .chain(self.never_evict.iter())
            .collect::<Vec<_>>()
        {
            if value.0.tool_id.eq_ignore_ascii_case(tool_id) {
                self.invalidate(&key);
            }
        }
    }

    pub fn clear(&self) {
        self.evictable.invalidate_all();
        self.never_evict.invalidate_all();
    }

    pub fn statistics(&self) -> CacheStatistics {
        self.evictable.run_pending_tasks();
        self.never_evict.run_pending_tasks();
        CacheStatistics {
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            eviction_count: self.eviction_count.load(Ordering::Relaxed),
            entry_count: self.evictable.entry_count() + self.never_evict.entry_count(),
        }
    }
}
