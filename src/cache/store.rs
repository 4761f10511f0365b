//! Concurrent resource cache with negative entries and lossy visit tracking.
//!
//! # Responsibilities
//! - Store positive (bytes) and negative (known missing) entries per key
//! - Record read recency through a bounded, lossy visit queue
//! - Evict idle entries and the coldest entries past the size ceilings
//!
//! A sweep that finds a ceiling exceeded evicts down to the low-water mark
//! (each ceiling minus a tenth), so a flood of new keys triggers one sweep
//! per headroom's worth of puts instead of one per put.
//!
//! # Design Decisions
//! - The hot read path touches only the `DashMap` shard and a `try_send`
//! - A full queue or a running sweep drops the visit; the read still succeeds
//! - Recency is folded into a table only during sweeps, under one mutex
//! - Zero-length payloads stay `Positive`; callers decide how to serve them

use bytes::Bytes;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};

use crate::config::CacheConfig;
use crate::observability::metrics;

/// Outcome of a cache read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Never stored (or evicted).
    Absent,
    /// Stored as known-missing.
    Negative,
    /// Stored payload, possibly empty.
    Positive(Bytes),
}

impl Lookup {
    /// Body worth serving: a non-empty positive payload.
    pub fn into_body(self) -> Option<Bytes> {
        match self {
            Lookup::Positive(bytes) if !bytes.is_empty() => Some(bytes),
            _ => None,
        }
    }
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: usize,
    pub positive: usize,
    pub negative: usize,
}

/// Ceilings and expiry.
#[derive(Debug, Clone, Copy)]
pub struct CacheLimits {
    pub max_entries: usize,
    pub max_bytes: usize,
    pub visit_queue_capacity: usize,
    pub idle_ttl: Option<Duration>,
}

impl From<&CacheConfig> for CacheLimits {
    fn from(config: &CacheConfig) -> Self {
        Self {
            max_entries: config.max_entries,
            max_bytes: config.max_bytes,
            visit_queue_capacity: config.visit_queue_capacity,
            idle_ttl: config.idle_ttl_secs.map(Duration::from_secs),
        }
    }
}

#[derive(Debug)]
enum Stored {
    Negative,
    Positive(Bytes),
}

#[derive(Debug)]
struct Entry {
    value: Stored,
    saved_at: Instant,
    size: usize,
}

struct Visit {
    key: String,
    at: Instant,
}

struct SweepState {
    visits: mpsc::Receiver<Visit>,
    last_visit: HashMap<String, Instant>,
}

pub struct ResourceCache {
    entries: DashMap<String, Entry>,
    total_bytes: AtomicUsize,
    visits: mpsc::Sender<Visit>,
    sweep_state: Mutex<SweepState>,
    sweeping: AtomicBool,
    pressure: Notify,
    sweeps: AtomicU64,
    limits: CacheLimits,
}

/// A ceiling minus a tenth of it.
fn low_water(ceiling: usize) -> usize {
    ceiling - ceiling / 10
}

impl ResourceCache {
    pub fn new(limits: CacheLimits) -> Self {
        let (tx, rx) = mpsc::channel(limits.visit_queue_capacity.max(1));
        Self {
            entries: DashMap::new(),
            total_bytes: AtomicUsize::new(0),
            visits: tx,
            sweep_state: Mutex::new(SweepState {
                visits: rx,
                last_visit: HashMap::new(),
            }),
            sweeping: AtomicBool::new(false),
            pressure: Notify::new(),
            sweeps: AtomicU64::new(0),
            limits,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(CacheLimits::from(config))
    }

    pub fn limits(&self) -> &CacheLimits {
        &self.limits
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Lookup {
        let payload = match self.entries.get(key) {
            None => {
                metrics::record_cache_lookup("miss");
                return Lookup::Absent;
            }
            Some(entry) => match &entry.value {
                Stored::Negative => {
                    metrics::record_cache_lookup("negative");
                    return Lookup::Negative;
                }
                Stored::Positive(bytes) => bytes.clone(),
            },
        };
        metrics::record_cache_lookup("hit");
        self.record_visit(key);
        Lookup::Positive(payload)
    }

    fn record_visit(&self, key: &str) {
        if self.sweeping.load(Ordering::Acquire) {
            return;
        }
        let visit = Visit {
            key: key.to_string(),
            at: Instant::now(),
        };
        if self.visits.try_send(visit).is_err() {
            tracing::trace!(key, "Visit queue saturated; dropping visit");
        }
    }

    /// Store `payload` under `key`. `None` records a negative entry.
    ///
    /// An entry larger than `max_bytes` on its own is not stored, and any
    /// older entry for `key` is dropped. Returns whether the entry was kept.
    pub fn put(&self, key: impl Into<String>, payload: Option<Bytes>) -> bool {
        let key = key.into();
        let size = key.len() + payload.as_ref().map_or(0, Bytes::len);
        if size > self.limits.max_bytes {
            self.remove(&key);
            tracing::debug!(key, size, max_bytes = self.limits.max_bytes, "Entry exceeds cache ceiling; not cached");
            return false;
        }
        let value = match payload {
            Some(bytes) => Stored::Positive(bytes),
            None => Stored::Negative,
        };
        let entry = Entry {
            value,
            saved_at: Instant::now(),
            size,
        };

        self.total_bytes.fetch_add(size, Ordering::AcqRel);
        if let Some(old) = self.entries.insert(key, entry) {
            self.total_bytes.fetch_sub(old.size, Ordering::AcqRel);
        }

        if self.over_ceiling() {
            self.pressure.notify_one();
        }
        true
    }

    pub fn remove(&self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some((_, entry)) => {
                self.total_bytes.fetch_sub(entry.size, Ordering::AcqRel);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes.load(Ordering::Acquire)
    }

    pub fn over_ceiling(&self) -> bool {
        self.entries.len() > self.limits.max_entries || self.total_bytes() > self.limits.max_bytes
    }

    fn above_low_water(&self) -> bool {
        self.entries.len() > low_water(self.limits.max_entries)
            || self.total_bytes() > low_water(self.limits.max_bytes)
    }

    /// Sweeps run since the cache was created.
    pub fn sweep_count(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        for entry in self.entries.iter() {
            stats.entries += 1;
            stats.bytes += entry.size;
            match entry.value {
                Stored::Negative => stats.negative += 1,
                Stored::Positive(_) => stats.positive += 1,
            }
        }
        stats
    }

    /// Woken when a `put` pushes the cache over a ceiling.
    pub(crate) fn pressure(&self) -> &Notify {
        &self.pressure
    }

    /// Fold queued visits into recency and expire idle entries. If a ceiling
    /// is exceeded, evict the coldest entries down to the low-water mark.
    /// Returns the eviction count.
    ///
    /// Walks and sorts every entry; call it off the async runtime.
    pub fn sweep(&self) -> usize {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        self.sweeping.store(true, Ordering::Release);
        let mut state = self.sweep_state.lock().unwrap_or_else(PoisonError::into_inner);

        while let Ok(visit) = state.visits.try_recv() {
            let slot = state.last_visit.entry(visit.key).or_insert(visit.at);
            if visit.at > *slot {
                *slot = visit.at;
            }
        }

        let now = Instant::now();
        let mut candidates: Vec<(String, Instant, Instant)> = self
            .entries
            .iter()
            .map(|entry| {
                let saved_at = entry.saved_at;
                let recency = state
                    .last_visit
                    .get(entry.key())
                    .map_or(saved_at, |visited| (*visited).max(saved_at));
                (entry.key().clone(), saved_at, recency)
            })
            .collect();

        let mut evicted = 0;
        if let Some(ttl) = self.limits.idle_ttl {
            candidates.retain(|(key, saved_at, recency)| {
                if now.duration_since(*recency) > ttl && self.evict(key, *saved_at) {
                    evicted += 1;
                    return false;
                }
                true
            });
        }

        if self.over_ceiling() {
            candidates.sort_by_key(|(_, _, recency)| *recency);
            for (key, saved_at, _) in &candidates {
                if !self.above_low_water() {
                    break;
                }
                if self.evict(key, *saved_at) {
                    evicted += 1;
                }
            }
        }

        state.last_visit.retain(|key, _| self.entries.contains_key(key));
        drop(state);
        self.sweeping.store(false, Ordering::Release);

        let stats = self.stats();
        metrics::record_cache_size(stats.entries, stats.bytes);
        if evicted > 0 {
            metrics::record_cache_evictions(evicted);
            tracing::debug!(evicted, entries = stats.entries, bytes = stats.bytes, "Cache sweep evicted entries");
        }
        evicted
    }

    /// Remove `key` only if it still holds the entry saved at `saved_at`.
    fn evict(&self, key: &str, saved_at: Instant) -> bool {
        match self.entries.remove_if(key, |_, entry| entry.saved_at == saved_at) {
            Some((_, entry)) => {
                self.total_bytes.fetch_sub(entry.size, Ordering::AcqRel);
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for ResourceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCache")
            .field("entries", &self.entries.len())
            .field("bytes", &self.total_bytes())
            .field("limits", &self.limits)
            .finish()
    }
}
