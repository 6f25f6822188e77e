//! Keyed store of forwarded answers with read-time expiry.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use tokio_util::task::TaskTracker;

use crate::dns::{DnsResponse, RecordType, normalize_name};

/// Two queries differing only by record type are independent entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    name: String,
    record_type: RecordType,
}

impl CacheKey {
    pub fn new(name: &str, record_type: RecordType) -> Self {
        Self {
            name: normalize_name(name),
            record_type,
        }
    }
}

struct CacheEntry {
    response: DnsResponse,
    stored_at: Instant,
}

pub struct CacheHit {
    pub response: DnsResponse,
    /// Time left before the entry stops being served.
    pub remaining: Duration,
}

/// Concurrent response cache.
///
/// Entries are immutable once stored and replaced, never mutated, on
/// refresh. Staleness is evaluated on the read path; stale entries are
/// lazily removed rather than actively evicted.
pub struct ResponseCache {
    entries: Arc<DashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
    tracker: TaskTracker,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
            tracker: TaskTracker::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn lookup(&self, key: &CacheKey) -> Option<CacheHit> {
        let hit = {
            let entry = self.entries.get(key)?;
            let age = entry.stored_at.elapsed();
            (age <= self.ttl).then(|| CacheHit {
                response: entry.response.clone(),
                remaining: self.ttl - age,
            })
        };
        if hit.is_none() {
            // Re-checked under the shard lock; a concurrent refresh survives.
            self.entries
                .remove_if(key, |_, entry| entry.stored_at.elapsed() > self.ttl);
        }
        hit
    }

    /// Store without making the caller wait. The task stays tracked so
    /// shutdown can drain outstanding writes instead of abandoning them.
    pub fn store_detached(&self, key: CacheKey, response: DnsResponse) {
        let entries = Arc::clone(&self.entries);
        self.tracker.spawn(async move {
            entries.insert(
                key,
                CacheEntry {
                    response,
                    stored_at: Instant::now(),
                },
            );
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Wait for every outstanding store task to run to completion.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}
