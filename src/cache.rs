//! Result cache for completed transcripts
//!
//! Content-addressed store keyed by [`CacheFingerprint`]. Entries expire after a fixed
//! TTL, evaluated lazily on lookup, and the store never holds more than `max_entries`
//! entries once a public operation returns: each insert evicts the oldest entries
//! until the bound is restored.

use log::{debug, info};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::models::TranscriptArtifact;
use crate::validation::CacheFingerprint;

#[derive(Debug, Clone)]
struct CacheEntry {
    artifact: Arc<TranscriptArtifact>,
    created_at: SystemTime,
}

impl CacheEntry {
    fn is_expired(&self, now: SystemTime, ttl: Duration) -> bool {
        // A clock that moved backwards yields an age of zero
        now.duration_since(self.created_at)
            .map(|age| age >= ttl)
            .unwrap_or(false)
    }
}

/// Read-only view of the cache for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub ttl_seconds: u64,
}

/// Bounded, TTL-aware transcript cache
pub struct ResultCache {
    entries: Mutex<HashMap<CacheFingerprint, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
}

impl ResultCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries,
        }
    }

    /// Return the cached artifact, or `None` on a miss or an expired entry.
    /// Expired entries are removed as a side effect.
    pub async fn lookup(&self, fingerprint: &CacheFingerprint) -> Option<Arc<TranscriptArtifact>> {
        self.lookup_at(fingerprint, SystemTime::now()).await
    }

    async fn lookup_at(
        &self,
        fingerprint: &CacheFingerprint,
        now: SystemTime,
    ) -> Option<Arc<TranscriptArtifact>> {
        let mut entries = self.entries.lock().await;

        let expired = match entries.get(fingerprint) {
            None => return None,
            Some(entry) => entry.is_expired(now, self.ttl),
        };

        if expired {
            debug!("Cache entry {} expired", fingerprint);
            entries.remove(fingerprint);
            return None;
        }

        entries.get(fingerprint).map(|entry| Arc::clone(&entry.artifact))
    }

    /// Store an artifact, replacing any previous entry for the same fingerprint
    pub async fn insert(&self, fingerprint: CacheFingerprint, artifact: Arc<TranscriptArtifact>) {
        self.insert_at(fingerprint, artifact, SystemTime::now()).await
    }

    async fn insert_at(
        &self,
        fingerprint: CacheFingerprint,
        artifact: Arc<TranscriptArtifact>,
        now: SystemTime,
    ) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            fingerprint,
            CacheEntry {
                artifact,
                created_at: now,
            },
        );

        while entries.len() > self.max_entries {
            // Oldest first, ties broken by fingerprint ordering
            let oldest = entries
                .iter()
                .min_by(|(a_key, a), (b_key, b)| {
                    a.created_at.cmp(&b.created_at).then_with(|| a_key.cmp(b_key))
                })
                .map(|(key, _)| key.clone());

            match oldest {
                Some(key) => {
                    debug!("Evicting cache entry {}", key);
                    entries.remove(&key);
                }
                None => break,
            }
        }
    }

    /// Remove every expired entry, returning how many were dropped
    pub async fn purge_expired(&self) -> usize {
        self.purge_expired_at(SystemTime::now()).await
    }

    async fn purge_expired_at(&self, now: SystemTime) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now, self.ttl));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.len().await,
            max_size: self.max_entries,
            ttl_seconds: self.ttl.as_secs(),
        }
    }

    /// Start a background task that periodically drops expired entries
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        info!("Starting cache sweeper: interval {}s", every.as_secs());

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                let removed = cache.purge_expired().await;
                if removed > 0 {
                    info!("Removed {} expired cache entries", removed);
                } else {
                    debug!("No expired cache entries");
                }
            }
        })
    }
}
