use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use super::similarity::jaccard_similarity;

/// Tunables for one similarity cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachePolicy {
    /// Minimum Jaccard similarity for a hit (inclusive)
    pub similarity_threshold: f64,
    /// Age after which an entry is never returned
    pub ttl: Duration,
    /// Oldest entries are dropped beyond this count
    pub max_entries_per_session: usize,
    /// Write gate: payload quality must meet this to be stored
    pub min_quality: Option<f64>,
}

impl CachePolicy {
    /// Query expansion defaults: 0.70 similarity, 24h TTL, 10 entries, no gate.
    pub fn expansion() -> Self {
        Self {
            similarity_threshold: 0.70,
            ttl: Duration::from_secs(24 * 60 * 60),
            max_entries_per_session: 10,
            min_quality: None,
        }
    }

    /// Retrieval defaults: 0.75 similarity, 6h TTL, 5 entries, mean score >= 0.6.
    pub fn retrieval() -> Self {
        Self {
            similarity_threshold: 0.75,
            ttl: Duration::from_secs(6 * 60 * 60),
            max_entries_per_session: 5,
            min_quality: Some(0.6),
        }
    }
}

/// A cached payload owned by one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub session_id: String,
    pub source_query: String,
    /// Sorted document scope; empty for unscoped queries
    pub scope: Vec<String>,
    pub payload: T,
    pub created_at: DateTime<Utc>,
    pub reuse_count: u32,
    pub last_reused_at: Option<DateTime<Utc>>,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match (now - self.created_at).to_std() {
            Ok(age) => age > ttl,
            // Created "in the future" relative to `now`
            Err(_) => false,
        }
    }
}

/// A successful lookup.
#[derive(Debug, Clone)]
pub struct CacheHit<T> {
    pub payload: T,
    pub similarity: f64,
    pub source_query: String,
    /// Reuse count after this hit
    pub reuse_count: u32,
}

/// Outcome of a write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Stored { evicted: usize },
    RejectedLowQuality,
}

/// Entries and sessions removed by a sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub removed_entries: usize,
    pub removed_sessions: usize,
}

/// Counters for one cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub sessions: usize,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub rejected: u64,
    pub evictions: u64,
    pub expired: u64,
}

impl CacheStats {
    /// Hits over lookups, 0 when nothing was looked up.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

#[derive(Debug)]
struct CacheInner<T> {
    sessions: HashMap<String, Vec<CacheEntry<T>>>,
    stats: CacheStats,
}

/// Session-scoped cache keyed by word-set similarity of the source query.
#[derive(Debug)]
pub struct SimilarityCache<T> {
    name: &'static str,
    policy: CachePolicy,
    inner: Arc<RwLock<CacheInner<T>>>,
}

impl<T> Clone for SimilarityCache<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            policy: self.policy.clone(),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone> SimilarityCache<T> {
    /// Create an empty cache
    pub fn new(name: &'static str, policy: CachePolicy) -> Self {
        Self {
            name,
            policy,
            inner: Arc::new(RwLock::new(CacheInner {
                sessions: HashMap::new(),
                stats: CacheStats::default(),
            })),
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Look up the most similar non-expired entry for the session.
    pub async fn lookup(&self, session_id: &str, query: &str, scope: &[String]) -> Option<CacheHit<T>> {
        self.lookup_at(session_id, query, scope, Utc::now()).await
    }

    /// [`lookup`](Self::lookup) evaluated at an explicit instant.
    pub async fn lookup_at(
        &self,
        session_id: &str,
        query: &str,
        scope: &[String],
        now: DateTime<Utc>,
    ) -> Option<CacheHit<T>> {
        self.lookup_where_at(session_id, query, scope, now, |_| true)
            .await
    }

    /// Like [`lookup`](Self::lookup), but only entries whose payload passes
    /// `usable` can hit. Skipped entries are not counted as reused.
    pub async fn lookup_where<F>(
        &self,
        session_id: &str,
        query: &str,
        scope: &[String],
        usable: F,
    ) -> Option<CacheHit<T>>
    where
        F: Fn(&T) -> bool,
    {
        self.lookup_where_at(session_id, query, scope, Utc::now(), usable)
            .await
    }

    pub async fn lookup_where_at<F>(
        &self,
        session_id: &str,
        query: &str,
        scope: &[String],
        now: DateTime<Utc>,
        usable: F,
    ) -> Option<CacheHit<T>>
    where
        F: Fn(&T) -> bool,
    {
        let mut inner = self.inner.write().await;
        let threshold = self.policy.similarity_threshold;
        let ttl = self.policy.ttl;

        let best = inner.sessions.get(session_id).and_then(|entries| {
            entries
                .iter()
                .enumerate()
                .filter(|(_, e)| {
                    !e.is_expired(now, ttl) && e.scope.as_slice() == scope && usable(&e.payload)
                })
                .map(|(idx, e)| (idx, jaccard_similarity(query, &e.source_query)))
                .filter(|(_, sim)| *sim >= threshold)
                .fold(None, |best: Option<(usize, f64)>, (idx, sim)| match best {
                    Some((_, best_sim)) if best_sim >= sim => best,
                    _ => Some((idx, sim)),
                })
        });

        let Some((idx, similarity)) = best else {
            inner.stats.misses += 1;
            debug!(cache = self.name, session_id = %session_id, "Cache miss");
            return None;
        };

        inner.stats.hits += 1;
        let entry = inner.sessions.get_mut(session_id)?.get_mut(idx)?;
        entry.reuse_count += 1;
        entry.last_reused_at = Some(now);

        debug!(
            cache = self.name,
            session_id = %session_id,
            similarity = similarity,
            reuse_count = entry.reuse_count,
            "Cache hit"
        );

        Some(CacheHit {
            payload: entry.payload.clone(),
            similarity,
            source_query: entry.source_query.clone(),
            reuse_count: entry.reuse_count,
        })
    }

    /// Store a payload if it passes the quality gate.
    pub async fn insert(
        &self,
        session_id: &str,
        query: &str,
        scope: &[String],
        payload: T,
        quality: f64,
    ) -> InsertOutcome {
        self.insert_at(session_id, query, scope, payload, quality, Utc::now())
            .await
    }

    /// [`insert`](Self::insert) evaluated at an explicit instant.
    ///
    /// Entry counts are re-validated under the write lock: a sweep or another
    /// request may have changed the session between lookup and write.
    pub async fn insert_at(
        &self,
        session_id: &str,
        query: &str,
        scope: &[String],
        payload: T,
        quality: f64,
        now: DateTime<Utc>,
    ) -> InsertOutcome {
        if let Some(min_quality) = self.policy.min_quality {
            if quality < min_quality {
                self.inner.write().await.stats.rejected += 1;
                debug!(
                    cache = self.name,
                    session_id = %session_id,
                    quality = quality,
                    min_quality = min_quality,
                    "Cache write rejected by quality gate"
                );
                return InsertOutcome::RejectedLowQuality;
            }
        }

        let ttl = self.policy.ttl;
        let cap = self.policy.max_entries_per_session.max(1);
        let mut inner = self.inner.write().await;
        let entries = inner.sessions.entry(session_id.to_string()).or_default();

        let before = entries.len();
        entries.retain(|e| {
            !e.is_expired(now, ttl) && !(e.source_query == query && e.scope.as_slice() == scope)
        });
        let pruned = before - entries.len();

        entries.push(CacheEntry {
            session_id: session_id.to_string(),
            source_query: query.to_string(),
            scope: scope.to_vec(),
            payload,
            created_at: now,
            reuse_count: 0,
            last_reused_at: None,
        });

        let mut evicted = 0;
        while entries.len() > cap {
            let oldest = entries
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.created_at)
                .map(|(idx, _)| idx)
                .unwrap_or(0);
            entries.remove(oldest);
            evicted += 1;
        }

        inner.stats.insertions += 1;
        inner.stats.evictions += (evicted + pruned) as u64;

        debug!(
            cache = self.name,
            session_id = %session_id,
            evicted = evicted,
            "Cache entry stored"
        );

        InsertOutcome::Stored { evicted }
    }

    /// Remove all entries for a session. Returns how many were removed.
    pub async fn clear_session(&self, session_id: &str) -> usize {
        self.inner
            .write()
            .await
            .sessions
            .remove(session_id)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    /// Remove everything. Returns how many entries were removed.
    pub async fn clear_all(&self) -> usize {
        let mut inner = self.inner.write().await;
        let removed = inner.sessions.values().map(Vec::len).sum();
        inner.sessions.clear();
        removed
    }

    /// Drop expired entries across all sessions, then drop empty sessions.
    pub async fn sweep_expired(&self) -> SweepReport {
        self.sweep_expired_at(Utc::now()).await
    }

    /// [`sweep_expired`](Self::sweep_expired) evaluated at an explicit instant.
    pub async fn sweep_expired_at(&self, now: DateTime<Utc>) -> SweepReport {
        let ttl = self.policy.ttl;
        let mut inner = self.inner.write().await;
        let mut report = SweepReport::default();

        for entries in inner.sessions.values_mut() {
            let before = entries.len();
            entries.retain(|e| !e.is_expired(now, ttl));
            report.removed_entries += before - entries.len();
        }

        let sessions_before = inner.sessions.len();
        inner.sessions.retain(|_, entries| !entries.is_empty());
        report.removed_sessions = sessions_before - inner.sessions.len();
        inner.stats.expired += report.removed_entries as u64;

        report
    }

    /// Snapshot of counters plus current sizes.
    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.read().await;
        CacheStats {
            sessions: inner.sessions.len(),
            entries: inner.sessions.values().map(Vec::len).sum(),
            ..inner.stats.clone()
        }
    }

    /// Entries currently held for a session (oldest first).
    pub async fn entries(&self, session_id: &str) -> Vec<CacheEntry<T>> {
        self.inner
            .read()
            .await
            .sessions
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }
}
