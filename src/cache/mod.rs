//! Session-scoped similarity caches for query expansions and retrieval results.
//!
//! Entries are matched by word-set Jaccard similarity of the source query,
//! expire after a TTL, are capped per session (oldest dropped first) and can
//! be gated on payload quality at write time. [`CacheStore`] is an explicit
//! service instance injected into the workflow engine; nothing here is a
//! process-wide singleton.

mod similarity;
mod store;

pub use similarity::{contains_phrase, jaccard_similarity, novel_word_count, word_set};
pub use store::{
    CacheEntry, CacheHit, CachePolicy, CacheStats, InsertOutcome, SimilarityCache, SweepReport,
};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::types::{Fragment, QueryVariant};

/// Expansion and retrieval caches behind one management surface.
#[derive(Debug, Clone)]
pub struct CacheStore {
    expansion: SimilarityCache<Vec<QueryVariant>>,
    retrieval: SimilarityCache<CachedFragments>,
}

/// A cached retrieval result with the cutoff and cap it was produced under.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CachedFragments {
    pub fragments: Vec<Fragment>,
    /// Adapted score floor of the producing run
    pub threshold: f64,
    pub max_fragments: usize,
}

impl CachedFragments {
    pub fn new(fragments: Vec<Fragment>, threshold: f64, max_fragments: usize) -> Self {
        Self {
            fragments,
            threshold,
            max_fragments,
        }
    }

    /// Whether this result can answer a request with `threshold` and
    /// `max_fragments`: the request may only be as strict or stricter.
    pub fn covers(&self, threshold: f64, max_fragments: usize) -> bool {
        self.threshold <= threshold && self.max_fragments >= max_fragments
    }

    /// Fragments at or above `threshold`, capped at `max_fragments`.
    pub fn narrowed(&self, threshold: f64, max_fragments: usize) -> Vec<Fragment> {
        self.fragments
            .iter()
            .filter(|f| f.raw_score >= threshold)
            .take(max_fragments)
            .cloned()
            .collect()
    }
}

/// Stats for both caches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStoreStats {
    pub expansion: CacheStats,
    pub retrieval: CacheStats,
}

/// Sweep results for both caches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSweepReport {
    pub expansion: SweepReport,
    pub retrieval: SweepReport,
}

impl CacheStore {
    /// Create a store with explicit policies
    pub fn new(expansion: CachePolicy, retrieval: CachePolicy) -> Self {
        Self {
            expansion: SimilarityCache::new("expansion", expansion),
            retrieval: SimilarityCache::new("retrieval", retrieval),
        }
    }

    #[inline]
    pub fn expansion(&self) -> &SimilarityCache<Vec<QueryVariant>> {
        &self.expansion
    }

    #[inline]
    pub fn retrieval(&self) -> &SimilarityCache<CachedFragments> {
        &self.retrieval
    }

    /// Drop everything cached for a session.
    pub async fn clear_session(&self, session_id: &str) -> usize {
        let removed = self.expansion.clear_session(session_id).await
            + self.retrieval.clear_session(session_id).await;
        info!(session_id = %session_id, removed = removed, "Session cache cleared");
        removed
    }

    /// Drop everything cached for every session.
    pub async fn clear_all(&self) -> usize {
        let removed = self.expansion.clear_all().await + self.retrieval.clear_all().await;
        info!(removed = removed, "All caches cleared");
        removed
    }

    pub async fn stats(&self) -> CacheStoreStats {
        CacheStoreStats {
            expansion: self.expansion.stats().await,
            retrieval: self.retrieval.stats().await,
        }
    }

    /// Remove expired entries from both caches.
    pub async fn sweep_expired(&self) -> CacheSweepReport {
        let report = CacheSweepReport {
            expansion: self.expansion.sweep_expired().await,
            retrieval: self.retrieval.sweep_expired().await,
        };
        debug!(
            expansion_removed = report.expansion.removed_entries,
            retrieval_removed = report.retrieval.removed_entries,
            "Cache sweep completed"
        );
        report
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `interval` on a background task.
    ///
    /// The returned handle can be aborted to stop sweeping.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                store.sweep_expired().await;
            }
        })
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(CachePolicy::expansion(), CachePolicy::retrieval())
    }
}
