//! Concurrent multi-query search with partial-failure tolerance.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::dedup::{dedupe_candidates, DedupSettings};
use crate::error::PipelineError;
use crate::providers::{SearchProvider, SearchRequest};
use crate::types::{Fragment, Query, QueryVariant, VariantProvenance};

#[derive(Debug, Clone, PartialEq)]
pub struct FanoutSettings {
    /// Expansion variants searched alongside the original query
    pub max_variants: usize,
    /// Concurrent provider calls
    pub max_in_flight: usize,
    /// Each branch requests `candidate_multiplier * max_fragments` results
    pub candidate_multiplier: usize,
    /// Merged candidates are truncated to `pool_multiplier * max_fragments`
    pub pool_multiplier: usize,
    /// Bound on a single provider call
    pub branch_timeout: Duration,
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self {
            max_variants: 2,
            max_in_flight: 3,
            candidate_multiplier: 2,
            pool_multiplier: 3,
            branch_timeout: Duration::from_secs(10),
        }
    }
}

/// Pick up to `max` variants adding the most words beyond the original.
///
/// Variants that add nothing are skipped; ties keep candidate-list order.
pub fn select_diverse_variants(candidates: &[QueryVariant], max: usize) -> Vec<QueryVariant> {
    let mut eligible: Vec<&QueryVariant> = candidates
        .iter()
        .filter(|v| v.provenance != VariantProvenance::Original && v.diversity > 0)
        .collect();
    // sort_by is stable, so equal diversity keeps earlier position first
    eligible.sort_by(|a, b| b.diversity.cmp(&a.diversity));
    eligible.into_iter().take(max).cloned().collect()
}

/// Outcome of one search branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchReport {
    pub query: String,
    pub provenance: VariantProvenance,
    pub returned: usize,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PipelineError>,
}

#[derive(Debug, Clone, Default)]
pub struct FanoutOutcome {
    /// Deduplicated, sorted by raw score descending, truncated to the pool size
    pub fragments: Vec<Fragment>,
    pub branches: Vec<BranchReport>,
    /// Set only when every branch failed and at least one failure was fatal
    pub fatal: Option<PipelineError>,
}

impl FanoutOutcome {
    pub fn failed_branches(&self) -> usize {
        self.branches.iter().filter(|b| b.error.is_some()).count()
    }
}

/// Dispatches the original query plus selected variants against a search provider.
#[derive(Clone)]
pub struct FanoutSearcher {
    provider: Arc<dyn SearchProvider>,
    settings: FanoutSettings,
    dedup: DedupSettings,
}

impl FanoutSearcher {
    pub fn new(
        provider: Arc<dyn SearchProvider>,
        settings: FanoutSettings,
        dedup: DedupSettings,
    ) -> Self {
        Self {
            provider,
            settings,
            dedup,
        }
    }

    pub fn settings(&self) -> &FanoutSettings {
        &self.settings
    }

    /// Search every branch, wait for all of them, then merge and dedupe.
    ///
    /// A failed or timed-out branch contributes nothing; siblings are never cancelled.
    pub async fn search(
        &self,
        query: &Query,
        variants: &[QueryVariant],
        max_fragments: usize,
        score_floor: f64,
    ) -> FanoutOutcome {
        let mut branches = vec![QueryVariant::original(query.text.clone())];
        branches.extend(select_diverse_variants(variants, self.settings.max_variants));

        let top_k = max_fragments * self.settings.candidate_multiplier;
        let timeout = self.settings.branch_timeout;

        let tasks = branches.into_iter().map(|variant| {
            let provider = Arc::clone(&self.provider);
            let request = SearchRequest {
                query: variant.text.clone(),
                top_k,
                score_floor,
                document_ids: query.document_ids.clone(),
                user_id: query.user_id.clone(),
            };
            async move {
                let start = Instant::now();
                let result = match tokio::time::timeout(timeout, provider.search(&request)).await {
                    Ok(Ok(fragments)) => Ok(fragments),
                    Ok(Err(e)) => Err(PipelineError::from_provider(&e)),
                    Err(_) => Err(PipelineError::degraded(format!(
                        "Search timed out after {}ms",
                        timeout.as_millis()
                    ))),
                };
                (variant, result, start.elapsed().as_millis() as u64)
            }
        });

        let results: Vec<_> = stream::iter(tasks)
            .buffered(self.settings.max_in_flight.max(1))
            .collect()
            .await;

        let mut merged = Vec::new();
        let mut reports = Vec::with_capacity(results.len());
        for (variant, result, latency_ms) in results {
            match result {
                Ok(fragments) => {
                    debug!(
                        query = %variant.text,
                        returned = fragments.len(),
                        latency_ms = latency_ms,
                        "Search branch completed"
                    );
                    reports.push(BranchReport {
                        query: variant.text.clone(),
                        provenance: variant.provenance,
                        returned: fragments.len(),
                        latency_ms,
                        error: None,
                    });
                    merged.extend(fragments.into_iter().map(|mut f| {
                        f.source_query = Some(variant.text.clone());
                        f
                    }));
                }
                Err(error) => {
                    warn!(
                        query = %variant.text,
                        kind = %error.kind,
                        error = %error.message,
                        latency_ms = latency_ms,
                        "Search branch failed"
                    );
                    reports.push(BranchReport {
                        query: variant.text,
                        provenance: variant.provenance,
                        returned: 0,
                        latency_ms,
                        error: Some(error),
                    });
                }
            }
        }

        let all_failed = !reports.is_empty() && reports.iter().all(|r| r.error.is_some());
        let fatal = if all_failed {
            reports
                .iter()
                .filter_map(|r| r.error.as_ref())
                .find(|e| e.is_fatal())
                .cloned()
        } else {
            None
        };

        let mut fragments = dedupe_candidates(merged, &self.dedup);
        fragments.truncate(max_fragments * self.settings.pool_multiplier);

        FanoutOutcome {
            fragments,
            branches: reports,
            fatal,
        }
    }
}
