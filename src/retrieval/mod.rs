//! Retrieval stage: cache check, fan-out search, dedupe, two-tier filtering,
//! reranking, display scoring and quality-gated cache write.

mod dedup;
mod fanout;
mod filter;
mod score;

pub use dedup::{
    by_raw_score_desc, char_position_similarity, dedupe_candidates, dedupe_exact_content,
    DedupSettings,
};
pub use fanout::{select_diverse_variants, BranchReport, FanoutOutcome, FanoutSearcher, FanoutSettings};
pub use filter::{
    content_relevance, is_ambiguous, key_terms, rerank, ContentAwareFilter, FilterOutcome,
    FilterRequest, FilterSettings, FilterStrategy, QueryIntent, RelevanceStrategy,
    StatisticalFilter,
};
pub use score::{normalize_expectation, AdaptationStep, BoostTier, ScoreSettings};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, CachedFragments, InsertOutcome};
use crate::error::PipelineError;
use crate::providers::SearchProvider;
use crate::types::{Fragment, Query, QueryCategory, QueryVariant};

/// Tunable retrieval constants.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalSettings {
    pub fanout: FanoutSettings,
    pub dedup: DedupSettings,
    pub filter: FilterSettings,
    pub score: ScoreSettings,
    /// Expectation used when a query does not carry one
    pub default_min_match: f64,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            fanout: FanoutSettings::default(),
            dedup: DedupSettings::default(),
            filter: FilterSettings::default(),
            score: ScoreSettings::default(),
            default_min_match: 0.70,
        }
    }
}

/// Everything the retrieval stage produced, for routing and tracing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalOutcome {
    pub fragments: Vec<Fragment>,
    /// Adapted internal threshold used for filtering
    pub threshold: f64,
    /// Similarity of the cached entry when served from cache
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_similarity: Option<f64>,
    pub cache_stored: bool,
    #[serde(default)]
    pub branches: Vec<BranchReport>,
    /// Which tiers ran and what they did
    #[serde(default)]
    pub notes: Vec<String>,
    /// Non-fatal problems, for the stage trace only
    #[serde(default)]
    pub degraded: Vec<PipelineError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal: Option<PipelineError>,
}

impl RetrievalOutcome {
    pub fn from_cache(&self) -> bool {
        self.cache_similarity.is_some()
    }
}

/// The retrieval stage with its collaborators injected.
#[derive(Clone)]
pub struct RetrievalStage {
    searcher: FanoutSearcher,
    statistical: Arc<dyn RelevanceStrategy>,
    content_aware: Arc<dyn RelevanceStrategy>,
    cache: Arc<CacheStore>,
    settings: RetrievalSettings,
}

impl RetrievalStage {
    pub fn new(
        provider: Arc<dyn SearchProvider>,
        cache: Arc<CacheStore>,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            searcher: FanoutSearcher::new(provider, settings.fanout.clone(), settings.dedup.clone()),
            statistical: Arc::new(StatisticalFilter::new(settings.filter.clone())),
            content_aware: Arc::new(ContentAwareFilter::new(settings.filter.clone())),
            cache,
            settings,
        }
    }

    /// Swap in other tier 1 / tier 2 strategies
    pub fn with_strategies(
        mut self,
        statistical: Arc<dyn RelevanceStrategy>,
        content_aware: Arc<dyn RelevanceStrategy>,
    ) -> Self {
        self.statistical = statistical;
        self.content_aware = content_aware;
        self
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    /// Internal cutoff for a query's expectation, or the default expectation.
    pub fn threshold_for(&self, query: &Query) -> f64 {
        let expectation = query.min_match.unwrap_or(self.settings.default_min_match);
        self.settings.score.adapt_threshold(expectation)
    }

    pub async fn run(
        &self,
        query: &Query,
        variants: &[QueryVariant],
        category: QueryCategory,
        max_fragments: usize,
    ) -> RetrievalOutcome {
        let threshold = self.threshold_for(query);
        let scope = query.scope();

        if let Some(hit) = self
            .cache
            .retrieval()
            .lookup_where(&query.session_id, &query.text, &scope, |cached| {
                cached.covers(threshold, max_fragments)
            })
            .await
        {
            let fragments = hit.payload.narrowed(threshold, max_fragments);
            info!(
                session_id = %query.session_id,
                similarity = hit.similarity,
                reuse_count = hit.reuse_count,
                cached = hit.payload.fragments.len(),
                fragments = fragments.len(),
                "Retrieval cache hit"
            );
            return RetrievalOutcome {
                fragments,
                threshold,
                cache_similarity: Some(hit.similarity),
                notes: vec![format!("cache hit from \"{}\"", hit.source_query)],
                ..RetrievalOutcome::default()
            };
        }

        let fanout = self
            .searcher
            .search(query, variants, max_fragments, threshold)
            .await;

        let mut outcome = RetrievalOutcome {
            threshold,
            branches: fanout.branches,
            ..RetrievalOutcome::default()
        };
        outcome.degraded.extend(
            outcome
                .branches
                .iter()
                .filter_map(|b| b.error.clone())
                .filter(|e| !e.is_fatal()),
        );

        if let Some(fatal) = fanout.fatal {
            warn!(kind = %fatal.kind, "Every search branch failed");
            outcome.fatal = Some(fatal);
            return outcome;
        }

        let mut candidates = fanout.fragments;
        let before_floor = candidates.len();
        candidates.retain(|f| f.raw_score >= threshold);
        if candidates.len() < before_floor {
            outcome.notes.push(format!(
                "score floor {:.2}: {} -> {}",
                threshold,
                before_floor,
                candidates.len()
            ));
        }

        let request = FilterRequest {
            query: query.text.clone(),
            category,
            max_fragments,
        };
        let mut fragments = self.refine(&request, candidates, &mut outcome).await;

        fragments.truncate(max_fragments);
        let mut fragments = dedupe_exact_content(fragments);
        for fragment in fragments.iter_mut() {
            fragment.display_score = self.settings.score.display_score(fragment.raw_score);
        }

        let quality = mean_raw_score(&fragments);
        let stored = self
            .cache
            .retrieval()
            .insert(
                &query.session_id,
                &query.text,
                &scope,
                CachedFragments::new(fragments.clone(), threshold, max_fragments),
                quality,
            )
            .await;
        outcome.cache_stored = matches!(stored, InsertOutcome::Stored { .. });

        info!(
            session_id = %query.session_id,
            fragments = fragments.len(),
            quality = quality,
            cached = outcome.cache_stored,
            "Retrieval completed"
        );

        outcome.fragments = fragments;
        outcome
    }

    /// Tier 1, optional tier 2 escalation, then rerank when ordering is ambiguous.
    async fn refine(
        &self,
        request: &FilterRequest,
        candidates: Vec<Fragment>,
        outcome: &mut RetrievalOutcome,
    ) -> Vec<Fragment> {
        let raw_count = candidates.len();
        let max = request.max_fragments;
        let tier1_limit = max * self.settings.filter.tier1_multiplier;

        let mut working = candidates.clone();
        let mut over_trimmed = false;
        if raw_count > tier1_limit {
            match self.statistical.filter(request, candidates.clone()).await {
                Ok(result) => {
                    outcome.notes.push(format!(
                        "{}: {} -> {}",
                        self.statistical.name(),
                        raw_count,
                        result.fragments.len()
                    ));
                    over_trimmed = result.fragments.len() < max && raw_count >= max;
                    working = result.fragments;
                }
                Err(e) => {
                    warn!(error = %e, "Statistical filter failed, keeping candidates");
                    outcome.degraded.push(e);
                }
            }
        }

        if over_trimmed || request.category.benefits_from_disambiguation() {
            let input = if over_trimmed {
                candidates
            } else {
                working.clone()
            };
            match self.content_aware.filter(request, input).await {
                Ok(result) => {
                    outcome.notes.push(format!(
                        "{}: {} ({}) -> {}",
                        self.content_aware.name(),
                        result.strategy.map(|s| s.as_str()).unwrap_or("none"),
                        result.intent.map(|i| i.as_str()).unwrap_or("none"),
                        result.fragments.len()
                    ));
                    working = result.fragments;
                }
                Err(e) => {
                    // Score-only result stands
                    warn!(error = %e, "Content-aware filter unavailable");
                    outcome.degraded.push(e);
                }
            }
        }

        if is_ambiguous(&working, &self.settings.filter) {
            debug!(candidates = working.len(), "Ambiguous ranking, reranking");
            rerank(&request.query, &mut working, &self.settings.filter);
            outcome.notes.push("rerank: ambiguous top scores".to_string());
        }

        working
    }
}

fn mean_raw_score(fragments: &[Fragment]) -> f64 {
    if fragments.is_empty() {
        return 0.0;
    }
    fragments.iter().map(|f| f.raw_score).sum::<f64>() / fragments.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, ProviderError};
    use crate::providers::MockSearchProvider;
    use async_trait::async_trait;

    fn scenario_fragments() -> Vec<Fragment> {
        vec![
            Fragment::new("f1", "policy", "Refunds are available within 30 days of purchase.", 0.91),
            Fragment::new("f2", "policy", "Refund requests require the original receipt.", 0.88),
            Fragment::new("f3", "faq", "Store credit may be offered for late returns.", 0.61),
            Fragment::new("f4", "faq", "Gift cards cannot be exchanged for cash.", 0.59),
            Fragment::new("f5", "misc", "Office hours are nine to five.", 0.40),
        ]
    }

    fn stage_with(provider: MockSearchProvider) -> (RetrievalStage, Arc<CacheStore>) {
        let cache = Arc::new(CacheStore::default());
        let stage = RetrievalStage::new(
            Arc::new(provider),
            Arc::clone(&cache),
            RetrievalSettings::default(),
        );
        (stage, cache)
    }

    #[tokio::test]
    async fn test_refund_scenario_applies_floor_and_display_boost() {
        let mut provider = MockSearchProvider::new();
        provider
            .expect_search()
            .times(1)
            .returning(|_| Ok(scenario_fragments()));
        let (stage, cache) = stage_with(provider);

        let query = Query::new("What is the refund policy?", "s1");
        let outcome = stage.run(&query, &[], QueryCategory::Factual, 5).await;

        assert_eq!(outcome.threshold, 0.60);
        let scores: Vec<f64> = outcome.fragments.iter().map(|f| f.raw_score).collect();
        assert_eq!(scores, vec![0.91, 0.88, 0.61]);
        let display: Vec<f64> = outcome.fragments.iter().map(|f| f.display_score).collect();
        assert!((display[0] - 0.95).abs() < 1e-9);
        assert!((display[1] - 0.95).abs() < 1e-9);
        assert!((display[2] - 0.61 * 1.15).abs() < 1e-9);
        // mean 0.80 clears the quality gate
        assert!(outcome.cache_stored);
        assert_eq!(cache.stats().await.retrieval.entries, 1);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_search() {
        let mut provider = MockSearchProvider::new();
        provider
            .expect_search()
            .times(1)
            .returning(|_| Ok(scenario_fragments()));
        let (stage, cache) = stage_with(provider);

        let first = Query::new("What is the refund policy?", "s1");
        let fresh = stage.run(&first, &[], QueryCategory::Factual, 5).await;

        // Same words, different punctuation and case
        let second = Query::new("what is THE refund policy", "s1");
        let cached = stage.run(&second, &[], QueryCategory::Factual, 5).await;

        assert_eq!(cached.cache_similarity, Some(1.0));
        assert_eq!(cached.fragments, fresh.fragments);
        let entries = cache.retrieval().entries("s1").await;
        assert_eq!(entries[0].reuse_count, 1);
    }

    #[tokio::test]
    async fn test_cache_hit_honors_stricter_threshold_and_cap() {
        let mut provider = MockSearchProvider::new();
        provider
            .expect_search()
            .times(1)
            .returning(|_| Ok(scenario_fragments()));
        let (stage, cache) = stage_with(provider);

        let first = Query::new("What is the refund policy?", "s1");
        stage.run(&first, &[], QueryCategory::Factual, 5).await;

        let strict = Query::new("What is the refund policy?", "s1").with_min_match(95.0);
        let outcome = stage.run(&strict, &[], QueryCategory::Factual, 1).await;

        assert_eq!(outcome.threshold, 0.75);
        assert_eq!(outcome.cache_similarity, Some(1.0));
        let ids: Vec<&str> = outcome.fragments.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["f1"]);

        let entries = cache.retrieval().entries("s1").await;
        assert_eq!(entries[0].reuse_count, 1);
        assert_eq!(entries[0].payload.fragments.len(), 3);
    }

    #[tokio::test]
    async fn test_looser_request_than_cached_searches_again() {
        let mut provider = MockSearchProvider::new();
        provider
            .expect_search()
            .times(2)
            .returning(|_| Ok(scenario_fragments()));
        let (stage, cache) = stage_with(provider);

        let narrow = Query::new("What is the refund policy?", "s1");
        stage.run(&narrow, &[], QueryCategory::Factual, 2).await;

        let wider = stage.run(&narrow, &[], QueryCategory::Factual, 5).await;
        assert!(!wider.from_cache());
        assert_eq!(wider.fragments.len(), 3);
        assert_eq!(cache.retrieval().entries("s1").await[0].payload.max_fragments, 5);
    }

    #[tokio::test]
    async fn test_low_quality_results_are_not_cached() {
        let mut provider = MockSearchProvider::new();
        provider.expect_search().returning(|_| {
            Ok(vec![
                Fragment::new("a", "d", "Loosely related passage", 0.55),
                Fragment::new("b", "d", "Another tangent entirely", 0.52),
            ])
        });
        let (stage, cache) = stage_with(provider);

        let query = Query::new("obscure question", "s1").with_min_match(0.5);
        let outcome = stage.run(&query, &[], QueryCategory::Factual, 5).await;

        assert_eq!(outcome.fragments.len(), 2);
        assert!(!outcome.cache_stored);
        assert_eq!(cache.stats().await.retrieval.rejected, 1);
    }

    #[tokio::test]
    async fn test_all_branches_fatal_is_reported() {
        let mut provider = MockSearchProvider::new();
        provider.expect_search().returning(|_| {
            Err(ProviderError::Api {
                status: 429,
                message: "rate limit".to_string(),
            })
        });
        let (stage, cache) = stage_with(provider);

        let outcome = stage
            .run(&Query::new("q", "s1"), &[], QueryCategory::Factual, 5)
            .await;
        assert_eq!(
            outcome.fatal.map(|e| e.kind),
            Some(ErrorKind::ProviderQuotaExceeded)
        );
        assert!(outcome.fragments.is_empty());
        assert_eq!(cache.stats().await.retrieval.entries, 0);
    }

    struct BrokenFilter;

    #[async_trait]
    impl RelevanceStrategy for BrokenFilter {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn filter(
            &self,
            _request: &FilterRequest,
            _candidates: Vec<Fragment>,
        ) -> Result<FilterOutcome, PipelineError> {
            Err(PipelineError::degraded("content filter offline"))
        }
    }

    #[tokio::test]
    async fn test_content_filter_failure_falls_back_to_scores() {
        let mut provider = MockSearchProvider::new();
        provider
            .expect_search()
            .returning(|_| Ok(scenario_fragments()));
        let (stage, _cache) = stage_with(provider);
        let stage = stage.with_strategies(
            Arc::new(StatisticalFilter::default()),
            Arc::new(BrokenFilter),
        );

        // Analytical queries always escalate to tier 2
        let query = Query::new("Compare refund and exchange rules", "s1");
        let outcome = stage.run(&query, &[], QueryCategory::Analytical, 5).await;

        assert_eq!(outcome.fragments.len(), 3);
        assert_eq!(outcome.degraded.len(), 1);
        assert_eq!(outcome.degraded[0].kind, ErrorKind::StageDegraded);
    }

    #[tokio::test]
    async fn test_tier1_runs_only_on_large_candidate_sets() {
        let mut provider = MockSearchProvider::new();
        provider.expect_search().returning(|_| {
            Ok((0..6)
                .map(|i| {
                    let letter = (b'a' + i as u8) as char;
                    Fragment::new(
                        format!("f{}", i),
                        "d",
                        std::iter::repeat(letter).take(10).collect::<String>(),
                        0.95 - i as f64 * 0.07,
                    )
                })
                .collect())
        });
        let (stage, _cache) = stage_with(provider);

        let outcome = stage
            .run(&Query::new("q", "s1"), &[], QueryCategory::Factual, 2)
            .await;
        assert!(outcome.notes.iter().any(|n| n.starts_with("statistical")));
        assert_eq!(outcome.fragments.len(), 2);
    }
}
