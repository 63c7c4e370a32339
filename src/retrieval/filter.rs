//! Two-tier relevance filtering and ambiguity-triggered reranking.
//!
//! Tier 1 is a cheap score-statistics cut. Tier 2 reads fragment content
//! against the query and its detected intent. Both implement
//! [`RelevanceStrategy`] so the escalation decision does not depend on which
//! concrete strategy is wired in.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::dedup::by_raw_score_desc;
use crate::cache::{contains_phrase, word_set};
use crate::error::PipelineError;
use crate::types::{Fragment, QueryCategory};

#[derive(Debug, Clone, PartialEq)]
pub struct FilterSettings {
    /// Tier 1 keeps scores within this fraction below the mean
    pub mean_tolerance: f64,
    /// Tier 1 runs above, and truncates to, `tier1_multiplier * max_fragments`
    pub tier1_multiplier: usize,
    /// Rerank when the top three raw scores span at most this much
    pub top3_band: f64,
    /// Rerank when the top two raw scores span at most this much
    pub top2_band: f64,
    pub raw_weight: f64,
    pub relevance_weight: f64,
    /// Focused selection keeps fragments at or above this share of the best relevance
    pub focus_ratio: f64,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            mean_tolerance: 0.10,
            tier1_multiplier: 2,
            top3_band: 0.05,
            top2_band: 0.02,
            raw_weight: 0.4,
            relevance_weight: 0.6,
            focus_ratio: 0.5,
        }
    }
}

/// What a filter is asked to do.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterRequest {
    pub query: String,
    pub category: QueryCategory,
    pub max_fragments: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutcome {
    pub fragments: Vec<Fragment>,
    pub intent: Option<QueryIntent>,
    pub strategy: Option<FilterStrategy>,
}

/// Shared contract for statistical and content-aware filters.
#[async_trait]
pub trait RelevanceStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn filter(
        &self,
        request: &FilterRequest,
        candidates: Vec<Fragment>,
    ) -> Result<FilterOutcome, PipelineError>;
}

/// Tier 1: keep scores near or above the mean, then cut to size.
#[derive(Debug, Clone, Default)]
pub struct StatisticalFilter {
    settings: FilterSettings,
}

impl StatisticalFilter {
    pub fn new(settings: FilterSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl RelevanceStrategy for StatisticalFilter {
    fn name(&self) -> &'static str {
        "statistical"
    }

    async fn filter(
        &self,
        request: &FilterRequest,
        mut candidates: Vec<Fragment>,
    ) -> Result<FilterOutcome, PipelineError> {
        if !candidates.is_empty() {
            let mean =
                candidates.iter().map(|f| f.raw_score).sum::<f64>() / candidates.len() as f64;
            let cutoff = mean * (1.0 - self.settings.mean_tolerance);
            candidates.retain(|f| f.raw_score >= cutoff);
            candidates.sort_by(by_raw_score_desc);
            candidates.truncate(request.max_fragments * self.settings.tier1_multiplier);
        }
        Ok(FilterOutcome {
            fragments: candidates,
            intent: None,
            strategy: None,
        })
    }
}

/// What the user is trying to get out of the documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    Comparative,
    Comprehensive,
    Focused,
    Temporal,
    Procedural,
}

const COMPARATIVE_MARKERS: &[&str] = &[
    "compare",
    "comparison",
    "difference",
    "differences",
    "differ",
    "versus",
    "vs",
    "better than",
    "pros and cons",
];
const TEMPORAL_MARKERS: &[&str] = &[
    "when",
    "timeline",
    "history",
    "over time",
    "before",
    "after",
    "changed",
    "evolution",
];
const PROCEDURAL_MARKERS: &[&str] = &[
    "how to",
    "how do",
    "how can",
    "steps",
    "process",
    "procedure",
    "guide",
];
const COMPREHENSIVE_MARKERS: &[&str] = &[
    "all",
    "every",
    "list",
    "overview",
    "summarize",
    "summary",
    "everything",
    "comprehensive",
];

impl QueryIntent {
    /// First match wins: comparative, temporal, procedural, comprehensive, else focused.
    pub fn detect(query: &str) -> Self {
        let any = |markers: &[&str]| markers.iter().any(|m| contains_phrase(query, m));
        if any(COMPARATIVE_MARKERS) {
            QueryIntent::Comparative
        } else if any(TEMPORAL_MARKERS) {
            QueryIntent::Temporal
        } else if any(PROCEDURAL_MARKERS) {
            QueryIntent::Procedural
        } else if any(COMPREHENSIVE_MARKERS) {
            QueryIntent::Comprehensive
        } else {
            QueryIntent::Focused
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::Comparative => "comparative",
            QueryIntent::Comprehensive => "comprehensive",
            QueryIntent::Focused => "focused",
            QueryIntent::Temporal => "temporal",
            QueryIntent::Procedural => "procedural",
        }
    }
}

impl std::fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the content-aware filter selects survivors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterStrategy {
    KeepAll,
    KeepMost,
    FocusedSelection,
    BalancedComparison,
    ComprehensiveCoverage,
}

impl FilterStrategy {
    /// Strategy and minimum survivor count for an intent.
    pub fn for_intent(intent: QueryIntent, candidates: usize) -> (Self, usize) {
        let (strategy, floor) = match intent {
            QueryIntent::Comparative => (FilterStrategy::BalancedComparison, 3),
            QueryIntent::Comprehensive => (FilterStrategy::ComprehensiveCoverage, 4),
            QueryIntent::Temporal => (FilterStrategy::KeepMost, 3),
            QueryIntent::Procedural => (FilterStrategy::KeepMost, 2),
            QueryIntent::Focused => (FilterStrategy::FocusedSelection, 2),
        };
        if candidates <= floor {
            (FilterStrategy::KeepAll, floor)
        } else {
            (strategy, floor)
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterStrategy::KeepAll => "keep_all",
            FilterStrategy::KeepMost => "keep_most",
            FilterStrategy::FocusedSelection => "focused_selection",
            FilterStrategy::BalancedComparison => "balanced_comparison",
            FilterStrategy::ComprehensiveCoverage => "comprehensive_coverage",
        }
    }
}

impl std::fmt::Display for FilterStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "have", "has", "had", "do",
    "does", "did", "will", "would", "could", "should", "can", "to", "of", "in", "for", "on",
    "with", "at", "by", "from", "as", "and", "or", "but", "not", "what", "which", "who", "how",
    "why", "when", "where", "this", "that", "these", "those", "it", "its", "our", "your", "my",
    "me", "we", "you", "about", "there", "their", "they",
];

/// Query words that carry meaning: lowercase, at least three characters, no stopwords.
pub fn key_terms(query: &str) -> HashSet<String> {
    word_set(query)
        .into_iter()
        .filter(|w| w.chars().count() >= 3 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Share of the query's key terms present in `content`, in [0, 1].
pub fn content_relevance(query: &str, content: &str) -> f64 {
    let terms = key_terms(query);
    if terms.is_empty() {
        return 0.0;
    }
    let words = word_set(content);
    let hits = terms.iter().filter(|t| words.contains(*t)).count();
    hits as f64 / terms.len() as f64
}

/// Tier 2: intent-aware selection using term overlap between query and content.
#[derive(Debug, Clone, Default)]
pub struct ContentAwareFilter {
    settings: FilterSettings,
}

impl ContentAwareFilter {
    pub fn new(settings: FilterSettings) -> Self {
        Self { settings }
    }

    fn select(
        &self,
        strategy: FilterStrategy,
        scored: &[(Fragment, f64)],
    ) -> Vec<Fragment> {
        let relevant = || scored.iter().filter(|(_, r)| *r > 0.0).map(|(f, _)| f.clone());
        match strategy {
            FilterStrategy::KeepAll => scored.iter().map(|(f, _)| f.clone()).collect(),
            FilterStrategy::KeepMost => relevant().collect(),
            FilterStrategy::FocusedSelection => {
                let best = scored.iter().map(|(_, r)| *r).fold(0.0_f64, f64::max);
                if best <= 0.0 {
                    return scored.iter().map(|(f, _)| f.clone()).collect();
                }
                let cutoff = best * self.settings.focus_ratio;
                scored
                    .iter()
                    .filter(|(_, r)| *r >= cutoff)
                    .map(|(f, _)| f.clone())
                    .collect()
            }
            FilterStrategy::BalancedComparison => interleave_by_document(relevant().collect()),
            FilterStrategy::ComprehensiveCoverage => {
                let (mut leads, rest): (Vec<Fragment>, Vec<Fragment>) = {
                    let mut seen = HashSet::new();
                    relevant().partition(|f| seen.insert(f.document_id.clone()))
                };
                leads.extend(rest);
                leads
            }
        }
    }
}

/// Round-robin across documents so each side of a comparison is represented.
/// Documents are visited in order of their best fragment.
fn interleave_by_document(fragments: Vec<Fragment>) -> Vec<Fragment> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, std::collections::VecDeque<Fragment>> = HashMap::new();
    for fragment in fragments {
        if !groups.contains_key(&fragment.document_id) {
            order.push(fragment.document_id.clone());
        }
        groups
            .entry(fragment.document_id.clone())
            .or_default()
            .push_back(fragment);
    }

    let mut out = Vec::new();
    loop {
        let mut progressed = false;
        for doc in &order {
            if let Some(fragment) = groups.get_mut(doc).and_then(|q| q.pop_front()) {
                out.push(fragment);
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    out
}

#[async_trait]
impl RelevanceStrategy for ContentAwareFilter {
    fn name(&self) -> &'static str {
        "content_aware"
    }

    async fn filter(
        &self,
        request: &FilterRequest,
        mut candidates: Vec<Fragment>,
    ) -> Result<FilterOutcome, PipelineError> {
        candidates.sort_by(by_raw_score_desc);
        let intent = QueryIntent::detect(&request.query);
        let (strategy, floor) = FilterStrategy::for_intent(intent, candidates.len());

        let scored: Vec<(Fragment, f64)> = candidates
            .iter()
            .map(|f| (f.clone(), content_relevance(&request.query, &f.content)))
            .collect();
        let mut kept = self.select(strategy, &scored);

        if kept.len() < floor {
            let kept_ids: HashSet<String> = kept.iter().map(|f| f.id.clone()).collect();
            let backfill: Vec<Fragment> = candidates
                .into_iter()
                .filter(|f| !kept_ids.contains(&f.id))
                .take(floor - kept.len())
                .collect();
            kept.extend(backfill);
        }

        Ok(FilterOutcome {
            fragments: kept,
            intent: Some(intent),
            strategy: Some(strategy),
        })
    }
}

/// Whether the leading raw scores are too close to trust their order.
pub fn is_ambiguous(fragments: &[Fragment], settings: &FilterSettings) -> bool {
    let mut scores: Vec<f64> = fragments.iter().map(|f| f.raw_score).collect();
    scores.sort_by(|a, b| b.total_cmp(a));
    if scores.len() >= 3 && scores[0] - scores[2] <= settings.top3_band {
        return true;
    }
    scores.len() >= 2 && scores[0] - scores[1] <= settings.top2_band
}

/// Blend raw score with content relevance and resort.
pub fn rerank(query: &str, fragments: &mut [Fragment], settings: &FilterSettings) {
    for fragment in fragments.iter_mut() {
        let relevance = content_relevance(query, &fragment.content);
        fragment.rerank_score =
            Some(settings.raw_weight * fragment.raw_score + settings.relevance_weight * relevance);
    }
    fragments.sort_by(|a, b| {
        b.ranking_score()
            .total_cmp(&a.ranking_score())
            .then_with(|| a.id.cmp(&b.id))
    });
}
