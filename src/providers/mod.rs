//! Collaborator contracts the pipeline consumes.
//!
//! The workflow engine only talks to these traits. Langbase-backed
//! implementations live in [`langbase`]; tests plug in fakes or mocks.

mod langbase;

pub use langbase::{LangbaseClassifier, LangbaseExpander, LangbaseMemorySearch, LangbaseReasoner};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cache::contains_phrase;
use crate::error::ProviderResult;
use crate::types::{Classification, Fragment, Query, QueryCategory, QueryVariant};

/// One search call against the external provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub top_k: usize,
    /// Adapted internal threshold; never the raw user expectation
    pub score_floor: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Produces a category and confidence for a query.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueryClassifier: Send + Sync {
    async fn classify(&self, query: &Query) -> ProviderResult<Classification>;
}

/// Rephrases a query into alternative variants. May return none.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueryExpander: Send + Sync {
    async fn expand(&self, query: &Query) -> ProviderResult<Vec<QueryVariant>>;
}

/// Similarity search over indexed fragments. Must be safe to call concurrently.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> ProviderResult<Vec<Fragment>>;
}

/// Downstream answer strategies. Exactly one is invoked per run.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReasoningStrategies: Send + Sync {
    async fn reason_factual(
        &self,
        query: &Query,
        fragments: &[Fragment],
        classification: &Classification,
    ) -> ProviderResult<String>;

    async fn reason_counterfactual(
        &self,
        query: &Query,
        fragments: &[Fragment],
        classification: &Classification,
    ) -> ProviderResult<String>;

    async fn reason_temporal(
        &self,
        query: &Query,
        fragments: &[Fragment],
        classification: &Classification,
    ) -> ProviderResult<String>;

    async fn reason_fallback_knowledge(
        &self,
        query: &Query,
        classification: &Classification,
    ) -> ProviderResult<String>;
}

const COUNTERFACTUAL_MARKERS: &[&str] = &[
    "what if",
    "what would happen",
    "suppose",
    "imagine",
    "would have",
    "had not",
    "hypothetically",
];

const TEMPORAL_MARKERS: &[&str] = &[
    "when",
    "before",
    "after",
    "timeline",
    "history",
    "over time",
    "evolve",
    "changed",
    "since",
    "until",
];

const ANALYTICAL_MARKERS: &[&str] = &[
    "compare",
    "comparison",
    "difference",
    "differ",
    "versus",
    "vs",
    "pros and cons",
    "analyze",
    "analyse",
    "trade-off",
];

const CONVERSATIONAL: &[&str] = &["hi", "hello", "hey", "thanks", "thank you", "ok", "okay"];

/// Keyword heuristics used when no model-backed classifier is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedClassifier;

impl RuleBasedClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify without any I/O.
    pub fn classify_text(&self, text: &str) -> Classification {
        let bare = text.trim().to_lowercase();
        let bare = bare.trim_end_matches(['!', '.', '?']);

        if CONVERSATIONAL.contains(&bare) {
            return Classification::new(QueryCategory::Factual, 0.9, "Conversational message")
                .with_retrieval(false);
        }

        let matches = |markers: &[&str]| markers.iter().any(|m| contains_phrase(text, m));

        let (category, rationale) = if matches(COUNTERFACTUAL_MARKERS) {
            (QueryCategory::Counterfactual, "Hypothetical phrasing detected")
        } else if matches(ANALYTICAL_MARKERS) {
            (QueryCategory::Analytical, "Comparison phrasing detected")
        } else if matches(TEMPORAL_MARKERS) {
            (QueryCategory::Temporal, "Time-related phrasing detected")
        } else {
            return Classification::rule_based_default();
        };

        Classification::new(category, 0.6, rationale)
    }
}

#[async_trait]
impl QueryClassifier for RuleBasedClassifier {
    async fn classify(&self, query: &Query) -> ProviderResult<Classification> {
        Ok(self.classify_text(&query.text))
    }
}
