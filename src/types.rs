//! Closed record types shared across the pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A user question entering the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    /// Raw question text
    pub text: String,
    /// Session the query belongs to (scopes cache reuse)
    pub session_id: String,
    /// Restrict retrieval to these documents
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_ids: Option<Vec<String>>,
    /// Requested result cap; falls back to the workflow default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
    /// User-facing minimum match expectation, as a fraction (0.95) or percentage (95)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_match: Option<f64>,
    /// Owner of the documents being searched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Query {
    /// Create a new query for a session
    pub fn new(text: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            session_id: session_id.into(),
            document_ids: None,
            max_results: None,
            min_match: None,
            user_id: None,
        }
    }

    /// Restrict retrieval to a set of documents
    pub fn with_documents(mut self, document_ids: Vec<String>) -> Self {
        self.document_ids = Some(document_ids);
        self
    }

    /// Set the result cap
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    /// Set the minimum match expectation
    pub fn with_min_match(mut self, min_match: f64) -> Self {
        self.min_match = Some(min_match);
        self
    }

    /// Set the owning user
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Normalized document scope: sorted, deduplicated, empty when unscoped.
    pub fn scope(&self) -> Vec<String> {
        let mut scope = self.document_ids.clone().unwrap_or_default();
        scope.sort();
        scope.dedup();
        scope
    }
}

/// Query category produced by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryCategory {
    /// Direct questions about document content.
    Factual,
    /// "What if" questions.
    Counterfactual,
    /// Questions about ordering or change over time.
    Temporal,
    /// Comparisons and multi-part analysis.
    Analytical,
}

impl QueryCategory {
    /// Get the category name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryCategory::Factual => "factual",
            QueryCategory::Counterfactual => "counterfactual",
            QueryCategory::Temporal => "temporal",
            QueryCategory::Analytical => "analytical",
        }
    }

    /// Categories whose answers depend on picking the right fragments among
    /// similar-scoring ones.
    pub fn benefits_from_disambiguation(&self) -> bool {
        matches!(self, QueryCategory::Analytical | QueryCategory::Temporal)
    }
}

impl std::fmt::Display for QueryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for QueryCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "factual" => Ok(QueryCategory::Factual),
            "counterfactual" => Ok(QueryCategory::Counterfactual),
            "temporal" => Ok(QueryCategory::Temporal),
            "analytical" | "comparative" => Ok(QueryCategory::Analytical),
            _ => Err(format!("Unknown query category: {}", s)),
        }
    }
}

/// Classifier verdict attached to a pipeline run. Immutable once attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: QueryCategory,
    /// Confidence in [0, 1]
    pub confidence: f64,
    pub rationale: String,
    pub needs_retrieval: bool,
    pub use_fallback_knowledge: bool,
}

impl Classification {
    pub fn new(category: QueryCategory, confidence: f64, rationale: impl Into<String>) -> Self {
        Self {
            category,
            confidence: confidence.clamp(0.0, 1.0),
            rationale: rationale.into(),
            needs_retrieval: true,
            use_fallback_knowledge: true,
        }
    }

    /// Conservative default used when the classifier is unavailable.
    pub fn rule_based_default() -> Self {
        Self::new(
            QueryCategory::Factual,
            0.5,
            "Rule-based default: classifier unavailable",
        )
    }

    pub fn with_retrieval(mut self, needs_retrieval: bool) -> Self {
        self.needs_retrieval = needs_retrieval;
        self
    }

    pub fn with_fallback_knowledge(mut self, allowed: bool) -> Self {
        self.use_fallback_knowledge = allowed;
        self
    }
}

/// Where a query variant came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum VariantProvenance {
    Original,
    Expansion { slot: usize },
}

/// A rephrasing of the original query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryVariant {
    pub text: String,
    pub provenance: VariantProvenance,
    /// Words this variant adds beyond the original query
    pub diversity: usize,
}

impl QueryVariant {
    /// The original query as a variant.
    pub fn original(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            provenance: VariantProvenance::Original,
            diversity: 0,
        }
    }

    /// An expansion variant scored against the original query.
    pub fn expansion(text: impl Into<String>, slot: usize, original: &str) -> Self {
        let text = text.into();
        let diversity = crate::cache::novel_word_count(original, &text);
        Self {
            text,
            provenance: VariantProvenance::Expansion { slot },
            diversity,
        }
    }
}

/// A retrievable unit of document content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    /// Globally unique across all indexed documents
    pub id: String,
    pub document_id: String,
    pub filename: String,
    /// Ordinal position within the document
    pub position: u32,
    pub content: String,
    /// Similarity as reported by the search provider
    pub raw_score: f64,
    /// User-facing score; never used for ranking
    pub display_score: f64,
    /// Blended score assigned by reranking
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f64>,
    /// Query text that retrieved this fragment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_query: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Fragment {
    pub fn new(
        id: impl Into<String>,
        document_id: impl Into<String>,
        content: impl Into<String>,
        raw_score: f64,
    ) -> Self {
        let document_id = document_id.into();
        Self {
            id: id.into(),
            filename: document_id.clone(),
            document_id,
            position: 0,
            content: content.into(),
            raw_score,
            display_score: raw_score,
            rerank_score: None,
            source_query: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    pub fn with_position(mut self, position: u32) -> Self {
        self.position = position;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Score used for ordering: reranked when available, raw otherwise.
    pub fn ranking_score(&self) -> f64 {
        self.rerank_score.unwrap_or(self.raw_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_builder() {
        let query = Query::new("What is the refund policy?", "sess-1")
            .with_documents(vec!["b".to_string(), "a".to_string(), "a".to_string()])
            .with_max_results(3)
            .with_min_match(0.9)
            .with_user("user-7");

        assert_eq!(query.session_id, "sess-1");
        assert_eq!(query.max_results, Some(3));
        assert_eq!(query.min_match, Some(0.9));
        assert_eq!(query.user_id.as_deref(), Some("user-7"));
        assert_eq!(query.scope(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_unscoped_query_has_empty_scope() {
        assert!(Query::new("q", "s").scope().is_empty());
    }

    #[test]
    fn test_category_from_str() {
        assert_eq!(
            "Counterfactual".parse::<QueryCategory>().unwrap(),
            QueryCategory::Counterfactual
        );
        assert_eq!(
            "comparative".parse::<QueryCategory>().unwrap(),
            QueryCategory::Analytical
        );
        let err = "poetry".parse::<QueryCategory>().unwrap_err();
        assert_eq!(err, "Unknown query category: poetry");
    }

    #[test]
    fn test_rule_based_default_is_conservative() {
        let c = Classification::rule_based_default();
        assert_eq!(c.category, QueryCategory::Factual);
        assert!(c.needs_retrieval);
        assert!(c.use_fallback_knowledge);
    }

    #[test]
    fn test_classification_clamps_confidence() {
        let c = Classification::new(QueryCategory::Temporal, 1.7, "r");
        assert_eq!(c.confidence, 1.0);
    }

    #[test]
    fn test_expansion_variant_diversity() {
        let v = QueryVariant::expansion(
            "refund policy for damaged items",
            0,
            "What is the refund policy?",
        );
        assert_eq!(v.provenance, VariantProvenance::Expansion { slot: 0 });
        // "for", "damaged", "items"
        assert_eq!(v.diversity, 3);
    }

    #[test]
    fn test_fragment_ranking_score_prefers_rerank() {
        let mut f = Fragment::new("f1", "doc", "text", 0.7);
        assert_eq!(f.ranking_score(), 0.7);
        f.rerank_score = Some(0.9);
        assert_eq!(f.ranking_score(), 0.9);
    }

    #[test]
    fn test_variant_provenance_serialization() {
        let json = serde_json::to_value(VariantProvenance::Expansion { slot: 1 }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "expansion", "slot": 1}));
    }
}
