//! Langbase-backed collaborators: pipes for classification, expansion and
//! reasoning, memory retrieval for search.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{QueryClassifier, QueryExpander, ReasoningStrategies, SearchProvider, SearchRequest};
use crate::config::PipeConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::langbase::{
    extract_json_from_completion, LangbaseClient, MemoryChunk, MemoryRetrieveRequest, Message,
    PipeRequest,
};
use crate::prompts::{
    CLASSIFIER_PROMPT, COUNTERFACTUAL_PROMPT, EXPANDER_PROMPT, FACTUAL_REASONING_PROMPT,
    FALLBACK_KNOWLEDGE_PROMPT, TEMPORAL_ANALYSIS_PROMPT,
};
use crate::types::{Classification, Fragment, Query, QueryCategory, QueryVariant};

fn parse_completion<T: for<'de> Deserialize<'de>>(completion: &str) -> ProviderResult<T> {
    let json = extract_json_from_completion(completion)
        .map_err(|message| ProviderError::InvalidResponse { message })?;
    serde_json::from_str(json).map_err(|e| ProviderError::InvalidResponse {
        message: format!("Failed to parse completion JSON: {}", e),
    })
}

#[derive(Debug, Deserialize)]
struct ClassifierOutput {
    category: String,
    confidence: f64,
    #[serde(default)]
    rationale: String,
    #[serde(default = "default_true")]
    needs_retrieval: bool,
    #[serde(default = "default_true")]
    use_fallback_knowledge: bool,
}

fn default_true() -> bool {
    true
}

/// Classifier backed by a JSON-output pipe.
#[derive(Clone)]
pub struct LangbaseClassifier {
    client: LangbaseClient,
    pipe_name: String,
}

impl LangbaseClassifier {
    pub fn new(client: LangbaseClient, pipe_name: impl Into<String>) -> Self {
        Self {
            client,
            pipe_name: pipe_name.into(),
        }
    }

    /// Create or update the backing pipe
    pub async fn ensure_pipe(&self) -> ProviderResult<()> {
        self.client
            .ensure_pipe(&self.pipe_name, "Query classification", CLASSIFIER_PROMPT)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl QueryClassifier for LangbaseClassifier {
    async fn classify(&self, query: &Query) -> ProviderResult<Classification> {
        let request = PipeRequest::new(
            &self.pipe_name,
            vec![
                Message::system(CLASSIFIER_PROMPT),
                Message::user(query.text.clone()),
            ],
        );
        let response = self.client.call_pipe(request).await?;
        let output: ClassifierOutput = parse_completion(&response.completion)?;

        let category: QueryCategory = output
            .category
            .parse()
            .map_err(|message| ProviderError::InvalidResponse { message })?;

        debug!(
            category = %category,
            confidence = output.confidence,
            "Query classified"
        );

        Ok(Classification::new(category, output.confidence, output.rationale)
            .with_retrieval(output.needs_retrieval)
            .with_fallback_knowledge(output.use_fallback_knowledge))
    }
}

#[derive(Debug, Deserialize)]
struct ExpanderOutput {
    #[serde(default)]
    variants: Vec<String>,
}

/// Query expander backed by a JSON-output pipe.
#[derive(Clone)]
pub struct LangbaseExpander {
    client: LangbaseClient,
    pipe_name: String,
    max_variants: usize,
}

impl LangbaseExpander {
    pub fn new(client: LangbaseClient, pipe_name: impl Into<String>) -> Self {
        Self {
            client,
            pipe_name: pipe_name.into(),
            max_variants: 3,
        }
    }

    pub fn with_max_variants(mut self, max_variants: usize) -> Self {
        self.max_variants = max_variants;
        self
    }

    /// Create or update the backing pipe
    pub async fn ensure_pipe(&self) -> ProviderResult<()> {
        self.client
            .ensure_pipe(&self.pipe_name, "Query expansion", EXPANDER_PROMPT)
            .await?;
        Ok(())
    }
}

/// Trim, drop blanks and restatements of the original, and dedupe case-insensitively.
fn clean_variants(original: &str, raw: Vec<String>, max: usize) -> Vec<QueryVariant> {
    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(original.trim().to_lowercase());
    raw.into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && seen.insert(v.to_lowercase()))
        .take(max)
        .enumerate()
        .map(|(slot, text)| QueryVariant::expansion(text, slot, original))
        .collect()
}

#[async_trait]
impl QueryExpander for LangbaseExpander {
    async fn expand(&self, query: &Query) -> ProviderResult<Vec<QueryVariant>> {
        let request = PipeRequest::new(
            &self.pipe_name,
            vec![
                Message::system(EXPANDER_PROMPT),
                Message::user(query.text.clone()),
            ],
        )
        .with_variable("max_variants", self.max_variants.to_string());
        let response = self.client.call_pipe(request).await?;
        let output: ExpanderOutput = parse_completion(&response.completion)?;
        let variants = clean_variants(&query.text, output.variants, self.max_variants);
        debug!(variants = variants.len(), "Query expanded");
        Ok(variants)
    }
}

const DOCUMENT_ID_KEYS: &[&str] = &["documentId", "docName"];

/// Search over one or more Langbase memories.
#[derive(Clone)]
pub struct LangbaseMemorySearch {
    client: LangbaseClient,
    memories: Vec<String>,
}

impl LangbaseMemorySearch {
    pub fn new(client: LangbaseClient, memories: Vec<String>) -> Self {
        Self { client, memories }
    }
}

/// Convert a retrieved chunk into a fragment, rejecting chunks that cannot be
/// attributed to a document.
pub(crate) fn chunk_to_fragment(chunk: MemoryChunk) -> ProviderResult<Fragment> {
    if !chunk.similarity.is_finite() {
        return Err(ProviderError::InvalidResponse {
            message: format!("Non-finite similarity {}", chunk.similarity),
        });
    }

    let mut meta: BTreeMap<String, String> = chunk.meta.into_iter().collect();
    let document_id = DOCUMENT_ID_KEYS
        .iter()
        .find_map(|key| meta.get(*key).cloned())
        .ok_or_else(|| ProviderError::InvalidResponse {
            message: "Memory chunk has no documentId or docName".to_string(),
        })?;

    let position = match meta.remove("position") {
        Some(raw) => raw.parse::<u32>().map_err(|_| ProviderError::InvalidResponse {
            message: format!("Invalid chunk position: {}", raw),
        })?,
        None => 0,
    };
    let id = meta
        .remove("chunkId")
        .unwrap_or_else(|| format!("{}#{}", document_id, position));
    let filename = meta
        .remove("filename")
        .unwrap_or_else(|| document_id.clone());
    meta.remove("documentId");

    let mut fragment = Fragment::new(id, document_id, chunk.text, chunk.similarity)
        .with_filename(filename)
        .with_position(position);
    fragment.metadata = meta;
    Ok(fragment)
}

#[async_trait]
impl SearchProvider for LangbaseMemorySearch {
    async fn search(&self, request: &SearchRequest) -> ProviderResult<Vec<Fragment>> {
        let start = Instant::now();
        let mut retrieve =
            MemoryRetrieveRequest::new(&request.query, &self.memories, request.top_k);
        if let Some(ids) = request.document_ids.as_deref().filter(|ids| !ids.is_empty()) {
            retrieve = retrieve.with_in_filter("documentId", ids);
        }

        let chunks = self.client.retrieve_memory(retrieve).await?;
        let returned = chunks.len();

        let mut fragments = Vec::with_capacity(returned);
        for chunk in chunks {
            let fragment = chunk_to_fragment(chunk)?;
            if fragment.raw_score < request.score_floor {
                continue;
            }
            if let Some(ids) = &request.document_ids {
                if !ids.is_empty() && !ids.contains(&fragment.document_id) {
                    continue;
                }
            }
            if let (Some(user), Some(owner)) = (&request.user_id, fragment.metadata.get("userId")) {
                if user != owner {
                    warn!(fragment_id = %fragment.id, "Dropping fragment owned by another user");
                    continue;
                }
            }
            fragments.push(fragment);
        }
        fragments.truncate(request.top_k);

        info!(
            returned = returned,
            kept = fragments.len(),
            score_floor = request.score_floor,
            latency_ms = start.elapsed().as_millis(),
            "Memory search completed"
        );
        Ok(fragments)
    }
}

/// Reasoning strategies, one pipe each.
#[derive(Clone)]
pub struct LangbaseReasoner {
    client: LangbaseClient,
    pipes: PipeConfig,
}

impl LangbaseReasoner {
    pub fn new(client: LangbaseClient, pipes: PipeConfig) -> Self {
        Self { client, pipes }
    }

    async fn run(&self, pipe: &str, messages: Vec<Message>) -> ProviderResult<String> {
        let response = self.client.call_pipe(PipeRequest::new(pipe, messages)).await?;
        let answer = response.completion.trim();
        if answer.is_empty() {
            return Err(ProviderError::InvalidResponse {
                message: format!("Pipe {} returned an empty completion", pipe),
            });
        }
        Ok(answer.to_string())
    }
}

/// Numbered source passages for grounded prompts.
fn format_sources(fragments: &[Fragment]) -> String {
    fragments
        .iter()
        .enumerate()
        .map(|(i, f)| {
            format!(
                "[{}] {} (section {})\n{}",
                i + 1,
                f.filename,
                f.position,
                f.content.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn grounded_messages(prompt: &str, query: &Query, fragments: &[Fragment]) -> Vec<Message> {
    vec![
        Message::system(prompt),
        Message::user(format!(
            "Sources:\n{}\n\nQuestion: {}",
            format_sources(fragments),
            query.text
        )),
    ]
}

#[async_trait]
impl ReasoningStrategies for LangbaseReasoner {
    async fn reason_factual(
        &self,
        query: &Query,
        fragments: &[Fragment],
        _classification: &Classification,
    ) -> ProviderResult<String> {
        self.run(
            &self.pipes.factual,
            grounded_messages(FACTUAL_REASONING_PROMPT, query, fragments),
        )
        .await
    }

    async fn reason_counterfactual(
        &self,
        query: &Query,
        fragments: &[Fragment],
        _classification: &Classification,
    ) -> ProviderResult<String> {
        self.run(
            &self.pipes.counterfactual,
            grounded_messages(COUNTERFACTUAL_PROMPT, query, fragments),
        )
        .await
    }

    async fn reason_temporal(
        &self,
        query: &Query,
        fragments: &[Fragment],
        _classification: &Classification,
    ) -> ProviderResult<String> {
        self.run(
            &self.pipes.temporal,
            grounded_messages(TEMPORAL_ANALYSIS_PROMPT, query, fragments),
        )
        .await
    }

    async fn reason_fallback_knowledge(
        &self,
        query: &Query,
        classification: &Classification,
    ) -> ProviderResult<String> {
        let messages = vec![
            Message::system(FALLBACK_KNOWLEDGE_PROMPT),
            Message::user(format!(
                "Question type: {}\nQuestion: {}",
                classification.category, query.text
            )),
        ];
        self.run(&self.pipes.fallback, messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn chunk(meta: &[(&str, &str)]) -> MemoryChunk {
        MemoryChunk {
            text: "Refunds are issued within 30 days.".to_string(),
            similarity: 0.82,
            meta: meta
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn test_chunk_to_fragment_maps_metadata() {
        let fragment = chunk_to_fragment(chunk(&[
            ("documentId", "doc-1"),
            ("chunkId", "doc-1-c4"),
            ("position", "4"),
            ("filename", "policy.pdf"),
            ("section", "Returns"),
        ]))
        .unwrap();

        assert_eq!(fragment.id, "doc-1-c4");
        assert_eq!(fragment.document_id, "doc-1");
        assert_eq!(fragment.filename, "policy.pdf");
        assert_eq!(fragment.position, 4);
        assert_eq!(fragment.raw_score, 0.82);
        assert_eq!(fragment.metadata.get("section").map(String::as_str), Some("Returns"));
        assert!(!fragment.metadata.contains_key("chunkId"));
    }

    #[test]
    fn test_chunk_without_chunk_id_gets_positional_id() {
        let fragment = chunk_to_fragment(chunk(&[("docName", "faq.md"), ("position", "2")])).unwrap();
        assert_eq!(fragment.id, "faq.md#2");
        assert_eq!(fragment.filename, "faq.md");
    }

    #[test]
    fn test_chunk_without_document_is_rejected() {
        let err = chunk_to_fragment(chunk(&[("chunkId", "x")])).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse { .. }));

        let err = chunk_to_fragment(chunk(&[("documentId", "d"), ("position", "first")])).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse { .. }));
    }

    #[test]
    fn test_clean_variants() {
        let variants = clean_variants(
            "refund policy",
            vec![
                "Refund Policy".to_string(),
                "  ".to_string(),
                "money back guarantee".to_string(),
                "money back guarantee".to_string(),
                "return rules".to_string(),
                "store credit".to_string(),
            ],
            2,
        );
        let texts: Vec<&str> = variants.iter().map(|v| v.text.as_str()).collect();
        assert_eq!(texts, vec!["money back guarantee", "return rules"]);
        assert_eq!(variants[1].diversity, 2);
    }

    #[test]
    fn test_parse_classifier_output() {
        let output: ClassifierOutput = parse_completion(
            "```json\n{\"category\": \"temporal\", \"confidence\": 0.7}\n```",
        )
        .unwrap();
        assert_eq!(output.category, "temporal");
        assert!(output.needs_retrieval);
        assert!(output.use_fallback_knowledge);
    }

    #[test]
    fn test_format_sources_numbers_fragments() {
        let fragments = vec![
            Fragment::new("a", "d", " first ", 0.9).with_filename("a.md"),
            Fragment::new("b", "d", "second", 0.8).with_filename("b.md").with_position(3),
        ];
        assert_eq!(
            format_sources(&fragments),
            "[1] a.md (section 0)\nfirst\n\n[2] b.md (section 3)\nsecond"
        );
    }
}
